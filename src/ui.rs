use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Cell, Clear, Paragraph, Row, Table, TableState, Wrap},
};

use crate::domain::CMDMode;
use crate::model::{Model, UIData};

pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const STATUSLINE_HEIGHT: usize = 1;
pub const CMDLINE_HEIGHT: usize = 1;
pub const COLUMN_WIDTH_MARGIN: usize = 2;

const POPUP_WIDTH: u16 = 64;
const POPUP_HEIGHT: u16 = 18;

#[derive(Debug, Default)]
pub struct TableUI {}

impl TableUI {
    pub fn new() -> Self {
        Self {}
    }

    pub fn draw(&self, model: &Model, frame: &mut Frame) {
        let uidata = model.get_uidata();
        let [table_area, status_area, cmd_area] = Layout::vertical([
            Constraint::Min(0),
            Constraint::Length(STATUSLINE_HEIGHT as u16),
            Constraint::Length(CMDLINE_HEIGHT as u16),
        ])
        .areas(frame.area());

        self.draw_table(uidata, frame, table_area);
        frame.render_widget(Paragraph::new(status_line(uidata)), status_area);
        self.draw_cmdline(uidata, frame, cmd_area);

        if uidata.show_popup {
            self.draw_popup(uidata, frame);
        }
    }

    fn draw_table(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        if uidata.table.is_empty() {
            let hint = if uidata.loading {
                "Loading ..."
            } else {
                "No data"
            };
            frame.render_widget(Paragraph::new(hint).dark_gray().centered(), area);
            return;
        }

        let nrows = uidata.table.iter().map(|c| c.data.len()).max().unwrap_or(0);
        let rows: Vec<Row> = (0..nrows)
            .map(|ridx| {
                Row::new(uidata.table.iter().map(|column| {
                    Cell::from(column.data.get(ridx).map(String::as_str).unwrap_or(""))
                }))
            })
            .collect();
        let header = Row::new(
            uidata
                .table
                .iter()
                .map(|column| Cell::from(column.name.as_str())),
        )
        .style(Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED))
        .height(TABLE_HEADER_HEIGHT as u16);
        let widths = uidata
            .table
            .iter()
            .map(|column| Constraint::Length(column.width as u16));

        let table = Table::new(rows, widths)
            .header(header)
            .column_spacing(1)
            .row_highlight_style(Style::new().bg(Color::DarkGray))
            .column_highlight_style(Style::new().fg(Color::Yellow))
            .cell_highlight_style(Style::new().bg(Color::Blue).fg(Color::White));

        let mut state = TableState::default()
            .with_selected(Some(uidata.selected_row))
            .with_selected_column(Some(uidata.selected_column));
        frame.render_stateful_widget(table, area, &mut state);
    }

    fn draw_cmdline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        if !uidata.active_cmdinput {
            let hint = Line::from(vec![
                " o".blue().bold(),
                " open ".into(),
                " /".blue().bold(),
                " filter ".into(),
                " s".blue().bold(),
                " sort ".into(),
                " e".blue().bold(),
                " export ".into(),
                " ?".blue().bold(),
                " help ".into(),
                " q".blue().bold(),
                " quit".into(),
            ]);
            frame.render_widget(Paragraph::new(hint), area);
            return;
        }

        let prompt = match uidata.cmd_mode {
            Some(CMDMode::Open) => "Open: ",
            Some(CMDMode::Filter) => "Filter: ",
            None => "> ",
        };
        let line = Line::from(vec![
            Span::styled(prompt, Style::new().bold()),
            Span::raw(uidata.cmdinput.input.as_str()),
        ]);
        frame.render_widget(Paragraph::new(line), area);

        let x = area.x as usize + prompt.len() + uidata.cmdinput.curser_pos;
        let x = x.min(area.right().saturating_sub(1) as usize) as u16;
        frame.set_cursor_position((x, area.y));
    }

    fn draw_popup(&self, uidata: &UIData, frame: &mut Frame) {
        let area = centered(frame.area(), POPUP_WIDTH, POPUP_HEIGHT);
        let block = Block::bordered()
            .title(Line::from(" Help ".bold()).centered())
            .title_bottom(Line::from(" Esc to close ").centered());
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(uidata.popup_message.as_str())
                .block(block)
                .wrap(Wrap { trim: false }),
            area,
        );
    }
}

fn status_line(uidata: &UIData) -> Line<'_> {
    let name = if uidata.name.is_empty() {
        "sv".to_string()
    } else {
        uidata.name.clone()
    };
    let mut spans = vec![
        Span::styled(format!(" {name} "), Style::new().bg(Color::Blue).fg(Color::White)),
        Span::raw(format!(
            " {}/{} ",
            uidata.nrows.min(uidata.abs_selected_row + 1),
            uidata.nrows
        )),
    ];
    if uidata.nrows != uidata.total_rows {
        spans.push(Span::raw(format!("of {} ", uidata.total_rows)));
    }
    if !uidata.filter.is_empty() {
        spans.push(Span::styled(
            format!(" filter: {} ", uidata.filter),
            Style::new().fg(Color::Yellow),
        ));
    }
    if uidata.loading {
        spans.push(Span::styled(" loading… ", Style::new().fg(Color::Magenta)));
    }
    spans.push(Span::raw(" "));
    spans.push(Span::styled(
        uidata.status_message.as_str(),
        Style::new().dark_gray(),
    ));
    Line::from(spans)
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
