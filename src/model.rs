use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Instant;

use ratatui::crossterm::event::KeyEvent;
use rayon::prelude::*;
use tracing::{debug, error, info, info_span, trace, warn};

use crate::codec;
use crate::domain::{CMDMode, HELP_TEXT, Message, SVConfig, SVError};
use crate::export::{self, ClipboardShare, Exporter, ShareTarget};
use crate::inputter::{InputResult, Inputter};
use crate::session::{LoadTicket, SortDirection, TableSession};
use crate::source::{self, FilePicker, PathPicker};
use crate::table::{Dataset, Grid};
use crate::ui::{CMDLINE_HEIGHT, COLUMN_WIDTH_MARGIN, STATUSLINE_HEIGHT, TABLE_HEADER_HEIGHT};

#[derive(Debug, PartialEq)]
pub enum Status {
    EMPTY,
    READY,
    LOADING,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    TABLE,
    POPUP,
    CMDINPUT,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnView {
    pub name: String,
    pub width: usize,
    pub data: Vec<String>,
}

/// Everything the UI needs to draw one frame.
#[derive(Debug, Clone)]
pub struct UIData {
    pub name: String,
    pub table: Vec<ColumnView>,
    pub nrows: usize,       // Rows in the projection
    pub total_rows: usize,  // Rows in the dataset
    pub selected_row: usize,
    pub selected_column: usize,
    pub abs_selected_row: usize,
    pub filter: String,
    pub loading: bool,
    pub show_popup: bool,
    pub popup_message: String,
    pub cmdinput: InputResult,
    pub cmd_mode: Option<CMDMode>,
    pub active_cmdinput: bool,
    pub status_message: String,
    pub last_update: Instant,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            name: String::new(),
            table: Vec::new(),
            nrows: 0,
            total_rows: 0,
            selected_row: 0,
            selected_column: 0,
            abs_selected_row: 0,
            filter: String::new(),
            loading: false,
            show_popup: false,
            popup_message: String::new(),
            cmdinput: InputResult::default(),
            cmd_mode: None,
            active_cmdinput: false,
            status_message: String::new(),
            last_update: Instant::now(),
        }
    }
}

struct PendingLoad {
    ticket: LoadTicket,
    name: String,
    receiver: Receiver<Result<Grid, SVError>>,
}

pub struct Model {
    config: SVConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    session: TableSession,
    exporter: Exporter<Box<dyn ShareTarget>>,
    pending: Option<PendingLoad>,
    name: String,
    column_widths: Vec<usize>,
    curser_row: usize,
    curser_column: usize,
    offset_row: usize,
    offset_column: usize,
    table_width: usize,
    table_height: usize,
    uidata: UIData,
    input: Inputter,
    cmd_mode: Option<CMDMode>,
    last_input: InputResult,
    active_cmdinput: bool,
    popup_message: String,
    status_message: String,
}

impl Model {
    pub fn init(config: &SVConfig, ui_width: usize, ui_height: usize) -> Result<Self, SVError> {
        Ok(Self::with_share(
            config,
            Box::new(ClipboardShare::default()),
            ui_width,
            ui_height,
        ))
    }

    pub fn with_share(
        config: &SVConfig,
        share: Box<dyn ShareTarget>,
        ui_width: usize,
        ui_height: usize,
    ) -> Self {
        let export_dir = config
            .export_dir
            .clone()
            .unwrap_or_else(export::default_export_dir);
        let mut model = Self {
            config: config.clone(),
            status: Status::EMPTY,
            modus: Modus::TABLE,
            previous_modus: Modus::TABLE,
            session: TableSession::new(config.load_options()),
            exporter: Exporter::new(export_dir, share),
            pending: None,
            name: String::new(),
            column_widths: Vec::new(),
            curser_row: 0,
            curser_column: 0,
            offset_row: 0,
            offset_column: 0,
            table_width: 0,
            table_height: 0,
            uidata: UIData::empty(),
            input: Inputter::default(),
            cmd_mode: None,
            last_input: InputResult::default(),
            active_cmdinput: false,
            popup_message: String::new(),
            status_message: String::new(),
        };
        model.ui_resize(ui_width, ui_height);
        model.set_status_message("Press 'o' to open a file, '?' for help");
        model
    }

    pub fn session(&self) -> &TableSession {
        &self.session
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    /// Pick the file named by `answer` and start loading it in the background.
    pub fn open(&mut self, answer: &str) {
        if self.session.is_busy() {
            warn!("Ignoring open of \"{answer}\" while loading");
            self.set_status_message("Still loading, please wait ...");
            return;
        }
        let picked = PathPicker::new(answer)
            .pick()
            .and_then(|path| source::accept(&path).map(|kind| (path, kind)));
        let (path, kind) = match picked {
            Ok(picked) => picked,
            Err(e) => return self.report_error("Open", e),
        };
        let ticket = match self.session.begin_load() {
            Ok(ticket) => ticket,
            Err(e) => return self.report_error("Open", e),
        };

        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("???")
            .to_string();
        let options = self.session.options().clone();
        let (sender, receiver) = mpsc::channel();
        let span = info_span!("load", file = %name);
        rayon::spawn(move || {
            let _entered = span.enter();
            let outcome =
                source::read_base64(&path).and_then(|raw| codec::decode(&raw, kind, &options));
            // The receiver is gone when the load was cancelled
            if sender.send(outcome).is_err() {
                debug!("Load result dropped");
            }
        });

        info!("Loading {name} ...");
        self.status = Status::LOADING;
        self.set_status_message(format!("Loading {name} ..."));
        self.pending = Some(PendingLoad {
            ticket,
            name,
            receiver,
        });
        self.update_uidata();
    }

    /// Collect the result of a background load, if there is one.
    pub fn poll_load(&mut self) {
        let outcome = match self.pending.as_ref().map(|p| p.receiver.try_recv()) {
            None | Some(Err(TryRecvError::Empty)) => return,
            Some(Ok(outcome)) => outcome,
            Some(Err(TryRecvError::Disconnected)) => Err(SVError::LoadCancelled),
        };
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.status = Status::READY;

        let start_time = Instant::now();
        match self.session.finish_load(pending.ticket, outcome) {
            Ok(dataset) => {
                let message = format!(
                    "Loaded {}: {} rows, {} columns",
                    pending.name,
                    dataset.rows.len(),
                    dataset.columns.len()
                );
                self.column_widths =
                    Self::calculate_column_widths(dataset, self.config.max_column_width);
                self.name = pending.name;
                self.reset_cursor();
                self.set_status_message(message);
                trace!("Prepared view in {}ms", start_time.elapsed().as_millis());
            }
            Err(e) => {
                if self.session.dataset().is_empty() {
                    self.status = Status::EMPTY;
                }
                self.report_error(&format!("Loading {}", pending.name), e);
            }
        }
        self.update_uidata();
    }

    fn cancel_load(&mut self) {
        if let Some(pending) = self.pending.take() {
            info!("Cancelled loading {}", pending.name);
            self.session.cancel_load(pending.ticket);
            self.status = if self.session.dataset().is_empty() {
                Status::EMPTY
            } else {
                Status::READY
            };
            self.set_status_message(format!("Cancelled loading {}", pending.name));
        }
    }

    fn report_error(&mut self, context: &str, err: SVError) {
        match err {
            SVError::PickCancelled => {
                debug!("{context}: cancelled");
                self.set_status_message("Cancelled");
            }
            err => {
                error!("{context}: {err}");
                self.set_status_message(format!("{context}: {err}"));
            }
        }
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.uidata.status_message = self.status_message.clone();
        self.uidata.last_update = Instant::now();
    }

    fn calculate_column_widths(dataset: &Dataset, max_column_width: usize) -> Vec<usize> {
        (0..dataset.width())
            .into_par_iter()
            .map(|cidx| {
                let header = dataset.columns.get(cidx).map_or(0, |c| c.chars().count());
                let cells = dataset
                    .rows
                    .iter()
                    .filter_map(|row| row.get(cidx))
                    .map(|cell| cell.to_string().chars().count())
                    .max()
                    .unwrap_or(0);
                std::cmp::min(header.max(cells) + COLUMN_WIDTH_MARGIN, max_column_width)
            })
            .collect()
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        self.table_width = width;
        self.table_height =
            height.saturating_sub(TABLE_HEADER_HEIGHT + STATUSLINE_HEIGHT + CMDLINE_HEIGHT);
        trace!("Resize to {width}x{height}, table height {}", self.table_height);
        self.clamp_cursor();
        self.update_uidata();
    }

    pub fn update(&mut self, message: Message) -> Result<(), SVError> {
        match self.modus {
            Modus::TABLE => match message {
                Message::Quit => self.quit(),
                Message::MoveDown => self.move_selection_down(1),
                Message::MoveUp => self.move_selection_up(1),
                Message::MoveLeft => self.move_selection_left(),
                Message::MoveRight => self.move_selection_right(),
                Message::MovePageDown => self.move_selection_down(self.table_height.max(1)),
                Message::MovePageUp => self.move_selection_up(self.table_height.max(1)),
                Message::MoveBeginning => self.move_selection_beginning(),
                Message::MoveEnd => self.move_selection_end(),
                Message::Open => self.enter_cmd_mode(CMDMode::Open),
                Message::Filter => self.enter_cmd_mode(CMDMode::Filter),
                Message::ClearFilter => self.apply_filter(String::new()),
                Message::Sort => self.sort_current_column(),
                Message::Export => self.export(),
                Message::Help => self.show_help(),
                Message::Exit => self.exit(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Enter | Message::RawKey(_) => (),
            },
            Modus::POPUP => match message {
                Message::Quit => self.quit(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::Exit | Message::Enter | Message::Help => self.exit(),
                _ => (),
            },
            Modus::CMDINPUT => match message {
                Message::RawKey(key) => self.raw_input(key),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
        }
        Ok(())
    }

    // -------------------- Control handling functions ---------------------- //

    fn exit(&mut self) {
        match self.modus {
            Modus::POPUP => {
                self.modus = self.previous_modus;
                self.popup_message.clear();
            }
            Modus::TABLE if self.pending.is_some() => self.cancel_load(),
            Modus::TABLE if !self.session.filter().is_empty() => self.apply_filter(String::new()),
            _ => (),
        }
        self.update_uidata();
    }

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
        self.popup_message = HELP_TEXT.to_string();
        self.update_uidata();
    }

    fn enter_cmd_mode(&mut self, mode: CMDMode) {
        if mode == CMDMode::Open && self.session.is_busy() {
            self.set_status_message("Still loading, please wait ...");
            return;
        }
        trace!("Entering cmd mode {mode:?}");
        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;
        self.cmd_mode = Some(mode);
        self.active_cmdinput = true;
        self.input.clear();
        if mode == CMDMode::Filter {
            let current = self.session.filter().to_string();
            self.input.set(&current);
        }
        self.last_input = self.input.get();
        self.update_uidata();
    }

    fn raw_input(&mut self, key: KeyEvent) {
        self.last_input = self.input.read(key);
        if self.last_input.finished {
            self.handle_cmd_input();
        }
        self.update_uidata();
    }

    fn handle_cmd_input(&mut self) {
        trace!("Handle cmd input {:?}", self.last_input);
        self.active_cmdinput = false;
        self.modus = self.previous_modus;
        self.previous_modus = Modus::CMDINPUT;

        let cmd_input = self.last_input.input.clone();
        let canceled = self.last_input.canceled;
        match self.cmd_mode.take() {
            Some(CMDMode::Open) if canceled => self.report_error("Open", SVError::PickCancelled),
            Some(CMDMode::Open) => self.open(&cmd_input),
            Some(CMDMode::Filter) if canceled => (),
            Some(CMDMode::Filter) => self.apply_filter(cmd_input),
            None => info!("Cmd mode is none!"),
        }
        self.input.clear();
        self.last_input = InputResult::default();
    }

    fn apply_filter(&mut self, query: String) {
        let start_time = Instant::now();
        let kept = self.session.set_filter(query.as_str()).len();
        let total = self.session.dataset().rows.len();
        debug!(
            "Filter \"{query}\" kept {kept}/{total} rows in {}ms",
            start_time.elapsed().as_millis()
        );
        if query.is_empty() {
            self.set_status_message(format!("Showing all {total} rows"));
        } else {
            self.set_status_message(format!("Filter \"{query}\": {kept} of {total} rows"));
        }
        self.reset_cursor();
        self.update_uidata();
    }

    fn sort_current_column(&mut self) {
        let column_idx = self.offset_column + self.curser_column;
        let Some(name) = self.session.dataset().columns.get(column_idx).cloned() else {
            self.set_status_message("This column has no name and cannot be sorted");
            return;
        };
        let start_time = Instant::now();
        self.session.sort(&name);
        let direction = self.session.sort_state().direction;
        debug!(
            "Sorted by \"{name}\" {direction:?} in {}ms",
            start_time.elapsed().as_millis()
        );
        self.set_status_message(format!(
            "Sorted by \"{name}\" {}",
            match direction {
                SortDirection::Ascending => "ascending",
                SortDirection::Descending => "descending",
            }
        ));
        self.update_uidata();
    }

    fn export(&mut self) {
        let text = self.session.export();
        let rows = self.session.visible_len();
        match self.exporter.export(&text) {
            Ok(path) => self.set_status_message(format!(
                "Exported {rows} rows to {} and copied them to the clipboard",
                path.display()
            )),
            Err(e) => self.report_error("Export", e),
        }
    }

    pub fn export_path(&self) -> std::path::PathBuf {
        self.exporter.path()
    }

    fn reset_cursor(&mut self) {
        self.curser_row = 0;
        self.offset_row = 0;
        self.clamp_cursor();
    }

    fn clamp_cursor(&mut self) {
        let nrows = self.session.visible_len();
        if self.offset_row + self.curser_row >= nrows {
            self.offset_row = 0;
            self.curser_row = 0;
        }
        if self.table_height > 0 && self.curser_row >= self.table_height {
            self.offset_row += self.curser_row + 1 - self.table_height;
            self.curser_row = self.table_height - 1;
        }
        let ncolumns = self.column_widths.len();
        if self.offset_column + self.curser_column >= ncolumns {
            self.offset_column = 0;
            self.curser_column = 0;
        }
    }

    fn move_selection_beginning(&mut self) {
        self.curser_row = 0;
        self.offset_row = 0;
        self.update_uidata();
    }

    fn move_selection_end(&mut self) {
        let nrows = self.session.visible_len();
        if nrows == 0 {
            return;
        }
        if nrows <= self.table_height {
            self.offset_row = 0;
            self.curser_row = nrows - 1;
        } else {
            // No visible row at all when the terminal is too small
            self.curser_row = self.table_height.saturating_sub(1);
            self.offset_row = nrows - 1 - self.curser_row;
        }
        self.update_uidata();
    }

    fn move_selection_up(&mut self, size: usize) {
        if self.curser_row > 0 {
            // Curser somewhere in the middle
            self.curser_row = self.curser_row.saturating_sub(size);
        } else {
            // Curser at the top, shift the table
            self.offset_row = self.offset_row.saturating_sub(size);
        }
        self.update_uidata();
    }

    fn move_selection_down(&mut self, size: usize) {
        let nrows = self.session.visible_len();
        let last = nrows.saturating_sub(1);
        if nrows == 0 || self.offset_row + self.curser_row >= last {
            return;
        }
        let target = std::cmp::min(self.offset_row + self.curser_row + size, last);
        if target < self.offset_row + self.table_height {
            self.curser_row = target - self.offset_row;
        } else {
            // Shift the table so that the target is the last visible row
            self.curser_row = self.table_height.saturating_sub(1);
            self.offset_row = target - self.curser_row;
        }
        self.update_uidata();
    }

    fn move_selection_left(&mut self) {
        if self.curser_column > 0 {
            self.curser_column -= 1;
        } else if self.offset_column > 0 {
            self.offset_column -= 1;
        }
        self.update_uidata();
    }

    fn move_selection_right(&mut self) {
        if self.offset_column + self.curser_column + 1 >= self.column_widths.len() {
            return;
        }
        if self.curser_column + 1 < self.visible_columns().len() {
            self.curser_column += 1;
        } else {
            // At the end of the screen
            self.offset_column += 1;
        }
        self.update_uidata();
    }

    /// Columns, starting at the column offset, that fit into the table width.
    /// The last one may be cut.
    fn visible_columns(&self) -> Vec<(usize, usize)> {
        let mut visible = Vec::new();
        let mut used = 0;
        for (cidx, &width) in self.column_widths.iter().enumerate().skip(self.offset_column) {
            if used >= self.table_width {
                break;
            }
            let render_width = std::cmp::min(width, self.table_width - used);
            visible.push((cidx, render_width));
            used += render_width + 1; // Column spacer
        }
        visible
    }

    fn column_title(&self, cidx: usize) -> String {
        let dataset = self.session.dataset();
        let Some(name) = dataset.columns.get(cidx) else {
            return String::new();
        };
        let sort = self.session.sort_state();
        // Duplicate names: the marker sits on the column the sort resolves to
        if sort.column.as_deref().and_then(|c| dataset.column_index(c)) == Some(cidx) {
            let marker = match sort.direction {
                SortDirection::Ascending => '▲',
                SortDirection::Descending => '▼',
            };
            format!("{name} {marker}")
        } else {
            name.clone()
        }
    }

    fn update_uidata(&mut self) {
        let rbegin = self.offset_row;
        let rend = rbegin + self.table_height;
        let rows = self.session.visible_rows(rbegin, rend);

        let table = self
            .visible_columns()
            .into_iter()
            .map(|(cidx, width)| ColumnView {
                name: self.column_title(cidx),
                width,
                data: rows
                    .iter()
                    .map(|row| {
                        row.get(cidx)
                            .map(|cell| single_line(&cell.to_string()))
                            .unwrap_or_default()
                    })
                    .collect(),
            })
            .collect();

        self.uidata = UIData {
            name: self.name.clone(),
            table,
            nrows: self.session.visible_len(),
            total_rows: self.session.dataset().rows.len(),
            selected_row: self.curser_row,
            selected_column: self.curser_column,
            abs_selected_row: self.offset_row + self.curser_row,
            filter: self.session.filter().to_string(),
            loading: self.session.is_busy(),
            show_popup: self.modus == Modus::POPUP,
            popup_message: self.popup_message.clone(),
            cmdinput: self.last_input.clone(),
            cmd_mode: self.cmd_mode,
            active_cmdinput: self.active_cmdinput,
            status_message: self.status_message.clone(),
            last_update: Instant::now(),
        };
    }
}

fn single_line(text: &str) -> String {
    text.replace("\r\n", " ↵ ").replace('\n', " ↵ ")
}
