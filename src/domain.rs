use std::io;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use ratatui::crossterm::event::KeyEvent;
use thiserror::Error;

use crate::session::LoadOptions;

#[derive(Debug, Error)]
pub enum SVError {
    #[error("file selection cancelled")]
    PickCancelled,
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("could not parse spreadsheet: {0}")]
    Parse(String),
    #[error("export failed: {0}")]
    Export(String),
    #[error("a file is already loading")]
    Busy,
    #[error("load was cancelled")]
    LoadCancelled,
    #[error("unsupported file type: {0}")]
    UnknownFileType(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<csv::Error> for SVError {
    fn from(err: csv::Error) -> Self {
        SVError::Parse(err.to_string())
    }
}

impl From<calamine::Error> for SVError {
    fn from(err: calamine::Error) -> Self {
        SVError::Parse(err.to_string())
    }
}

impl From<calamine::XlsError> for SVError {
    fn from(err: calamine::XlsError) -> Self {
        SVError::Parse(err.to_string())
    }
}

impl From<calamine::XlsxError> for SVError {
    fn from(err: calamine::XlsxError) -> Self {
        SVError::Parse(err.to_string())
    }
}

impl From<base64::DecodeError> for SVError {
    fn from(err: base64::DecodeError) -> Self {
        SVError::Parse(format!("invalid base64 content: {err}"))
    }
}

/// How exported fields are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ExportQuoting {
    /// Quote fields holding the delimiter, quotes or line breaks.
    #[default]
    Quoted,
    /// Plain join, no escaping at all.
    Naive,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "sv", version, about = "A tui based spreadsheet viewer.")]
pub struct SVConfig {
    /// CSV, XLS or XLSX file to open on start
    pub path: Option<String>,

    /// Treat the first row as data instead of column names
    #[arg(long)]
    pub no_header: bool,

    /// Index of the worksheet to read from XLS/XLSX workbooks
    #[arg(long, default_value_t = 0)]
    pub sheet: usize,

    /// Field separator for CSV files, a single ASCII character
    #[arg(long, default_value = ",", value_parser = parse_separator)]
    pub separator: u8,

    /// Directory the export file is written to
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ExportQuoting::Quoted)]
    pub export_quoting: ExportQuoting,

    #[arg(long, default_value_t = 40)]
    pub max_column_width: usize,

    /// Log file, defaults to sv.log in the local data directory
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Event poll timeout in ms
    #[arg(long, default_value_t = 100)]
    pub event_poll_time: u64,
}

impl Default for SVConfig {
    fn default() -> Self {
        SVConfig {
            path: None,
            no_header: false,
            sheet: 0,
            separator: b',',
            export_dir: None,
            export_quoting: ExportQuoting::Quoted,
            max_column_width: 40,
            log_file: None,
            event_poll_time: 100,
        }
    }
}

impl SVConfig {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions::default()
            .with_header_row(!self.no_header)
            .with_sheet_index(self.sheet)
            .with_separator(self.separator)
            .with_export_quoting(self.export_quoting)
    }
}

fn parse_separator(s: &str) -> Result<u8, String> {
    match s.as_bytes() {
        [b'"' | b'\n' | b'\r'] => Err(format!("{s:?} cannot separate fields")),
        [b] if b.is_ascii() => Ok(*b),
        _ => Err(format!("expected a single ASCII character, got {s:?}")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CMDMode {
    Open,
    Filter,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MovePageUp,
    MovePageDown,
    MoveBeginning,
    MoveEnd,
    Open,
    Filter,
    ClearFilter,
    Sort,
    Export,
    Help,
    Enter,
    Exit,
    Resize(usize, usize),
    RawKey(KeyEvent),
}

pub const HELP_TEXT: &str = "\
sv - spreadsheet viewer

  q            quit
  arrows/hjkl  move selection
  PgUp/PgDn    move one page
  g / G        first / last row
  o            open a CSV, XLS or XLSX file
  /            filter rows (case-insensitive, any cell)
  Esc          clear filter / close popup
  s            sort by current column (again to reverse)
  e            export visible rows and copy them to the clipboard
  ?            this help";
