use std::io::Cursor;
use std::path::Path;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use calamine::{Data, Range, Reader, Xls, Xlsx};
use csv::{ReaderBuilder, StringRecord};
use rayon::prelude::*;
use tracing::{debug, info, trace};

use crate::domain::SVError;
use crate::session::LoadOptions;
use crate::table::{CellValue, Grid, Row};

/// Spreadsheet formats that can be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Csv,
    Xls,
    Xlsx,
}

impl SourceKind {
    pub const MIME_TYPES: [(&'static str, SourceKind); 3] = [
        ("text/csv", SourceKind::Csv),
        ("application/vnd.ms-excel", SourceKind::Xls),
        (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            SourceKind::Xlsx,
        ),
    ];

    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_uppercase())
            .as_deref()
        {
            Some("CSV") => Some(SourceKind::Csv),
            Some("XLS") => Some(SourceKind::Xls),
            Some("XLSX") => Some(SourceKind::Xlsx),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        Self::MIME_TYPES
            .iter()
            .find(|(m, _)| *m == mime)
            .map(|(_, kind)| *kind)
    }

    pub fn mime_type(&self) -> &'static str {
        Self::MIME_TYPES
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(m, _)| *m)
            .unwrap_or("application/octet-stream")
    }
}

/// Turn base64 encoded file content into a grid of cells. Only one sheet of a
/// workbook is read.
pub fn decode(raw: &str, kind: SourceKind, options: &LoadOptions) -> Result<Grid, SVError> {
    let start_time = Instant::now();
    let bytes = STANDARD.decode(raw.trim())?;
    trace!("Decoding {} bytes as {:?}", bytes.len(), kind);

    let grid = match kind {
        SourceKind::Csv => decode_csv(bytes, options.separator)?,
        SourceKind::Xls => {
            let mut workbook: Xls<_> = Xls::new(Cursor::new(bytes))?;
            let range = sheet_range(&mut workbook, options.sheet_index)?;
            range_to_grid(&range)
        }
        SourceKind::Xlsx => {
            let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;
            let range = sheet_range(&mut workbook, options.sheet_index)?;
            range_to_grid(&range)
        }
    };

    info!(
        "Decoded {:?} into {} rows in {}ms",
        kind,
        grid.len(),
        start_time.elapsed().as_millis()
    );
    Ok(grid)
}

fn decode_csv(bytes: Vec<u8>, separator: u8) -> Result<Grid, SVError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        debug!("CSV content is empty");
        return Ok(Vec::new());
    }

    // Every line keeps its own number of fields, blank lines are skipped.
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(separator)
        .from_reader(Cursor::new(bytes));
    let records = reader.records().collect::<Result<Vec<StringRecord>, _>>()?;

    // Fields are turned into cells in parallel, order is kept.
    Ok(records
        .par_iter()
        .map(|record| record.iter().map(cell_from_field).collect::<Row>())
        .collect())
}

fn cell_from_field(field: &str) -> CellValue {
    if field.is_empty() {
        CellValue::Empty
    } else {
        CellValue::parse(field)
    }
}

fn sheet_range<RS, R>(workbook: &mut R, sheet_index: usize) -> Result<Range<Data>, SVError>
where
    RS: std::io::Read + std::io::Seek,
    R: Reader<RS>,
    SVError: From<R::Error>,
{
    let names = workbook.sheet_names();
    debug!("Workbook sheets: {:?}, reading #{}", names, sheet_index);
    match workbook.worksheet_range_at(sheet_index) {
        Some(range) => Ok(range?),
        None => Err(SVError::Parse(format!(
            "workbook has {} sheet(s), no sheet at index {}",
            names.len(),
            sheet_index
        ))),
    }
}

fn range_to_grid(range: &Range<Data>) -> Grid {
    range
        .rows()
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect()
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::Int(v) => CellValue::Number(*v as f64),
        Data::Float(v) => CellValue::Number(*v),
        Data::Bool(v) => CellValue::Bool(*v),
        Data::String(s) => CellValue::Text(s.clone()),
        // Dates stay the serial number the workbook stores
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}
