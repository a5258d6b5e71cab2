use std::borrow::Cow;
use std::time::Instant;

use derive_setters::Setters;
use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use crate::codec::{self, SourceKind};
use crate::domain::{ExportQuoting, SVError};
use crate::table::{CellValue, Dataset, Grid, Row};

const EXPORT_DELIMITER: char = ',';

/// Knobs for turning a file into a dataset and back into text.
#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(prefix = "with_")]
pub struct LoadOptions {
    /// First decoded row holds the column names
    pub header_row: bool,
    /// Worksheet read from XLS/XLSX workbooks
    pub sheet_index: usize,
    /// CSV field separator
    pub separator: u8,
    pub export_quoting: ExportQuoting,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            header_row: true,
            sheet_index: 0,
            separator: b',',
            export_quoting: ExportQuoting::Quoted,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flip(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortState {
    pub column: Option<String>,
    pub direction: SortDirection,
}

/// Proof that a load was started. Handed back to `finish_load` or
/// `cancel_load`, a ticket of an abandoned load is ignored.
#[derive(Debug)]
pub struct LoadTicket {
    generation: u64,
}

/// The visible part of the dataset: all columns, filtered rows in sort order.
#[derive(Debug)]
pub struct Projection<'a> {
    pub columns: &'a [String],
    pub rows: Vec<&'a Row>,
}

impl Projection<'_> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_dataset(&self) -> Dataset {
        Dataset::new(
            self.columns.to_vec(),
            self.rows.iter().map(|r| (*r).clone()).collect(),
        )
    }

    /// Header line followed by one line per row, separated by `\n` without a
    /// trailing newline. Rows are written with the cells they have.
    pub fn to_delimited(&self, quoting: ExportQuoting) -> String {
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(
            self.columns
                .iter()
                .map(|c| quote_field(c, quoting))
                .collect::<Vec<_>>()
                .join(&EXPORT_DELIMITER.to_string()),
        );
        for row in &self.rows {
            lines.push(
                row.iter()
                    .map(|c| quote_field(&c.to_string(), quoting).into_owned())
                    .collect::<Vec<_>>()
                    .join(&EXPORT_DELIMITER.to_string()),
            );
        }
        lines.join("\n")
    }
}

fn quote_field(value: &str, quoting: ExportQuoting) -> Cow<'_, str> {
    let needs_quoting = value.contains(EXPORT_DELIMITER)
        || value.contains('"')
        || value.contains('\n')
        || value.contains('\r');

    match quoting {
        ExportQuoting::Quoted if needs_quoting => {
            Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
        }
        _ => Cow::Borrowed(value),
    }
}

fn row_matches(row: &Row, needle: &str) -> bool {
    row.iter()
        .any(|cell| cell.to_string().to_lowercase().contains(needle))
}

/// Owns the dataset together with the filter, sort and busy state of the
/// screen.
#[derive(Debug, Default)]
pub struct TableSession {
    dataset: Dataset,
    options: LoadOptions,
    filter: String,
    sort: SortState,
    order: Vec<usize>,   // Row indices of the whole dataset in sort order
    visible: Vec<usize>, // `order` after applying the filter
    busy: bool,
    generation: u64,
}

impl TableSession {
    pub fn new(options: LoadOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn sort_state(&self) -> &SortState {
        &self.sort
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Decode base64 file content and install it as the new dataset.
    pub fn load(&mut self, raw: &str, kind: SourceKind) -> Result<&Dataset, SVError> {
        let ticket = self.begin_load()?;
        let grid = codec::decode(raw, kind, &self.options);
        self.finish_load(ticket, grid)
    }

    pub fn begin_load(&mut self) -> Result<LoadTicket, SVError> {
        if self.busy {
            warn!("Load #{} still in flight, ignoring request", self.generation);
            return Err(SVError::Busy);
        }
        self.busy = true;
        self.generation += 1;
        debug!("Starting load #{}", self.generation);
        Ok(LoadTicket {
            generation: self.generation,
        })
    }

    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        outcome: Result<Grid, SVError>,
    ) -> Result<&Dataset, SVError> {
        if !self.busy || ticket.generation != self.generation {
            warn!("Dropping result of abandoned load #{}", ticket.generation);
            return Err(SVError::LoadCancelled);
        }
        self.busy = false;

        let grid = outcome?;
        let dataset = Dataset::from_grid(grid, self.options.header_row);
        info!(
            "Load #{} finished: {} columns, {} rows",
            ticket.generation,
            dataset.columns.len(),
            dataset.rows.len()
        );
        self.install(dataset);
        Ok(&self.dataset)
    }

    pub fn cancel_load(&mut self, ticket: LoadTicket) {
        if self.busy && ticket.generation == self.generation {
            debug!("Load #{} cancelled", ticket.generation);
            self.busy = false;
        }
    }

    fn install(&mut self, dataset: Dataset) {
        self.dataset = dataset;
        self.filter.clear();
        self.sort = SortState::default();
        self.apply_sort();
        self.apply_filter();
    }

    pub fn set_filter(&mut self, query: impl Into<String>) -> Projection<'_> {
        self.filter = query.into();
        self.apply_filter();
        self.projection()
    }

    /// Sort by `column`. Asking for the active column again flips the
    /// direction, any other column starts ascending.
    pub fn sort(&mut self, column: &str) -> Projection<'_> {
        let direction = match &self.sort.column {
            Some(active) if active == column => self.sort.direction.flip(),
            _ => SortDirection::Ascending,
        };
        self.sort = SortState {
            column: Some(column.to_string()),
            direction,
        };
        self.apply_sort();
        self.apply_filter();
        self.projection()
    }

    pub fn projection(&self) -> Projection<'_> {
        Projection {
            columns: &self.dataset.columns,
            rows: self.visible_rows(0, self.visible.len()),
        }
    }

    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    /// Projected rows in `[begin, end)`, clamped to the projection.
    pub fn visible_rows(&self, begin: usize, end: usize) -> Vec<&Row> {
        let end = end.min(self.visible.len());
        let begin = begin.min(end);
        self.visible[begin..end]
            .iter()
            .map(|&idx| &self.dataset.rows[idx])
            .collect()
    }

    /// Position of a projected row in the loaded file, starting at 0.
    pub fn source_index(&self, visible_idx: usize) -> Option<usize> {
        self.visible.get(visible_idx).copied()
    }

    pub fn export(&self) -> String {
        self.projection().to_delimited(self.options.export_quoting)
    }

    // The order is always derived from the load order, which keeps repeated
    // sorts stable and the reverse sort an exact mirror apart from ties.
    fn apply_sort(&mut self) {
        let start_time = Instant::now();
        let mut order: Vec<usize> = (0..self.dataset.rows.len()).collect();

        if let Some(name) = &self.sort.column {
            let column = self.dataset.column_index(name);
            if column.is_none() {
                warn!("Sort column \"{name}\" does not exist");
            }
            let rows = &self.dataset.rows;
            let direction = self.sort.direction;
            // par_sort_by is a stable merge sort
            order.par_sort_by(|&a, &b| {
                let ordering = CellValue::compare(
                    column.and_then(|c| rows[a].get(c)),
                    column.and_then(|c| rows[b].get(c)),
                );
                match direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
            trace!(
                "Sorted {} rows by \"{name}\" {:?} in {}ms",
                order.len(),
                direction,
                start_time.elapsed().as_millis()
            );
        }
        self.order = order;
    }

    fn apply_filter(&mut self) {
        if self.filter.is_empty() {
            self.visible = self.order.clone();
            return;
        }
        let start_time = Instant::now();
        let needle = self.filter.to_lowercase();
        let rows = &self.dataset.rows;
        let visible: Vec<usize> = self
            .order
            .par_iter()
            .copied()
            .filter(|&idx| row_matches(&rows[idx], &needle))
            .collect();
        trace!(
            "Filter \"{}\" kept {}/{} rows in {}ms",
            self.filter,
            visible.len(),
            rows.len(),
            start_time.elapsed().as_millis()
        );
        self.visible = visible;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn people() -> Grid {
        vec![
            vec!["Name".into(), "Age".into()],
            vec!["Bob".into(), CellValue::Number(30.0)],
            vec!["Ann".into(), CellValue::Number(25.0)],
        ]
    }

    fn session_with(grid: Grid) -> TableSession {
        let mut session = TableSession::default();
        let ticket = session.begin_load().unwrap();
        session.finish_load(ticket, Ok(grid)).unwrap();
        session
    }

    fn names(p: &Projection) -> Vec<String> {
        p.rows.iter().map(|r| r[0].to_string()).collect()
    }

    fn cities() -> TableSession {
        let csv = "City,Country,Population\n\
                   Vienna,Austria,1900000\n\
                   Graz,Austria,290000\n\
                   Berlin,Germany,3600000\n\
                   Hamburg,Germany,1800000\n\
                   Zurich,Switzerland,420000\n\
                   Basel,Switzerland,170000\n\
                   Linz,Austria,210000";
        let mut session = TableSession::default();
        session.load(&STANDARD.encode(csv), SourceKind::Csv).unwrap();
        session
    }

    #[test]
    fn load_keeps_rows_in_order() {
        let session = session_with(people());
        let p = session.projection();
        assert_eq!(p.columns, ["Name", "Age"]);
        assert_eq!(names(&p), vec!["Bob", "Ann"]);
        assert_eq!(p.to_dataset().rows, people()[1..].to_vec());
    }

    #[test]
    fn sort_toggles_direction() {
        let mut session = session_with(people());
        assert_eq!(names(&session.sort("Age")), vec!["Ann", "Bob"]);
        assert_eq!(session.sort_state().direction, SortDirection::Ascending);
        assert_eq!(names(&session.sort("Age")), vec!["Bob", "Ann"]);
        assert_eq!(session.sort_state().direction, SortDirection::Descending);
    }

    #[test]
    fn sort_new_column_starts_ascending() {
        let mut session = session_with(people());
        session.sort("Age");
        session.sort("Age");
        let p = session.sort("Name");
        assert_eq!(names(&p), vec!["Ann", "Bob"]);
        assert_eq!(session.sort_state().column.as_deref(), Some("Name"));
        assert_eq!(session.sort_state().direction, SortDirection::Ascending);
    }

    #[test]
    fn sort_is_numeric_for_numbers() {
        let grid: Grid = vec![
            vec!["n".into()],
            vec![CellValue::Number(10.0)],
            vec![CellValue::Number(9.0)],
            vec![CellValue::Number(100.0)],
        ];
        let mut session = session_with(grid);
        let p = session.sort("n");
        assert_eq!(names(&p), vec!["9", "10", "100"]);
    }

    #[test]
    fn sort_is_stable_for_ties() {
        let mut session = cities();
        let p = session.sort("Country");
        assert_eq!(
            names(&p),
            vec!["Vienna", "Graz", "Linz", "Berlin", "Hamburg", "Zurich", "Basel"]
        );
        // Descending keeps ties in load order as well
        let p = session.sort("Country");
        assert_eq!(
            names(&p),
            vec!["Zurich", "Basel", "Berlin", "Hamburg", "Vienna", "Graz", "Linz"]
        );
    }

    #[test]
    fn sort_is_idempotent() {
        let mut first = cities();
        let once = names(&first.sort("Population"));

        let mut second = cities();
        second.sort("Population");
        second.sort("City");
        second.sort("Population");
        assert_eq!(second.sort_state().direction, SortDirection::Ascending);
        assert_eq!(names(&second.projection()), once);
    }

    #[test]
    fn second_sort_is_exact_reverse_without_ties() {
        let mut session = cities();
        let ascending = names(&session.sort("Population"));
        let mut descending = names(&session.sort("Population"));
        descending.reverse();
        assert_eq!(ascending, descending);
    }

    #[test]
    fn sort_unknown_column_keeps_load_order() {
        let mut session = session_with(people());
        let p = session.sort("Missing");
        assert_eq!(names(&p), vec!["Bob", "Ann"]);
    }

    #[test]
    fn filter_is_case_insensitive_substring() {
        let mut session = session_with(people());
        let p = session.set_filter("ann");
        assert_eq!(p.rows, vec![&vec![CellValue::from("Ann"), CellValue::Number(25.0)]]);

        // numbers match on their string form
        assert_eq!(names(&session.set_filter("3")), vec!["Bob"]);
        assert_eq!(session.set_filter("").len(), 2);
    }

    #[test]
    fn filter_keeps_exactly_matching_rows() {
        let mut session = cities();
        for query in ["a", "AUS", "000", "zz", "er", "l"] {
            let needle = query.to_lowercase();
            let kept = session.set_filter(query).to_dataset().rows;
            for row in &kept {
                assert!(row_matches(row, &needle), "{query}: {row:?}");
            }
            let dropped = session
                .dataset()
                .rows
                .iter()
                .filter(|r| !kept.contains(r))
                .count();
            let expected_dropped = session
                .dataset()
                .rows
                .iter()
                .filter(|r| !row_matches(r, &needle))
                .count();
            assert_eq!(dropped, expected_dropped, "{query}");
        }
    }

    #[test]
    fn filter_applies_to_sorted_rows() {
        let mut session = cities();
        session.sort("Population");
        let p = session.set_filter("austria");
        assert_eq!(names(&p), vec!["Linz", "Graz", "Vienna"]);
        // sorting keeps the filter
        let p = session.sort("Population");
        assert_eq!(names(&p), vec!["Vienna", "Graz", "Linz"]);
    }

    #[test]
    fn load_resets_filter_and_sort() {
        let mut session = cities();
        session.sort("City");
        session.set_filter("x");
        session
            .load(&STANDARD.encode("a,b\n1,2"), SourceKind::Csv)
            .unwrap();
        assert_eq!(session.filter(), "");
        assert_eq!(session.sort_state(), &SortState::default());
        assert_eq!(session.visible_len(), 1);
    }

    #[test]
    fn failed_load_keeps_previous_dataset() {
        let mut session = session_with(people());
        session.set_filter("bob");
        let err = session.load("not base64 !!", SourceKind::Xlsx).unwrap_err();
        assert!(matches!(err, SVError::Parse(_)));
        assert!(!session.is_busy());
        assert_eq!(session.dataset().rows.len(), 2);
        assert_eq!(session.filter(), "bob");
    }

    #[test]
    fn failed_first_load_leaves_empty_dataset() {
        let mut session = TableSession::default();
        let garbage = STANDARD.encode([0x50u8, 0x4b, 0x03, 0x04, 0xff, 0x00, 0x13]);
        let err = session.load(&garbage, SourceKind::Xlsx).unwrap_err();
        assert!(matches!(err, SVError::Parse(_)));
        assert!(session.dataset().is_empty());
        assert!(session.projection().is_empty());
    }

    #[test]
    fn empty_file_loads_empty_dataset() {
        let mut session = session_with(people());
        let dataset = session.load("", SourceKind::Csv).unwrap();
        assert!(dataset.is_empty());
        assert_eq!(session.export(), "");
    }

    #[test]
    fn single_flight_guard() {
        let mut session = session_with(people());
        let ticket = session.begin_load().unwrap();
        assert!(session.is_busy());
        assert!(matches!(session.begin_load(), Err(SVError::Busy)));
        assert!(matches!(
            session.load("", SourceKind::Csv),
            Err(SVError::Busy)
        ));

        session.cancel_load(ticket);
        assert!(!session.is_busy());
        assert_eq!(session.dataset().rows.len(), 2);
        assert!(session.begin_load().is_ok());
    }

    #[test]
    fn abandoned_ticket_is_ignored() {
        let mut session = session_with(people());
        let stale = session.begin_load().unwrap();
        let stale_generation = stale.generation;
        session.cancel_load(stale);

        let current = session.begin_load().unwrap();
        let replay = LoadTicket {
            generation: stale_generation,
        };
        let err = session.finish_load(replay, Ok(Vec::new())).unwrap_err();
        assert!(matches!(err, SVError::LoadCancelled));
        assert!(session.is_busy());
        assert_eq!(session.dataset().rows.len(), 2);

        session.finish_load(current, Ok(Vec::new())).unwrap();
        assert!(session.dataset().is_empty());
    }

    #[test]
    fn failed_outcome_clears_busy() {
        let mut session = session_with(people());
        let ticket = session.begin_load().unwrap();
        let err = session
            .finish_load(ticket, Err(SVError::Parse("broken".into())))
            .unwrap_err();
        assert!(matches!(err, SVError::Parse(_)));
        assert!(!session.is_busy());
        assert_eq!(names(&session.projection()), vec!["Bob", "Ann"]);
    }

    #[test]
    fn header_row_option() {
        let mut session = TableSession::new(LoadOptions::default().with_header_row(false));
        session
            .load(&STANDARD.encode("Name,Age\nBob,30"), SourceKind::Csv)
            .unwrap();
        assert_eq!(session.dataset().columns, vec!["column_1", "column_2"]);
        assert_eq!(session.visible_len(), 2);
    }

    #[test]
    fn export_projection() {
        let mut session = session_with(people());
        session.sort("Age");
        assert_eq!(session.export(), "Name,Age\nAnn,25\nBob,30");
        session.set_filter("bob");
        assert_eq!(session.export(), "Name,Age\nBob,30");
    }

    #[test]
    fn export_splits_back_into_projection() {
        let mut session = cities();
        session.sort("City");
        session.set_filter("a");
        let text = session.export();
        let mut lines = text.split('\n');
        let header: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(header, session.projection().columns);

        let expected: Vec<Vec<String>> = session
            .projection()
            .rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        let parsed: Vec<Vec<String>> = lines
            .map(|l| l.split(',').map(str::to_string).collect())
            .collect();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn export_quoting_modes() {
        let grid: Grid = vec![
            vec!["name".into(), "note".into()],
            vec!["Smith, Jane".into(), "said \"hi\"".into()],
            vec!["Doe".into(), "two\nlines".into()],
        ];
        let quoted = session_with(grid.clone()).export();
        assert_eq!(
            quoted,
            "name,note\n\"Smith, Jane\",\"said \"\"hi\"\"\"\nDoe,\"two\nlines\""
        );

        let mut naive = TableSession::new(
            LoadOptions::default().with_export_quoting(ExportQuoting::Naive),
        );
        let ticket = naive.begin_load().unwrap();
        naive.finish_load(ticket, Ok(grid)).unwrap();
        assert_eq!(
            naive.export(),
            "name,note\nSmith, Jane,said \"hi\"\nDoe,two\nlines"
        );
    }

    #[test]
    fn ragged_rows_are_tolerated() {
        let grid: Grid = vec![
            vec!["a".into(), "b".into()],
            vec!["1".into()],
            vec!["2".into(), "3".into(), "extra".into()],
        ];
        let mut session = session_with(grid);
        assert_eq!(session.dataset().width(), 3);
        assert_eq!(session.export(), "a,b\n1\n2,3,extra");
        assert_eq!(names(&session.sort("b")), vec!["1", "2"]);
        assert_eq!(session.set_filter("extra").len(), 1);
    }

    #[test]
    fn csv_long_lines_keep_extra_cells() {
        let mut session = TableSession::default();
        let raw = STANDARD.encode("a,b\n1,2,3\n4\n\n5,6");
        let dataset = session.load(&raw, SourceKind::Csv).unwrap();
        assert_eq!(dataset.rows.len(), 3);
        assert_eq!(dataset.rows[0][2], CellValue::Number(3.0));
        assert_eq!(dataset.width(), 3);

        assert_eq!(names(&session.set_filter("3")), vec!["1"]);
        session.set_filter("");
        assert_eq!(session.export(), "a,b\n1,2,3\n4\n5,6");
    }

    #[test]
    fn visible_rows_are_clamped() {
        let session = cities();
        assert_eq!(session.visible_rows(5, 100).len(), 2);
        assert!(session.visible_rows(50, 100).is_empty());
        assert_eq!(session.source_index(1), Some(1));
        assert_eq!(session.source_index(7), None);
    }
}
