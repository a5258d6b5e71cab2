use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;

use feruca::Collator;

/// A single cell as handed out by the decoder.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

pub type Row = Vec<CellValue>;

/// Raw decoder output. The first row may or may not hold the column names.
pub type Grid = Vec<Row>;

impl CellValue {
    /// Parse a text field, turning anything that reads as a finite number into
    /// a `Number`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CellValue::Text(raw.to_string());
        }
        // f64::from_str also accepts "inf" and "NaN"
        if trimmed.chars().any(|c| c.is_ascii_digit())
            && let Ok(n) = trimmed.parse::<f64>()
            && n.is_finite()
        {
            return CellValue::Number(n);
        }
        CellValue::Text(raw.to_string())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Ordering used by the table sort: numeric when both sides are numbers,
    /// locale-like string ordering otherwise.
    pub fn compare(a: Option<&CellValue>, b: Option<&CellValue>) -> Ordering {
        match (a.and_then(CellValue::as_number), b.and_then(CellValue::as_number)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => {
                let x = a.map(|c| c.to_string()).unwrap_or_default();
                let y = b.map(|c| c.to_string()).unwrap_or_default();
                locale_cmp(&x, &y)
            }
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

thread_local! {
    // The collator keeps scratch buffers, one per sorting thread
    static COLLATOR: RefCell<Collator> = RefCell::new(Collator::default());
}

/// Unicode collation (CLDR root order). Letters compare ignoring case and
/// accents first, so that "apple" < "banana" < "Banana" < "cherry" and
/// "Äpfel" < "Zebra".
pub fn locale_cmp(a: &str, b: &str) -> Ordering {
    COLLATOR.with(|collator| collator.borrow_mut().collate(a, b))
}

/// The loaded table. Duplicate column names are kept as they are, lookups by
/// name resolve to the first match. Rows are not forced to match the width of
/// the header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Split a decoded grid into header and body. Without a header row the
    /// columns are named `column_1`, `column_2`, ... after the widest row.
    pub fn from_grid(mut grid: Grid, header_row: bool) -> Self {
        if grid.is_empty() {
            return Dataset::default();
        }
        if header_row {
            let header = grid.remove(0);
            let columns = header.iter().map(|c| c.to_string()).collect();
            Dataset::new(columns, grid)
        } else {
            let width = grid.iter().map(|r| r.len()).max().unwrap_or(0);
            let columns = (1..=width).map(|i| format!("column_{i}")).collect();
            Dataset::new(columns, grid)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Number of cells of the widest row or the header, whichever is larger.
    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.len())
            .max()
            .unwrap_or(0)
            .max(self.columns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_numbers_and_text() {
        assert_eq!(CellValue::parse("30"), CellValue::Number(30.0));
        assert_eq!(CellValue::parse(" 2.5 "), CellValue::Number(2.5));
        assert_eq!(CellValue::parse("-1e3"), CellValue::Number(-1000.0));
        assert_eq!(CellValue::parse("Bob"), CellValue::Text("Bob".into()));
        assert_eq!(CellValue::parse("inf"), CellValue::Text("inf".into()));
        assert_eq!(CellValue::parse("NaN"), CellValue::Text("NaN".into()));
        assert_eq!(CellValue::parse("12abc"), CellValue::Text("12abc".into()));
    }

    #[test]
    fn display_drops_integral_fraction() {
        assert_eq!(CellValue::Number(30.0).to_string(), "30");
        assert_eq!(CellValue::Number(2.5).to_string(), "2.5");
        assert_eq!(CellValue::Bool(true).to_string(), "true");
        assert_eq!(CellValue::Empty.to_string(), "");
    }

    #[test]
    fn compare_numeric_before_string() {
        let nine = CellValue::Number(9.0);
        let ten = CellValue::Number(10.0);
        assert_eq!(CellValue::compare(Some(&nine), Some(&ten)), Ordering::Less);

        // mixed pairs fall back to the string form
        let text = CellValue::from("10");
        assert_eq!(CellValue::compare(Some(&nine), Some(&text)), Ordering::Greater);
        assert_eq!(CellValue::compare(None, Some(&text)), Ordering::Less);
    }

    #[test]
    fn locale_cmp_ignores_case_first() {
        let mut words = vec!["cherry", "banana", "Banana", "apple"];
        words.sort_by(|a, b| locale_cmp(a, b));
        assert_eq!(words, vec!["apple", "banana", "Banana", "cherry"]);
    }

    #[test]
    fn locale_cmp_places_accents_with_their_letter() {
        assert_eq!(locale_cmp("Äpfel", "Zebra"), Ordering::Less);
        assert_eq!(locale_cmp("élan", "epsilon"), Ordering::Less);

        let mut words = vec!["Zürich", "Graz", "Österreich", "Wien", "Ägypten"];
        words.sort_by(|a, b| locale_cmp(a, b));
        assert_eq!(words, vec!["Ägypten", "Graz", "Österreich", "Wien", "Zürich"]);
    }

    #[test]
    fn from_grid_with_header() {
        let grid: Grid = vec![
            vec!["Name".into(), "Age".into()],
            vec!["Bob".into(), CellValue::Number(30.0)],
        ];
        let ds = Dataset::from_grid(grid, true);
        assert_eq!(ds.columns, vec!["Name", "Age"]);
        assert_eq!(ds.rows, vec![vec![CellValue::from("Bob"), CellValue::Number(30.0)]]);
    }

    #[test]
    fn from_grid_without_header() {
        let grid: Grid = vec![vec!["a".into()], vec!["b".into(), "c".into()]];
        let ds = Dataset::from_grid(grid, false);
        assert_eq!(ds.columns, vec!["column_1", "column_2"]);
        assert_eq!(ds.rows.len(), 2);
    }

    #[test]
    fn empty_grid_gives_empty_dataset() {
        let ds = Dataset::from_grid(Vec::new(), true);
        assert!(ds.is_empty());
        assert_eq!(ds.width(), 0);
    }

    #[test]
    fn duplicate_columns_resolve_to_first() {
        let ds = Dataset::new(vec!["a".into(), "b".into(), "a".into()], Vec::new());
        assert_eq!(ds.column_index("a"), Some(0));
        assert_eq!(ds.column_index("z"), None);
    }
}
