//! Roster ingestion from delimited text or spreadsheets.
//!
//! The roster schema is not known in advance: every header is kept and
//! callers ask for columns by name through [`RosterTable::column_index`].

use std::borrow::Cow;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use recon_core::error::{ReconError, Result};
use tracing::{debug, info, warn};

const UTF8_BOM: char = '\u{feff}';

/// File formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterFormat {
    /// Comma-separated text (`.csv`, `.txt`).
    Delimited,
    /// Workbook readable by calamine (`.xlsx`, `.xlsm`, `.xls`, `.ods`).
    Spreadsheet,
}

impl RosterFormat {
    /// Pick the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(RosterFormat::Delimited),
            "xlsx" | "xlsm" | "xls" | "ods" => Ok(RosterFormat::Spreadsheet),
            _ => Err(ReconError::UnsupportedFormat(format!(
                "{} (expected .csv or .xlsx)",
                path.display()
            ))),
        }
    }
}

/// Encoding a delimited roster was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

/// An uploaded roster: ordered headers and string cells.
///
/// Every row has exactly `headers.len()` cells; short rows are padded with
/// empty strings and surplus cells are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RosterTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the first column named `name`, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Read a roster from disk, choosing the parser by extension.
pub fn load_roster(path: &Path) -> Result<RosterTable> {
    let table = match RosterFormat::from_path(path)? {
        RosterFormat::Delimited => {
            let bytes = std::fs::read(path).map_err(|source| ReconError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
            parse_delimited(&bytes)?
        }
        RosterFormat::Spreadsheet => read_spreadsheet(path)?,
    };

    info!(
        path = %path.display(),
        rows = table.len(),
        columns = table.headers().len(),
        "roster loaded"
    );
    Ok(table)
}

/// Parse comma-separated roster bytes.
///
/// Decoding tries UTF-8 first and falls back once to Latin-1. Rows whose
/// cells are all blank are skipped, as for spreadsheets.
pub fn parse_delimited(bytes: &[u8]) -> Result<RosterTable> {
    let (text, encoding) = decode_text(bytes);
    if encoding == TextEncoding::Latin1 {
        warn!("roster is not valid UTF-8; decoded as Latin-1");
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::RosterParse(format!("invalid header row: {}", e)))?
        .iter()
        .map(clean_header)
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(ReconError::RosterParse("roster has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            ReconError::RosterParse(format!("invalid record {}: {}", idx + 1, e))
        })?;
        let row: Vec<String> = record.iter().map(str::to_string).collect();
        if !is_blank_row(&row) {
            rows.push(row);
        }
    }

    debug!(rows = rows.len(), ?encoding, "parsed delimited roster");
    Ok(RosterTable::new(headers, rows))
}

/// Decode as UTF-8 (BOM stripped), else as Latin-1.
///
/// Latin-1 maps every byte to the code point of the same value, so the
/// fallback cannot fail.
pub fn decode_text(bytes: &[u8]) -> (Cow<'_, str>, TextEncoding) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (
            Cow::Borrowed(s.strip_prefix(UTF8_BOM).unwrap_or(s)),
            TextEncoding::Utf8,
        ),
        Err(_) => (
            Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
            TextEncoding::Latin1,
        ),
    }
}

/// Read the first worksheet of a workbook; its first row is the header and
/// all-blank rows are skipped.
pub fn read_spreadsheet(path: &Path) -> Result<RosterTable> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| ReconError::RosterParse(format!("{}: {}", path.display(), e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ReconError::RosterParse(format!("{} has no worksheets", path.display())))?
        .map_err(|e| ReconError::RosterParse(format!("{}: {}", path.display(), e)))?;

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = sheet_rows
        .next()
        .ok_or_else(|| ReconError::RosterParse("roster has no header row".to_string()))?
        .iter()
        .map(|c| clean_header(&cell_to_string(c)))
        .collect();

    let rows = sheet_rows
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
        .filter(|row| !is_blank_row(row))
        .collect();

    Ok(RosterTable::new(headers, rows))
}

/// A row with no cell holding anything but whitespace.
fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(v) => v.to_string(),
        Data::Float(v) => v.to_string(),
        Data::Int(v) => v.to_string(),
        Data::Bool(v) => v.to_string(),
        Data::DateTime(v) => v.to_string(),
        Data::DateTimeIso(v) => v.to_string(),
        Data::DurationIso(v) => v.to_string(),
        Data::Error(v) => format!("{v:?}"),
        Data::Empty => String::new(),
    }
}

fn clean_header(raw: &str) -> String {
    raw.trim_start_matches(UTF8_BOM).trim().to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use recon_core::models::{ColumnConfig, ReconciledRow, ReconciledTable};
    use rust_decimal::Decimal;

    use crate::merge::merge_roster;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            RosterFormat::from_path(Path::new("deals.CSV")).unwrap(),
            RosterFormat::Delimited
        );
        assert_eq!(
            RosterFormat::from_path(Path::new("deals.xlsx")).unwrap(),
            RosterFormat::Spreadsheet
        );
        assert!(matches!(
            RosterFormat::from_path(Path::new("deals.pdf")),
            Err(ReconError::UnsupportedFormat(_))
        ));
        assert!(RosterFormat::from_path(Path::new("deals")).is_err());
    }

    #[test]
    fn test_parse_utf8_csv() {
        let csv = "Name,Person - Email - Work,Deal - Owner\nZoë,z@x.com,Alice\n";
        let table = parse_delimited(csv.as_bytes()).unwrap();
        assert_eq!(table.headers(), ["Name", "Person - Email - Work", "Deal - Owner"]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0][0], "Zoë");
    }

    #[test]
    fn test_parse_latin1_fallback() {
        // "Zoë" with ë as the single Latin-1 byte 0xEB (invalid UTF-8).
        let mut bytes = b"Name,Email\nZo".to_vec();
        bytes.push(0xEB);
        bytes.extend_from_slice(b",z@x.com\n");

        let (_, encoding) = decode_text(&bytes);
        assert_eq!(encoding, TextEncoding::Latin1);

        let table = parse_delimited(&bytes).unwrap();
        assert_eq!(table.rows()[0][0], "Zoë");
    }

    #[test]
    fn test_utf8_bom_stripped_from_header() {
        let csv = "\u{feff}Person - Email - Work,Name\na@x.com,A\n";
        let table = parse_delimited(csv.as_bytes()).unwrap();
        assert!(table.has_column("Person - Email - Work"));
    }

    #[test]
    fn test_short_rows_padded_long_rows_truncated() {
        let csv = "a,b,c\n1\n1,2,3,4\n";
        let table = parse_delimited(csv.as_bytes()).unwrap();
        assert_eq!(table.rows()[0], vec!["1", "", ""]);
        assert_eq!(table.rows()[1], vec!["1", "2", "3"]);
    }

    #[test]
    fn test_headers_trimmed() {
        let table = parse_delimited(b" Deal - Owner ,x\nA,1\n").unwrap();
        assert_eq!(table.column_index("Deal - Owner"), Some(0));
    }

    #[test]
    fn test_empty_file_is_parse_error() {
        assert!(matches!(
            parse_delimited(b""),
            Err(ReconError::RosterParse(_))
        ));
    }

    #[test]
    fn test_column_presence_queries() {
        let table = RosterTable::new(
            vec!["x".to_string(), "y".to_string(), "x".to_string()],
            vec![],
        );
        assert_eq!(table.column_index("x"), Some(0));
        assert!(table.has_column("y"));
        assert!(!table.has_column("z"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_roster_from_csv_file() {
        let dir = TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("roster.csv");
        std::fs::write(&path, "Person - Email - Work\na@x.com\nb@x.com\n").unwrap();

        let table = load_roster(&path).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_load_roster_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_roster(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, ReconError::FileRead { .. }));
    }

    #[test]
    fn test_load_roster_corrupt_workbook() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roster.xlsx");
        std::fs::write(&path, b"this is not a zip archive").unwrap();

        let err = load_roster(&path).unwrap_err();
        assert!(matches!(err, ReconError::RosterParse(_)));
    }

    #[test]
    fn test_blank_delimited_rows_skipped() {
        let csv = "Name,Person - Email - Work,Deal - Owner\nUna,u@x.com,Alice\n,,\n , ,\t\nAbe,,Bob\n";
        let table = parse_delimited(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1], vec!["Abe", "", "Bob"]);
    }

    #[test]
    fn test_load_roster_from_xlsx_file() {
        let table = load_roster(&fixture("roster.xlsx")).unwrap();
        assert_eq!(
            table.headers(),
            ["Name", "Person - Email - Work", "Deal - Owner", "Seats"]
        );
        // The whitespace-only row and the fully empty row are both dropped.
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0], vec!["Una", "u@x.com", "Alice", "42"]);
        assert_eq!(table.rows()[1], vec!["Abe", "", "Bob", "7.5"]);
    }

    #[test]
    fn test_xlsx_roster_merges_with_reconciled_events() {
        let table = load_roster(&fixture("roster.xlsx")).unwrap();
        let events = ReconciledTable::from_rows(vec![ReconciledRow {
            email: "u@x.com".to_string(),
            paid_amount: Decimal::from(50),
            refund_amount: Decimal::from(20),
        }]);

        let merged = merge_roster(&table, &events, &ColumnConfig::default()).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.rows[0].email.as_deref(), Some("u@x.com"));
        assert_eq!(merged.rows[0].paid_amount, Decimal::from(50));
        assert_eq!(merged.rows[1].email, None);
        assert_eq!(merged.rows[1].paid_amount, Decimal::ZERO);
    }
}
