//! Delimited-file normalization
//!
//! Input files come from several exports whose header spellings drift
//! ("Daily Sales", "daily_sales", "DAILY-SALES"). Each file type declares an
//! alias table through [`FieldSpec`]; the header is resolved once per file into
//! a [`ColumnMap`] and every row is read through that fixed index.

pub mod filename;
pub mod stock;

use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

use crate::error::{PipelineError, Result};

pub use filename::{normalize_store_name, snapshot_date, store_name_from_filename};
pub use stock::{read_stock_file, NormalizedFile, RawRow, StockField, StockFileContext};

/// A logical column and the header spellings that map to it
pub trait FieldSpec: Copy + Eq + Hash + fmt::Debug + 'static {
    const ALL: &'static [Self];

    /// Canonical name, used in logs and errors
    fn name(self) -> &'static str;

    fn aliases(self) -> &'static [&'static str];
}

/// Lowercase and drop spaces, `_`, `.`, `-`, `/` (and a stray BOM).
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !matches!(*c, ' ' | '_' | '.' | '-' | '/') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Header index resolved once per file
#[derive(Debug, Clone)]
pub struct ColumnMap<F: FieldSpec> {
    index: HashMap<F, usize>,
}

impl<F: FieldSpec> ColumnMap<F> {
    pub fn resolve(headers: &StringRecord) -> Self {
        let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
        let mut index = HashMap::new();

        for &field in F::ALL {
            let accepted: Vec<String> = field.aliases().iter().map(|a| normalize_header(a)).collect();
            if let Some(pos) = normalized.iter().position(|h| accepted.contains(h)) {
                index.insert(field, pos);
            }
        }

        Self { index }
    }

    pub fn has(&self, field: F) -> bool {
        self.index.contains_key(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn require(&self, field: F, file: &str) -> Result<()> {
        if self.has(field) {
            Ok(())
        } else {
            Err(PipelineError::MissingColumn {
                file: file.to_string(),
                column: field.name(),
            })
        }
    }

    /// Trimmed cell text; empty when the column is absent or the row is short.
    pub fn text<'r>(&self, record: &'r StringRecord, field: F) -> &'r str {
        self.index
            .get(&field)
            .and_then(|&pos| record.get(pos))
            .map(str::trim)
            .unwrap_or("")
    }

    /// Numeric cell; blank, absent, or unparseable cells read as zero.
    pub fn number(&self, record: &StringRecord, field: F) -> f64 {
        let raw = self.text(record, field);
        match parse_number(raw) {
            Some(value) => value,
            None => {
                debug!(column = field.name(), value = raw, "Unparseable number, using 0");
                0.0
            },
        }
    }
}

/// Parse a number, stripping `,` thousands separators.
///
/// Blank (or a lone `-`) is zero; anything else unparseable is `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() || cleaned == "-" {
        return Some(0.0);
    }

    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `;` when the header line has more semicolons than commas, else `,`.
pub fn detect_delimiter(header_line: &[u8]) -> u8 {
    let semicolons = header_line.iter().filter(|b| **b == b';').count();
    let commas = header_line.iter().filter(|b| **b == b',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// A file opened for row-by-row reading, with its header already read
pub struct DelimitedFile {
    pub headers: StringRecord,
    pub reader: csv::Reader<Cursor<Vec<u8>>>,
}

/// Read `path`, sniff its delimiter, and parse the header row.
///
/// Fails if the file cannot be read or has no usable header.
pub fn open_delimited(path: &Path) -> Result<DelimitedFile> {
    let bytes = std::fs::read(path)?;
    let first_line_end = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
    let delimiter = detect_delimiter(&bytes[..first_line_end]);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(Cursor::new(bytes));

    let headers = reader.headers()?.clone();
    if headers.iter().all(|h| normalize_header(h).is_empty()) {
        return Err(PipelineError::invalid_file(path, "missing header row"));
    }

    Ok(DelimitedFile { headers, reader })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Probe {
        Daily,
        Name,
    }

    impl FieldSpec for Probe {
        const ALL: &'static [Self] = &[Probe::Daily, Probe::Name];

        fn name(self) -> &'static str {
            match self {
                Probe::Daily => "daily_sales",
                Probe::Name => "name",
            }
        }

        fn aliases(self) -> &'static [&'static str] {
            match self {
                Probe::Daily => &["daily_sales", "daily sales"],
                Probe::Name => &["nama", "product name"],
            }
        }
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header(" Max. Daily Sales "), "maxdailysales");
        assert_eq!(normalize_header("\u{feff}SKU"), "sku");
        assert_eq!(normalize_header("Min/Order-Qty"), "minorderqty");
    }

    #[test]
    fn test_column_map_resolves_variants_once() {
        for header in ["Daily Sales", "daily_sales", "DAILY-SALES", "daily.sales"] {
            let headers = StringRecord::from(vec!["SKU", header]);
            let map = ColumnMap::<Probe>::resolve(&headers);
            assert!(map.has(Probe::Daily), "{header} should resolve");
            assert!(!map.has(Probe::Name));
        }
    }

    #[test]
    fn test_absent_column_reads_as_default() {
        let map = ColumnMap::<Probe>::resolve(&StringRecord::from(vec!["Product Name"]));
        let row = StringRecord::from(vec!["Lipstick"]);
        assert_eq!(map.text(&row, Probe::Name), "Lipstick");
        assert_eq!(map.text(&row, Probe::Daily), "");
        assert_eq!(map.number(&row, Probe::Daily), 0.0);
        assert!(map.require(Probe::Daily, "x.csv").is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(""), Some(0.0));
        assert_eq!(parse_number("  "), Some(0.0));
        assert_eq!(parse_number("1,250"), Some(1250.0));
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
        assert_eq!(parse_number("-"), Some(0.0));
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter(b"sku;brand;stock"), b';');
        assert_eq!(detect_delimiter(b"sku,brand,stock"), b',');
        assert_eq!(detect_delimiter(b"sku;name,with,commas"), b',');
    }

    #[test]
    fn test_open_delimited_semicolon_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "nama;daily sales").unwrap();
        writeln!(file, "Serum;2,5").unwrap();
        let mut opened = open_delimited(file.path()).unwrap();
        let map = ColumnMap::<Probe>::resolve(&opened.headers);
        let row = opened.reader.records().next().unwrap().unwrap();
        assert_eq!(map.text(&row, Probe::Name), "Serum");
        // "2,5" loses its comma as a thousands separator
        assert_eq!(map.number(&row, Probe::Daily), 25.0);
    }

    #[test]
    fn test_open_delimited_rejects_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(open_delimited(file.path()).is_err());
    }
}
