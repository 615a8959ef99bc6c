//! Source reader: CSV and spreadsheet files into raw rows.
//!
//! Bytes are decoded as a whole before any splitting happens, so a legacy
//! single-byte Thai file never reaches the CSV parser half-decoded. Rows are
//! then handed out lazily, one [`RawRow`] at a time.
//!
//! Two column layouts are supported:
//!
//! - [`ColumnLayout::Header`] - the first row names the columns
//! - [`ColumnLayout::Positional`] - names are declared by the caller and the
//!   physical first row is always discarded

pub mod encoding;

use calamine::{open_workbook_auto, Reader};
use csv::{ReaderBuilder, StringRecordsIntoIter};
use serde_json::{Map, Value};
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{SourceError, SourceResult};
pub use encoding::{decode_content, detect_encoding, repair_mojibake, TextEncoding};

// =============================================================================
// Options
// =============================================================================

/// Physical file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceFormat {
    /// Decide from the file extension.
    #[default]
    Auto,
    /// Delimited text (CSV, TSV).
    Delimited,
    /// Workbook read through calamine.
    Spreadsheet,
}

impl SourceFormat {
    /// Resolve `Auto` against a path.
    pub fn resolve(self, path: &Path) -> SourceResult<SourceFormat> {
        if self != SourceFormat::Auto {
            return Ok(self);
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "csv" | "tsv" | "txt" => Ok(SourceFormat::Delimited),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(SourceFormat::Spreadsheet),
            _ => Err(SourceError::UnsupportedFormat(if ext.is_empty() {
                "(no extension)".to_string()
            } else {
                ext
            })),
        }
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(SourceFormat::Auto),
            "csv" | "delimited" => Ok(SourceFormat::Delimited),
            "xlsx" | "excel" | "spreadsheet" => Ok(SourceFormat::Spreadsheet),
            other => Err(format!("unknown format '{}'", other)),
        }
    }
}

/// How column identifiers are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnLayout {
    /// Names come from the first physical row.
    Header,
    /// Names are declared; position 0 is the first name. The physical first
    /// row is skipped whatever it contains.
    Positional(Vec<String>),
}

impl ColumnLayout {
    pub fn positional(names: &[&str]) -> Self {
        ColumnLayout::Positional(names.iter().map(|n| n.to_string()).collect())
    }
}

/// Everything needed to open a source file.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub format: SourceFormat,
    /// `None` detects the encoding.
    pub encoding: Option<TextEncoding>,
    pub layout: ColumnLayout,
    /// `None` detects the delimiter from the first line.
    pub delimiter: Option<char>,
}

impl SourceOptions {
    pub fn header() -> Self {
        Self {
            format: SourceFormat::Auto,
            encoding: None,
            layout: ColumnLayout::Header,
            delimiter: None,
        }
    }

    pub fn positional(names: &[&str]) -> Self {
        Self {
            layout: ColumnLayout::positional(names),
            ..Self::header()
        }
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self::header()
    }
}

// =============================================================================
// Raw Rows
// =============================================================================

/// One source row: cells addressable by column name or by position.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    line: usize,
    columns: Arc<[String]>,
    cells: Vec<String>,
    positional: bool,
}

impl RawRow {
    pub fn new(line: usize, columns: Arc<[String]>, cells: Vec<String>, positional: bool) -> Self {
        Self { line, columns, cells, positional }
    }

    /// Header-style row from `(column, value)` pairs.
    pub fn from_pairs(line: usize, pairs: &[(&str, &str)]) -> Self {
        let columns: Arc<[String]> = pairs.iter().map(|(c, _)| c.to_string()).collect();
        let cells = pairs.iter().map(|(_, v)| v.to_string()).collect();
        Self::new(line, columns, cells, false)
    }

    /// Positional row for an entity's declared columns.
    pub fn from_cells(line: usize, names: &[&str], cells: &[&str]) -> Self {
        let columns: Arc<[String]> = names.iter().map(|c| c.to_string()).collect();
        let cells = cells.iter().map(|v| v.to_string()).collect();
        Self::new(line, columns, cells, true)
    }

    /// 1-based line (CSV) or row (spreadsheet) number.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Number of physical cells in the row.
    pub fn width(&self) -> usize {
        self.cells.len()
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }

    /// Value of the first column with this name.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.at(i))
    }

    /// Value at a position.
    pub fn at(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(String::as_str)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }

    /// JSON object view, for display.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (i, column) in self.columns.iter().enumerate() {
            let value = self.at(i).unwrap_or("");
            obj.entry(column.clone()).or_insert_with(|| Value::String(value.to_string()));
        }
        Value::Object(obj)
    }
}

/// Lazy, consuming sequence of rows from one file.
pub struct RawRows {
    columns: Arc<[String]>,
    positional: bool,
    encoding: Option<TextEncoding>,
    delimiter: Option<char>,
    cells: CellRows,
}

enum CellRows {
    Delimited(StringRecordsIntoIter<Cursor<Vec<u8>>>),
    Sheet(std::iter::Enumerate<std::vec::IntoIter<Vec<String>>>),
}

impl RawRows {
    /// Column identifiers in position order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Encoding used to decode the file (delimited sources only).
    pub fn encoding(&self) -> Option<TextEncoding> {
        self.encoding
    }

    /// Delimiter used to split the file (delimited sources only).
    pub fn delimiter(&self) -> Option<char> {
        self.delimiter
    }

    fn next_cells(&mut self) -> Option<SourceResult<(usize, Vec<String>)>> {
        match &mut self.cells {
            CellRows::Delimited(records) => records.next().map(|result| {
                result
                    .map(|record| {
                        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
                        (line, record.iter().map(str::to_string).collect())
                    })
                    .map_err(|e| SourceError::Parse {
                        line: e.position().map(|p| p.line() as usize).unwrap_or(0),
                        message: e.to_string(),
                    })
            }),
            // +2: 1-based, and the first row was consumed at open
            CellRows::Sheet(rows) => rows.next().map(|(i, cells)| Ok((i + 2, cells))),
        }
    }
}

impl Iterator for RawRows {
    type Item = SourceResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line, cells) = match self.next_cells()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };

            let row = RawRow::new(line, Arc::clone(&self.columns), cells, self.positional);
            if row.is_blank() {
                continue;
            }
            return Some(Ok(row));
        }
    }
}

// =============================================================================
// Opening
// =============================================================================

/// Open a source file. Fails before yielding anything if the file is absent,
/// unreadable or cannot be decoded.
pub fn open_source<P: AsRef<Path>>(path: P, options: &SourceOptions) -> SourceResult<RawRows> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SourceError::NotFound(path.to_path_buf()));
    }

    match options.format.resolve(path)? {
        SourceFormat::Spreadsheet => open_spreadsheet(path, options),
        _ => {
            let bytes = std::fs::read(path).map_err(|source| SourceError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
            open_bytes(&bytes, options)
        }
    }
}

/// Open delimited text already in memory.
pub fn open_bytes(bytes: &[u8], options: &SourceOptions) -> SourceResult<RawRows> {
    let encoding = options.encoding.unwrap_or_else(|| detect_encoding(bytes));
    let content = decode_content(bytes, encoding)?;
    let delimiter = options.delimiter.unwrap_or_else(|| detect_delimiter(&content));
    // csv splits on a single byte
    if !delimiter.is_ascii() {
        return Err(SourceError::UnsupportedFormat(format!(
            "delimiter '{}' is not a single-byte ASCII character",
            delimiter
        )));
    }

    let mut records = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .quote(b'"')
        .double_quote(true)
        .from_reader(Cursor::new(content.into_bytes()))
        .into_records();

    let first = match records.next() {
        Some(result) => result.map_err(|e| SourceError::Parse { line: 1, message: e.to_string() })?,
        None => return Err(SourceError::EmptySource),
    };
    let first: Vec<String> = first.iter().map(str::to_string).collect();
    let (columns, positional) = resolve_columns(&options.layout, first);

    Ok(RawRows {
        columns,
        positional,
        encoding: Some(encoding),
        delimiter: Some(delimiter),
        cells: CellRows::Delimited(records),
    })
}

fn open_spreadsheet(path: &Path, options: &SourceOptions) -> SourceResult<RawRows> {
    let mut workbook = open_workbook_auto(path).map_err(|e| SourceError::Spreadsheet(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| SourceError::Spreadsheet("workbook has no sheets".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| SourceError::Spreadsheet(e.to_string()))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<String>>());

    let first = rows.next().ok_or(SourceError::EmptySource)?;
    let rest: Vec<Vec<String>> = rows.collect();
    let (columns, positional) = resolve_columns(&options.layout, first);

    Ok(RawRows {
        columns,
        positional,
        encoding: None,
        delimiter: None,
        cells: CellRows::Sheet(rest.into_iter().enumerate()),
    })
}

/// Column names from the layout and the (always consumed) first row.
fn resolve_columns(layout: &ColumnLayout, first_row: Vec<String>) -> (Arc<[String]>, bool) {
    match layout {
        ColumnLayout::Positional(names) => (names.iter().cloned().collect(), true),
        ColumnLayout::Header => {
            let headers: Arc<[String]> = first_row
                .into_iter()
                .map(|h| {
                    let h = h.trim().trim_start_matches('\u{feff}').trim().to_string();
                    repair_mojibake(&h).unwrap_or(h)
                })
                .collect();
            (headers, false)
        }
    }
}

/// Detect the delimiter by counting occurrences in the first line.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}
