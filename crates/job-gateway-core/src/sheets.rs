//! Spreadsheet access.
//!
//! [`SheetClient`] is the raw value-range seam implemented by
//! [`crate::adapters::google_sheets::GoogleSheetsClient`] and the in-memory
//! fake. [`Spreadsheets`] layers the table-level operations the job functions
//! use on top of it: reading a worksheet into a [`Table`], pasting a table at a
//! cell, and clearing open-ended ranges.
//!
//! Spreadsheets are addressed by their browser URL; ranges use A1 notation.

use crate::table::{cell_text, Table, TableError};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, instrument};

// ============================================================================
// Errors
// ============================================================================

/// Spreadsheet access failures
#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("Not a spreadsheet URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid cell reference: {0}")]
    InvalidCell(String),

    #[error("Worksheet not found: {0}")]
    WorksheetNotFound(String),

    #[error("Spreadsheet authorization failed: {0}")]
    Authorization(String),

    #[error("Spreadsheet API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Spreadsheet request failed: {0}")]
    Transport(String),

    #[error("Unexpected spreadsheet response: {0}")]
    Decode(String),

    #[error(transparent)]
    Table(#[from] TableError),
}

// ============================================================================
// Client seam
// ============================================================================

/// Raw value-range operations on one spreadsheet backend.
///
/// `range` arguments are fully qualified (`'Sheet'!A1:B2` or `'Sheet'`).
/// Rows returned by [`SheetClient::read_values`] are ragged: trailing empty
/// cells and trailing empty rows are omitted.
#[async_trait]
pub trait SheetClient: Send + Sync {
    async fn read_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<Value>>, SheetError>;

    /// Worksheet titles in tab order
    async fn worksheet_titles(&self, spreadsheet_id: &str) -> Result<Vec<String>, SheetError>;

    /// Write `rows` starting at the top-left of `range`, parsing values as if
    /// typed by a user.
    async fn write_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<Value>],
    ) -> Result<(), SheetError>;

    async fn clear_values(&self, spreadsheet_id: &str, range: &str) -> Result<(), SheetError>;
}

// ============================================================================
// Cell references
// ============================================================================

/// An A1-notation cell such as `L2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRef {
    pub column: String,
    pub row: u32,
}

impl CellRef {
    pub fn new(column: impl Into<String>, row: u32) -> Self {
        Self {
            column: column.into().to_ascii_uppercase(),
            row,
        }
    }

    /// 1-based column number
    pub fn column_number(&self) -> u32 {
        column_to_number(&self.column)
    }

    /// The cell `rows` below and `columns` right of this one
    pub fn offset(&self, rows: u32, columns: u32) -> CellRef {
        CellRef {
            column: number_to_column(self.column_number() + columns),
            row: self.row + rows,
        }
    }
}

impl FromStr for CellRef {
    type Err = SheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SheetError::InvalidCell(s.to_string());
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (column, row) = s.split_at(split);

        if column.is_empty() || !column.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }
        let row: u32 = row.parse().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }
        Ok(CellRef::new(column, row))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column, self.row)
    }
}

/// `A` → 1, `Z` → 26, `AA` → 27
pub fn column_to_number(column: &str) -> u32 {
    column
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .fold(0, |n, c| n * 26 + (c as u32 - 'A' as u32 + 1))
}

/// 1 → `A`, 26 → `Z`, 27 → `AA`; 0 → empty
pub fn number_to_column(mut number: u32) -> String {
    let mut letters = Vec::new();
    while number > 0 {
        let remainder = (number - 1) % 26;
        letters.push(char::from(b'A' + remainder as u8));
        number = (number - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Extract the spreadsheet id from a `/spreadsheets/d/<id>/...` URL
pub fn spreadsheet_id_from_url(url: &str) -> Result<String, SheetError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").expect("spreadsheet URL pattern is valid")
    });

    pattern
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
        .ok_or_else(|| SheetError::InvalidUrl(url.to_string()))
}

/// Quote a worksheet title for use in a range
pub fn qualified_range(sheet: &str, range: Option<&str>) -> String {
    let quoted = format!("'{}'", sheet.replace('\'', "''"));
    match range {
        Some(range) => format!("{}!{}", quoted, range),
        None => quoted,
    }
}

/// Suffix repeated header names: `a, a, b, a` → `a, a_1, b, a_2`
pub fn make_unique_headers<I, S>(headers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|header| {
            let header = header.into();
            match seen.get_mut(&header) {
                Some(count) => {
                    *count += 1;
                    format!("{}_{}", header, count)
                }
                None => {
                    seen.insert(header.clone(), 0);
                    header
                }
            }
        })
        .collect()
}

// ============================================================================
// Table-level operations
// ============================================================================

/// Result of writing a block of cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetUpdate {
    Updated {
        sheet: String,
        start: CellRef,
        end: CellRef,
    },
    /// `update_range` was called with no rows
    NothingToUpdate,
    /// `paste_table` was called with an empty table
    NothingToPaste,
}

impl SheetUpdate {
    /// First written row, if anything was written
    pub fn start_row(&self) -> Option<u32> {
        match self {
            Self::Updated { start, .. } => Some(start.row),
            _ => None,
        }
    }
}

impl fmt::Display for SheetUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updated { sheet, start, end } => {
                writeln!(f, "{}:{} of {} is updated.", start, end, sheet)
            }
            Self::NothingToUpdate => writeln!(f, "No data to update."),
            Self::NothingToPaste => f.write_str("No data to paste"),
        }
    }
}

/// Table-level spreadsheet operations over any [`SheetClient`].
#[derive(Clone)]
pub struct Spreadsheets {
    client: Arc<dyn SheetClient>,
}

impl Spreadsheets {
    pub fn new(client: Arc<dyn SheetClient>) -> Self {
        Self { client }
    }

    /// Worksheet titles in tab order
    pub async fn worksheet_titles(&self, url: &str) -> Result<Vec<String>, SheetError> {
        let id = spreadsheet_id_from_url(url)?;
        self.client.worksheet_titles(&id).await
    }

    /// Read a worksheet into a table.
    ///
    /// Without `range`, row `header_row` (1-based) is the header and every
    /// later row is data. With `range`, the first row of the range is the
    /// header. Repeated header names are made unique and rows with no
    /// non-empty cell are dropped.
    #[instrument(skip(self, url))]
    pub async fn read_table(
        &self,
        url: &str,
        sheet: &str,
        header_row: usize,
        range: Option<&str>,
    ) -> Result<Table, SheetError> {
        let id = spreadsheet_id_from_url(url)?;
        let header_index = header_row.saturating_sub(1);

        let values = self
            .client
            .read_values(&id, &qualified_range(sheet, range))
            .await?;
        let rows: Vec<Vec<String>> = values
            .into_iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();

        let (header, data) = match range {
            Some(_) => {
                let mut rows = rows.into_iter();
                match rows.next() {
                    Some(header) => (header, rows.collect()),
                    None => (self.header_row(&id, sheet, header_row).await?, Vec::new()),
                }
            }
            None if rows.is_empty() => (Vec::new(), Vec::new()),
            None => {
                let header_index = if rows.len() > header_index { header_index } else { 0 };
                let header = rows[header_index].clone();
                let data = rows.into_iter().skip(header_index + 1).collect();
                (header, data)
            }
        };

        let mut table = Table::from_text_rows(make_unique_headers(header), data);
        table.drop_empty_rows();
        debug!(rows = table.len(), columns = table.width(), "Loaded worksheet");
        Ok(table)
    }

    async fn header_row(
        &self,
        id: &str,
        sheet: &str,
        header_row: usize,
    ) -> Result<Vec<String>, SheetError> {
        let row = header_row.max(1);
        let range = qualified_range(sheet, Some(&format!("{row}:{row}")));
        let values = self.client.read_values(id, &range).await?;
        Ok(values
            .into_iter()
            .next()
            .map(|cells| cells.iter().map(cell_text).collect())
            .unwrap_or_default())
    }

    /// Non-empty prefix of one column, as text.
    ///
    /// Empty cells inside the column are kept; trailing empty cells are not.
    pub async fn column_values(
        &self,
        url: &str,
        sheet: &str,
        column: &str,
    ) -> Result<Vec<String>, SheetError> {
        let id = spreadsheet_id_from_url(url)?;
        let range = qualified_range(sheet, Some(&format!("{column}:{column}")));
        let values = self.client.read_values(&id, &range).await?;

        let mut cells: Vec<String> = values
            .into_iter()
            .map(|row| row.first().map(cell_text).unwrap_or_default())
            .collect();
        while cells.last().is_some_and(String::is_empty) {
            cells.pop();
        }
        Ok(cells)
    }

    /// Write `rows` with their top-left corner at `start_cell`.
    ///
    /// The end cell is computed from the number of rows and the width of the
    /// first row.
    #[instrument(skip(self, url, rows), fields(rows = rows.len()))]
    pub async fn update_range(
        &self,
        url: &str,
        sheet: &str,
        start_cell: &str,
        rows: &[Vec<Value>],
    ) -> Result<SheetUpdate, SheetError> {
        let Some(first) = rows.first() else {
            return Ok(SheetUpdate::NothingToUpdate);
        };

        let id = spreadsheet_id_from_url(url)?;
        let start: CellRef = start_cell.parse()?;
        let width = first.len().max(1) as u32;
        let end = start.offset(rows.len() as u32 - 1, width - 1);

        let a1 = format!("{start}:{end}");
        self.client
            .write_values(&id, &qualified_range(sheet, Some(&a1)), rows)
            .await?;

        info!(sheet = %sheet, range = %a1, "Updated worksheet range");
        Ok(SheetUpdate::Updated {
            sheet: sheet.to_string(),
            start,
            end,
        })
    }

    /// Paste the rows of `table` (without its header) at `start_cell`.
    ///
    /// With `append`, the row part of `start_cell` is replaced by the first
    /// row below the last non-empty cell of its column.
    pub async fn paste_table(
        &self,
        url: &str,
        sheet: &str,
        start_cell: &str,
        table: &Table,
        append: bool,
    ) -> Result<SheetUpdate, SheetError> {
        if table.is_empty() {
            return Ok(SheetUpdate::NothingToPaste);
        }

        let mut start: CellRef = start_cell.parse()?;
        if append {
            let used = self.column_values(url, sheet, &start.column).await?;
            start.row = used.len() as u32 + 1;
        }

        self.update_range(url, sheet, &start.to_string(), table.rows())
            .await
    }

    /// Clear `range` on a worksheet.
    ///
    /// An open-ended range such as `A2:D` is closed at the last used row.
    /// Returns a human-readable summary; a sheet without data, or a range
    /// starting below the data, is left untouched.
    #[instrument(skip(self, url))]
    pub async fn clear_range(
        &self,
        url: &str,
        sheet: &str,
        range: &str,
    ) -> Result<String, SheetError> {
        let id = spreadsheet_id_from_url(url)?;
        let data = self.client.read_values(&id, &qualified_range(sheet, None)).await?;

        let has_data = data
            .iter()
            .any(|row| row.iter().any(|cell| !cell_text(cell).is_empty()));
        if !has_data {
            return Ok("No data found to clear.".to_string());
        }
        let max_row = data.len();

        let (start_part, end_part) = match range.split_once(':') {
            Some((start, end)) => (start, Some(end)),
            None => (range, None),
        };

        let start_row = digits(start_part).parse::<usize>().unwrap_or(1);
        if start_row > max_row {
            return Ok(format!(
                "Start row {} is beyond the last row. No data to clear.",
                start_row
            ));
        }

        let range = match end_part {
            Some(end) if digits(end).is_empty() => format!("{start_part}:{end}{max_row}"),
            _ => range.to_string(),
        };

        self.client
            .clear_values(&id, &qualified_range(sheet, Some(&range)))
            .await?;
        info!(sheet = %sheet, range = %range, "Cleared worksheet range");
        Ok(format!("Range {} has been cleared.", range))
    }
}

fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
#[path = "sheets_tests.rs"]
mod tests;
