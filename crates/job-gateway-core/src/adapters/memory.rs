//! # In-Memory Adapters
//!
//! Recording fakes for [`SheetClient`], [`Database`] and [`Notifier`], used by
//! unit and integration tests and for local runs without external services.

use crate::database::{
    deleted_and_inserted, normalize_query, nothing_to_insert, nothing_to_upsert, upserted,
    Database, DatabaseError, WritePlan, DEFAULT_EXCLUDED_COLUMNS,
};
use crate::notify::{Notifier, NotifyError, SlackMessage, SlackTarget};
use crate::sheets::{column_to_number, spreadsheet_id_from_url, SheetClient, SheetError};
use crate::table::{cell_text, Table};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Spreadsheets
// ============================================================================

type Grid = Vec<Vec<Value>>;

/// A write observed by [`MemorySheetClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSheetWrite {
    pub range: String,
    pub rows: Grid,
}

#[derive(Default)]
struct SheetState {
    // spreadsheet id -> worksheets in tab order
    books: HashMap<String, Vec<(String, Grid)>>,
    writes: Vec<RecordedSheetWrite>,
    clears: Vec<String>,
}

/// Spreadsheet backend held in memory.
///
/// Understands the qualified A1 ranges produced by
/// [`crate::sheets::qualified_range`], including open-ended ranges
/// (`A2:D`, `L:L`, `1:1`).
#[derive(Clone, Default)]
pub struct MemorySheetClient {
    state: Arc<Mutex<SheetState>>,
}

impl MemorySheetClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worksheet to the spreadsheet at `url` (a URL or a bare id)
    pub fn with_sheet<R, C, V>(self, url: &str, title: &str, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let grid: Grid = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        lock(&self.state)
            .books
            .entry(book_id(url))
            .or_default()
            .push((title.to_string(), grid));
        self
    }

    /// Current contents of a worksheet, trimmed like an API read
    pub fn sheet_values(&self, url: &str, title: &str) -> Option<Grid> {
        let state = lock(&self.state);
        state
            .books
            .get(&book_id(url))?
            .iter()
            .find(|(name, _)| name == title)
            .map(|(_, grid)| read_grid(grid, &Bounds::everything()))
    }

    pub fn writes(&self) -> Vec<RecordedSheetWrite> {
        lock(&self.state).writes.clone()
    }

    pub fn clears(&self) -> Vec<String> {
        lock(&self.state).clears.clone()
    }

    fn with_grid<T>(
        &self,
        spreadsheet_id: &str,
        range: &str,
        f: impl FnOnce(&mut Grid, Bounds) -> T,
    ) -> Result<T, SheetError> {
        let (title, a1) = split_range(range);
        let bounds = Bounds::parse(a1.as_deref()).ok_or_else(|| SheetError::Api {
            status: 400,
            message: format!("Unable to parse range: {range}"),
        })?;

        let mut state = lock(&self.state);
        let book = state
            .books
            .get_mut(spreadsheet_id)
            .ok_or_else(|| SheetError::Api {
                status: 404,
                message: format!("Requested entity was not found: {spreadsheet_id}"),
            })?;
        let (_, grid) = book
            .iter_mut()
            .find(|(name, _)| *name == title)
            .ok_or_else(|| SheetError::WorksheetNotFound(title.clone()))?;
        Ok(f(grid, bounds))
    }
}

fn book_id(url: &str) -> String {
    spreadsheet_id_from_url(url).unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl SheetClient for MemorySheetClient {
    async fn read_values(&self, spreadsheet_id: &str, range: &str) -> Result<Grid, SheetError> {
        self.with_grid(spreadsheet_id, range, |grid, bounds| read_grid(grid, &bounds))
    }

    async fn worksheet_titles(&self, spreadsheet_id: &str) -> Result<Vec<String>, SheetError> {
        let state = lock(&self.state);
        let book = state.books.get(spreadsheet_id).ok_or_else(|| SheetError::Api {
            status: 404,
            message: format!("Requested entity was not found: {spreadsheet_id}"),
        })?;
        Ok(book.iter().map(|(title, _)| title.clone()).collect())
    }

    async fn write_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<Value>],
    ) -> Result<(), SheetError> {
        self.with_grid(spreadsheet_id, range, |grid, bounds| {
            for (i, row) in rows.iter().enumerate() {
                for (j, cell) in row.iter().enumerate() {
                    set_cell(grid, bounds.row0 + i, bounds.col0 + j, entered_value(cell));
                }
            }
        })?;

        lock(&self.state).writes.push(RecordedSheetWrite {
            range: range.to_string(),
            rows: rows.to_vec(),
        });
        Ok(())
    }

    async fn clear_values(&self, spreadsheet_id: &str, range: &str) -> Result<(), SheetError> {
        self.with_grid(spreadsheet_id, range, |grid, bounds| {
            for (r, row) in grid.iter_mut().enumerate() {
                if r < bounds.row0 || r > bounds.row1 {
                    continue;
                }
                for (c, cell) in row.iter_mut().enumerate() {
                    if c >= bounds.col0 && c <= bounds.col1 {
                        *cell = Value::String(String::new());
                    }
                }
            }
        })?;

        lock(&self.state).clears.push(range.to_string());
        Ok(())
    }
}

// A leading apostrophe forces text entry and is not stored.
fn entered_value(cell: &Value) -> Value {
    match cell {
        Value::Null => Value::String(String::new()),
        Value::String(s) => Value::String(s.strip_prefix('\'').unwrap_or(s).to_string()),
        other => other.clone(),
    }
}

fn set_cell(grid: &mut Grid, row: usize, col: usize, value: Value) {
    if grid.len() <= row {
        grid.resize(row + 1, Vec::new());
    }
    let cells = &mut grid[row];
    if cells.len() <= col {
        cells.resize(col + 1, Value::String(String::new()));
    }
    cells[col] = value;
}

fn read_grid(grid: &Grid, bounds: &Bounds) -> Grid {
    let mut rows: Grid = grid
        .iter()
        .enumerate()
        .filter(|(r, _)| *r >= bounds.row0 && *r <= bounds.row1)
        .map(|(_, row)| {
            let mut cells: Vec<Value> = row
                .iter()
                .enumerate()
                .filter(|(c, _)| *c >= bounds.col0 && *c <= bounds.col1)
                .map(|(_, cell)| cell.clone())
                .collect();
            while cells.last().is_some_and(|cell| cell_text(cell).is_empty()) {
                cells.pop();
            }
            cells
        })
        .collect();
    while rows.last().is_some_and(Vec::is_empty) {
        rows.pop();
    }
    rows
}

/// `'Sheet''s name'!A1:B2` → (`Sheet's name`, `Some("A1:B2")`)
fn split_range(range: &str) -> (String, Option<String>) {
    if let Some(rest) = range.strip_prefix('\'') {
        let mut title = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((index, c)) = chars.next() {
            if c == '\'' {
                if chars.peek().map(|(_, next)| *next) == Some('\'') {
                    chars.next();
                    title.push('\'');
                    continue;
                }
                let remainder = &rest[index + 1..];
                return (title, remainder.strip_prefix('!').map(str::to_string));
            }
            title.push(c);
        }
        return (title, None);
    }

    match range.split_once('!') {
        Some((title, a1)) => (title.to_string(), Some(a1.to_string())),
        None => (range.to_string(), None),
    }
}

/// Zero-based inclusive cell bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    row0: usize,
    col0: usize,
    row1: usize,
    col1: usize,
}

impl Bounds {
    fn everything() -> Self {
        Self {
            row0: 0,
            col0: 0,
            row1: usize::MAX,
            col1: usize::MAX,
        }
    }

    fn parse(a1: Option<&str>) -> Option<Self> {
        let Some(a1) = a1 else {
            return Some(Self::everything());
        };

        let part = |s: &str| -> Option<(Option<usize>, Option<usize>)> {
            let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
            let (letters, digits) = s.split_at(split);
            if !letters.chars().all(|c| c.is_ascii_alphabetic()) {
                return None;
            }
            let col = (!letters.is_empty()).then(|| column_to_number(letters) as usize - 1);
            let row = if digits.is_empty() {
                None
            } else {
                Some(digits.parse::<usize>().ok()?.checked_sub(1)?)
            };
            Some((col, row))
        };

        match a1.split_once(':') {
            Some((start, end)) => {
                let (c0, r0) = part(start)?;
                let (c1, r1) = part(end)?;
                Some(Self {
                    row0: r0.unwrap_or(0),
                    col0: c0.unwrap_or(0),
                    row1: r1.unwrap_or(usize::MAX),
                    col1: c1.unwrap_or(usize::MAX),
                })
            }
            None => {
                let (c, r) = part(a1)?;
                let (c, r) = (c.unwrap_or(0), r.unwrap_or(0));
                Some(Self {
                    row0: r,
                    col0: c,
                    row1: r,
                    col1: c,
                })
            }
        }
    }
}

// ============================================================================
// Database
// ============================================================================

/// A statement observed by [`MemoryDatabase`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRead {
    pub target: String,
    pub sql: String,
    pub params: Vec<Value>,
}

/// How a table was written
#[derive(Debug, Clone, PartialEq)]
pub enum WriteKind {
    Upsert,
    DeleteAndInsert { where_clause: String, params: Vec<Value> },
}

/// A write observed by [`MemoryDatabase`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub target: String,
    pub table_name: String,
    pub kind: WriteKind,
    pub data: Table,
}

#[derive(Default)]
struct DatabaseState {
    results: Vec<(String, String, Table)>,
    column_lengths: HashMap<(String, String, String), u64>,
    failures: HashMap<String, String>,
    reads: Vec<RecordedRead>,
    writes: Vec<RecordedWrite>,
}

/// Database fake answering reads from canned tables.
///
/// A read returns the first canned table registered for its target whose
/// SQL fragment appears in the (whitespace-normalized) statement, or an empty
/// table when none matches.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, target: &str, sql_fragment: &str, table: Table) -> Self {
        lock(&self.state).results.push((
            target.to_ascii_uppercase(),
            sql_fragment.to_string(),
            table,
        ));
        self
    }

    pub fn with_column_max_length(self, target: &str, table: &str, column: &str, length: u64) -> Self {
        lock(&self.state).column_lengths.insert(
            (target.to_ascii_uppercase(), table.to_string(), column.to_string()),
            length,
        );
        self
    }

    /// Make every call on `target` fail as if the server were unreachable
    pub fn with_failure(self, target: &str, message: &str) -> Self {
        lock(&self.state)
            .failures
            .insert(target.to_ascii_uppercase(), message.to_string());
        self
    }

    pub fn reads(&self) -> Vec<RecordedRead> {
        lock(&self.state).reads.clone()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        lock(&self.state).writes.clone()
    }

    /// Writes into one table, in call order
    pub fn writes_to(&self, table_name: &str) -> Vec<RecordedWrite> {
        self.writes()
            .into_iter()
            .filter(|write| write.table_name == table_name)
            .collect()
    }

    fn check_target(&self, target: &str) -> Result<(), DatabaseError> {
        match lock(&self.state).failures.get(&target.to_ascii_uppercase()) {
            Some(message) => Err(DatabaseError::Connection {
                target: target.to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn read(&self, target: &str, sql: &str, params: &[Value]) -> Result<Table, DatabaseError> {
        self.check_target(target)?;
        let sql = normalize_query(sql);

        let mut state = lock(&self.state);
        state.reads.push(RecordedRead {
            target: target.to_string(),
            sql: sql.clone(),
            params: params.to_vec(),
        });

        let key = target.to_ascii_uppercase();
        Ok(state
            .results
            .iter()
            .find(|(t, fragment, _)| *t == key && sql.contains(fragment.as_str()))
            .map(|(_, _, table)| table.clone())
            .unwrap_or_default())
    }

    async fn upsert(&self, target: &str, table_name: &str, data: &Table) -> Result<String, DatabaseError> {
        self.check_target(target)?;
        if data.is_empty() {
            return Ok(nothing_to_upsert(table_name));
        }
        let plan = WritePlan::new(table_name, data, &DEFAULT_EXCLUDED_COLUMNS)?;

        lock(&self.state).writes.push(RecordedWrite {
            target: target.to_string(),
            table_name: table_name.to_string(),
            kind: WriteKind::Upsert,
            data: data.clone(),
        });
        Ok(upserted(plan.row_count(), table_name))
    }

    async fn delete_and_insert(
        &self,
        target: &str,
        table_name: &str,
        where_clause: &str,
        params: &[Value],
        data: &Table,
    ) -> Result<String, DatabaseError> {
        self.check_target(target)?;
        if data.is_empty() {
            return Ok(nothing_to_insert(table_name));
        }
        let plan = WritePlan::new(table_name, data, &DEFAULT_EXCLUDED_COLUMNS)?;

        let mut state = lock(&self.state);
        let deleted: u64 = state
            .writes
            .iter()
            .filter(|write| write.table_name == table_name)
            .map(|write| write.data.len() as u64)
            .sum();
        state.writes.push(RecordedWrite {
            target: target.to_string(),
            table_name: table_name.to_string(),
            kind: WriteKind::DeleteAndInsert {
                where_clause: where_clause.to_string(),
                params: params.to_vec(),
            },
            data: data.clone(),
        });
        Ok(deleted_and_inserted(deleted, plan.row_count(), table_name))
    }

    async fn column_max_length(
        &self,
        target: &str,
        table_name: &str,
        column: &str,
    ) -> Result<Option<u64>, DatabaseError> {
        self.check_target(target)?;
        Ok(lock(&self.state)
            .column_lengths
            .get(&(
                target.to_ascii_uppercase(),
                table_name.to_string(),
                column.to_string(),
            ))
            .copied())
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// A message observed by [`MemoryNotifier`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub bot: String,
    pub target: SlackTarget,
    pub message: SlackMessage,
}

#[derive(Default)]
struct NotifierState {
    sent: Vec<SentMessage>,
    failure: Option<NotifyError>,
}

/// Notifier that records messages instead of posting them.
#[derive(Clone, Default)]
pub struct MemoryNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send with `error` (the attempt is still recorded)
    pub fn failing(error: NotifyError) -> Self {
        let notifier = Self::new();
        lock(&notifier.state).failure = Some(error);
        notifier
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.state).sent.clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(
        &self,
        bot: &str,
        target: &SlackTarget,
        message: &SlackMessage,
    ) -> Result<Value, NotifyError> {
        let mut state = lock(&self.state);
        state.sent.push(SentMessage {
            bot: bot.to_string(),
            target: target.clone(),
            message: message.clone(),
        });
        if let Some(error) = &state.failure {
            return Err(error.clone());
        }

        let channel = match target {
            SlackTarget::Channel(channel) => channel.clone(),
            SlackTarget::User(user) => format!("D{}", user),
        };
        Ok(json!({ "ok": true, "channel": channel, "text": message.text }))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
