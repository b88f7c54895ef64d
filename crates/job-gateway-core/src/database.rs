//! Relational persistence.
//!
//! Job functions talk to named database targets (`CFO`, `BOOSTA`, ...)
//! through the [`Database`] trait. Each call is self-contained: the adapter
//! opens a connection to the target, runs the statements inside one
//! transaction and releases the connection before returning, on success and
//! failure alike.
//!
//! The statement builders in this module are pure so their SQL can be checked
//! without a server.

use crate::table::{cell_text, parse_number, Table, TableError};
use crate::SecretString;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Columns never written by [`Database::upsert`] and
/// [`Database::delete_and_insert`]; the server assigns them.
pub const DEFAULT_EXCLUDED_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Upper bound on bound parameters per statement.
///
/// MySQL rejects prepared statements with more than 65 535 placeholders.
pub const MAX_PARAMETERS_PER_STATEMENT: usize = 60_000;

const COLUMN_MAX_LENGTH_SQL: &str = "SELECT CHARACTER_MAXIMUM_LENGTH \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() \
     AND TABLE_NAME = ? \
     AND COLUMN_NAME = ?";

// ============================================================================
// Errors
// ============================================================================

/// Persistence failures
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("DB config missing for '{0}'")]
    MissingTarget(String),

    #[error("Failed to connect to database target '{target}': {message}")]
    Connection { target: String, message: String },

    #[error("Query on '{target}' failed: {message}")]
    Query { target: String, message: String },

    #[error("Table {0} has no writable columns")]
    NoWritableColumns(String),

    #[error(transparent)]
    Table(#[from] TableError),
}

// ============================================================================
// Targets
// ============================================================================

fn default_port() -> u16 {
    3306
}

/// Connection settings for one database target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseTarget {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub database: String,
}

/// Named database targets.
///
/// Names are matched case-insensitively: configuration loaded from the
/// environment arrives lowercased while job code uses upper-case names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseTargets(BTreeMap<String, DatabaseTarget>);

impl DatabaseTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, name: impl Into<String>, target: DatabaseTarget) -> Self {
        self.0.insert(name.into(), target);
        self
    }

    /// Look up a target by name.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::MissingTarget`] when no target has that name.
    pub fn resolve(&self, name: &str) -> Result<&DatabaseTarget, DatabaseError> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, target)| target)
            .ok_or_else(|| DatabaseError::MissingTarget(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// Database seam
// ============================================================================

/// Scoped access to the configured database targets.
///
/// Statements use `?` placeholders bound from `params` in order.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run a query and return its rows
    async fn read(&self, target: &str, sql: &str, params: &[Value]) -> Result<Table, DatabaseError>;

    /// `INSERT ... ON DUPLICATE KEY UPDATE` every row of `data`.
    ///
    /// Columns in [`DEFAULT_EXCLUDED_COLUMNS`] are skipped and null cells are
    /// written as empty strings.
    async fn upsert(&self, target: &str, table_name: &str, data: &Table) -> Result<String, DatabaseError>;

    /// Delete rows matching `where_clause`, then insert `data`, in one
    /// transaction.
    async fn delete_and_insert(
        &self,
        target: &str,
        table_name: &str,
        where_clause: &str,
        params: &[Value],
        data: &Table,
    ) -> Result<String, DatabaseError>;

    /// Declared maximum character length of a column, if it has one
    async fn column_max_length(
        &self,
        target: &str,
        table_name: &str,
        column: &str,
    ) -> Result<Option<u64>, DatabaseError> {
        let result = self
            .read(
                target,
                COLUMN_MAX_LENGTH_SQL,
                &[Value::from(table_name), Value::from(column)],
            )
            .await?;

        Ok(result
            .rows()
            .first()
            .and_then(|row| row.first())
            .and_then(parse_number)
            .map(|length| length as u64))
    }
}

// ============================================================================
// Statement builders
// ============================================================================

/// Backtick-quote an identifier, doubling embedded backticks
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Collapse newlines and tabs so multi-line queries log on one line
pub fn normalize_query(sql: &str) -> String {
    sql.replace(['\n', '\t'], " ").trim().to_string()
}

/// Indices of the columns of `data` that should be written
pub fn writable_columns(data: &Table, excluded: &[&str]) -> Vec<usize> {
    data.columns()
        .iter()
        .enumerate()
        .filter(|(_, name)| !excluded.contains(&name.as_str()))
        .map(|(index, _)| index)
        .collect()
}

fn value_tuples(columns: usize, rows: usize) -> String {
    let tuple = format!("({})", vec!["?"; columns].join(", "));
    vec![tuple; rows].join(", ")
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Multi-row `INSERT` for `rows` rows of `columns`
pub fn insert_statement(table_name: &str, columns: &[&str], rows: usize) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_identifier(table_name),
        column_list(columns),
        value_tuples(columns.len(), rows)
    )
}

/// Multi-row upsert using the `VALUES(col)` form accepted by every MySQL 8.0
/// release.
pub fn upsert_statement(table_name: &str, columns: &[&str], rows: usize) -> String {
    let updates = columns
        .iter()
        .map(|c| {
            let quoted = quote_identifier(c);
            format!("{quoted} = VALUES({quoted})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "{} ON DUPLICATE KEY UPDATE {}",
        insert_statement(table_name, columns, rows),
        updates
    )
}

pub fn delete_statement(table_name: &str, where_clause: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        quote_identifier(table_name),
        where_clause
    )
}

/// Rows per multi-row statement for a given column count
pub fn rows_per_statement(columns: usize) -> usize {
    (MAX_PARAMETERS_PER_STATEMENT / columns.max(1)).max(1)
}

/// Cell as written to the database; nulls become empty strings.
pub fn write_cell(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::Array(_) | Value::Object(_) => Value::String(cell_text(value)),
        other => other.clone(),
    }
}

/// A prepared write: column names plus batches of flattened parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePlan {
    pub columns: Vec<String>,
    pub batches: Vec<WriteBatch>,
}

/// One multi-row statement's worth of rows
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    pub rows: usize,
    pub params: Vec<Value>,
}

impl WritePlan {
    /// Split `data` into statement-sized batches of writable cells.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::NoWritableColumns`] when every column is excluded.
    pub fn new(table_name: &str, data: &Table, excluded: &[&str]) -> Result<Self, DatabaseError> {
        let indices = writable_columns(data, excluded);
        if indices.is_empty() {
            return Err(DatabaseError::NoWritableColumns(table_name.to_string()));
        }

        let per_statement = rows_per_statement(indices.len());
        let batches = data
            .rows()
            .chunks(per_statement)
            .map(|rows| WriteBatch {
                rows: rows.len(),
                params: rows
                    .iter()
                    .flat_map(|row| indices.iter().map(move |&i| write_cell(&row[i])))
                    .collect(),
            })
            .collect();

        Ok(Self {
            columns: indices
                .iter()
                .map(|&i| data.columns()[i].clone())
                .collect(),
            batches,
        })
    }

    pub fn column_refs(&self) -> Vec<&str> {
        self.columns.iter().map(String::as_str).collect()
    }

    pub fn row_count(&self) -> usize {
        self.batches.iter().map(|b| b.rows).sum()
    }
}

// ============================================================================
// Result messages
// ============================================================================

pub fn nothing_to_upsert(table_name: &str) -> String {
    format!("No data to upsert into {}", table_name)
}

pub fn upserted(rows: usize, table_name: &str) -> String {
    format!("{} records upserted into {}", rows, table_name)
}

pub fn nothing_to_insert(table_name: &str) -> String {
    format!("No data to insert into {}", table_name)
}

pub fn deleted_and_inserted(deleted: u64, inserted: usize, table_name: &str) -> String {
    format!(
        "Deleted {}, inserted {} rows in {}",
        deleted, inserted, table_name
    )
}

#[cfg(test)]
#[path = "database_tests.rs"]
mod tests;
