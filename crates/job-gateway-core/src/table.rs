//! In-memory tabular data.
//!
//! [`Table`] is the exchange format between the spreadsheet and database
//! adapters: named columns over rows of JSON scalar cells. It offers the
//! handful of relational operations the job functions need (selection,
//! filtering, joins, grouping) and nothing more.

use serde_json::{Number, Value};
use std::collections::{HashMap, HashSet};

/// Errors from table operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("Column not found: {0}")]
    MissingColumn(String),

    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("Row {row} has {actual} cells, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Table has no rows")]
    NoRows,
}

/// Named columns over rows of cells.
///
/// Every row has exactly one cell per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Borrowed view of one row, addressed by column name.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    cells: &'a [Value],
}

impl<'a> Row<'a> {
    /// Cell under `column`, `None` when the column does not exist
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|index| &self.cells[index])
    }

    /// Cell under `column` rendered as text; missing columns read as ""
    pub fn text(&self, column: &str) -> String {
        self.get(column).map(cell_text).unwrap_or_default()
    }

    pub fn cells(&self) -> &'a [Value] {
        self.cells
    }
}

impl Table {
    /// Empty table with the given header
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table, checking every row against the header width
    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Build a table from string cells, padding short rows with `""` and
    /// truncating long ones.
    ///
    /// This is how worksheet ranges arrive: trailing empty cells are omitted
    /// by the spreadsheet API.
    pub fn from_text_rows(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|row| {
                let mut cells: Vec<Value> = row.into_iter().take(width).map(Value::String).collect();
                cells.resize(width, Value::String(String::new()));
                cells
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    fn require_column(&self, column: &str) -> Result<usize, TableError> {
        self.column_index(column)
            .ok_or_else(|| TableError::MissingColumn(column.to_string()))
    }

    /// Iterate rows as name-addressable views
    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row {
            columns: &self.columns,
            cells,
        })
    }

    /// Append a row.
    ///
    /// # Errors
    ///
    /// [`TableError::RowWidth`] when the row does not match the header.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// All cells of one column, top to bottom
    pub fn column(&self, column: &str) -> Result<Vec<&Value>, TableError> {
        let index = self.require_column(column)?;
        Ok(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Distinct cells of `column` in order of first appearance
    pub fn unique_values(&self, column: &str) -> Result<Vec<Value>, TableError> {
        let index = self.require_column(column)?;
        let mut seen = HashSet::new();
        Ok(self
            .rows
            .iter()
            .map(|row| &row[index])
            .filter(|value| seen.insert(cell_key(value)))
            .cloned()
            .collect())
    }

    // ------------------------------------------------------------------------
    // Shape
    // ------------------------------------------------------------------------

    /// Project onto `columns`, in the order given.
    pub fn select(&self, columns: &[&str]) -> Result<Table, TableError> {
        let indices = columns
            .iter()
            .map(|c| self.require_column(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Project onto whichever of `columns` exist, keeping the given order
    pub fn select_existing(&self, columns: &[&str]) -> Table {
        let present: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|c| self.has_column(c))
            .collect();
        // Every name in `present` exists, so projection cannot fail.
        self.select(&present).unwrap_or_default()
    }

    /// Remove a column if present
    pub fn drop_column(&mut self, column: &str) {
        if let Some(index) = self.column_index(column) {
            self.columns.remove(index);
            for row in &mut self.rows {
                row.remove(index);
            }
        }
    }

    /// Rename a column.
    ///
    /// # Errors
    ///
    /// [`TableError::MissingColumn`] when `from` does not exist and
    /// [`TableError::DuplicateColumn`] when `to` already does.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), TableError> {
        let index = self.require_column(from)?;
        if from != to && self.has_column(to) {
            return Err(TableError::DuplicateColumn(to.to_string()));
        }
        self.columns[index] = to.to_string();
        Ok(())
    }

    /// Replace every cell of `column` with `f(cell)`
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> Result<(), TableError>
    where
        F: FnMut(&Value) -> Value,
    {
        let index = self.require_column(column)?;
        for row in &mut self.rows {
            row[index] = f(&row[index]);
        }
        Ok(())
    }

    /// Append a column computed from each row; replaces an existing column of
    /// the same name.
    pub fn add_column<F>(&mut self, column: &str, mut f: F)
    where
        F: FnMut(Row<'_>) -> Value,
    {
        let values: Vec<Value> = self.iter().map(&mut f).collect();
        match self.column_index(column) {
            Some(index) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[index] = value;
                }
            }
            None => {
                self.columns.push(column.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
    }

    /// Replace null cells in every column with `value`
    pub fn fill_null(&mut self, value: &Value) {
        for cell in self.rows.iter_mut().flatten() {
            if cell.is_null() {
                *cell = value.clone();
            }
        }
    }

    /// Use the first row as the header and drop it from the data.
    ///
    /// # Errors
    ///
    /// [`TableError::NoRows`] on an empty table.
    pub fn promote_first_row_to_header(&mut self) -> Result<(), TableError> {
        if self.rows.is_empty() {
            return Err(TableError::NoRows);
        }
        let header = self.rows.remove(0);
        self.columns = header.iter().map(cell_text).collect();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Row selection
    // ------------------------------------------------------------------------

    /// Rows for which `predicate` holds
    pub fn filter<F>(&self, mut predicate: F) -> Table
    where
        F: FnMut(Row<'_>) -> bool,
    {
        Table {
            columns: self.columns.clone(),
            rows: self
                .iter()
                .filter(|row| predicate(*row))
                .map(|row| row.cells.to_vec())
                .collect(),
        }
    }

    /// Rows whose `column` renders as non-empty text
    pub fn non_empty(&self, column: &str) -> Table {
        self.filter(|row| !row.text(column).is_empty())
    }

    /// Drop rows in which every cell is null or empty text
    pub fn drop_empty_rows(&mut self) {
        self.rows
            .retain(|row| row.iter().any(|cell| !cell_text(cell).is_empty()));
    }

    /// Keep the first row for each distinct combination of `subset`
    /// (all columns when `subset` is empty).
    pub fn drop_duplicates(&self, subset: &[&str]) -> Result<Table, TableError> {
        let indices = if subset.is_empty() {
            (0..self.columns.len()).collect()
        } else {
            subset
                .iter()
                .map(|c| self.require_column(c))
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut seen = HashSet::new();
        Ok(Table {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| seen.insert(row_key(row, &indices)))
                .cloned()
                .collect(),
        })
    }

    /// Split into consecutive tables of at most `size` rows
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = Table> + '_ {
        self.rows.chunks(size.max(1)).map(move |rows| Table {
            columns: self.columns.clone(),
            rows: rows.to_vec(),
        })
    }

    // ------------------------------------------------------------------------
    // Combination
    // ------------------------------------------------------------------------

    /// Stack `other` below `self`.
    ///
    /// The header is the union of both headers, `self`'s columns first; cells
    /// missing on either side are null.
    pub fn concat(&self, other: &Table) -> Table {
        let mut columns = self.columns.clone();
        for column in &other.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }

        let reshape = |table: &Table| -> Vec<Vec<Value>> {
            let mapping: Vec<Option<usize>> =
                columns.iter().map(|c| table.column_index(c)).collect();
            table
                .rows
                .iter()
                .map(|row| {
                    mapping
                        .iter()
                        .map(|index| index.map_or(Value::Null, |i| row[i].clone()))
                        .collect()
                })
                .collect()
        };

        let mut rows = reshape(self);
        rows.extend(reshape(other));
        Table { columns, rows }
    }

    /// Left join on equal `on` cells.
    ///
    /// Every left row appears at least once; a left row matching several right
    /// rows appears once per match. Unmatched rows get null right-hand cells.
    ///
    /// # Errors
    ///
    /// [`TableError::MissingColumn`] for a key missing on either side and
    /// [`TableError::DuplicateColumn`] when a non-key column exists on both
    /// sides.
    pub fn left_join(&self, right: &Table, on: &[&str]) -> Result<Table, TableError> {
        let left_keys = on
            .iter()
            .map(|c| self.require_column(c))
            .collect::<Result<Vec<_>, _>>()?;
        let right_keys = on
            .iter()
            .map(|c| right.require_column(c))
            .collect::<Result<Vec<_>, _>>()?;

        let right_extra: Vec<usize> = (0..right.columns.len())
            .filter(|i| !right_keys.contains(i))
            .collect();
        for &i in &right_extra {
            if self.has_column(&right.columns[i]) {
                return Err(TableError::DuplicateColumn(right.columns[i].clone()));
            }
        }

        let mut index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
        for (position, row) in right.rows.iter().enumerate() {
            index.entry(row_key(row, &right_keys)).or_default().push(position);
        }

        let mut columns = self.columns.clone();
        columns.extend(right_extra.iter().map(|&i| right.columns[i].clone()));

        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            match index.get(&row_key(row, &left_keys)) {
                Some(matches) => {
                    for &m in matches {
                        let mut joined = row.clone();
                        joined.extend(right_extra.iter().map(|&i| right.rows[m][i].clone()));
                        rows.push(joined);
                    }
                }
                None => {
                    let mut joined = row.clone();
                    joined.extend(std::iter::repeat(Value::Null).take(right_extra.len()));
                    rows.push(joined);
                }
            }
        }

        Ok(Table { columns, rows })
    }

    /// Rows of `self` with no equal `on` key in `other`
    pub fn anti_join(&self, other: &Table, on: &[&str]) -> Result<Table, TableError> {
        let left_keys = on
            .iter()
            .map(|c| self.require_column(c))
            .collect::<Result<Vec<_>, _>>()?;
        let right_keys = on
            .iter()
            .map(|c| other.require_column(c))
            .collect::<Result<Vec<_>, _>>()?;

        let present: HashSet<Vec<String>> = other
            .rows
            .iter()
            .map(|row| row_key(row, &right_keys))
            .collect();

        Ok(Table {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| !present.contains(&row_key(row, &left_keys)))
                .cloned()
                .collect(),
        })
    }

    /// Sum `value_column` per distinct `keys` combination into `output`.
    ///
    /// Groups appear in order of first appearance. Cells that do not parse as
    /// numbers count as zero.
    pub fn group_sum(
        &self,
        keys: &[&str],
        value_column: &str,
        output: &str,
    ) -> Result<Table, TableError> {
        let key_indices = keys
            .iter()
            .map(|c| self.require_column(c))
            .collect::<Result<Vec<_>, _>>()?;
        let value_index = self.require_column(value_column)?;

        let mut order: Vec<Vec<Value>> = Vec::new();
        let mut sums: HashMap<Vec<String>, f64> = HashMap::new();
        for row in &self.rows {
            let key = row_key(row, &key_indices);
            if !sums.contains_key(&key) {
                order.push(key_indices.iter().map(|&i| row[i].clone()).collect());
            }
            *sums.entry(key).or_insert(0.0) += parse_number(&row[value_index]).unwrap_or(0.0);
        }

        let mut columns: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        columns.push(output.to_string());

        let rows = order
            .into_iter()
            .map(|mut key_cells| {
                let key: Vec<String> = key_cells.iter().map(cell_key).collect();
                let total = sums.get(&key).copied().unwrap_or(0.0);
                key_cells.push(number_value(total));
                key_cells
            })
            .collect();

        Ok(Table { columns, rows })
    }
}

// ============================================================================
// Cell helpers
// ============================================================================

/// Render a cell as spreadsheet text: null is empty, strings are verbatim.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Parse a cell as a number, accepting thousands separators in text.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// JSON number for `value`, integral when it has no fractional part.
pub fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

// Text and numeric cells that render the same compare equal, like the
// string-typed sheets they are read from.
fn cell_key(value: &Value) -> String {
    cell_text(value)
}

fn row_key(row: &[Value], indices: &[usize]) -> Vec<String> {
    indices.iter().map(|&i| cell_key(&row[i])).collect()
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod tests;
