//! # MySQL Adapter
//!
//! [`Database`] over MySQL using sqlx. Every call opens its own connection
//! to the named target, runs inside a transaction where it writes, and closes
//! the connection before returning.

use crate::database::{
    delete_statement, deleted_and_inserted, insert_statement, nothing_to_insert,
    nothing_to_upsert, normalize_query, upsert_statement, upserted, Database, DatabaseError,
    DatabaseTarget, DatabaseTargets, WritePlan, DEFAULT_EXCLUDED_COLUMNS,
};
use crate::table::{cell_text, Table};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Number, Value};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Row, ValueRef};
use tracing::{debug, info, instrument, warn};

/// MySQL-backed [`Database`] for a fixed set of named targets
pub struct MySqlDatabase {
    targets: DatabaseTargets,
}

impl MySqlDatabase {
    pub fn new(targets: DatabaseTargets) -> Self {
        Self { targets }
    }

    async fn connect(&self, name: &str) -> Result<MySqlConnection, DatabaseError> {
        let target = self.targets.resolve(name)?;
        MySqlConnection::connect_with(&connect_options(target))
            .await
            .map_err(|e| DatabaseError::Connection {
                target: name.to_string(),
                message: e.to_string(),
            })
    }
}

fn connect_options(target: &DatabaseTarget) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(&target.host)
        .port(target.port)
        .username(&target.user)
        .password(target.password.expose())
        .database(&target.database)
        .charset("utf8mb4")
}

async fn close(target: &str, connection: MySqlConnection) {
    if let Err(e) = connection.close().await {
        warn!(target = %target, error = %e, "Failed to close database connection");
    }
}

fn query_error(target: &str) -> impl Fn(sqlx::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query {
        target: target.to_string(),
        message: e.to_string(),
    }
}

// ============================================================================
// Parameter binding
// ============================================================================

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(flag) => query.bind(*flag),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                query.bind(integer)
            } else if let Some(unsigned) = number.as_u64() {
                query.bind(unsigned)
            } else {
                query.bind(number.as_f64().unwrap_or_default())
            }
        }
        Value::String(text) => query.bind(text.clone()),
        other => query.bind(cell_text(other)),
    }
}

fn bind_all<'q>(sql: &'q str, params: &[Value]) -> Query<'q, MySql, MySqlArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

// ============================================================================
// Row decoding
// ============================================================================

fn decode_cell(row: &MySqlRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Err(_) => return Value::Null,
        Ok(_) => {}
    }

    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Value::from(value);
    }
    if let Ok(value) = row.try_get::<u64, _>(index) {
        return Value::from(value);
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        return Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<f32, _>(index) {
        return Number::from_f64(f64::from(value))
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<String, _>(index) {
        return Value::String(value);
    }
    if let Ok(value) = row.try_get::<NaiveDateTime, _>(index) {
        return Value::String(value.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    if let Ok(value) = row.try_get::<NaiveDate, _>(index) {
        return Value::String(value.format("%Y-%m-%d").to_string());
    }
    if let Ok(value) = row.try_get::<NaiveTime, _>(index) {
        return Value::String(value.format("%H:%M:%S").to_string());
    }

    // DECIMAL and binary-collated text arrive as length-prefixed strings.
    row.try_get_unchecked::<String, _>(index)
        .map(Value::String)
        .unwrap_or(Value::Null)
}

fn rows_to_table(rows: &[MySqlRow]) -> Result<Table, DatabaseError> {
    let Some(first) = rows.first() else {
        return Ok(Table::default());
    };

    let columns: Vec<String> = first
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();
    let values = rows
        .iter()
        .map(|row| (0..columns.len()).map(|i| decode_cell(row, i)).collect())
        .collect();

    Ok(Table::from_rows(columns, values)?)
}

// ============================================================================
// Statements
// ============================================================================

async fn run_read(
    connection: &mut MySqlConnection,
    target: &str,
    sql: &str,
    params: &[Value],
) -> Result<Table, DatabaseError> {
    let rows = bind_all(sql, params)
        .fetch_all(&mut *connection)
        .await
        .map_err(query_error(target))?;
    rows_to_table(&rows)
}

async fn run_upsert(
    connection: &mut MySqlConnection,
    target: &str,
    table_name: &str,
    plan: &WritePlan,
) -> Result<(), DatabaseError> {
    let columns = plan.column_refs();
    let mut tx = connection.begin().await.map_err(query_error(target))?;

    for batch in &plan.batches {
        let sql = upsert_statement(table_name, &columns, batch.rows);
        bind_all(&sql, &batch.params)
            .execute(&mut *tx)
            .await
            .map_err(query_error(target))?;
    }

    tx.commit().await.map_err(query_error(target))
}

async fn run_delete_and_insert(
    connection: &mut MySqlConnection,
    target: &str,
    table_name: &str,
    where_clause: &str,
    params: &[Value],
    plan: &WritePlan,
) -> Result<u64, DatabaseError> {
    let columns = plan.column_refs();
    let mut tx = connection.begin().await.map_err(query_error(target))?;

    let delete = delete_statement(table_name, where_clause);
    let deleted = bind_all(&delete, params)
        .execute(&mut *tx)
        .await
        .map_err(query_error(target))?
        .rows_affected();

    for batch in &plan.batches {
        let sql = insert_statement(table_name, &columns, batch.rows);
        bind_all(&sql, &batch.params)
            .execute(&mut *tx)
            .await
            .map_err(query_error(target))?;
    }

    tx.commit().await.map_err(query_error(target))?;
    Ok(deleted)
}

#[async_trait]
impl Database for MySqlDatabase {
    #[instrument(skip(self, sql, params), fields(target = %target))]
    async fn read(&self, target: &str, sql: &str, params: &[Value]) -> Result<Table, DatabaseError> {
        debug!(query = %normalize_query(sql), params = params.len(), "Executing query");

        let mut connection = self.connect(target).await?;
        let result = run_read(&mut connection, target, sql, params).await;
        close(target, connection).await;
        result
    }

    #[instrument(skip(self, data), fields(target = %target, rows = data.len()))]
    async fn upsert(&self, target: &str, table_name: &str, data: &Table) -> Result<String, DatabaseError> {
        if data.is_empty() {
            return Ok(nothing_to_upsert(table_name));
        }
        let plan = WritePlan::new(table_name, data, &DEFAULT_EXCLUDED_COLUMNS)?;

        let mut connection = self.connect(target).await?;
        let result = run_upsert(&mut connection, target, table_name, &plan).await;
        close(target, connection).await;
        result?;

        let message = upserted(plan.row_count(), table_name);
        info!("{}", message);
        Ok(message)
    }

    #[instrument(skip(self, params, data), fields(target = %target, rows = data.len()))]
    async fn delete_and_insert(
        &self,
        target: &str,
        table_name: &str,
        where_clause: &str,
        params: &[Value],
        data: &Table,
    ) -> Result<String, DatabaseError> {
        if data.is_empty() {
            return Ok(nothing_to_insert(table_name));
        }
        let plan = WritePlan::new(table_name, data, &DEFAULT_EXCLUDED_COLUMNS)?;

        let mut connection = self.connect(target).await?;
        let result =
            run_delete_and_insert(&mut connection, target, table_name, where_clause, params, &plan)
                .await;
        close(target, connection).await;
        let deleted = result?;

        let message = deleted_and_inserted(deleted, plan.row_count(), table_name);
        info!("{}", message);
        Ok(message)
    }
}

#[cfg(test)]
#[path = "mysql_tests.rs"]
mod tests;
