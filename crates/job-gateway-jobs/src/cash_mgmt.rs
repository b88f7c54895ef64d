//! # Cash Management
//!
//! Uploads the bank-transaction ledger and the bank-account list from the
//! cash-management spreadsheet into the finance database.

use crate::JobContext;
use anyhow::{bail, Context};
use job_gateway_core::database::nothing_to_upsert;
use job_gateway_core::table::{cell_text, number_value, parse_number};
use job_gateway_core::Table;
use serde_json::Value;
use tracing::{info, warn};

pub const JOB: &str = "cash_mgmt";
pub const BANK_TRANSACTION_UPLOAD: &str = "banktransactionUpload";

pub const SPREADSHEET_URL: &str =
    "https://docs.google.com/spreadsheets/d/131-OBShJl6Pu8MtmPsLRdesIrmnLYz26GdoW9QJZKoc/";
const TARGET: &str = "CFO";

pub const TRANSACTION_SHEET: &str = "DB_banktransaction";
pub const TRANSACTION_TABLE: &str = "fn_cash_banktransaction";
pub const ACCOUNT_SHEET: &str = "account_info";
pub const ACCOUNT_TABLE: &str = "fn_cash_bankaccount";

const CHUNK_SIZE: usize = 20_000;

const MONEY_COLUMNS: [&str; 8] = [
    "deposit",
    "withdrawal",
    "end_balance",
    "start_balance",
    "start_balance_KRW",
    "deposit_KRW",
    "withdrawal_KRW",
    "end_balance_KRW",
];

/// Bookkeeping amount as a number: `-` and blanks are zero, thousands
/// separators are dropped and `(x)` means `-x`. Anything unparsable is zero.
pub fn clean_money(value: &Value) -> Value {
    let text = cell_text(value);
    let text = text.trim();
    if text.is_empty() || text == "-" {
        return Value::from(0);
    }
    let normalized = text.replace(',', "").replace('(', "-").replace(')', "");
    number_value(normalized.parse::<f64>().unwrap_or(0.0))
}

/// Trim `value` and cut it to `max_length` characters
pub fn truncate_text(value: &str, max_length: usize) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= max_length {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(max_length).collect();
    warn!(
        "String truncated ({}): '{}' -> '{}'",
        max_length, trimmed, truncated
    );
    truncated
}

/// Convert a column to integers, failing on the first cell that is not a
/// number.
fn integer_column(table: &mut Table, column: &str) -> anyhow::Result<()> {
    let parsed = table
        .column(column)?
        .into_iter()
        .map(|cell| {
            parse_number(cell)
                .map(|number| number.trunc() as i64)
                .with_context(|| format!("Invalid {} value '{}'", column, cell_text(cell)))
        })
        .collect::<anyhow::Result<Vec<i64>>>()?;

    let mut values = parsed.into_iter();
    table.map_column(column, |_| Value::from(values.next().unwrap_or_default()))?;
    Ok(())
}

/// Shape the transaction sheet for upload.
///
/// The header may sit one row below where it is expected; when `sheet_id` is
/// missing the first data row is promoted to the header.
pub fn prepare_transactions(mut table: Table) -> anyhow::Result<Table> {
    if !table.has_column("sheet_id") {
        if table.is_empty() {
            bail!("No data");
        }
        table.promote_first_row_to_header()?;
        if !table.has_column("sheet_id") {
            bail!("sheet_id column not found");
        }
    }

    for column in MONEY_COLUMNS {
        table.map_column(column, clean_money)?;
    }
    table.fill_null(&Value::String(String::new()));

    if table.has_column("fx_rate") {
        table.map_column("fx_rate", |cell| {
            number_value(parse_number(cell).unwrap_or(0.0))
        })?;
    }

    integer_column(&mut table, "sheet_id")?;
    Ok(table)
}

/// `cash_mgmt.banktransactionUpload`
pub async fn bank_transaction_upload(context: JobContext, _payload: Value) -> anyhow::Result<Value> {
    info!("banktransactionUpload started");

    let raw = context
        .sheets
        .read_table(SPREADSHEET_URL, TRANSACTION_SHEET, 1, None)
        .await?;
    info!("Loaded {}: {} rows", TRANSACTION_SHEET, raw.len());

    let transactions = prepare_transactions(raw)?;

    let mut message = nothing_to_upsert(TRANSACTION_TABLE);
    for (index, chunk) in transactions.chunks(CHUNK_SIZE).enumerate() {
        let start = index * CHUNK_SIZE;
        message = context
            .database
            .upsert(TARGET, TRANSACTION_TABLE, &chunk)
            .await?;
        info!("Chunk {}-{}: {}", start, start + CHUNK_SIZE, message);
    }

    let mut accounts = context
        .sheets
        .read_table(SPREADSHEET_URL, ACCOUNT_SHEET, 1, None)
        .await?;
    info!("Loaded {}: {} rows", ACCOUNT_SHEET, accounts.len());
    accounts.fill_null(&Value::String(String::new()));

    let max_length = context
        .database
        .column_max_length(TARGET, ACCOUNT_TABLE, "acc_name")
        .await?;
    if let Some(max_length) = max_length.filter(|length| *length > 0) {
        if accounts.has_column("acc_name") {
            accounts.map_column("acc_name", |cell| match cell {
                Value::String(text) => Value::String(truncate_text(text, max_length as usize)),
                other => other.clone(),
            })?;
        }
    }

    integer_column(&mut accounts, "sheet_id")?;
    let account_message = context
        .database
        .upsert(TARGET, ACCOUNT_TABLE, &accounts)
        .await?;
    info!("account_info: {}", account_message);

    info!("banktransactionUpload completed");
    Ok(Value::String(format!("{}\n{}", message, account_message)))
}

#[cfg(test)]
#[path = "cash_mgmt_tests.rs"]
mod tests;
