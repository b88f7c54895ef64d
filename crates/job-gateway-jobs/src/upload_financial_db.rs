//! # Financial Statements Upload
//!
//! Copies every worksheet of the financial-statements workbook into its
//! finance-database table. The P&L sheet gains per-channel sales totals and
//! the previous month's amount; the balance sheet gains the previous month's
//! amount.

use crate::JobContext;
use anyhow::Context;
use chrono::{Months, NaiveDate};
use job_gateway_core::table::cell_text;
use job_gateway_core::Table;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

pub const JOB: &str = "upload_financial_db";
pub const UPLOAD_FINANCIAL_DB: &str = "upload_financial_db";

const SPREADSHEET_URL: &str =
    "https://docs.google.com/spreadsheets/d/1_ePkpj4FjjoMO44NG-K-gFPz3VHEnW-IZJ5xg5dxO2U/";
const TARGET: &str = "CFO";

const PL_SHEET: &str = "DB_PL";
const BS_SHEET: &str = "DB_BS";
const SALES_ACCOUNT: &str = "매출";

/// Worksheet to table, in upload order
pub const TABLE_MAP: [(&str, &str); 10] = [
    ("DB_BS", "fn_fs_bs"),
    ("DB_PL", "fn_fs_pl"),
    ("DB_normalize", "fn_fs_pl_normalize"),
    ("DB_inventory", "fn_fs_bs_inventory_cost"),
    ("DB_advpayment", "fn_fs_bs_advpayment"),
    ("DB_accpayable", "fn_fs_bs_accpayable"),
    ("DB_unitcost", "fn_fs_bs_inventory_unitcost"),
    ("brand_aquisition", "fn_fs_bs_aquisitions"),
    ("benchmark", "fn_fs_benchmark"),
    ("Comments", "fn_fs_comments"),
];

/// Parse a reporting month such as `2024-05-01`, `2024/05/01` or `2024-05`
pub fn parse_month(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .or_else(|| NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d").ok())
        .or_else(|| NaiveDate::parse_from_str(&format!("{text}01"), "%Y%m%d").ok())
}

/// The month after `cell`, as `%Y-%m-%d`; blank cells stay blank.
pub fn next_month(cell: &Value) -> anyhow::Result<Value> {
    let text = cell_text(cell);
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    let month = parse_month(&text)
        .and_then(|date| date.checked_add_months(Months::new(1)))
        .with_context(|| format!("Invalid mtd_yyyymm '{}'", text))?;
    Ok(Value::String(month.format("%Y-%m-%d").to_string()))
}

/// `table` restated as of the following month with `amount` renamed to
/// `prior_month`, projected onto `keys` plus `prior_month`.
fn shifted_to_next_month(table: &Table, keys: &[&str]) -> anyhow::Result<Table> {
    let mut shifted = table.clone();

    let months = shifted
        .column("mtd_yyyymm")?
        .into_iter()
        .map(next_month)
        .collect::<anyhow::Result<Vec<Value>>>()?;
    let mut months = months.into_iter();
    shifted.map_column("mtd_yyyymm", |_| months.next().unwrap_or(Value::Null))?;

    shifted.rename("amount", "prior_month")?;
    let mut columns = keys.to_vec();
    columns.push("prior_month");
    Ok(shifted.select(&columns)?)
}

fn zero_blank(cell: &Value) -> Value {
    if cell_text(cell).is_empty() {
        Value::from(0)
    } else {
        cell.clone()
    }
}

/// Add `sales_amount` and `prior_month` to the P&L sheet
pub fn enrich_profit_and_loss(pl: &Table) -> anyhow::Result<Table> {
    let group_keys = ["mtd_yyyymm", "sales_channel", "brand"];
    let sales = pl
        .filter(|row| row.text("acc_name") == SALES_ACCOUNT)
        .group_sum(&group_keys, "amount", "sales_amount")?;
    let merged = pl.left_join(&sales, &group_keys)?;

    let prior_keys = ["mtd_yyyymm", "acc_name", "sales_channel", "brand"];
    let prior = shifted_to_next_month(pl, &prior_keys)?;
    let mut merged = merged.left_join(&prior, &prior_keys)?;

    for column in ["amount", "sales_amount", "prior_month"] {
        merged.map_column(column, zero_blank)?;
    }
    Ok(merged)
}

/// Add `prior_month` to the balance sheet
pub fn enrich_balance_sheet(bs: &Table) -> anyhow::Result<Table> {
    let keys = ["mtd_yyyymm", "acc_code", "acc_name"];
    let prior = shifted_to_next_month(bs, &keys)?;
    let mut merged = bs.left_join(&prior, &keys)?;
    merged.map_column("prior_month", |cell| {
        if cell.is_null() {
            Value::from(0)
        } else {
            cell.clone()
        }
    })?;
    Ok(merged)
}

/// `upload_financial_db.upload_financial_db`
pub async fn upload_financial_db(context: JobContext, _payload: Value) -> anyhow::Result<Value> {
    info!("Started uploading financial data to DB");

    let mut sheets: HashMap<String, Table> = HashMap::new();
    for title in context.sheets.worksheet_titles(SPREADSHEET_URL).await? {
        let table = context
            .sheets
            .read_table(SPREADSHEET_URL, &title, 1, None)
            .await?;
        debug!("Loaded sheet: {}", title);
        sheets.insert(title, table);
    }

    let pl = sheets
        .get(PL_SHEET)
        .with_context(|| format!("Worksheet {} not found", PL_SHEET))?;
    let pl = enrich_profit_and_loss(pl)?;
    sheets.insert(PL_SHEET.to_string(), pl);

    let bs = sheets
        .get(BS_SHEET)
        .with_context(|| format!("Worksheet {} not found", BS_SHEET))?;
    let bs = enrich_balance_sheet(bs)?;
    sheets.insert(BS_SHEET.to_string(), bs);

    for (sheet, table_name) in TABLE_MAP {
        if let Some(data) = sheets.get(sheet) {
            context.database.upsert(TARGET, table_name, data).await?;
            debug!("Upserted {} -> {}", sheet, table_name);
        }
    }

    info!("Finished uploading financial data to DB");
    Ok(Value::String("Financial DB upload completed".to_string()))
}

#[cfg(test)]
#[path = "upload_financial_db_tests.rs"]
mod tests;
