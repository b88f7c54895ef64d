//! Fixtures shared by the job tests.

use crate::JobContext;
use job_gateway_core::adapters::{MemoryDatabase, MemoryNotifier, MemorySheetClient};
use job_gateway_core::sheets::Spreadsheets;
use job_gateway_core::Table;
use serde_json::Value;
use std::sync::Arc;

/// Context over the given fakes; the fakes keep observing every call
pub(crate) fn context(
    sheets: &MemorySheetClient,
    database: &MemoryDatabase,
    notifier: &MemoryNotifier,
) -> JobContext {
    JobContext::new(
        Spreadsheets::new(Arc::new(sheets.clone())),
        Arc::new(database.clone()),
        Arc::new(notifier.clone()),
    )
}

/// Text cells, as a worksheet read returns them
pub(crate) fn row(cells: &[&str]) -> Vec<Value> {
    cells.iter().map(|cell| Value::from(*cell)).collect()
}

/// The user-directory answer for a Slack id lookup
pub(crate) fn slack_user(slack_id: &str) -> Table {
    Table::from_rows(["slack_id"], vec![row(&[slack_id])]).unwrap_or_default()
}

pub(crate) const USER_LOOKUP: &str = "FROM admin.flex_users";
