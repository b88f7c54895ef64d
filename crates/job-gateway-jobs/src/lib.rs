//! # Job Gateway Jobs
//!
//! The job functions the gateway can dispatch to, and the built-in
//! allow-list naming them.
//!
//! Every function receives the full webhook payload and a [`JobContext`]
//! holding the spreadsheet, database and chat adapters. Functions return
//! their result as JSON and fail with an [`anyhow::Error`] whose context
//! chain ends up in the failure notification.

use job_gateway_core::database::Database;
use job_gateway_core::dispatch::{job_fn, AllowList, JobRegistryBuilder};
use job_gateway_core::notify::Notifier;
use job_gateway_core::sheets::Spreadsheets;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

pub mod cash_mgmt;
pub mod global_boosta;
pub mod meta_ads_manager;
pub mod upload_financial_db;

/// Adapters shared by every job function
#[derive(Clone)]
pub struct JobContext {
    pub sheets: Spreadsheets,
    pub database: Arc<dyn Database>,
    pub notifier: Arc<dyn Notifier>,
}

impl JobContext {
    pub fn new(
        sheets: Spreadsheets,
        database: Arc<dyn Database>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            sheets,
            database,
            notifier,
        }
    }
}

/// The allow-list served when configuration does not narrow it
pub fn default_allow_list() -> AllowList {
    AllowList::new()
        .with_job(cash_mgmt::JOB, [cash_mgmt::BANK_TRANSACTION_UPLOAD])
        .with_job(
            upload_financial_db::JOB,
            [upload_financial_db::UPLOAD_FINANCIAL_DB],
        )
        .with_job(global_boosta::JOB, [global_boosta::UPDATE_ROUTE])
        .with_job(
            meta_ads_manager::JOB,
            [
                meta_ads_manager::UPDATE_ADS,
                meta_ads_manager::ADD_AD,
                meta_ads_manager::REGIS_SLACK_SEND,
                meta_ads_manager::UNREGIS_SLACK_SEND,
                meta_ads_manager::UNREGIS_USER_SLACK_SEND,
                meta_ads_manager::REGIS_USER_SLACK_SEND,
            ],
        )
}

fn register<F, Fut>(
    builder: &mut JobRegistryBuilder,
    context: &JobContext,
    job: &str,
    function: &str,
    func: F,
) where
    F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    let context = context.clone();
    builder.register(
        job,
        function,
        job_fn(move |payload| func(context.clone(), payload)),
    );
}

/// Register every built-in job function against `context`
pub fn register_all(builder: &mut JobRegistryBuilder, context: &JobContext) {
    register(
        builder,
        context,
        cash_mgmt::JOB,
        cash_mgmt::BANK_TRANSACTION_UPLOAD,
        cash_mgmt::bank_transaction_upload,
    );
    register(
        builder,
        context,
        upload_financial_db::JOB,
        upload_financial_db::UPLOAD_FINANCIAL_DB,
        upload_financial_db::upload_financial_db,
    );
    register(
        builder,
        context,
        global_boosta::JOB,
        global_boosta::UPDATE_ROUTE,
        global_boosta::update_route,
    );

    use meta_ads_manager as meta;
    register(builder, context, meta::JOB, meta::UPDATE_ADS, meta::update_ads);
    register(builder, context, meta::JOB, meta::ADD_AD, meta::add_ad);
    register(
        builder,
        context,
        meta::JOB,
        meta::REGIS_SLACK_SEND,
        meta::regis_slack_send,
    );
    register(
        builder,
        context,
        meta::JOB,
        meta::UNREGIS_SLACK_SEND,
        meta::unregis_slack_send,
    );
    register(
        builder,
        context,
        meta::JOB,
        meta::UNREGIS_USER_SLACK_SEND,
        meta::unregis_user_slack_send,
    );
    register(
        builder,
        context,
        meta::JOB,
        meta::REGIS_USER_SLACK_SEND,
        meta::regis_user_slack_send,
    );
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
