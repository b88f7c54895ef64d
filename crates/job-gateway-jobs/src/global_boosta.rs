//! # Global Boosta
//!
//! Refreshes the product and customer code lists on the manual-entry
//! spreadsheet from the operational databases.

use crate::JobContext;
use anyhow::Context;
use job_gateway_core::database::normalize_query;
use job_gateway_core::notify::{find_slack_id, notify, SlackMessage, UrlButton, DEFAULT_BOT};
use serde_json::Value;
use tracing::info;

pub const JOB: &str = "global_boosta";
pub const UPDATE_ROUTE: &str = "update_route";

const SPREADSHEET_URL: &str =
    "https://docs.google.com/spreadsheets/d/1JZi452tQn1ORaPi21gvI7t1hQkpQ7l8KF_dEg-n9rZY/";
const CODE_SHEET: &str = "Code";
const MANUAL_ENTRY_BUTTON: &str = ":point_right: Global Boosta Manual Entry";

const PRODUCT_QUERY: &str = "
    SELECT
        shops.shop_name,
        nansoft_products.product_code,
        nansoft_products.product_name,
        nansoft_products.barcode
    FROM nansoft_products
    INNER JOIN shops ON nansoft_products.shop_id = shops.id
    ORDER BY nansoft_products.shop_id, nansoft_products.barcode;
";

const CUSTOMER_QUERY: &str = "
    SELECT
        erp_channel_lists.CustName,
        erp_channel_lists.CustClass,
        erp_channel_lists.CustBasicSeq
    FROM erp_channel_lists
    WHERE erp_channel_lists.CustClass IN ('수출B2B', '오프라인B2B')
    ORDER BY CustClass, CustBasicSeq;
";

/// Where one code list comes from and where it lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub target: &'static str,
    pub query: &'static str,
    pub cell: &'static str,
    pub label: &'static str,
}

/// The route for a `service` name
pub fn route(service: &str) -> Option<Route> {
    match service {
        "product_info" => Some(Route {
            target: "BOOSTA",
            query: PRODUCT_QUERY,
            cell: "L2",
            label: "Product",
        }),
        "customer_info" => Some(Route {
            target: "BOOSTAAPI",
            query: CUSTOMER_QUERY,
            cell: "Q2",
            label: "Customer",
        }),
        _ => None,
    }
}

async fn update_to_sheet(
    context: &JobContext,
    route: Route,
    user_email: Option<&str>,
) -> anyhow::Result<String> {
    let data = context
        .database
        .read(route.target, &normalize_query(route.query), &[])
        .await?;

    let mut result = context
        .sheets
        .paste_table(SPREADSHEET_URL, CODE_SHEET, route.cell, &data, false)
        .await?
        .to_string();

    if let Some(email) = user_email {
        let user_id = find_slack_id(context.database.as_ref(), email).await;
        let message = SlackMessage::new(
            format!("{} Information Update Completed", route.label),
            format!("{} Information Update Completed! :partying_face:", route.label),
        )
        .with_button(UrlButton::new(MANUAL_ENTRY_BUTTON, SPREADSHEET_URL));

        let reply = notify(
            context.notifier.as_ref(),
            DEFAULT_BOT,
            user_id.as_deref(),
            None,
            &message,
        )
        .await?;
        let text = reply.get("text").and_then(Value::as_str).unwrap_or_default();
        result.push_str(&format!("\n{}\n", text));
    }

    Ok(result)
}

/// `global_boosta.update_route`
pub async fn update_route(context: JobContext, payload: Value) -> anyhow::Result<Value> {
    let service = payload
        .get("service")
        .and_then(Value::as_str)
        .context("'service' is required")?;

    let Some(route) = route(service) else {
        return Ok(Value::String("Unknown service".to_string()));
    };
    info!(service = %service, target = %route.target, "Updating code list");

    let user_email = payload
        .get("user_email")
        .and_then(Value::as_str)
        .filter(|email| !email.is_empty());

    let result = update_to_sheet(&context, route, user_email).await?;
    Ok(Value::String(result))
}

#[cfg(test)]
#[path = "global_boosta_tests.rs"]
mod tests;
