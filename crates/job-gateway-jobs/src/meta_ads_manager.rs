//! # Meta Ads Manager
//!
//! Keeps the ad-naming spreadsheet in step with the ads recorded in the
//! marketing database.
//!
//! Every ad is expected to carry a standard name of eight `#`-separated
//! parts. Ads without one are listed on the registration sheet so their
//! creators can fill in the parts; ads named on the naming sheet but not yet
//! renamed in the ads manager are listed on the change sheet. Digests of both
//! lists are posted to chat, grouped by brand.

use crate::JobContext;
use anyhow::Context;
use job_gateway_core::notify::{find_slack_id, notify, SlackMessage, UrlButton};
use job_gateway_core::table::cell_text;
use job_gateway_core::Table;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::info;

pub const JOB: &str = "meta_ads_manager";
pub const UPDATE_ADS: &str = "update_ads";
pub const ADD_AD: &str = "add_ad";
pub const REGIS_SLACK_SEND: &str = "regis_slack_send";
pub const UNREGIS_SLACK_SEND: &str = "unregis_slack_send";
pub const UNREGIS_USER_SLACK_SEND: &str = "unregis_user_slack_send";
pub const REGIS_USER_SLACK_SEND: &str = "regis_user_slack_send";

const SPREADSHEET_URL: &str =
    "https://docs.google.com/spreadsheets/d/1zxUeBvU5k8Szvmmp_gBAqV9vCDGf2SGb_xPgxtlYOpg/";
const CHANGE_URL: &str =
    "https://docs.google.com/spreadsheets/d/1zxUeBvU5k8Szvmmp_gBAqV9vCDGf2SGb_xPgxtlYOpg/edit#gid=1225401231";
const REGISTRATION_URL: &str =
    "https://docs.google.com/spreadsheets/d/1zxUeBvU5k8Szvmmp_gBAqV9vCDGf2SGb_xPgxtlYOpg/edit#gid=600293708";

const KEYWORD_SHEET: &str = "0_키워드생성";
const NAMING_SHEET: &str = "1_광고이름생성";
const CHANGE_SHEET: &str = "2_변경대상광고";
const REGISTRATION_SHEET: &str = "2_등록대상광고";
const DELETED_SHEET: &str = "2_삭제광고";
const CODE_SHEET: &str = "기타코드";
const CREATOR_EMAIL_RANGE: &str = "S1:T100";

const TARGET: &str = "BOOSTA";
const BOT: &str = "META";
const CHANNEL: &str = "C06NZHCD17F";
const MONITORING_CHANNEL: &str = "C04FQ47F231";
const BUTTON_TEXT: &str = "Meta Ads Manager";

/// Placeholder address meaning "nobody in particular"
pub const DEFAULT_EMAIL: &str = "default@email.com";

const LATEST_DATE_SQL: &str = "SELECT MAX(date_start) AS lastest_date FROM facebook_data_ads;";
const ADS_SQL: &str = "SELECT campaign_name, ad_id, ad_name \
     FROM facebook_data_ads \
     WHERE date_start = ? \
     ORDER BY ad_id ASC, ad_name ASC;";
const REGISTERED_SQL: &str = "SELECT * FROM facebook_id_ads WHERE name REGEXP '^([^#]*#[^#]*){7}$';";

/// Parts a registration needs before it can be named
const NAME_PARTS: [&str; 9] = [
    "brand_name",
    "contents_detail",
    "product_name",
    "event",
    "date",
    "ad_creator",
    "k1_main_usp",
    "K2_hooking",
    "K3_sub_keyword",
];

/// Parts required for a registration to be added
const REQUIRED_PARTS: [&str; 6] = [
    "brand_name",
    "contents_detail",
    "product_name",
    "event",
    "date",
    "ad_creator",
];

/// Registration sheet layout
const REGISTRATION_COLUMNS: [&str; 13] = [
    "brand",
    "ad_id",
    "old_name",
    "brand_name",
    "contents_detail",
    "product_name",
    "event",
    "date",
    "ad_creator",
    "k1_main_usp",
    "K2_hooking",
    "K3_sub_keyword",
    "description",
];

/// Separators in a complete standard name
const STANDARD_NAME_SEPARATORS: usize = 7;

// ============================================================================
// Name parsing
// ============================================================================

/// Brand tag of a campaign name: the text inside the first `[...]`
pub fn campaign_brand(campaign_name: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"\[(.*?)\]").expect("brand pattern is valid"));
    pattern
        .captures(campaign_name)
        .and_then(|captures| captures.get(1))
        .map(|brand| brand.as_str().to_string())
}

/// Creator part of a standard ad name: the fifth `#`-separated part
pub fn ad_creator(ad_name: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?:.*?\s#){4}([^#]+)").expect("creator pattern is valid")
    });
    pattern
        .captures(ad_name)
        .and_then(|captures| captures.get(1))
        .map(|creator| creator.as_str().trim().to_string())
}

/// Whether an ad name already follows the standard naming scheme
pub fn has_standard_name(ad_name: &str) -> bool {
    ad_name.matches(" #").count() >= STANDARD_NAME_SEPARATORS
}

// ============================================================================
// Digests
// ============================================================================

/// One digest notification
pub struct Digest<'a> {
    pub label: &'a str,
    pub header: &'a str,
    pub footer: &'a str,
    pub url: &'a str,
}

/// Brand-grouped digest body listing up to three names per brand
pub fn digest_body(table: &Table, column: &str) -> anyhow::Result<String> {
    if table.is_empty() {
        return Ok(String::new());
    }

    let mut body = String::new();
    for brand in table.unique_values("brand")? {
        let brand = cell_text(&brand);
        let names: Vec<String> = table
            .filter(|row| row.text("brand") == brand)
            .column(column)?
            .into_iter()
            .map(cell_text)
            .collect();

        let count = names.len();
        let shown: Vec<String> = names.iter().take(3).map(|name| format!("`{}`", name)).collect();
        let more = if count > 3 {
            format!("\nㆍ이외 {}건", count - 3)
        } else {
            String::new()
        };
        body.push_str(&format!(
            "*{} (총 {}건)*\n{}{}\n\n",
            brand,
            count,
            shown.join("\n"),
            more
        ));
    }
    Ok(body)
}

/// The chat message for a digest of `table`
pub fn digest_message(table: &Table, column: &str, digest: &Digest<'_>) -> anyhow::Result<SlackMessage> {
    let header = format!(
        "*[{} 알리미]*\n안녕하세요. {} :blush:",
        digest.label, digest.header
    );
    Ok(SlackMessage::new(format!("{} 알리미", digest.label), header)
        .with_body(digest_body(table, column)?)
        .with_footer(format!("`2_{}` {}", digest.label, digest.footer))
        .with_button(UrlButton::new(BUTTON_TEXT, digest.url)))
}

async fn send_digest(
    context: &JobContext,
    table: &Table,
    column: &str,
    channel: &str,
    digest: &Digest<'_>,
    user_id: Option<&str>,
) -> anyhow::Result<Value> {
    let message = digest_message(table, column, digest)?;
    let reply = notify(
        context.notifier.as_ref(),
        BOT,
        user_id,
        Some(channel),
        &message,
    )
    .await?;
    Ok(reply)
}

// ============================================================================
// Table helpers
// ============================================================================

/// `table`, or an empty table with `columns` when the source had no header
fn with_header(table: Table, columns: &[&str]) -> Table {
    if table.width() == 0 {
        Table::new(columns.iter().copied())
    } else {
        table
    }
}

/// Every cell as text
fn as_text(mut table: Table) -> Table {
    let columns: Vec<String> = table.columns().to_vec();
    for column in &columns {
        table.add_column(column, |row| Value::String(row.text(column)));
    }
    table
}

/// Prefix ad ids with `'` so the sheet keeps them as text
fn quote_ad_ids(table: &mut Table) -> anyhow::Result<()> {
    table.map_column("ad_id", |cell| Value::String(format!("'{}", cell_text(cell))))?;
    Ok(())
}

async fn read_sheet(context: &JobContext, sheet: &str) -> anyhow::Result<Table> {
    Ok(context
        .sheets
        .read_table(SPREADSHEET_URL, sheet, 1, None)
        .await?)
}

fn email_from(payload: &Value) -> Option<&str> {
    payload
        .get("user_email")
        .and_then(Value::as_str)
        .filter(|email| !email.is_empty())
}

// ============================================================================
// update_ads
// ============================================================================

/// Ads of the latest reporting day, with their brand tag
async fn latest_ads(context: &JobContext) -> anyhow::Result<Table> {
    let latest = context
        .database
        .read(TARGET, LATEST_DATE_SQL, &[])
        .await?;
    let date = latest
        .rows()
        .first()
        .and_then(|row| row.first())
        .map(cell_text)
        .filter(|date| !date.is_empty())
        .context("facebook_data_ads has no date_start")?;
    let day: String = date.chars().take(10).collect();

    let ads = context
        .database
        .read(TARGET, ADS_SQL, &[Value::String(day)])
        .await?;
    let mut ads = with_header(ads, &["campaign_name", "ad_id", "ad_name"]);
    ads.add_column("brand", |row| {
        campaign_brand(&row.text("campaign_name"))
            .map(Value::String)
            .unwrap_or(Value::Null)
    });
    Ok(ads)
}

/// Named-but-not-renamed ads and pending registrations, as written to the
/// change and registration sheets.
async fn rebuild_sheets(context: &JobContext) -> anyhow::Result<(String, Table, Table)> {
    let mut result = String::new();

    let ads = latest_ads(context).await?;
    let registered = context
        .database
        .read(TARGET, REGISTERED_SQL, &[])
        .await?;
    let mut registered = with_header(registered, &["identity_id"]);
    registered.map_column("identity_id", |cell| {
        Value::String(cell_text(cell).replace(" - 사본", ""))
    })?;
    let registered_ids = as_text(registered.select(&["identity_id"])?);

    let naming = with_header(
        read_sheet(context, NAMING_SHEET).await?,
        &["brand", "id", "ad_name", "ad_id", "old_name"],
    );
    let mut naming = as_text(naming).non_empty("brand");
    if naming.has_column("id") {
        naming.rename("id", "identity_id")?;
    }

    let deleted = read_sheet(context, DELETED_SHEET).await?;
    if deleted.has_column("brand") && deleted.has_column("ad_name") {
        naming = naming.anti_join(&deleted, &["brand", "ad_name"])?;
    }

    // Change list: named on the sheet, not yet carrying the standard name.
    let mut changes = naming
        .anti_join(&registered_ids, &["identity_id"])?
        .select(&["brand", "ad_name", "ad_id", "old_name"])?;

    result.push_str(
        &context
            .sheets
            .clear_range(SPREADSHEET_URL, CHANGE_SHEET, "A2:D")
            .await?,
    );
    if !changes.is_empty() {
        quote_ad_ids(&mut changes)?;
        let update = context
            .sheets
            .paste_table(SPREADSHEET_URL, CHANGE_SHEET, "A2", &changes, false)
            .await?;
        result.push_str(&update.to_string());
    }

    // Registration list: pending sheet entries plus unnamed ads.
    let pending = as_text(read_sheet(context, REGISTRATION_SHEET).await?);
    let pending = pending
        .non_empty("old_name")
        .filter(|row| NAME_PARTS.iter().any(|part| !row.text(part).is_empty()));

    let mut unnamed = as_text(
        ads.filter(|row| !has_standard_name(&row.text("ad_name")))
            .select(&["brand", "ad_id", "ad_name"])?,
    );
    unnamed.rename("ad_name", "old_name")?;

    let existing_ids = naming.non_empty("ad_id").select(&["ad_id"])?;
    let mut registrations = pending
        .concat(&unnamed)
        .drop_duplicates(&["old_name"])?
        .anti_join(&existing_ids, &["ad_id"])?
        .select_existing(&REGISTRATION_COLUMNS);

    result.push_str(
        &context
            .sheets
            .clear_range(SPREADSHEET_URL, REGISTRATION_SHEET, "A2:M")
            .await?,
    );
    if !registrations.is_empty() {
        registrations.fill_null(&Value::String(String::new()));
        let mut pasted = registrations.clone();
        quote_ad_ids(&mut pasted)?;
        let update = context
            .sheets
            .paste_table(SPREADSHEET_URL, REGISTRATION_SHEET, "A2", &pasted, false)
            .await?;
        result.push_str(&update.to_string());
    }

    Ok((result, changes, registrations))
}

/// `meta_ads_manager.update_ads`
///
/// Rebuilds the change and registration sheets and posts both digests. The
/// requesting user is messaged directly unless the call came from a
/// scheduled trigger.
pub async fn update_ads(context: JobContext, payload: Value) -> anyhow::Result<Value> {
    let email = email_from(&payload);
    let triggered = payload.get("trigger").is_some_and(is_truthy);
    let user_id = match email {
        Some(email) => find_slack_id(context.database.as_ref(), email).await,
        None => None,
    };

    let (result, changes, registrations) = rebuild_sheets(&context).await?;
    info!(
        changes = changes.len(),
        registrations = registrations.len(),
        "Rebuilt ad sheets"
    );

    let direct = if triggered { None } else { user_id.as_deref() };
    let change_digest = Digest {
        label: "업데이트",
        header: "`2_변경대상광고` 시트에 아래 변경 대상 광고가 업데이트 되었습니다.",
        footer: "광고관리자 페이지에서 시트에 등록된 광고명으로 변경해주세요. 변경후에도 `2_변경대상광고` 시트에서 내역이 사라지기까지 최대 1일 정도 걸릴 수 있습니다.",
        url: CHANGE_URL,
    };
    let registration_digest = Digest {
        label: "업데이트",
        header: "`2_등록대상광고` 시트에 아래 등록 대상 광고가 업데이트 되었습니다.",
        footer: "시트에 정보를 기입하고 Key 컬럼에 값이 생성되면, 구글 시트의 입력 메뉴에 `2.광고등록` 버튼을 누르면 자동으로 등록됩니다!",
        url: REGISTRATION_URL,
    };

    send_digest(&context, &changes, "ad_name", CHANNEL, &change_digest, direct).await?;
    send_digest(
        &context,
        &registrations,
        "old_name",
        CHANNEL,
        &registration_digest,
        direct,
    )
    .await?;

    Ok(Value::String(result))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

// ============================================================================
// add_ad
// ============================================================================

/// `meta_ads_manager.add_ad`
///
/// Moves complete registrations (a generated `Key` plus every required
/// part) onto the keyword and naming sheets, keeps the rest on the
/// registration sheet, then rebuilds the sheets.
pub async fn add_ad(context: JobContext, payload: Value) -> anyhow::Result<Value> {
    let mut result = String::new();

    let pending = as_text(read_sheet(&context, REGISTRATION_SHEET).await?);
    let keywords = read_sheet(&context, KEYWORD_SHEET).await?;

    let complete = pending.filter(|row| {
        !row.text("Key").is_empty()
            && REQUIRED_PARTS.iter().all(|part| !row.text(part).is_empty())
    });
    if complete.is_empty() {
        return Ok(Value::String(result));
    }
    let reserved = pending
        .filter(|row| row.text("Key").is_empty())
        .select_existing(&REGISTRATION_COLUMNS);

    let known_keys: HashSet<String> = if keywords.has_column("Key") {
        keywords.column("Key")?.into_iter().map(cell_text).collect()
    } else {
        HashSet::new()
    };

    let new_keywords = complete
        .filter(|row| !known_keys.contains(&row.text("Key")))
        .select(&["brand", "k1_main_usp", "K2_hooking", "K3_sub_keyword", "description"])?
        .drop_duplicates(&[])?;
    let update = context
        .sheets
        .paste_table(SPREADSHEET_URL, KEYWORD_SHEET, "A2", &new_keywords, true)
        .await?;
    result.push_str(&update.to_string());

    let names = complete.select(&[
        "Key",
        "contents_detail",
        "product_name",
        "event",
        "date",
        "ad_creator",
    ])?;
    let ids = complete.select(&["ad_id", "old_name"])?;

    let named = context
        .sheets
        .paste_table(SPREADSHEET_URL, NAMING_SHEET, "B2", &names, true)
        .await?;
    result.push_str(&named.to_string());
    let start_row = named
        .start_row()
        .context("Naming sheet append wrote no rows")?;

    let update = context
        .sheets
        .paste_table(
            SPREADSHEET_URL,
            NAMING_SHEET,
            &format!("I{}", start_row),
            &ids,
            false,
        )
        .await?;
    result.push_str(&update.to_string());

    result.push_str(
        &context
            .sheets
            .clear_range(SPREADSHEET_URL, REGISTRATION_SHEET, "A2:L")
            .await?,
    );
    let update = context
        .sheets
        .paste_table(SPREADSHEET_URL, REGISTRATION_SHEET, "A2", &reserved, false)
        .await?;
    result.push_str(&update.to_string());
    info!(added = complete.len(), reserved = reserved.len(), "Registered ads");

    let email = email_from(&payload).unwrap_or(DEFAULT_EMAIL);
    if email != DEFAULT_EMAIL {
        let user_id = find_slack_id(context.database.as_ref(), email).await;
        let digest = Digest {
            label: "광고 업데이트",
            header: "광고 및 키워드 등록이 완료되었습니다. 등록된 광고는 다음과 같습니다.",
            footer: "등록된 광고를 광고관리자에 등록해주세요. `2_변경대상광고` 시트에서 광고관리자에서 이름을 변경할 광고들을 확인해주세요.",
            url: CHANGE_URL,
        };
        send_digest(
            &context,
            &complete,
            "old_name",
            CHANNEL,
            &digest,
            user_id.as_deref(),
        )
        .await?;
    }

    update_ads(context, json!({ "user_email": DEFAULT_EMAIL })).await?;
    Ok(Value::String(result))
}

// ============================================================================
// Digests on demand
// ============================================================================

/// `meta_ads_manager.regis_slack_send`
pub async fn regis_slack_send(context: JobContext, _payload: Value) -> anyhow::Result<Value> {
    let changes = read_sheet(&context, CHANGE_SHEET).await?;
    let digest = Digest {
        label: "변경대상광고",
        header: "Meta 광고 중 시트에 등록되었으나 어드민에서 변경되지 않아 어드민 변경대상인 광고 알려드립니다.",
        footer: "해당 시트의 ID 를 검색하여 등록된 광고명으로 변경해주세요.",
        url: CHANGE_URL,
    };
    send_digest(&context, &changes, "new_name", MONITORING_CHANNEL, &digest, None).await
}

/// `meta_ads_manager.unregis_slack_send`
pub async fn unregis_slack_send(context: JobContext, _payload: Value) -> anyhow::Result<Value> {
    let registrations = read_sheet(&context, REGISTRATION_SHEET).await?;
    let digest = Digest {
        label: "등록대상광고",
        header: "Meta 광고 중 표준 광고명칭으로 바뀌지 않아 우선 시트에 등록하여 광고명이 생성되어야 하는 광고 알려드립니다.",
        footer: "시트에 정보를 기입하고 Key 컬럼에 값이 생성되면, 구글 시트의 입력 메뉴에 `2.광고등록` 버튼을 누르면 자동으로 등록됩니다!",
        url: REGISTRATION_URL,
    };
    send_digest(
        &context,
        &registrations,
        "old_name",
        MONITORING_CHANNEL,
        &digest,
        None,
    )
    .await
}

/// `meta_ads_manager.unregis_user_slack_send`
///
/// Messages each creator the registrations carrying their address.
pub async fn unregis_user_slack_send(context: JobContext, _payload: Value) -> anyhow::Result<Value> {
    let registrations = read_sheet(&context, REGISTRATION_SHEET)
        .await?
        .non_empty("email");
    if registrations.is_empty() {
        return Ok(Value::String(
            "등록할 데이터가 없거나 보낼 사람을 찾지 못하였습니다".to_string(),
        ));
    }

    let mut result = Value::String(String::new());
    for email in registrations.unique_values("email")? {
        let email = cell_text(&email);
        let own = registrations.filter(|row| row.text("email") == email);
        let Some(user_id) = find_slack_id(context.database.as_ref(), &email).await else {
            continue;
        };

        let name = own.iter().next().map(|row| row.text("ad_creator")).unwrap_or_default();
        let header = format!(
            "{} 크루님, Meta 광고 중 표준 광고명칭으로 바뀌지 않아 우선 시트에 등록하여 광고명이 생성되어야 하는 광고 알려드립니다!",
            name
        );
        let footer = format!(
            "시트에서 {} 크루님 이름으로 되어 있는 항목에 정보 입력한 후, Key 컬럼에 값이 생성되면, 구글 시트의 입력 메뉴에 `2.광고등록` 버튼을 누르면 자동으로 등록됩니다!",
            name
        );
        let digest = Digest {
            label: "등록대상광고",
            header: &header,
            footer: &footer,
            url: REGISTRATION_URL,
        };
        result = send_digest(&context, &own, "old_name", CHANNEL, &digest, Some(&user_id)).await?;
    }
    Ok(result)
}

/// `meta_ads_manager.regis_user_slack_send`
///
/// Messages each creator, found through the creator directory on the code
/// sheet, the named ads still waiting to be renamed.
pub async fn regis_user_slack_send(context: JobContext, _payload: Value) -> anyhow::Result<Value> {
    let mut changes = read_sheet(&context, CHANGE_SHEET).await?;
    changes.add_column("creator", |row| {
        ad_creator(&row.text("ad_name"))
            .map(Value::String)
            .unwrap_or(Value::Null)
    });

    let directory = context
        .sheets
        .read_table(SPREADSHEET_URL, CODE_SHEET, 1, Some(CREATOR_EMAIL_RANGE))
        .await?
        .non_empty("email");
    let directory = with_header(directory, &["creator", "email"]);

    let changes = changes
        .left_join(&directory, &["creator"])?
        .non_empty("email");
    if changes.is_empty() {
        return Ok(Value::String(
            "변경할 데이터가 없거나 보낼 사람을 찾지 못하였습니다".to_string(),
        ));
    }

    let mut result = Value::String(String::new());
    for email in changes.unique_values("email")? {
        let email = cell_text(&email);
        let own = changes.filter(|row| row.text("email") == email);
        let Some(user_id) = find_slack_id(context.database.as_ref(), &email).await else {
            continue;
        };

        let name = own.iter().next().map(|row| row.text("creator")).unwrap_or_default();
        let header = format!(
            "{} 크루님, 시트에 등록된 광고 중 변경이 되지 않은 광고가 있어서 알림드립니다",
            name
        );
        let footer = format!(
            "`2_변경대상광고` 시트에서 {} 크루님 이름으로 되어 있는 광고를 등록해주세요. 이미 등록하신 경우 최대 1일 이내에 시트에서 해당 광고가 사라집니다.",
            name
        );
        let digest = Digest {
            label: "변경대상광고",
            header: &header,
            footer: &footer,
            url: CHANGE_URL,
        };
        result = send_digest(&context, &own, "ad_name", CHANNEL, &digest, Some(&user_id)).await?;
    }
    Ok(result)
}

#[cfg(test)]
#[path = "meta_ads_manager_tests.rs"]
mod tests;
