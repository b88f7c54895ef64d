//! Tests for the ad-naming bookkeeping.

use super::*;
use crate::testing::{context, row, slack_user, USER_LOOKUP};
use job_gateway_core::adapters::{MemoryDatabase, MemoryNotifier, MemorySheetClient};
use job_gateway_core::notify::SlackTarget;

const STANDARD_NAME: &str = "A #x #y #z #Kim #a #b #c";

fn registration_header() -> Vec<Value> {
    let mut header = row(&REGISTRATION_COLUMNS);
    header.push(json!("Key"));
    header
}

fn registration_rows() -> Vec<Vec<Value>> {
    vec![
        registration_header(),
        row(&["A", "301", "pending 301", "BA", "detail", "prod", "ev", "2405", "Kim", "usp", "hook", "sub", "desc", "KEY-1"]),
        row(&["B", "302", "pending 302", "BB", "", "", "", "", "", "", "", "", "", ""]),
        row(&["A", "303", "", "", "", "", "", "", "", "", "", "", "", ""]),
        row(&["A", "304", "pending 304", "BA", "detail", "prod", "ev", "2405", "Kim", "usp", "hook", "sub", "desc", "KEY-0"]),
    ]
}

fn naming_rows() -> Vec<Vec<Value>> {
    vec![
        row(&["brand", "Key", "contents_detail", "product_name", "event", "date", "ad_creator", "ad_name", "ad_id", "old_name", "id"]),
        row(&["A", "KEY-0", "d", "p", "e", "2404", "Lee", STANDARD_NAME, "101", "old 101", "id-1"]),
        row(&["B", "KEY-2", "d", "p", "e", "2404", "Lee", "B #new name", "202", "raw ad 202", "id-2"]),
        row(&["B", "KEY-3", "d", "p", "e", "2404", "Lee", "B #deleted", "203", "x", "id-3"]),
        row(&["", "KEY-4", "d", "p", "e", "2404", "Lee", "orphan", "204", "y", "id-4"]),
    ]
}

fn workbook() -> MemorySheetClient {
    MemorySheetClient::new()
        .with_sheet(
            SPREADSHEET_URL,
            KEYWORD_SHEET,
            vec![
                row(&["brand", "k1_main_usp", "K2_hooking", "K3_sub_keyword", "description", "Key"]),
                row(&["A", "usp0", "hook0", "sub0", "desc0", "KEY-0"]),
            ],
        )
        .with_sheet(SPREADSHEET_URL, NAMING_SHEET, naming_rows())
        .with_sheet(
            SPREADSHEET_URL,
            CHANGE_SHEET,
            vec![
                row(&["brand", "ad_name", "ad_id", "old_name"]),
                row(&["Z", "stale", "1", "s"]),
            ],
        )
        .with_sheet(SPREADSHEET_URL, REGISTRATION_SHEET, registration_rows())
        .with_sheet(
            SPREADSHEET_URL,
            DELETED_SHEET,
            vec![row(&["brand", "ad_name"]), row(&["B", "B #deleted"])],
        )
}

fn ads() -> Table {
    Table::from_rows(
        ["campaign_name", "ad_id", "ad_name"],
        vec![
            vec![json!("[A] spring"), json!(101), json!(STANDARD_NAME)],
            vec![json!("[A] spring"), json!(102), json!("raw ad 102")],
            vec![json!("[B] promo"), json!(201), json!("raw ad 201")],
            vec![json!("[B] promo"), json!(202), json!("raw ad 202")],
        ],
    )
    .unwrap()
}

fn ads_database() -> MemoryDatabase {
    MemoryDatabase::new()
        .with_result(
            TARGET,
            "MAX(date_start)",
            Table::from_rows(["lastest_date"], vec![row(&["2024-05-01"])]).unwrap(),
        )
        .with_result(TARGET, "WHERE date_start = ?", ads())
        .with_result(
            TARGET,
            "FROM facebook_id_ads",
            Table::from_rows(["identity_id", "name"], vec![row(&["id-1 - 사본", STANDARD_NAME])]).unwrap(),
        )
        .with_result(TARGET, USER_LOOKUP, slack_user("U9"))
}

mod parsing_tests {
    use super::*;

    #[test]
    fn test_campaign_brand() {
        assert_eq!(campaign_brand("[A] spring").as_deref(), Some("A"));
        assert_eq!(campaign_brand("x [BB] y [C]").as_deref(), Some("BB"));
        assert_eq!(campaign_brand("no tag"), None);
    }

    #[test]
    fn test_ad_creator() {
        assert_eq!(ad_creator(STANDARD_NAME).as_deref(), Some("Kim"));
        assert_eq!(ad_creator("A #x"), None);
    }

    #[test]
    fn test_has_standard_name() {
        assert!(has_standard_name(STANDARD_NAME));
        assert!(!has_standard_name("A #x #y"));
    }
}

mod digest_tests {
    use super::*;

    fn names(brand: &str, count: usize) -> Vec<Vec<Value>> {
        (0..count)
            .map(|i| vec![json!(brand), json!(format!("ad {i}"))])
            .collect()
    }

    #[test]
    fn test_body_shows_three_names_per_brand() {
        let mut rows = names("A", 5);
        rows.extend(names("B", 1));
        let table = Table::from_rows(["brand", "old_name"], rows).unwrap();

        let body = digest_body(&table, "old_name").unwrap();

        assert_eq!(
            body,
            "*A (총 5건)*\n`ad 0`\n`ad 1`\n`ad 2`\nㆍ이외 2건\n\n*B (총 1건)*\n`ad 0`\n\n"
        );
    }

    #[test]
    fn test_empty_table_has_empty_body() {
        assert_eq!(digest_body(&Table::default(), "old_name").unwrap(), "");
    }

    #[test]
    fn test_message_layout() {
        let table = Table::from_rows(["brand", "old_name"], names("A", 1)).unwrap();
        let digest = Digest {
            label: "등록대상광고",
            header: "헤더",
            footer: "푸터",
            url: REGISTRATION_URL,
        };

        let message = digest_message(&table, "old_name", &digest).unwrap();

        assert_eq!(message.text, "등록대상광고 알리미");
        assert_eq!(message.header, "*[등록대상광고 알리미]*\n안녕하세요. 헤더 :blush:");
        assert_eq!(message.footer.as_deref(), Some("`2_등록대상광고` 푸터"));
        assert_eq!(message.button, Some(UrlButton::new("Meta Ads Manager", REGISTRATION_URL)));
    }
}

mod update_ads_tests {
    use super::*;

    #[tokio::test]
    async fn test_update_rebuilds_both_sheets() {
        let sheets = workbook();
        let database = ads_database();
        let notifier = MemoryNotifier::new();

        let result = update_ads(
            context(&sheets, &database, &notifier),
            json!({ "user_email": "crew@example.com" }),
        )
        .await
        .unwrap();

        assert_eq!(
            result,
            json!(
                "Range A2:D2 has been cleared.A2:D2 of 2_변경대상광고 is updated.\n\
                 Range A2:M5 has been cleared.A2:M6 of 2_등록대상광고 is updated.\n"
            )
        );

        let change = sheets.sheet_values(SPREADSHEET_URL, CHANGE_SHEET).unwrap();
        assert_eq!(change[1], row(&["B", "B #new name", "202", "raw ad 202"]));

        let ads_read = database
            .reads()
            .into_iter()
            .find(|read| read.sql.contains("WHERE date_start = ?"))
            .unwrap();
        assert_eq!(ads_read.params, vec![json!("2024-05-01")]);
    }

    #[tokio::test]
    async fn test_update_messages_requesting_user() {
        let sheets = workbook();
        let notifier = MemoryNotifier::new();

        update_ads(
            context(&sheets, &ads_database(), &notifier),
            json!({ "user_email": "crew@example.com" }),
        )
        .await
        .unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|s| s.bot == "META"));
        assert!(sent.iter().all(|s| s.target == SlackTarget::User("U9".into())));
        assert_eq!(sent[0].message.body.as_deref(), Some("*B (총 1건)*\n`B #new name`\n\n"));
        assert_eq!(
            sent[1].message.body.as_deref(),
            Some(
                "*A (총 3건)*\n`pending 301`\n`pending 304`\n`raw ad 102`\n\n\
                 *B (총 2건)*\n`pending 302`\n`raw ad 201`\n\n"
            )
        );
    }

    #[tokio::test]
    async fn test_triggered_update_posts_to_channel() {
        let notifier = MemoryNotifier::new();

        update_ads(
            context(&workbook(), &ads_database(), &notifier),
            json!({ "user_email": "crew@example.com", "trigger": true }),
        )
        .await
        .unwrap();

        assert!(notifier
            .sent()
            .iter()
            .all(|s| s.target == SlackTarget::Channel(CHANNEL.into())));
    }

    #[tokio::test]
    async fn test_missing_ads_date_fails() {
        let database = MemoryDatabase::new();

        let error = update_ads(
            context(&workbook(), &database, &MemoryNotifier::new()),
            json!({}),
        )
        .await
        .unwrap_err();

        assert_eq!(error.to_string(), "facebook_data_ads has no date_start");
    }
}

mod add_ad_tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_registrations_move_to_naming_sheet() {
        let sheets = workbook();
        let notifier = MemoryNotifier::new();

        let result = add_ad(
            context(&sheets, &ads_database(), &notifier),
            json!({ "user_email": "crew@example.com" }),
        )
        .await
        .unwrap();

        assert_eq!(
            result,
            json!(
                "A3:E3 of 0_키워드생성 is updated.\n\
                 B6:G7 of 1_광고이름생성 is updated.\n\
                 I6:J7 of 1_광고이름생성 is updated.\n\
                 Range A2:L5 has been cleared.\
                 A2:M3 of 2_등록대상광고 is updated.\n"
            )
        );

        let writes = sheets.writes();
        let ids = writes
            .iter()
            .find(|w| w.range == format!("'{}'!I6:J7", NAMING_SHEET))
            .unwrap();
        assert_eq!(
            ids.rows,
            vec![row(&["301", "pending 301"]), row(&["304", "pending 304"])]
        );
        let keywords = writes
            .iter()
            .find(|w| w.range.starts_with(&format!("'{}'", KEYWORD_SHEET)))
            .unwrap();
        assert_eq!(keywords.rows, vec![row(&["A", "usp", "hook", "sub", "desc"])]);

        let sent = notifier.sent();
        assert_eq!(sent[0].message.text, "광고 업데이트 알리미");
        assert_eq!(sent[0].target, SlackTarget::User("U9".into()));
        assert_eq!(sent.len(), 3);
    }

    #[tokio::test]
    async fn test_default_email_skips_registration_digest() {
        let notifier = MemoryNotifier::new();

        add_ad(
            context(&workbook(), &ads_database(), &notifier),
            json!({}),
        )
        .await
        .unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|s| s.message.text == "업데이트 알리미"));
    }

    #[tokio::test]
    async fn test_nothing_complete_changes_nothing() {
        let sheets = MemorySheetClient::new()
            .with_sheet(SPREADSHEET_URL, REGISTRATION_SHEET, vec![registration_header()])
            .with_sheet(SPREADSHEET_URL, KEYWORD_SHEET, Vec::<Vec<Value>>::new());
        let notifier = MemoryNotifier::new();

        let result = add_ad(
            context(&sheets, &MemoryDatabase::new(), &notifier),
            json!({}),
        )
        .await
        .unwrap();

        assert_eq!(result, json!(""));
        assert!(sheets.writes().is_empty());
        assert!(notifier.sent().is_empty());
    }
}

mod digest_job_tests {
    use super::*;

    #[tokio::test]
    async fn test_change_digest_goes_to_monitoring_channel() {
        let sheets = MemorySheetClient::new().with_sheet(
            SPREADSHEET_URL,
            CHANGE_SHEET,
            vec![
                row(&["brand", "ad_name", "ad_id", "old_name", "new_name"]),
                row(&["A", "a", "1", "o", "A #new"]),
            ],
        );
        let notifier = MemoryNotifier::new();

        let reply = regis_slack_send(
            context(&sheets, &MemoryDatabase::new(), &notifier),
            json!({}),
        )
        .await
        .unwrap();

        assert_eq!(reply["channel"], MONITORING_CHANNEL);
        let sent = notifier.sent();
        assert_eq!(sent[0].message.body.as_deref(), Some("*A (총 1건)*\n`A #new`\n\n"));
    }

    #[tokio::test]
    async fn test_registration_digest_lists_old_names() {
        let notifier = MemoryNotifier::new();

        unregis_slack_send(
            context(&workbook(), &MemoryDatabase::new(), &notifier),
            json!({}),
        )
        .await
        .unwrap();

        let sent = notifier.sent();
        assert_eq!(sent[0].target, SlackTarget::Channel(MONITORING_CHANNEL.into()));
        assert!(sent[0].message.body.as_deref().unwrap().contains("`pending 301`"));
    }

    #[tokio::test]
    async fn test_registration_reminders_go_to_each_creator() {
        let sheets = MemorySheetClient::new().with_sheet(
            SPREADSHEET_URL,
            REGISTRATION_SHEET,
            vec![
                row(&["brand", "old_name", "ad_creator", "email"]),
                row(&["A", "raw 1", "Kim", "kim@example.com"]),
                row(&["A", "raw 2", "Kim", "kim@example.com"]),
                row(&["B", "raw 3", "Lee", ""]),
            ],
        );
        let database = MemoryDatabase::new().with_result(TARGET, USER_LOOKUP, slack_user("U9"));
        let notifier = MemoryNotifier::new();

        let reply = unregis_user_slack_send(context(&sheets, &database, &notifier), json!({}))
            .await
            .unwrap();

        assert_eq!(reply["channel"], "DU9");
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].message.header.contains("Kim 크루님"));
        assert_eq!(database.reads()[0].params, vec![json!("kim@example.com")]);
    }

    #[tokio::test]
    async fn test_registration_reminders_without_addresses() {
        let sheets = MemorySheetClient::new().with_sheet(
            SPREADSHEET_URL,
            REGISTRATION_SHEET,
            vec![row(&["brand", "old_name", "email"]), row(&["A", "raw 1", ""])],
        );

        let reply = unregis_user_slack_send(
            context(&sheets, &MemoryDatabase::new(), &MemoryNotifier::new()),
            json!({}),
        )
        .await
        .unwrap();

        assert_eq!(reply, json!("등록할 데이터가 없거나 보낼 사람을 찾지 못하였습니다"));
    }

    fn directory_row(cells: &[&str]) -> Vec<Value> {
        let mut padded = vec![json!(""); 18];
        padded.extend(row(cells));
        padded
    }

    #[tokio::test]
    async fn test_change_reminders_resolve_creators_from_directory() {
        let sheets = MemorySheetClient::new()
            .with_sheet(
                SPREADSHEET_URL,
                CHANGE_SHEET,
                vec![
                    row(&["brand", "ad_name", "ad_id", "old_name"]),
                    row(&["A", STANDARD_NAME, "1", "o"]),
                    row(&["B", "unparsable", "2", "p"]),
                ],
            )
            .with_sheet(
                SPREADSHEET_URL,
                CODE_SHEET,
                vec![
                    directory_row(&["creator", "email"]),
                    directory_row(&["Kim", "kim@example.com"]),
                ],
            );
        let database = MemoryDatabase::new().with_result(TARGET, USER_LOOKUP, slack_user("U9"));
        let notifier = MemoryNotifier::new();

        let reply = regis_user_slack_send(context(&sheets, &database, &notifier), json!({}))
            .await
            .unwrap();

        assert_eq!(reply["channel"], "DU9");
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].message.header,
            "*[변경대상광고 알리미]*\n안녕하세요. Kim 크루님, 시트에 등록된 광고 중 변경이 되지 않은 광고가 있어서 알림드립니다 :blush:"
        );
        assert_eq!(
            sent[0].message.body.as_deref(),
            Some(format!("*A (총 1건)*\n`{}`\n\n", STANDARD_NAME).as_str())
        );
    }

    #[tokio::test]
    async fn test_change_reminders_without_directory_match() {
        let sheets = MemorySheetClient::new()
            .with_sheet(
                SPREADSHEET_URL,
                CHANGE_SHEET,
                vec![row(&["brand", "ad_name"]), row(&["A", STANDARD_NAME])],
            )
            .with_sheet(SPREADSHEET_URL, CODE_SHEET, vec![directory_row(&["creator", "email"])]);

        let reply = regis_user_slack_send(
            context(&sheets, &MemoryDatabase::new(), &MemoryNotifier::new()),
            json!({}),
        )
        .await
        .unwrap();

        assert_eq!(reply, json!("변경할 데이터가 없거나 보낼 사람을 찾지 못하였습니다"));
    }
}
