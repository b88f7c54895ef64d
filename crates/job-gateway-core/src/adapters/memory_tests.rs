//! Tests for the in-memory adapters.

use super::*;
use serde_json::{json, Value};

const BOOK: &str = "book-1";

mod range_tests {
    use super::*;

    #[test]
    fn test_split_range_handles_quotes() {
        assert_eq!(
            split_range("'Bob''s sheet'!A1:B2"),
            ("Bob's sheet".to_string(), Some("A1:B2".to_string()))
        );
        assert_eq!(split_range("'Code'"), ("Code".to_string(), None));
        assert_eq!(
            split_range("Code!L:L"),
            ("Code".to_string(), Some("L:L".to_string()))
        );
    }

    #[test]
    fn test_bounds_for_open_ranges() {
        let column = Bounds::parse(Some("L:L")).unwrap();
        assert_eq!((column.col0, column.col1, column.row0), (11, 11, 0));
        assert_eq!(column.row1, usize::MAX);

        let row = Bounds::parse(Some("2:2")).unwrap();
        assert_eq!((row.row0, row.row1, row.col0), (1, 1, 0));

        let cell = Bounds::parse(Some("B3")).unwrap();
        assert_eq!((cell.row0, cell.col0, cell.row1, cell.col1), (2, 1, 2, 1));

        assert!(Bounds::parse(Some("A0:B1")).is_none());
        assert!(Bounds::parse(Some("A$1")).is_none());
    }
}

mod sheet_client_tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read_strips_text_prefix() {
        let client = MemorySheetClient::new().with_sheet(BOOK, "Sheet", Vec::<Vec<&str>>::new());

        client
            .write_values(BOOK, "'Sheet'!B2:C2", &[vec![json!("'0123"), Value::Null]])
            .await
            .unwrap();

        let values = client.read_values(BOOK, "'Sheet'").await.unwrap();
        assert_eq!(values, vec![vec![], vec![json!(""), json!("0123")]]);
    }

    #[tokio::test]
    async fn test_unknown_spreadsheet_is_api_error() {
        let client = MemorySheetClient::new();

        let result = client.worksheet_titles("missing").await;

        assert!(matches!(result, Err(SheetError::Api { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_worksheet_titles_in_tab_order() {
        let client = MemorySheetClient::new()
            .with_sheet(BOOK, "DB_PL", Vec::<Vec<&str>>::new())
            .with_sheet(BOOK, "DB_BS", Vec::<Vec<&str>>::new());

        assert_eq!(
            client.worksheet_titles(BOOK).await.unwrap(),
            vec!["DB_PL", "DB_BS"]
        );
    }
}

mod database_tests {
    use super::*;

    fn rows(n: usize) -> Table {
        Table::from_rows(
            ["id", "name"],
            (0..n).map(|i| vec![json!(i), json!(format!("n{i}"))]).collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_read_matches_fragment_and_target() {
        let db = MemoryDatabase::new().with_result("cfo", "FROM accounts", rows(2));

        let hit = db
            .read("CFO", "SELECT *\n\tFROM accounts", &[])
            .await
            .unwrap();
        let miss = db.read("BOOSTA", "SELECT * FROM accounts", &[]).await.unwrap();

        assert_eq!(hit.len(), 2);
        assert!(miss.is_empty());
        assert_eq!(db.reads()[0].sql, "SELECT *  FROM accounts");
    }

    #[tokio::test]
    async fn test_upsert_messages_and_recording() {
        let db = MemoryDatabase::new();

        let message = db.upsert("CFO", "fn_fs_bs", &rows(3)).await.unwrap();
        let empty = db.upsert("CFO", "fn_fs_bs", &Table::new(["id"])).await.unwrap();

        assert_eq!(message, "3 records upserted into fn_fs_bs");
        assert_eq!(empty, "No data to upsert into fn_fs_bs");
        assert_eq!(db.writes_to("fn_fs_bs").len(), 1);
        assert_eq!(db.writes()[0].kind, WriteKind::Upsert);
    }

    #[tokio::test]
    async fn test_delete_and_insert_counts_replaced_rows() {
        let db = MemoryDatabase::new();
        db.upsert("CFO", "t", &rows(2)).await.unwrap();

        let message = db
            .delete_and_insert("CFO", "t", "name = ?", &[json!("n0")], &rows(1))
            .await
            .unwrap();

        assert_eq!(message, "Deleted 2, inserted 1 rows in t");
    }

    #[tokio::test]
    async fn test_failure_applies_to_every_call() {
        let db = MemoryDatabase::new().with_failure("CFO", "connection refused");

        assert!(db.read("cfo", "SELECT 1", &[]).await.is_err());
        assert!(db.upsert("CFO", "t", &rows(1)).await.is_err());
        assert!(db.column_max_length("CFO", "t", "name").await.is_err());
    }

    #[tokio::test]
    async fn test_column_max_length() {
        let db = MemoryDatabase::new().with_column_max_length("CFO", "fn_cash_bankaccount", "acc_name", 50);

        assert_eq!(
            db.column_max_length("CFO", "fn_cash_bankaccount", "acc_name").await.unwrap(),
            Some(50)
        );
        assert_eq!(db.column_max_length("CFO", "fn_cash_bankaccount", "other").await.unwrap(), None);
    }
}

mod notifier_tests {
    use super::*;

    #[tokio::test]
    async fn test_user_target_reply_names_dm_channel() {
        let notifier = MemoryNotifier::new();

        let reply = notifier
            .send("BOOSTA", &SlackTarget::User("U1".into()), &SlackMessage::new("done", "h"))
            .await
            .unwrap();

        assert_eq!(reply["channel"], "DU1");
        assert_eq!(reply["text"], "done");
    }
}
