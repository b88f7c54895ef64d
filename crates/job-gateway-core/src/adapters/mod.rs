//! Adapter implementations.
//!
//! Concrete implementations of the [`crate::sheets::SheetClient`],
//! [`crate::database::Database`] and [`crate::notify::Notifier`] seams: the
//! production clients for Google Sheets, MySQL and Slack, and in-memory fakes
//! for tests and local runs.

pub mod google_sheets;
pub mod memory;
pub mod mysql;
pub mod slack;

pub use google_sheets::{
    AccessTokenProvider, GoogleSheetsClient, ServiceAccountKey, ServiceAccountTokenProvider,
    StaticTokenProvider,
};
pub use memory::{MemoryDatabase, MemoryNotifier, MemorySheetClient};
pub use mysql::MySqlDatabase;
pub use slack::SlackNotifier;
