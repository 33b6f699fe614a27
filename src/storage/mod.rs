pub mod ledger;
pub mod listings;
pub mod schema;

pub use ledger::{NotificationLedger, SqliteLedger};
pub use listings::{ListingStore, UpsertSummary};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::StorageConfig;
use crate::Result;

/// Opens (and creates if needed) the SQLite database behind `config.database_url`.
pub async fn connect(config: &StorageConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let filename = options.clone().get_filename();
    if let Some(parent) = filename.parent() {
        if !parent.as_os_str().is_empty() && filename.as_os_str() != ":memory:" {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout))
        .connect_with(options)
        .await?;

    info!("Connected to database {}", config.database_url);
    Ok(pool)
}
