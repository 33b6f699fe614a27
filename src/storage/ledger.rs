use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use tracing::debug;

use super::schema::{mark_sent_sql, sent_items_table_ddl, SENT_ITEMS_TABLE};
use crate::models::SentMarker;
use crate::Result;

/// Append-only record of which listings have already been announced.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn is_notified(&self, item_id: &str) -> Result<bool>;

    /// Records a delivery. Recording the same id twice is not an error.
    async fn mark_notified(&self, item_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        sqlx::query(&sent_items_table_ddl()).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn get(&self, item_id: &str) -> Result<Option<SentMarker>> {
        let marker = sqlx::query_as::<_, SentMarker>(&format!(
            "SELECT item_id, sent_at FROM {} WHERE item_id = ?",
            SENT_ITEMS_TABLE
        ))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(marker)
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", SENT_ITEMS_TABLE))
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl NotificationLedger for SqliteLedger {
    async fn is_notified(&self, item_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE item_id = ?",
            SENT_ITEMS_TABLE
        ))
        .bind(item_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn mark_notified(&self, item_id: &str) -> Result<()> {
        let result = sqlx::query(&mark_sent_sql())
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            debug!("Listing {} was already marked as notified", item_id);
        }

        Ok(())
    }
}
