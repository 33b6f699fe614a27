use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, warn};

use super::schema::{listings_table_ddl, sent_items_table_ddl, table_for, upsert_sql};
use crate::config::TableLayout;
use crate::models::{ListingRecord, StoredListing};
use crate::{AppError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub upserted: usize,
    pub failed: usize,
}

/// Identity-keyed listing rows for one category (or the shared table).
#[derive(Clone)]
pub struct ListingStore {
    pool: SqlitePool,
    table: String,
}

impl ListingStore {
    /// Resolves the table for `category` under `layout` and makes sure both the
    /// listings table and the ledger table exist.
    pub async fn open(pool: SqlitePool, layout: TableLayout, category: &str) -> Result<Self> {
        let table = table_for(layout, category)
            .ok_or_else(|| AppError::Validation(format!("Invalid category key: {}", category)))?;

        sqlx::query(&listings_table_ddl(&table)).execute(&pool).await?;
        sqlx::query(&sent_items_table_ddl()).execute(&pool).await?;

        Ok(Self { pool, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts the record, or overwrites every non-key column of the existing
    /// row. `last_updated_at` is stamped by the database.
    pub async fn upsert(&self, record: &ListingRecord) -> Result<()> {
        sqlx::query(&upsert_sql(&self.table))
            .bind(&record.item_id)
            .bind(record.captured_at)
            .bind(&record.title)
            .bind(record.price)
            .bind(&record.price_text)
            .bind(&record.url)
            .bind(&record.seller_url)
            .bind(&record.description)
            .bind(&record.published_date_text)
            .bind(&record.phone_state)
            .bind(&record.condition)
            .bind(&record.location)
            .bind(&record.seller_name)
            .bind(&record.seller_rating)
            .bind(record.seller_reviews_count)
            .bind(&record.seller_reviews_text)
            .bind(json_column("badges", &record.badges))
            .bind(json_column("images", &record.images))
            .bind(json_column("params", &record.params))
            .execute(&self.pool)
            .await?;

        debug!("Upserted listing {} into {}", record.item_id, self.table);
        Ok(())
    }

    /// Upserts every record; a failing record is logged and counted, never fatal.
    pub async fn upsert_all<'a, I>(&self, records: I) -> UpsertSummary
    where
        I: IntoIterator<Item = &'a ListingRecord>,
    {
        let mut summary = UpsertSummary::default();

        for record in records {
            match self.upsert(record).await {
                Ok(()) => summary.upserted += 1,
                Err(e) => {
                    warn!("Failed to upsert listing {} into {}: {}", record.item_id, self.table, e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    pub async fn get(&self, item_id: &str) -> Result<Option<StoredListing>> {
        let row = sqlx::query_as::<_, StoredListing>(&format!(
            "SELECT * FROM {} WHERE item_id = ?",
            self.table
        ))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// Serializes a JSON-shaped field. A failure degrades that one column to NULL.
fn json_column<T: Serialize + ?Sized>(column: &str, value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Failed to serialize column '{}': {}. Storing NULL.", column, e);
            None
        }
    }
}
