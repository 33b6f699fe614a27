use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Proof that a listing's notification went out. Rows are only ever inserted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct SentMarker {
    pub item_id: String,
    pub sent_at: DateTime<Utc>,
}
