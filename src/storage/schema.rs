//! Table naming and SQL text for the listings and ledger tables.

use crate::config::TableLayout;

pub const SHARED_LISTINGS_TABLE: &str = "listings";
pub const SENT_ITEMS_TABLE: &str = "sent_items";

/// Columns written by an upsert, in bind order. `last_updated_at` is owned by the store.
pub const LISTING_COLUMNS: [&str; 19] = [
    "item_id",
    "captured_at",
    "title",
    "price",
    "price_text",
    "url",
    "seller_url",
    "description",
    "published_date_text",
    "phone_state",
    "condition",
    "location",
    "seller_name",
    "seller_rating",
    "seller_reviews_count",
    "seller_reviews_text",
    "badges",
    "images",
    "params",
];

/// Per-category table name for a target key. Table names are spliced into SQL,
/// so anything outside `[a-z0-9_]` after folding is rejected.
pub fn listings_table_name(category: &str) -> Option<String> {
    let safe: String = category
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect();

    if safe.is_empty() || !safe.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    Some(format!("category_{}", safe))
}

pub fn table_for(layout: TableLayout, category: &str) -> Option<String> {
    match layout {
        TableLayout::PerCategory => listings_table_name(category),
        TableLayout::Shared => Some(SHARED_LISTINGS_TABLE.to_string()),
    }
}

pub fn listings_table_ddl(table: &str) -> String {
    format!(
        r"
        CREATE TABLE IF NOT EXISTS {table} (
            item_id TEXT PRIMARY KEY,
            captured_at TEXT,
            title TEXT,
            price INTEGER,
            price_text TEXT,
            url TEXT UNIQUE,
            seller_url TEXT,
            description TEXT,
            published_date_text TEXT,
            phone_state TEXT,
            condition TEXT,
            location TEXT,
            seller_name TEXT,
            seller_rating TEXT,
            seller_reviews_count INTEGER,
            seller_reviews_text TEXT,
            badges TEXT,
            images TEXT,
            params TEXT,
            last_updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        ",
        table = table
    )
}

pub fn sent_items_table_ddl() -> String {
    format!(
        r"
        CREATE TABLE IF NOT EXISTS {table} (
            item_id TEXT PRIMARY KEY,
            sent_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        ",
        table = SENT_ITEMS_TABLE
    )
}

/// Insert, or overwrite every non-key column when the `item_id` already exists.
pub fn upsert_sql(table: &str) -> String {
    let columns = LISTING_COLUMNS.join(", ");
    let placeholders = vec!["?"; LISTING_COLUMNS.len()].join(", ");
    let updates = LISTING_COLUMNS
        .iter()
        .skip(1)
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(",\n            ");

    format!(
        r"
        INSERT INTO {table} ({columns})
        VALUES ({placeholders})
        ON CONFLICT(item_id) DO UPDATE SET
            {updates},
            last_updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        "
    )
}

pub fn mark_sent_sql() -> String {
    format!(
        "INSERT INTO {} (item_id) VALUES (?) ON CONFLICT(item_id) DO NOTHING",
        SENT_ITEMS_TABLE
    )
}
