use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Fields pulled out of one listing fragment. Every field is optional; a
/// missing selector hit simply leaves the field out of the serialized form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_reviews_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_reviews_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub badges: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// One entry of a run's `listings.json`: the parsed fields plus when they were captured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedListing {
    pub timestamp: DateTime<Utc>,
    pub data: ListingData,
}

impl ExtractedListing {
    /// The persistable form. `None` when no identifier could be resolved.
    pub fn to_record(&self) -> Option<ListingRecord> {
        let item_id = self.data.item_id.as_deref()?.trim();
        if item_id.is_empty() {
            return None;
        }

        let data = &self.data;
        Some(ListingRecord {
            item_id: item_id.to_string(),
            captured_at: self.timestamp,
            title: data.title.clone(),
            price: data.price,
            price_text: data.price_text.clone(),
            url: data.url.clone(),
            seller_url: data.seller_url.clone(),
            description: data.description.clone(),
            published_date_text: data.published_date_text.clone(),
            phone_state: data.phone_state.clone(),
            condition: data.condition.clone(),
            location: data.location.clone(),
            seller_name: data.seller_name.clone(),
            seller_rating: data.seller_rating.clone(),
            seller_reviews_count: data.seller_reviews_count,
            seller_reviews_text: data.seller_reviews_text.clone(),
            badges: data.badges.clone(),
            images: data.images.clone(),
            params: data.params.clone(),
        })
    }
}

/// A listing ready to be written. `item_id` is the only mandatory field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub item_id: String,
    pub captured_at: DateTime<Utc>,
    pub title: Option<String>,
    pub price: Option<i64>,
    pub price_text: Option<String>,
    pub url: Option<String>,
    pub seller_url: Option<String>,
    pub description: Option<String>,
    pub published_date_text: Option<String>,
    pub phone_state: Option<String>,
    pub condition: Option<String>,
    pub location: Option<String>,
    pub seller_name: Option<String>,
    pub seller_rating: Option<String>,
    pub seller_reviews_count: Option<i64>,
    pub seller_reviews_text: Option<String>,
    pub badges: Vec<String>,
    pub images: Vec<String>,
    pub params: BTreeMap<String, String>,
}

impl ListingRecord {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            captured_at: Utc::now(),
            title: None,
            price: None,
            price_text: None,
            url: None,
            seller_url: None,
            description: None,
            published_date_text: None,
            phone_state: None,
            condition: None,
            location: None,
            seller_name: None,
            seller_rating: None,
            seller_reviews_count: None,
            seller_reviews_text: None,
            badges: Vec::new(),
            images: Vec::new(),
            params: BTreeMap::new(),
        }
    }
}

/// A listings row as read back from the store.
#[derive(Debug, Clone, FromRow)]
pub struct StoredListing {
    pub item_id: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub price: Option<i64>,
    pub price_text: Option<String>,
    pub url: Option<String>,
    pub seller_url: Option<String>,
    pub description: Option<String>,
    pub published_date_text: Option<String>,
    pub phone_state: Option<String>,
    pub condition: Option<String>,
    pub location: Option<String>,
    pub seller_name: Option<String>,
    pub seller_rating: Option<String>,
    pub seller_reviews_count: Option<i64>,
    pub seller_reviews_text: Option<String>,
    pub badges: Option<Json<Vec<String>>>,
    pub images: Option<Json<Vec<String>>>,
    pub params: Option<Json<BTreeMap<String, String>>>,
    pub last_updated_at: DateTime<Utc>,
}

impl StoredListing {
    pub fn badges(&self) -> Vec<String> {
        self.badges.as_ref().map(|b| b.0.clone()).unwrap_or_default()
    }

    pub fn images(&self) -> Vec<String> {
        self.images.as_ref().map(|i| i.0.clone()).unwrap_or_default()
    }

    pub fn params(&self) -> BTreeMap<String, String> {
        self.params.as_ref().map(|p| p.0.clone()).unwrap_or_default()
    }
}
