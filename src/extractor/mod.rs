//! Turns raw listing fragments into [`ListingData`].
//!
//! Each field is resolved through its own [`FieldChain`]; the first strategy
//! that yields a value wins. Extraction never fails for a well-formed
//! extractor: a field with no hit is simply left out.

pub mod strategy;

pub use strategy::{element_text, FieldChain, Strategy};

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html};
use std::collections::BTreeMap;
use tracing::{debug, trace};
use url::Url;

use crate::config::ExtractionConfig;
use crate::models::{ExtractedListing, ListingData};
use crate::utils::text::{digits_only, normalize_nbsp, normalize_whitespace};
use crate::{AppError, Result};

#[derive(Debug, Clone)]
pub struct ListingExtractor {
    origin: Url,
    items: FieldChain,
    title_link: FieldChain,
    title_fallback: FieldChain,
    url_fallback: FieldChain,
    seller_link: FieldChain,
    seller_tracking_params: Vec<String>,
    price_container: FieldChain,
    price_amount: FieldChain,
    price_fallback: FieldChain,
    description: FieldChain,
    description_content: FieldChain,
    published_date: FieldChain,
    phone_state: FieldChain,
    condition: FieldChain,
    location: FieldChain,
    seller_name: FieldChain,
    seller_rating: FieldChain,
    seller_reviews: FieldChain,
    badge: FieldChain,
    badge_title: FieldChain,
    item_id_attribute: String,
    item_id_attribute_selector: Strategy,
    item_id_link: Strategy,
    item_id_patterns: Vec<Regex>,
    image: Strategy,
    image_url_template: String,
    params: Strategy,
    integer: Regex,
}

impl ListingExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let origin = Url::parse(&config.site_origin).map_err(|e| AppError::Parse {
            message: format!("Invalid site origin '{}': {}", config.site_origin, e),
        })?;

        let item_id_patterns = config
            .item_id_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| AppError::Parse {
                    message: format!("Invalid item_id pattern '{}': {}", p, e),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let integer = Regex::new(r"\d+").map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(Self {
            origin,
            items: FieldChain::new("item", &config.item_selectors)?,
            title_link: FieldChain::new("title", &config.title_link_selectors)?,
            title_fallback: FieldChain::new("title", &config.title_fallback_selectors)?,
            url_fallback: FieldChain::new("url", &config.url_fallback_selectors)?,
            seller_link: FieldChain::new("seller_url", &config.seller_link_selectors)?,
            seller_tracking_params: config.seller_tracking_params.clone(),
            price_container: FieldChain::new("price", &config.price_container_selectors)?,
            price_amount: FieldChain::new("price", &config.price_amount_selectors)?,
            price_fallback: FieldChain::new("price", &config.price_fallback_selectors)?,
            description: FieldChain::new("description", &config.description_selectors)?,
            description_content: FieldChain::new("description", &config.description_content_selectors)?,
            published_date: FieldChain::new("published_date_text", &config.published_date_selectors)?,
            phone_state: FieldChain::new("phone_state", &config.phone_state_selectors)?,
            condition: FieldChain::new("condition", &config.condition_selectors)?,
            location: FieldChain::new("location", &config.location_selectors)?,
            seller_name: FieldChain::new("seller_name", &config.seller_name_selectors)?,
            seller_rating: FieldChain::new("seller_rating", &config.seller_rating_selectors)?,
            seller_reviews: FieldChain::new("seller_reviews", &config.seller_reviews_selectors)?,
            badge: FieldChain::new("badges", &config.badge_selectors)?,
            badge_title: FieldChain::new("badges", &config.badge_title_selectors)?,
            item_id_attribute: config.item_id_attribute.clone(),
            item_id_attribute_selector: Strategy::parse(&format!("[{}]", config.item_id_attribute))?,
            item_id_link: Strategy::parse(&config.item_id_link_selector)?,
            item_id_patterns,
            image: Strategy::parse(&config.image_selector)?,
            image_url_template: config.image_url_template.clone(),
            params: Strategy::parse(&config.params_selector)?,
            integer,
        })
    }

    /// Extracts one listing from a standalone fragment (a single item's outer HTML).
    pub fn extract_fragment(&self, html: &str) -> ListingData {
        let fragment = Html::parse_fragment(html);
        let root = fragment.root_element();

        // The wrapper is a synthetic <html>; the listing is its first element child.
        let item = root.children().find_map(ElementRef::wrap).unwrap_or(root);
        self.extract_element(item)
    }

    /// Splits a container snapshot into items and extracts each of them, in
    /// document order, stamping every result with `timestamp`.
    pub fn extract_page(&self, html: &str, timestamp: DateTime<Utc>) -> Vec<ExtractedListing> {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let Some(strategy) = self
            .items
            .strategies()
            .iter()
            .find(|s| s.first(root).is_some())
        else {
            debug!("No listing items found in snapshot");
            return Vec::new();
        };

        trace!("Splitting snapshot with item selector '{}'", strategy.name());
        strategy
            .all(root)
            .map(|item| ExtractedListing {
                timestamp,
                data: self.extract_element(item),
            })
            .collect()
    }

    pub fn extract_element(&self, item: ElementRef<'_>) -> ListingData {
        let mut data = ListingData::default();

        self.extract_title_and_url(item, &mut data);
        data.seller_url = self.extract_seller_url(item);
        self.extract_price(item, &mut data);

        data.description = self
            .description
            .text(item)
            .or_else(|| self.description_content.attr(item, "content"))
            .map(|text| normalize_whitespace(&text))
            .filter(|text| !text.is_empty());
        data.published_date_text = self.published_date.text(item);
        data.phone_state = self.phone_state.text(item);
        data.condition = self.condition.text(item);
        data.location = self.location.text(item);
        data.seller_name = self.seller_name.text(item);
        data.seller_rating = self.seller_rating.text(item);

        if let Some(reviews) = self.seller_reviews.text(item) {
            data.seller_reviews_count = self
                .integer
                .find(&reviews)
                .and_then(|m| m.as_str().parse().ok());
            data.seller_reviews_text = Some(reviews);
        }

        data.badges = self.extract_badges(item);
        data.item_id = self.extract_item_id(item, data.url.as_deref());
        data.images = self.extract_images(item);
        data.params = self.extract_params(item);

        data
    }

    fn extract_title_and_url(&self, item: ElementRef<'_>, data: &mut ListingData) {
        if let Some(link) = self.title_link.element(item) {
            let title = element_text(link);
            if !title.is_empty() {
                data.title = Some(title);
            }
            data.url = link.value().attr("href").and_then(|href| self.absolutize(href));
        }

        if data.title.is_none() {
            data.title = self.title_fallback.text(item);
        }

        if data.url.is_none() {
            data.url = self
                .url_fallback
                .attr(item, "href")
                .and_then(|href| self.absolutize(&href));
        }
    }

    fn extract_seller_url(&self, item: ElementRef<'_>) -> Option<String> {
        let href = self.seller_link.attr(item, "href")?;
        let mut url = self.origin.join(&href).ok()?;

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !self.seller_tracking_params.iter().any(|p| p == key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }

        Some(url.to_string())
    }

    fn extract_price(&self, item: ElementRef<'_>, data: &mut ListingData) {
        let text = self
            .price_container
            .element(item)
            .and_then(|container| self.price_amount.text(container))
            .or_else(|| self.price_fallback.text(item));

        if let Some(text) = text {
            data.price = digits_only(&text).and_then(|digits| digits.parse().ok());
            data.price_text = Some(normalize_nbsp(&text));
        }
    }

    /// Badges from the first container selector that matches anything.
    fn extract_badges(&self, item: ElementRef<'_>) -> Vec<String> {
        let Some(containers) = self
            .badge
            .strategies()
            .iter()
            .find(|s| s.first(item).is_some())
        else {
            return Vec::new();
        };

        containers
            .all(item)
            .filter_map(|badge| self.badge_title.text(badge))
            .collect()
    }

    fn extract_item_id(&self, item: ElementRef<'_>, url: Option<&str>) -> Option<String> {
        let attribute = |el: ElementRef<'_>| {
            el.value()
                .attr(&self.item_id_attribute)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        };

        if let Some(id) = attribute(item) {
            return Some(id);
        }

        if let Some(id) = self.item_id_attribute_selector.all(item).find_map(attribute) {
            return Some(id);
        }

        // The listing's own link comes before any other item link in the card.
        let mut candidates: Vec<String> = url.map(str::to_string).into_iter().collect();
        candidates.extend(
            self.item_id_link
                .all(item)
                .filter_map(|link| link.value().attr("href"))
                .map(str::to_string),
        );

        candidates.iter().find_map(|href| {
            self.item_id_patterns.iter().find_map(|pattern| {
                pattern
                    .captures(href)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            })
        })
    }

    fn extract_images(&self, item: ElementRef<'_>) -> Vec<String> {
        self.image
            .all(item)
            .filter_map(|img| img.value().attr("src"))
            .filter_map(|src| src.rsplit('/').next())
            .filter(|filename| !filename.is_empty())
            .map(|filename| self.image_url_template.replace("{filename}", filename))
            .collect()
    }

    fn extract_params(&self, item: ElementRef<'_>) -> BTreeMap<String, String> {
        self.params
            .all(item)
            .filter_map(|entry| {
                let text = element_text(entry);
                let (key, value) = text.split_once(':')?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), value.trim().to_string()))
            })
            .collect()
    }

    fn absolutize(&self, href: &str) -> Option<String> {
        self.origin.join(href.trim()).ok().map(String::from)
    }
}
