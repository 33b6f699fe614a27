use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::storage::schema::listings_table_name;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub extraction: ExtractionConfig,
    pub storage: StorageConfig,
    pub telegram: TelegramConfig,
    pub logging: LoggingConfig,
    /// Category key -> search results URL.
    pub targets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub user_agent: String,
    pub window_width: u32,
    pub window_height: u32,
    pub max_pages: u32,
    pub container_timeout_ms: u64,
    pub next_button_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub stale_poll_ms: u64,
    pub items_container_selector: String,
    pub item_selector: String,
    pub next_button_selector: String,
    pub save_full_page: bool,
    pub screenshots_dir: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            window_width: 1920,
            window_height: 1080,
            max_pages: 80,
            container_timeout_ms: 4_000,
            next_button_timeout_ms: 5_000,
            settle_delay_ms: 1_000,
            stale_poll_ms: 100,
            // Class suffixes drift; check by the `items-items-` prefix when it breaks.
            items_container_selector: "div.items-items-zOkHg".to_string(),
            item_selector: "div[data-marker='item']".to_string(),
            next_button_selector: r#"[data-marker="pagination-button/nextPage"]"#.to_string(),
            save_full_page: false,
            screenshots_dir: "data/screenshots".to_string(),
        }
    }
}

impl ScraperConfig {
    pub fn container_timeout(&self) -> Duration {
        Duration::from_millis(self.container_timeout_ms)
    }

    pub fn next_button_timeout(&self) -> Duration {
        Duration::from_millis(self.next_button_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stale_poll(&self) -> Duration {
        Duration::from_millis(self.stale_poll_ms.max(1))
    }
}

/// Selector chains for every listing field. Each list is tried in order and the
/// first selector that matches wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub site_origin: String,
    pub item_selectors: Vec<String>,
    pub title_link_selectors: Vec<String>,
    pub title_fallback_selectors: Vec<String>,
    pub url_fallback_selectors: Vec<String>,
    pub seller_link_selectors: Vec<String>,
    pub seller_tracking_params: Vec<String>,
    pub price_container_selectors: Vec<String>,
    pub price_amount_selectors: Vec<String>,
    pub price_fallback_selectors: Vec<String>,
    pub description_selectors: Vec<String>,
    /// Read from the `content` attribute when no description text is found.
    pub description_content_selectors: Vec<String>,
    pub published_date_selectors: Vec<String>,
    pub phone_state_selectors: Vec<String>,
    pub condition_selectors: Vec<String>,
    pub location_selectors: Vec<String>,
    pub seller_name_selectors: Vec<String>,
    pub seller_rating_selectors: Vec<String>,
    pub seller_reviews_selectors: Vec<String>,
    pub badge_selectors: Vec<String>,
    pub badge_title_selectors: Vec<String>,
    pub item_id_attribute: String,
    pub item_id_link_selector: String,
    pub item_id_patterns: Vec<String>,
    pub image_selector: String,
    pub image_url_template: String,
    pub params_selector: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            site_origin: "https://avito.ru".to_string(),
            item_selectors: strings(&["div[data-marker='item']", ".iva-item-root-Se7z4"]),
            title_link_selectors: strings(&[
                "a.styles-module-root-m3BML",
                "a[data-marker='item-title']",
            ]),
            title_fallback_selectors: strings(&["h3.title-root"]),
            url_fallback_selectors: strings(&["a[href*='/item/']", "a[data-marker='item-title']"]),
            seller_link_selectors: strings(&[
                "a[href*='/brands/']",
                "a[href*='/user/']",
                ".style-root-Dh2i5 a",
            ]),
            seller_tracking_params: strings(&["src"]),
            price_container_selectors: strings(&["div.price-priceContent-kPm_N"]),
            price_amount_selectors: strings(&["span", "[data-marker='item-price']"]),
            price_fallback_selectors: strings(&[
                "span[data-marker='item-price']",
                "p[data-marker='item-price']",
            ]),
            description_selectors: strings(&[
                "div.iva-item-bottomBlock-FhNhY p.styles-module-ellipsis-A5gkK",
            ]),
            description_content_selectors: strings(&[
                "div[data-marker='item'] > meta[content]",
                "meta[itemprop='description']",
            ]),
            published_date_selectors: strings(&["div[data-marker='item-date']"]),
            phone_state_selectors: strings(&["p[data-marker='item-date']"]),
            condition_selectors: strings(&[
                "div.iva-item-autoParamsStep-QxatK > p[data-marker='item-specific-params']",
            ]),
            location_selectors: strings(&["div[data-marker='item-address']"]),
            seller_name_selectors: strings(&["div[data-marker='seller-info/name']"]),
            seller_rating_selectors: strings(&[
                "div[data-marker='seller-rating']",
                "span[data-marker='seller-info/score']",
            ]),
            seller_reviews_selectors: strings(&["p[data-marker='seller-info/summary']"]),
            badge_selectors: strings(&[".SnippetLayout-item-jLNdn", "div.SnippetLayout-root-zT1oI"]),
            badge_title_selectors: strings(&[".SnippetBadge-title-DlcCS", "span.SnippetBadge-title-NCaUc"]),
            item_id_attribute: "data-item-id".to_string(),
            item_id_link_selector: "a[href*='/item/']".to_string(),
            item_id_patterns: strings(&[r"/item/([^/?#]+)", r"_(\d{6,})(?:[/?#]|$)"]),
            image_selector: "img[src*='/items/']".to_string(),
            image_url_template: "https://00.img.avito.st/image/{filename}".to_string(),
            params_selector: "div[data-marker='item-params'] > div".to_string(),
        }
    }
}

impl ExtractionConfig {
    /// Every selector in the table, for up-front validation.
    pub fn all_selectors(&self) -> Vec<&str> {
        let lists = [
            &self.item_selectors,
            &self.title_link_selectors,
            &self.title_fallback_selectors,
            &self.url_fallback_selectors,
            &self.seller_link_selectors,
            &self.price_container_selectors,
            &self.price_amount_selectors,
            &self.price_fallback_selectors,
            &self.description_selectors,
            &self.description_content_selectors,
            &self.published_date_selectors,
            &self.phone_state_selectors,
            &self.condition_selectors,
            &self.location_selectors,
            &self.seller_name_selectors,
            &self.seller_rating_selectors,
            &self.seller_reviews_selectors,
            &self.badge_selectors,
            &self.badge_title_selectors,
        ];
        let singles = [
            &self.item_id_link_selector,
            &self.image_selector,
            &self.params_selector,
        ];

        lists
            .into_iter()
            .flat_map(|list| list.iter())
            .chain(singles)
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableLayout {
    /// One `category_{key}` table per tracked target.
    PerCategory,
    /// A single `listings` table for every target.
    Shared,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: u64,
    pub busy_timeout_ms: u64,
    pub table_layout: TableLayout,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data/runs".to_string(),
            database_url: "sqlite://data/db/listings.db".to_string(),
            max_connections: 4,
            acquire_timeout: 30,
            busy_timeout_ms: 30_000,
            table_layout: TableLayout::PerCategory,
        }
    }
}

impl StorageConfig {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub request_timeout: u64,
    pub description_limit: usize,
    pub send_delay_ms: u64,
    pub rate_limit_margin_ms: u64,
    pub max_rate_limit_retries: u32,
    pub disable_web_page_preview: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: None,
            chat_id: None,
            request_timeout: 10,
            description_limit: 300,
            send_delay_ms: 1_000,
            rate_limit_margin_ms: 500,
            max_rate_limit_retries: 10,
            disable_web_page_preview: false,
        }
    }
}

impl TelegramConfig {
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn rate_limit_margin(&self) -> Duration {
        Duration::from_millis(self.rate_limit_margin_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub directory: Option<String>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "listing_watcher=info".to_string(),
            directory: None,
            file_prefix: "listing-watcher.log".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_dir("config")
    }

    pub fn from_dir(config_dir: &str) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            // Add environment-specific config
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Add environment variables with prefix "LISTING_WATCHER_"
            .add_source(
                Environment::with_prefix("LISTING_WATCHER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }
        if config.telegram.bot_token.is_none() {
            config.telegram.bot_token = env::var("TELEGRAM_BOT_TOKEN").ok();
        }
        if config.telegram.chat_id.is_none() {
            config.telegram.chat_id = env::var("TELEGRAM_CHAT_ID").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Scraper
        if self.scraper.max_pages == 0 {
            return Err(ConfigError::Message("Scraper max_pages must be greater than 0".into()));
        }

        for selector in [
            &self.scraper.items_container_selector,
            &self.scraper.item_selector,
            &self.scraper.next_button_selector,
        ] {
            if Selector::parse(selector).is_err() {
                return Err(ConfigError::Message(format!("Invalid CSS selector: {}", selector)));
            }
        }

        // Extraction
        if Url::parse(&self.extraction.site_origin).is_err() {
            return Err(ConfigError::Message("Invalid extraction.site_origin".into()));
        }

        for selector in self.extraction.all_selectors() {
            if Selector::parse(selector).is_err() {
                return Err(ConfigError::Message(format!("Invalid CSS selector: {}", selector)));
            }
        }

        for pattern in &self.extraction.item_id_patterns {
            let regex = Regex::new(pattern)
                .map_err(|e| ConfigError::Message(format!("Invalid item_id pattern '{}': {}", pattern, e)))?;
            if regex.captures_len() < 2 {
                return Err(ConfigError::Message(format!(
                    "item_id pattern '{}' must have a capture group",
                    pattern
                )));
            }
        }

        if !self.extraction.image_url_template.contains("{filename}") {
            return Err(ConfigError::Message(
                "extraction.image_url_template must contain {filename}".into(),
            ));
        }

        // Storage
        if self.storage.max_connections == 0 {
            return Err(ConfigError::Message("Storage max_connections must be greater than 0".into()));
        }

        // Telegram
        if Url::parse(&self.telegram.api_base).is_err() {
            return Err(ConfigError::Message("Invalid telegram.api_base".into()));
        }

        // Targets
        for (key, url) in &self.targets {
            if listings_table_name(key).is_none() {
                return Err(ConfigError::Message(format!("Invalid target key: {}", key)));
            }
            if Url::parse(url).is_err() {
                return Err(ConfigError::Message(format!("Invalid URL for target {}: {}", key, url)));
            }
        }

        Ok(())
    }

    pub fn target_url(&self, key: &str) -> Option<&str> {
        self.targets.get(key).map(String::as_str)
    }
}
