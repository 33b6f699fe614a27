// Shared fixtures for the integration tests: a scripted browser, a recording
// messenger, an in-memory ledger and a throwaway on-disk environment.

pub mod notification_tests;
pub mod session_tests;

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use listing_watcher::browser::{BrowserDriver, DriverError, DriverResult, RootMarker};
use listing_watcher::dispatcher::Dispatcher;
use listing_watcher::notifiers::{Messenger, ParseMode, SendOutcome};
use listing_watcher::pipeline::Pipeline;
use listing_watcher::storage::{self, NotificationLedger, SqliteLedger};
use listing_watcher::AppConfig;

pub const TARGET: &str = "macbook_pro";

/// One listing card as the search results page renders it.
pub fn listing_fragment(item_id: &str, title: &str, price: u32) -> String {
    format!(
        r#"<div data-marker="item" data-item-id="{id}" class="iva-item-root-Se7z4">
             <a class="styles-module-root-m3BML" href="/moskva/noutbuki/macbook_{id}?context=search">{title}</a>
             <div class="price-priceContent-kPm_N"><span>{price}&nbsp;₽</span></div>
             <div data-marker="item-address">Москва, м. Тверская</div>
             <div data-marker="item-date">2 часа назад</div>
           </div>"#,
        id = item_id,
        title = title,
        price = price
    )
}

/// A listing card with no id anywhere, not even in its link.
pub fn anonymous_fragment(title: &str) -> String {
    format!(
        r#"<div data-marker="item"><h3 class="title-root">{}</h3><a href="/moskva/noutbuki/promo">promo</a></div>"#,
        title
    )
}

pub fn container(fragments: &[String]) -> String {
    format!(r#"<div class="items-items-zOkHg">{}</div>"#, fragments.join("\n"))
}

/// `count` listings with ids `{prefix}{n}`.
pub fn page_of(prefix: &str, count: usize) -> String {
    let fragments: Vec<String> = (1..=count)
        .map(|n| {
            listing_fragment(
                &format!("{}{}", prefix, n),
                &format!("MacBook Pro {}", n),
                70_000 + n as u32,
            )
        })
        .collect();
    container(&fragments)
}

/// A browser that serves pre-rendered pages. The "next" control exists on
/// every page except the last. `closed` counts how often the session was
/// torn down.
pub struct FakeDriver {
    pages: Vec<String>,
    current: usize,
    container_present: bool,
    pub screenshots: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl FakeDriver {
    pub fn new(pages: Vec<String>) -> Self {
        Self {
            pages,
            current: 0,
            container_present: true,
            screenshots: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn without_container(mut self) -> Self {
        self.container_present = false;
        self
    }

    fn page(&self) -> DriverResult<&String> {
        self.current
            .checked_sub(1)
            .and_then(|index| self.pages.get(index))
            .ok_or_else(|| DriverError::Navigation("no page loaded".to_string()))
    }
}

impl Drop for FakeDriver {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl BrowserDriver for FakeDriver {
    fn navigate(&mut self, _url: &str) -> DriverResult<()> {
        self.current = 1;
        Ok(())
    }

    fn reload(&mut self) -> DriverResult<()> {
        Ok(())
    }

    fn wait_for(&mut self, selector: &str, _timeout: Duration) -> DriverResult<()> {
        if self.container_present && self.page().is_ok() {
            Ok(())
        } else {
            Err(DriverError::Timeout(selector.to_string()))
        }
    }

    fn outer_html(&mut self, selector: &str) -> DriverResult<String> {
        if !self.container_present {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        self.page().cloned()
    }

    fn count(&mut self, _selector: &str) -> DriverResult<usize> {
        Ok(self.page()?.matches(r#"data-marker="item""#).count())
    }

    fn page_source(&mut self) -> DriverResult<String> {
        Ok(format!("<html><body>{}</body></html>", self.page()?))
    }

    fn locate_clickable(&mut self, _selector: &str, _timeout: Duration) -> DriverResult<bool> {
        Ok(self.current < self.pages.len())
    }

    fn click(&mut self, _selector: &str) -> DriverResult<()> {
        self.current += 1;
        Ok(())
    }

    fn root_marker(&mut self) -> DriverResult<RootMarker> {
        Ok(RootMarker(format!("page-{}", self.current)))
    }

    fn is_stale(&mut self, marker: &RootMarker) -> DriverResult<bool> {
        Ok(marker.0 != format!("page-{}", self.current))
    }

    fn screenshot(&mut self) -> DriverResult<Vec<u8>> {
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }
}

/// Records every message; answers from a script, then `Delivered`.
#[derive(Default)]
pub struct FakeMessenger {
    script: Mutex<VecDeque<SendOutcome>>,
    sent: Mutex<Vec<(String, ParseMode)>>,
}

impl FakeMessenger {
    pub fn scripted(outcomes: Vec<SendOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(String, ParseMode)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send(&self, text: &str, mode: ParseMode) -> listing_watcher::Result<SendOutcome> {
        self.sent.lock().unwrap().push((text.to_string(), mode));
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or(SendOutcome::Delivered {
            message_id: Some(self.sent.lock().unwrap().len() as i64),
        }))
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    ids: Mutex<HashSet<String>>,
}

impl MemoryLedger {
    pub fn contains(&self, item_id: &str) -> bool {
        self.ids.lock().unwrap().contains(item_id)
    }
}

#[async_trait]
impl NotificationLedger for MemoryLedger {
    async fn is_notified(&self, item_id: &str) -> listing_watcher::Result<bool> {
        Ok(self.contains(item_id))
    }

    async fn mark_notified(&self, item_id: &str) -> listing_watcher::Result<()> {
        self.ids.lock().unwrap().insert(item_id.to_string());
        Ok(())
    }
}

/// Test configuration rooted in `dir`.
pub fn get_test_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();

    config.scraper.settle_delay_ms = 5;
    config.scraper.stale_poll_ms = 1;
    config.scraper.screenshots_dir = dir.join("screenshots").display().to_string();

    config.storage.data_dir = dir.join("runs").display().to_string();
    config.storage.database_url = format!("sqlite://{}", dir.join("db").join("listings.db").display());
    config.storage.max_connections = 2;

    config.telegram.bot_token = Some("123:TEST".to_string());
    config.telegram.chat_id = Some("-100200300".to_string());
    config.telegram.send_delay_ms = 0;

    config.targets.insert(
        TARGET.to_string(),
        "https://www.avito.ru/moskva_i_mo/noutbuki?q=macbook+pro".to_string(),
    );

    config
}

pub struct TestEnv {
    pub dir: TempDir,
    pub config: AppConfig,
    pub pipeline: Pipeline,
    pub pool: SqlitePool,
    pub messenger: Arc<FakeMessenger>,
    pub ledger: SqliteLedger,
    pub dispatcher: Dispatcher,
}

impl TestEnv {
    pub fn runs_dir(&self) -> std::path::PathBuf {
        self.config.storage.data_path()
    }

    pub fn run_count(&self) -> usize {
        std::fs::read_dir(self.runs_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub async fn create_test_env() -> anyhow::Result<TestEnv> {
    create_test_env_with(|_| {}).await
}

pub async fn create_test_env_with(customize: impl FnOnce(&mut AppConfig)) -> anyhow::Result<TestEnv> {
    let dir = tempfile::tempdir()?;
    let mut config = get_test_config(dir.path());
    customize(&mut config);
    config.validate()?;

    let pool = storage::connect(&config.storage).await?;
    let ledger = SqliteLedger::open(pool.clone()).await?;
    let messenger = Arc::new(FakeMessenger::default());
    let dispatcher = Dispatcher::new(messenger.clone(), Arc::new(ledger.clone()), &config.telegram);
    let pipeline = Pipeline::new(config.clone())?;

    Ok(TestEnv {
        dir,
        config,
        pipeline,
        pool,
        messenger,
        ledger,
        dispatcher,
    })
}

/// A launcher for `Pipeline::run`/`capture` that hands out `driver`.
pub fn launcher(driver: FakeDriver) -> impl FnOnce() -> listing_watcher::Result<FakeDriver> + Send + 'static {
    move || Ok(driver)
}
