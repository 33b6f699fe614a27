//! Capture, parse, load and notify for one target.
//!
//! The phases only share the run directory, so each can also be invoked on
//! its own against an existing run.

use chrono::{Local, Utc};
use sqlx::sqlite::SqlitePool;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::browser::BrowserDriver;
use crate::config::{AppConfig, ScraperConfig};
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::extractor::ListingExtractor;
use crate::fetcher::{Paginator, StopReason};
use crate::models::{ExtractedListing, ListingRecord};
use crate::storage::ListingStore;
use crate::workdir::RunDir;
use crate::{AppError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureReport {
    /// Pages the paginator yielded.
    pub pages: u32,
    /// Pages whose container snapshot was written.
    pub saved_pages: usize,
    pub items: usize,
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub pages: usize,
    pub listings: usize,
    /// Fragments without a resolvable identifier.
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub upserted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub run: String,
    pub kept: bool,
    pub capture: CaptureReport,
    pub parse: Option<ParseReport>,
    pub load: Option<LoadReport>,
    pub notify: Option<DispatchReport>,
}

pub struct Pipeline {
    config: AppConfig,
    extractor: ListingExtractor,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Result<Self> {
        let extractor = ListingExtractor::new(&config.extraction)?;
        Ok(Self { config, extractor })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn data_dir(&self) -> PathBuf {
        self.config.storage.data_path()
    }

    fn target_url(&self, target: &str) -> Result<String> {
        self.config
            .target_url(target)
            .map(str::to_string)
            .ok_or_else(|| AppError::NotFound {
                resource: format!("target '{}'", target),
            })
    }

    /// The named run, or the latest run for `target` when no name is given.
    pub fn resolve_run(&self, target: &str, name: Option<&str>) -> Result<RunDir> {
        let data_dir = self.data_dir();
        match name {
            Some(name) => RunDir::open(&data_dir, name),
            None => RunDir::latest(&data_dir, target)?.ok_or_else(|| AppError::NotFound {
                resource: format!("run for target '{}' in {}", target, data_dir.display()),
            }),
        }
    }

    /// Runs every phase in a fresh run directory. The directory is removed
    /// afterwards if nothing was written to it.
    pub async fn run<D, F>(
        &self,
        target: &str,
        launch: F,
        pool: &SqlitePool,
        dispatcher: &Dispatcher,
    ) -> Result<SessionReport>
    where
        D: BrowserDriver + 'static,
        F: FnOnce() -> Result<D> + Send + 'static,
    {
        let url = self.target_url(target)?;
        let run = RunDir::allocate(&self.data_dir(), target, Local::now().naive_local())?;
        info!("Starting session {} for {}", run.name(), url);

        let outcome = self.run_phases(&run, target, &url, launch, pool, dispatcher).await;

        let kept = match run.finalize() {
            Ok(kept) => kept,
            Err(e) => {
                warn!("Could not finalize run directory {}: {}", run.name(), e);
                true
            }
        };

        let mut report = outcome.map_err(|e| {
            error!("Session {} failed: {}", run.name(), e);
            e
        })?;
        report.kept = kept;

        info!(
            "Session {} finished: {} pages, {} listings, {} upserted, {} delivered",
            report.run,
            report.capture.saved_pages,
            report.parse.as_ref().map_or(0, |p| p.listings),
            report.load.as_ref().map_or(0, |l| l.upserted),
            report.notify.as_ref().map_or(0, |n| n.delivered),
        );
        Ok(report)
    }

    async fn run_phases<D, F>(
        &self,
        run: &RunDir,
        target: &str,
        url: &str,
        launch: F,
        pool: &SqlitePool,
        dispatcher: &Dispatcher,
    ) -> Result<SessionReport>
    where
        D: BrowserDriver + 'static,
        F: FnOnce() -> Result<D> + Send + 'static,
    {
        let mut report = SessionReport {
            run: run.name().to_string(),
            ..Default::default()
        };

        report.capture = self.capture_into(run, target, url, launch).await?;
        if report.capture.saved_pages == 0 {
            warn!("No pages were captured for {}", target);
            return Ok(report);
        }

        report.parse = Some(self.parse_run(run)?);
        report.load = Some(self.load_run(run, target, pool).await?);
        report.notify = Some(self.notify_run(run, dispatcher).await?);

        Ok(report)
    }

    /// Capture phase on its own: allocates a run, saves the pages and
    /// finalizes the directory.
    pub async fn capture<D, F>(&self, target: &str, launch: F) -> Result<(RunDir, CaptureReport, bool)>
    where
        D: BrowserDriver + 'static,
        F: FnOnce() -> Result<D> + Send + 'static,
    {
        let url = self.target_url(target)?;
        let run = RunDir::allocate(&self.data_dir(), target, Local::now().naive_local())?;

        let outcome = self.capture_into(&run, target, &url, launch).await;
        let kept = run.finalize()?;
        let report = outcome?;

        Ok((run, report, kept))
    }

    async fn capture_into<D, F>(&self, run: &RunDir, target: &str, url: &str, launch: F) -> Result<CaptureReport>
    where
        D: BrowserDriver + 'static,
        F: FnOnce() -> Result<D> + Send + 'static,
    {
        let scraper = self.config.scraper.clone();
        let url = url.to_string();
        let run = run.clone();
        let target_key = target.to_string();

        let report = tokio::task::spawn_blocking(move || -> Result<CaptureReport> {
            let mut driver = launch()?;
            capture_with_driver(&mut driver, &scraper, &url, &run, &target_key)
        })
        .await??;

        info!(
            "Captured {} pages ({} items) for {}, stopped: {:?}",
            report.saved_pages, report.items, target, report.stop_reason
        );
        Ok(report)
    }

    /// Parses every saved snapshot of `run` into its `listings.json`.
    pub fn parse_run(&self, run: &RunDir) -> Result<ParseReport> {
        let pages = run.page_files()?;
        let timestamp = Utc::now();
        let mut report = ParseReport::default();
        let mut listings: Vec<ExtractedListing> = Vec::new();

        for (number, path) in &pages {
            let html = match fs::read_to_string(path) {
                Ok(html) => html,
                Err(e) => {
                    warn!("Could not read page {} ({}): {}", number, path.display(), e);
                    continue;
                }
            };
            report.pages += 1;

            for listing in self.extractor.extract_page(&html, timestamp) {
                if listing.to_record().is_none() {
                    warn!(
                        "Dropping listing without an id on page {}: {:?}",
                        number,
                        listing.data.title.as_deref().unwrap_or("<untitled>")
                    );
                    report.dropped += 1;
                    continue;
                }
                listings.push(listing);
            }
        }

        report.listings = listings.len();
        fs::write(run.listings_path(), serde_json::to_string_pretty(&listings)?)?;

        info!(
            "Parsed {} listings from {} pages in {} ({} without id)",
            report.listings, report.pages, run.name(), report.dropped
        );
        Ok(report)
    }

    pub async fn load_run(&self, run: &RunDir, target: &str, pool: &SqlitePool) -> Result<LoadReport> {
        let records = read_records(run)?;
        let store = ListingStore::open(pool.clone(), self.config.storage.table_layout, target).await?;

        let summary = store.upsert_all(&records).await;
        info!(
            "Loaded {} listings into {} ({} failed)",
            summary.upserted,
            store.table(),
            summary.failed
        );

        Ok(LoadReport {
            upserted: summary.upserted,
            failed: summary.failed,
        })
    }

    pub async fn notify_run(&self, run: &RunDir, dispatcher: &Dispatcher) -> Result<DispatchReport> {
        let records = read_records(run)?;
        Ok(dispatcher.dispatch(&records).await)
    }
}

fn read_records(run: &RunDir) -> Result<Vec<ListingRecord>> {
    let path = run.listings_path();
    if !path.exists() {
        return Err(AppError::NotFound {
            resource: format!("{} (run the parse phase first)", path.display()),
        });
    }

    let listings: Vec<ExtractedListing> = serde_json::from_str(&fs::read_to_string(&path)?)?;
    Ok(listings.iter().filter_map(ExtractedListing::to_record).collect())
}

/// Drives the paginator over `url`, saving each page's container snapshot.
/// A first page that never renders leaves a debug screenshot behind.
pub fn capture_with_driver<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    config: &ScraperConfig,
    url: &str,
    run: &RunDir,
    target: &str,
) -> Result<CaptureReport> {
    let result = capture_pages(driver, config, url, run);

    if let Err(e @ AppError::ContainerTimeout { .. }) = &result {
        error!("{}", e);
        save_debug_screenshot(driver, Path::new(&config.screenshots_dir), target, "container_timeout");
    }

    result
}

fn capture_pages<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    config: &ScraperConfig,
    url: &str,
    run: &RunDir,
) -> Result<CaptureReport> {
    let mut report = CaptureReport::default();
    let mut paginator = Paginator::new(driver, config, url);

    while let Some(mut page) = paginator.next_page()? {
        let number = page.number();
        let items = page.item_count();

        match page.container_html() {
            Ok(html) => match run.write_page(number, &html) {
                Ok(_) => {
                    info!("Saved page {} with {} items", number, items);
                    report.saved_pages += 1;
                    report.items += items;
                }
                Err(e) => warn!("Could not save page {}: {}", number, e),
            },
            Err(e) => warn!("Page {} has no listings container, nothing saved: {}", number, e),
        }

        if config.save_full_page {
            let saved = page
                .page_source()
                .and_then(|html| run.write_full_page(number, &html));
            if let Err(e) = saved {
                warn!("Could not save full page {}: {}", number, e);
            }
        }
    }

    report.pages = paginator.pages_yielded();
    report.stop_reason = paginator.stop_reason().cloned();
    Ok(report)
}

fn save_debug_screenshot<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    dir: &Path,
    target: &str,
    context: &str,
) -> Option<PathBuf> {
    let png = match driver.screenshot() {
        Ok(png) => png,
        Err(e) => {
            warn!("Could not take debug screenshot: {}", e);
            return None;
        }
    };

    let path = dir.join(format!(
        "debug_{}_{}_{}.png",
        target,
        context,
        Local::now().format("%Y%m%d_%H%M%S")
    ));

    let written = fs::create_dir_all(dir).and_then(|_| fs::write(&path, png));
    match written {
        Ok(()) => {
            info!("Saved debug screenshot to {}", path.display());
            Some(path)
        }
        Err(e) => {
            warn!("Could not write debug screenshot {}: {}", path.display(), e);
            None
        }
    }
}
