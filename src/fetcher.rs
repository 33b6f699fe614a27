//! Pagination over a search results listing.
//!
//! [`Paginator::next_page`] yields one [`PageHandle`] at a time. A handle
//! borrows the driver, so the caller reads whatever it needs from the page
//! before asking for the next one.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, DriverError, DriverResult, RootMarker};
use crate::config::ScraperConfig;
use crate::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The page ceiling was reached.
    PageLimit,
    /// No clickable "next" control, the normal end of a listing.
    Exhausted,
    /// The next page never rendered its container.
    ContainerMissing,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Yielded(u32),
    Done,
}

pub struct Paginator<'a, D: BrowserDriver + ?Sized> {
    driver: &'a mut D,
    config: &'a ScraperConfig,
    start_url: String,
    state: State,
    pages: u32,
    stop_reason: Option<StopReason>,
}

impl<'a, D: BrowserDriver + ?Sized> Paginator<'a, D> {
    pub fn new(driver: &'a mut D, config: &'a ScraperConfig, start_url: impl Into<String>) -> Self {
        Self {
            driver,
            config,
            start_url: start_url.into(),
            state: State::Start,
            pages: 0,
            stop_reason: None,
        }
    }

    pub fn pages_yielded(&self) -> u32 {
        self.pages
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// The next page, `Ok(None)` once the sequence has ended. Only a first
    /// page that never renders its container is an error.
    pub fn next_page(&mut self) -> Result<Option<PageHandle<'_, D>>> {
        let number = match self.state {
            State::Done => return Ok(None),
            State::Start => {
                if let Err(e) = self.open() {
                    self.finish(StopReason::Error(e.to_string()));
                    return Err(e);
                }
                1
            }
            State::Yielded(n) if n >= self.config.max_pages => {
                info!("Reached the page limit of {}", self.config.max_pages);
                self.finish(StopReason::PageLimit);
                return Ok(None);
            }
            State::Yielded(n) => match self.advance(n) {
                Ok(None) => n + 1,
                Ok(Some(reason)) => {
                    self.finish(reason);
                    return Ok(None);
                }
                Err(e) => {
                    warn!("Pagination stopped after page {}: {}", n, e);
                    self.finish(StopReason::Error(e.to_string()));
                    return Ok(None);
                }
            },
        };

        self.state = State::Yielded(number);
        self.pages = number;
        debug!("Yielding page {}", number);

        Ok(Some(PageHandle {
            number,
            driver: &mut *self.driver,
            config: self.config,
        }))
    }

    fn finish(&mut self, reason: StopReason) {
        self.state = State::Done;
        self.stop_reason = Some(reason);
    }

    fn open(&mut self) -> Result<()> {
        info!("Opening {}", self.start_url);
        self.driver.navigate(&self.start_url)?;
        self.driver.reload()?;

        let selector = &self.config.items_container_selector;
        match self.driver.wait_for(selector, self.config.container_timeout()) {
            Ok(()) => Ok(()),
            Err(DriverError::Timeout(_)) | Err(DriverError::NotFound(_)) => Err(AppError::ContainerTimeout {
                selector: selector.clone(),
                timeout_ms: self.config.container_timeout_ms,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves from page `current` to the following one. `Ok(Some(_))` ends the
    /// sequence cleanly.
    fn advance(&mut self, current: u32) -> DriverResult<Option<StopReason>> {
        let next_selector = self.config.next_button_selector.clone();

        for attempt in 1..=2 {
            if !self
                .driver
                .locate_clickable(&next_selector, self.config.next_button_timeout())?
            {
                info!("No next page control after page {}", current);
                return Ok(Some(StopReason::Exhausted));
            }

            let marker = self.driver.root_marker()?;

            match self.driver.click(&next_selector) {
                Ok(()) => {}
                Err(DriverError::Stale(detail)) if attempt == 1 => {
                    warn!("Next page control went stale ({}), retrying page {}", detail, current + 1);
                    continue;
                }
                Err(e) => return Err(e),
            }

            self.settle(&marker);

            if self
                .driver
                .wait_for(&self.config.items_container_selector, self.config.container_timeout())
                .is_err()
            {
                warn!("Page {} did not render its listings container", current + 1);
                return Ok(Some(StopReason::ContainerMissing));
            }

            return Ok(None);
        }

        Ok(Some(StopReason::Error("Next page control stayed stale".to_string())))
    }

    /// Waits until the old document is gone or the settle delay runs out.
    fn settle(&mut self, marker: &RootMarker) {
        let deadline = Instant::now() + self.config.settle_delay();
        let poll = self.config.stale_poll();

        loop {
            if self.driver.is_stale(marker).unwrap_or(false) {
                return;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("Settle delay elapsed before the page went stale");
                return;
            }

            std::thread::sleep(poll.min(deadline - now).max(Duration::from_millis(1)));
        }
    }
}

/// The page currently loaded in the browser.
pub struct PageHandle<'p, D: BrowserDriver + ?Sized> {
    number: u32,
    driver: &'p mut D,
    config: &'p ScraperConfig,
}

impl<'p, D: BrowserDriver + ?Sized> PageHandle<'p, D> {
    /// 1-based page index.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Outer HTML of the listings container.
    pub fn container_html(&mut self) -> Result<String> {
        Ok(self.driver.outer_html(&self.config.items_container_selector)?)
    }

    pub fn item_count(&mut self) -> usize {
        self.driver.count(&self.config.item_selector).unwrap_or(0)
    }

    pub fn page_source(&mut self) -> Result<String> {
        Ok(self.driver.page_source()?)
    }
}
