//! The headless browser behind the page fetcher.
//!
//! [`BrowserDriver`] is the seam the fetcher is written against; [`ChromeDriver`]
//! is the real implementation on top of `headless_chrome`. The driver API is
//! blocking and is expected to run on a blocking thread.

use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::{AppError, Result};

const ROOT_MARKER_ATTRIBUTE: &str = "data-lw-root";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Timed out waiting for: {0}")]
    Timeout(String),

    /// The element went away between lookup and interaction.
    #[error("Stale element: {0}")]
    Stale(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Browser interaction failed: {0}")]
    Interaction(String),
}

impl From<DriverError> for AppError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::NotFound(selector) => AppError::ElementNotFound { selector },
            other => AppError::Browser(other.to_string()),
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// A token stamped on the live document before a navigating click. Once the
/// token can no longer be found the old page is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootMarker(pub String);

pub trait BrowserDriver: Send {
    fn navigate(&mut self, url: &str) -> DriverResult<()>;

    /// Reloads the current page, bypassing the cache.
    fn reload(&mut self) -> DriverResult<()>;

    fn wait_for(&mut self, selector: &str, timeout: Duration) -> DriverResult<()>;

    /// Outer HTML of the first element matching `selector`.
    fn outer_html(&mut self, selector: &str) -> DriverResult<String>;

    fn count(&mut self, selector: &str) -> DriverResult<usize>;

    fn page_source(&mut self) -> DriverResult<String>;

    /// Waits up to `timeout` for a visible, enabled element. `Ok(false)` when
    /// there is none.
    fn locate_clickable(&mut self, selector: &str, timeout: Duration) -> DriverResult<bool>;

    fn click(&mut self, selector: &str) -> DriverResult<()>;

    fn root_marker(&mut self) -> DriverResult<RootMarker>;

    fn is_stale(&mut self, marker: &RootMarker) -> DriverResult<bool>;

    fn screenshot(&mut self) -> DriverResult<Vec<u8>>;
}

pub struct ChromeDriver {
    // Held so the browser process outlives the tab.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeDriver {
    pub fn launch(config: &ScraperConfig) -> Result<Self> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false)
            .window_size(Some((config.window_width, config.window_height)))
            .idle_browser_timeout(Duration::from_secs(300))
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
            ])
            .build()
            .map_err(|e| AppError::Browser(format!("Failed to create launch options: {}", e)))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options)
            .map_err(|e| AppError::Browser(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| AppError::Browser(format!("Failed to create tab: {}", e)))?;

        tab.set_user_agent(&config.user_agent, None, None)
            .map_err(|e| AppError::Browser(format!("Failed to set user agent: {}", e)))?;

        info!("Launched headless browser (headless={})", config.headless);
        Ok(Self { _browser: browser, tab })
    }

    fn evaluate_bool(&self, script: &str) -> DriverResult<bool> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| DriverError::Interaction(e.to_string()))?;

        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

impl BrowserDriver for ChromeDriver {
    fn navigate(&mut self, url: &str) -> DriverResult<()> {
        debug!("Navigating to {}", url);
        self.tab
            .navigate_to(url)
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        Ok(())
    }

    fn reload(&mut self) -> DriverResult<()> {
        self.tab
            .reload(true, None)
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        Ok(())
    }

    fn wait_for(&mut self, selector: &str, timeout: Duration) -> DriverResult<()> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map(|_| ())
            .map_err(|_| DriverError::Timeout(selector.to_string()))
    }

    fn outer_html(&mut self, selector: &str) -> DriverResult<String> {
        let element = self
            .tab
            .find_element(selector)
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;

        element
            .get_content()
            .map_err(|e| DriverError::Interaction(e.to_string()))
    }

    fn count(&mut self, selector: &str) -> DriverResult<usize> {
        // find_elements errors when nothing matches.
        Ok(self.tab.find_elements(selector).map(|e| e.len()).unwrap_or(0))
    }

    fn page_source(&mut self) -> DriverResult<String> {
        self.tab
            .get_content()
            .map_err(|e| DriverError::Interaction(e.to_string()))
    }

    fn locate_clickable(&mut self, selector: &str, timeout: Duration) -> DriverResult<bool> {
        if self
            .tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .is_err()
        {
            return Ok(false);
        }

        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                const style = window.getComputedStyle(el);
                const rect = el.getBoundingClientRect();
                return !el.disabled
                    && el.getAttribute('aria-disabled') !== 'true'
                    && style.visibility !== 'hidden'
                    && style.display !== 'none'
                    && rect.width > 0 && rect.height > 0;
            }})()"#,
            sel = js_string(selector)
        );

        self.evaluate_bool(&script)
    }

    fn click(&mut self, selector: &str) -> DriverResult<()> {
        let element = self
            .tab
            .find_element(selector)
            .map_err(|_| DriverError::Stale(selector.to_string()))?;

        element
            .scroll_into_view()
            .and_then(|el| el.click())
            .map(|_| ())
            .map_err(|e| DriverError::Stale(format!("{}: {}", selector, e)))
    }

    fn root_marker(&mut self) -> DriverResult<RootMarker> {
        let script = format!(
            r#"(() => {{
                const token = 'lw-' + Date.now() + '-' + Math.random().toString(36).slice(2);
                document.documentElement.setAttribute({attr}, token);
                return token;
            }})()"#,
            attr = js_string(ROOT_MARKER_ATTRIBUTE)
        );

        let result = self
            .tab
            .evaluate(&script, false)
            .map_err(|e| DriverError::Interaction(e.to_string()))?;

        result
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .map(RootMarker)
            .ok_or_else(|| DriverError::Interaction("Root marker was not returned".to_string()))
    }

    fn is_stale(&mut self, marker: &RootMarker) -> DriverResult<bool> {
        let script = format!(
            "document.documentElement.getAttribute({}) !== {}",
            js_string(ROOT_MARKER_ATTRIBUTE),
            js_string(&marker.0)
        );

        // An evaluation failure means the old execution context is gone.
        Ok(self.evaluate_bool(&script).unwrap_or(true))
    }

    fn screenshot(&mut self) -> DriverResult<Vec<u8>> {
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| DriverError::Interaction(e.to_string()))
    }
}
