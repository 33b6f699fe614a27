//! Ordered, named selector strategies. A field is resolved by trying each
//! strategy in turn; the first one that produces a value wins.

use scraper::element_ref::Select;
use scraper::{ElementRef, Selector};

use crate::{AppError, Result};

/// A compiled CSS selector, named by its source text for logging.
#[derive(Debug, Clone)]
pub struct Strategy {
    name: String,
    selector: Selector,
}

impl Strategy {
    pub fn parse(selector: &str) -> Result<Self> {
        let compiled = Selector::parse(selector).map_err(|e| AppError::Parse {
            message: format!("Invalid CSS selector '{}': {:?}", selector, e),
        })?;

        Ok(Self {
            name: selector.to_string(),
            selector: compiled,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn first<'a>(&self, root: ElementRef<'a>) -> Option<ElementRef<'a>> {
        root.select(&self.selector).next()
    }

    pub fn all<'a, 'b>(&'b self, root: ElementRef<'a>) -> Select<'a, 'b> {
        root.select(&self.selector)
    }
}

/// The strategies for one field, in priority order.
#[derive(Debug, Clone)]
pub struct FieldChain {
    field: &'static str,
    strategies: Vec<Strategy>,
}

impl FieldChain {
    pub fn new(field: &'static str, selectors: &[String]) -> Result<Self> {
        let strategies = selectors
            .iter()
            .map(|s| Strategy::parse(s))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { field, strategies })
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// First element matched by any strategy.
    pub fn element<'a>(&self, root: ElementRef<'a>) -> Option<ElementRef<'a>> {
        self.strategies.iter().find_map(|s| s.first(root))
    }

    /// First non-empty text produced by any strategy.
    pub fn text(&self, root: ElementRef<'_>) -> Option<String> {
        self.strategies
            .iter()
            .filter_map(|s| s.first(root))
            .map(element_text)
            .find(|text| !text.is_empty())
    }

    /// First non-empty attribute value produced by any strategy.
    pub fn attr(&self, root: ElementRef<'_>, attr: &str) -> Option<String> {
        self.strategies
            .iter()
            .filter_map(|s| s.first(root))
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// Text content with each text node trimmed and empty nodes dropped.
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
