use async_trait::async_trait;
use std::time::Duration;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    MarkdownV2,
    Plain,
}

/// What the provider said about one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { message_id: Option<i64> },
    /// Throttled; the provider asks to wait `retry_after` before trying again.
    RateLimited { retry_after: Duration },
    Rejected { description: String },
}

/// A chat destination for listing announcements.
///
/// Transport failures come back as `Err`; anything the provider answered
/// comes back as a [`SendOutcome`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, text: &str, mode: ParseMode) -> Result<SendOutcome>;
}
