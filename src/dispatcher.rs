//! Announces listings that have not been announced before.
//!
//! Every listing ends up delivered, skipped (already in the ledger) or
//! dropped. A dropped listing has no ledger entry and is tried again on the
//! next run.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::models::ListingRecord;
use crate::notifiers::{MessageFormatter, Messenger, ParseMode, SendOutcome};
use crate::storage::NotificationLedger;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub skipped: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Failure {
    /// Still throttled after the allowed number of retries.
    RateLimited,
    Rejected(String),
}

pub struct Dispatcher {
    messenger: Arc<dyn Messenger>,
    ledger: Arc<dyn NotificationLedger>,
    formatter: MessageFormatter,
    send_delay: Duration,
    rate_limit_margin: Duration,
    max_rate_limit_retries: u32,
}

impl Dispatcher {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        ledger: Arc<dyn NotificationLedger>,
        config: &TelegramConfig,
    ) -> Self {
        Self {
            messenger,
            ledger,
            formatter: MessageFormatter::new(config.description_limit),
            send_delay: config.send_delay(),
            rate_limit_margin: config.rate_limit_margin(),
            max_rate_limit_retries: config.max_rate_limit_retries,
        }
    }

    pub async fn dispatch(&self, listings: &[ListingRecord]) -> DispatchReport {
        let mut report = DispatchReport::default();

        for listing in listings {
            match self.ledger.is_notified(&listing.item_id).await {
                Ok(true) => {
                    debug!("Listing {} was already announced", listing.item_id);
                    report.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Could not check ledger for {}: {}", listing.item_id, e);
                    report.dropped += 1;
                    continue;
                }
            }

            if self.announce(listing).await {
                report.delivered += 1;
                tokio::time::sleep(self.send_delay).await;
            } else {
                report.dropped += 1;
            }
        }

        info!(
            "Dispatch finished: {} delivered, {} skipped, {} dropped",
            report.delivered, report.skipped, report.dropped
        );
        report
    }

    async fn announce(&self, listing: &ListingRecord) -> bool {
        let rich = self.formatter.rich(listing);

        match self.deliver(&rich, ParseMode::MarkdownV2).await {
            Ok(()) => {}
            Err(Failure::RateLimited) => {
                warn!("Dropping {}: still rate limited", listing.item_id);
                return false;
            }
            Err(Failure::Rejected(reason)) => {
                warn!(
                    "Formatted message for {} was rejected ({}), retrying as plain text",
                    listing.item_id, reason
                );

                let plain = self.formatter.plain(listing);
                if let Err(failure) = self.deliver(&plain, ParseMode::Plain).await {
                    warn!("Dropping {}: plain text delivery failed ({:?})", listing.item_id, failure);
                    return false;
                }
            }
        }

        info!("Announced listing {}", listing.item_id);

        if let Err(e) = self.ledger.mark_notified(&listing.item_id).await {
            warn!("Announced {} but could not record it: {}", listing.item_id, e);
        }

        true
    }

    /// Sends one message, sleeping through rate limits.
    async fn deliver(&self, text: &str, mode: ParseMode) -> Result<(), Failure> {
        let mut retries = 0;

        loop {
            match self.messenger.send(text, mode).await {
                Ok(SendOutcome::Delivered { message_id }) => {
                    debug!("Delivered message {:?}", message_id);
                    return Ok(());
                }
                Ok(SendOutcome::RateLimited { retry_after }) => {
                    if retries >= self.max_rate_limit_retries {
                        return Err(Failure::RateLimited);
                    }
                    retries += 1;

                    let wait = retry_after + self.rate_limit_margin;
                    warn!("Rate limited, waiting {:?} (retry {})", wait, retries);
                    tokio::time::sleep(wait).await;
                }
                Ok(SendOutcome::Rejected { description }) => return Err(Failure::Rejected(description)),
                Err(e) => return Err(Failure::Rejected(e.to_string())),
            }
        }
    }
}
