use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::traits::{Messenger, ParseMode, SendOutcome};
use crate::config::TelegramConfig;
use crate::{AppError, Result};

// Used when a 429 arrives without a retry_after hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    result: Option<MessageResult>,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

pub struct TelegramMessenger {
    client: Client,
    endpoint: String,
    chat_id: String,
    disable_web_page_preview: bool,
}

impl TelegramMessenger {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Validation("Telegram bot token is not configured".to_string()))?;
        let chat_id = config
            .chat_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::Validation("Telegram chat id is not configured".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                token
            ),
            chat_id: chat_id.to_string(),
            disable_web_page_preview: config.disable_web_page_preview,
        })
    }

    fn payload(&self, text: &str, mode: ParseMode) -> serde_json::Value {
        let mut payload = json!({
            "chat_id": self.chat_id,
            "text": text,
        });

        if mode == ParseMode::MarkdownV2 {
            payload["parse_mode"] = json!("MarkdownV2");
        }

        if self.disable_web_page_preview {
            payload["disable_web_page_preview"] = json!(true);
        }

        payload
    }
}

fn interpret(status: StatusCode, body: &str) -> SendOutcome {
    let response = match serde_json::from_str::<TelegramResponse>(body) {
        Ok(response) => response,
        Err(_) if status == StatusCode::TOO_MANY_REQUESTS => {
            return SendOutcome::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER,
            };
        }
        Err(_) => {
            return SendOutcome::Rejected {
                description: format!("HTTP {}: {}", status, body),
            };
        }
    };

    if response.ok {
        return SendOutcome::Delivered {
            message_id: response.result.map(|r| r.message_id),
        };
    }

    if let Some(seconds) = response.parameters.and_then(|p| p.retry_after) {
        return SendOutcome::RateLimited {
            retry_after: Duration::from_secs(seconds),
        };
    }

    if status == StatusCode::TOO_MANY_REQUESTS || response.error_code == Some(429) {
        return SendOutcome::RateLimited {
            retry_after: DEFAULT_RETRY_AFTER,
        };
    }

    SendOutcome::Rejected {
        description: response
            .description
            .unwrap_or_else(|| format!("HTTP {}", status)),
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, text: &str, mode: ParseMode) -> Result<SendOutcome> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.payload(text, mode))
            .send()
            .await
            // The endpoint embeds the bot token.
            .map_err(|e| AppError::Http(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Http(e.without_url()))?;

        let outcome = interpret(status, &body);
        debug!("Telegram answered {} ({:?})", status, outcome);
        Ok(outcome)
    }
}
