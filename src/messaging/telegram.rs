//! # Telegram Bot API Client
//!
//! Raw HTTP implementation of [`Deliverable`] against the Telegram Bot API.
//! Every call is a JSON `POST {base_url}/bot{token}/{method}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::client::{ApiCall, ApiError, ApiResponse, Deliverable};
use crate::error::{BroadcastError, Result};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Configuration for the Bot API client
#[derive(Clone)]
pub struct TelegramApiConfig {
    pub token: String,
    pub base_url: String,
    /// HTTP-level timeout; the worker pool applies its own per-call timeout too
    pub timeout_ms: u64,
}

impl TelegramApiConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_API_URL.to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl std::fmt::Debug for TelegramApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramApiConfig")
            .field("token", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct BotApiEnvelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// HTTP client for the Telegram Bot API
pub struct TelegramBotApi {
    client: Client,
    config: TelegramApiConfig,
}

impl std::fmt::Debug for TelegramBotApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBotApi")
            .field("config", &self.config)
            .finish()
    }
}

impl TelegramBotApi {
    pub fn new(config: TelegramApiConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(BroadcastError::configuration(
                "telegram",
                "bot token must not be empty",
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(format!("broadcaster-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                BroadcastError::configuration(
                    "telegram",
                    format!("Failed to create HTTP client: {e}"),
                )
            })?;

        info!(
            base_url = %config.base_url,
            timeout_ms = config.timeout_ms,
            "Created TelegramBotApi client"
        );

        Ok(Self { client, config })
    }

    pub fn from_token(token: impl Into<String>) -> Result<Self> {
        Self::new(TelegramApiConfig::new(token))
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.token,
            method
        )
    }
}

/// Turn an HTTP status and body into the call outcome
pub(crate) fn interpret_response(
    status: u16,
    body: &str,
) -> std::result::Result<ApiResponse, ApiError> {
    let envelope: BotApiEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if status >= 400 => {
            return Err(ApiError::api(
                i64::from(status),
                format!("HTTP {status} with unparseable body"),
            ))
        }
        Err(e) => return Err(ApiError::uncoded(format!("Malformed API response: {e}"))),
    };

    if envelope.ok {
        return Ok(ApiResponse(envelope.result.unwrap_or(Value::Null)));
    }

    let description = envelope
        .description
        .unwrap_or_else(|| "Unknown API error".to_string());
    let mut error = match envelope.error_code {
        Some(code) => ApiError::api(code, description),
        None => ApiError::uncoded(description),
    };
    if let Some(retry_after) = envelope.parameters.and_then(|p| p.retry_after) {
        error = error.with_retry_after(Duration::from_secs(retry_after));
    }
    Err(error)
}

#[async_trait]
impl Deliverable for TelegramBotApi {
    async fn call_api(&self, call: &ApiCall) -> std::result::Result<ApiResponse, ApiError> {
        debug!(method = call.method, "Calling Bot API");

        let response = self
            .client
            .post(self.method_url(call.method))
            .json(&call.to_json())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::timeout(Duration::from_millis(self.config.timeout_ms))
                } else {
                    ApiError::network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read response body: {e}")))?;

        interpret_response(status, &body)
    }

    fn client_name(&self) -> &'static str {
        "telegram_bot_api"
    }
}
