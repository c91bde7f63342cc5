//! Outbound call initiation via the carrier's REST API.
//!
//! The only operation the core needs is "place a call to this number and
//! point it at this webhook URL". The `CallInitiator` trait keeps the
//! escalation path testable; `CarrierCallClient` talks to a Twilio-style
//! `Calls.json` endpoint with HTTP basic auth.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::TelephonyConfig;

/// Abstraction over the outbound call initiator.
#[async_trait]
pub trait CallInitiator: Send + Sync {
    /// Dial `to_number`; the carrier fetches `callback_url` when the call
    /// connects.
    async fn place_call(
        &self,
        to_number: &str,
        callback_url: &str,
    ) -> Result<PlacedCall, TelephonyError>;

    /// Initiator name for logging.
    fn name(&self) -> &str;
}

/// Telephony errors
#[derive(Error, Debug)]
pub enum TelephonyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Carrier API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing carrier credentials (set TWILIO_ACCOUNT_SID and TWILIO_AUTH_TOKEN)")]
    MissingCredentials,

    #[error("All {attempts} dial attempts failed")]
    RetryExhausted { attempts: usize },
}

/// A successfully created outbound call.
#[derive(Debug, Clone, Deserialize)]
pub struct PlacedCall {
    #[serde(rename = "sid")]
    pub call_sid: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct CarrierErrorResponse {
    message: Option<String>,
}

/// Carrier account credentials, taken from the environment only — they never
/// appear in the config file.
#[derive(Debug, Clone)]
pub struct CarrierCredentials {
    pub account_sid: String,
    pub auth_token: String,
}

impl CarrierCredentials {
    pub fn from_env() -> Result<Self, TelephonyError> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").unwrap_or_default();
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_default();
        if account_sid.is_empty() || auth_token.is_empty() {
            return Err(TelephonyError::MissingCredentials);
        }
        Ok(Self {
            account_sid,
            auth_token,
        })
    }
}

// ============================================================================
// CarrierCallClient
// ============================================================================

/// REST client for the carrier's call-creation endpoint.
#[derive(Debug, Clone)]
pub struct CarrierCallClient {
    client: Client,
    credentials: CarrierCredentials,
    from_number: String,
    base_url: String,
    status_callback_url: Option<String>,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl CarrierCallClient {
    pub fn new(
        config: &TelephonyConfig,
        credentials: CarrierCredentials,
        status_callback_url: Option<String>,
    ) -> Result<Self, TelephonyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            credentials,
            from_number: config.from_number.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            status_callback_url,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn place_call_once(
        &self,
        to_number: &str,
        callback_url: &str,
    ) -> Result<PlacedCall, TelephonyError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url, self.credentials.account_sid
        );

        let mut form: Vec<(&str, &str)> = vec![
            ("To", to_number),
            ("From", &self.from_number),
            ("Url", callback_url),
        ];
        if let Some(status_callback) = &self.status_callback_url {
            form.push(("StatusCallback", status_callback));
        }

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.credentials.account_sid, Some(&self.credentials.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<CarrierErrorResponse>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(body);
            tracing::error!(code = status.as_u16(), message = %message, "Carrier API error");
            return Err(TelephonyError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let placed: PlacedCall = response.json().await?;
        Ok(placed)
    }
}

#[async_trait]
impl CallInitiator for CarrierCallClient {
    async fn place_call(
        &self,
        to_number: &str,
        callback_url: &str,
    ) -> Result<PlacedCall, TelephonyError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        let result =
            Retry::spawn(retry_strategy, || self.place_call_once(to_number, callback_url)).await;

        match result {
            Ok(placed) => {
                tracing::info!(
                    call_sid = %placed.call_sid,
                    status = %placed.status,
                    to = %to_number,
                    "Outbound call created"
                );
                Ok(placed)
            }
            Err(e) => {
                tracing::error!(
                    attempts = self.max_retries,
                    error = %e,
                    "All dial attempts failed"
                );
                Err(TelephonyError::RetryExhausted {
                    attempts: self.max_retries,
                })
            }
        }
    }

    fn name(&self) -> &str {
        "carrier-rest"
    }
}

// ============================================================================
// UnconfiguredCallInitiator
// ============================================================================

/// Stands in when carrier credentials are absent: every dial fails with
/// `MissingCredentials`, which the escalation path logs and degrades on.
/// The conversational side of the service keeps working.
#[derive(Debug, Default)]
pub struct UnconfiguredCallInitiator;

#[async_trait]
impl CallInitiator for UnconfiguredCallInitiator {
    async fn place_call(
        &self,
        _to_number: &str,
        _callback_url: &str,
    ) -> Result<PlacedCall, TelephonyError> {
        Err(TelephonyError::MissingCredentials)
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}

// ============================================================================
// TESTS
// ============================================================================
