//! Dialogue responder client.
//!
//! The assistant's next line comes from an external text-generation service.
//! The voice contract needs exactly one complete utterance per turn, so this
//! client is the buffering boundary: whatever the responder's transport does,
//! `generate_reply` returns only after the full body has been drained into a
//! single string, bounded by the configured timeout.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::session::{Role, Turn};

/// Spoken when the responder returns a non-success status.
pub const FALLBACK_RESPONDER_ERROR: &str =
    "I'm sorry, I'm having trouble processing that right now. Could you please try again?";

/// Spoken when the responder cannot be reached at all (timeout, connect error).
pub const FALLBACK_TRANSPORT_ERROR: &str =
    "I'm sorry, I'm experiencing technical difficulties. Please try again later.";

/// Abstraction over the dialogue responder.
#[async_trait]
pub trait DialogueResponder: Send + Sync {
    /// Produce the assistant's next line as one fully materialized string.
    async fn generate_reply(&self, request: &ReplyRequest) -> Result<String, DialogueError>;

    /// Responder name for logging.
    fn name(&self) -> &str;
}

/// Dialogue responder errors
#[derive(Error, Debug)]
pub enum DialogueError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Responder error ({code}): {message}")]
    Api { code: u16, message: String },
}

impl DialogueError {
    /// The fixed apologetic line substituted for this failure.
    pub fn fallback_utterance(&self) -> &'static str {
        match self {
            DialogueError::Api { .. } => FALLBACK_RESPONDER_ERROR,
            DialogueError::Http(_) => FALLBACK_TRANSPORT_ERROR,
        }
    }
}

/// One reply request: the new message plus the passthrough context the
/// upstream classifier attached to the call.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub message: String,
    pub history: Vec<Turn>,
    pub mood: Option<String>,
    pub risk_score: Option<f64>,
    pub custom_prompt: Option<String>,
}

// ============================================================================
// Wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    message_history: Vec<HistoryEntry<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mood: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_prompt: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct HistoryEntry<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<String>,
}

// ============================================================================
// HttpDialogueClient
// ============================================================================

/// HTTP client for the dialogue responder's chat endpoint.
#[derive(Debug, Clone)]
pub struct HttpDialogueClient {
    client: Client,
    base_url: String,
}

impl HttpDialogueClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DialogueError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl DialogueResponder for HttpDialogueClient {
    async fn generate_reply(&self, request: &ReplyRequest) -> Result<String, DialogueError> {
        let payload = ChatRequest {
            message: &request.message,
            message_history: request
                .history
                .iter()
                .map(|t| HistoryEntry {
                    role: match t.role {
                        Role::Assistant => "assistant",
                        Role::User => "user",
                    },
                    content: &t.text,
                })
                .collect(),
            mood: request.mood.as_deref(),
            risk_score: request.risk_score,
            custom_prompt: request.custom_prompt.as_deref(),
        };

        let response = self.client.post(self.chat_url()).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), body = %body, "Dialogue responder error");
            return Err(DialogueError::Api {
                code: status.as_u16(),
                message: body,
            });
        }

        // Drain the whole body before parsing — a streamed reply must be
        // fully materialized before it reaches the planner.
        let body = response.text().await?;
        let reply = match serde_json::from_str::<ChatResponse>(&body) {
            Ok(parsed) => parsed.message.unwrap_or_else(|| "I'm here to help.".to_string()),
            Err(_) => body.trim().to_string(),
        };

        Ok(reply)
    }

    fn name(&self) -> &str {
        "http-chat"
    }
}

// ============================================================================
// TESTS
// ============================================================================
