//! Typed webhook payloads.
//!
//! The carrier posts form-encoded fields with PascalCase names (`CallSid`,
//! `SpeechResult`, ...) and we thread call context through url-encoded query
//! parameters on the webhook URLs. Each webhook kind gets its own struct so
//! missing or unexpected fields are defaulted explicitly instead of being
//! fished out of a dynamic form.

use serde::Deserialize;

/// Carrier statuses after which a call can never produce another turn.
pub const TERMINAL_CALL_STATUSES: [&str; 5] =
    ["completed", "busy", "no-answer", "failed", "canceled"];

/// Form body for the answer webhook — the primary call just connected.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "To", default)]
    pub to: Option<String>,
    #[serde(rename = "From", default)]
    pub from: Option<String>,
}

/// Query parameters carrying call context on the answer webhook URL.
/// All optional; absence degrades to generic phrasing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerContext {
    pub name: Option<String>,
    pub mood: Option<String>,
    pub custom_prompt: Option<String>,
    pub risk_score: Option<f64>,
    pub emergency_number: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub context: Option<String>,
}

/// Form body for the gather webhook — one captured speech turn.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "SpeechResult", default)]
    pub speech_result: Option<String>,
    #[serde(rename = "Confidence", default)]
    pub confidence: Option<f64>,
}

/// Form body for the carrier's call lifecycle callback.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    #[serde(rename = "CallDuration", default)]
    pub call_duration: Option<String>,
}

impl StatusForm {
    pub fn is_terminal(&self) -> bool {
        TERMINAL_CALL_STATUSES.contains(&self.call_status.as_str())
    }
}

/// Form body for the conference hold-music webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct ConferenceWaitForm {
    #[serde(rename = "CallSid", default)]
    pub call_sid: Option<String>,
}

/// Query parameters for the conference hold-music webhook. The carrier polls
/// this URL in a redirect loop; `retry` distinguishes passes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConferenceWaitQuery {
    #[serde(default)]
    pub retry: Option<u32>,
}

/// Form body when the emergency contact's outbound call connects.
#[derive(Debug, Clone, Deserialize)]
pub struct EmergencyAnswerForm {
    #[serde(rename = "CallSid", default)]
    pub call_sid: Option<String>,
}

/// Query parameters briefing the emergency contact, embedded in the callback
/// URL when the escalation dial was placed. Read-only with respect to the
/// primary session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmergencyContext {
    pub user_name: Option<String>,
    pub context: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub conference_name: Option<String>,
}
