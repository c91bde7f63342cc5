//! Haven HTTP API.
//!
//! Axum-based HTTP server carrying two surfaces: carrier voice webhooks
//! (which always answer 200 with a voice response document, never an HTTP
//! error the carrier would read to the caller as dead air) and a small JSON
//! REST surface for initiating calls and monitoring sessions.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function. The inner functions are directly testable without axum
//! dispatch machinery.
//!
//! Endpoints:
//! - POST /voice/webhook/answer          — primary call connected
//! - POST /voice/webhook/gather          — one captured speech turn
//! - POST /voice/webhook/status          — call lifecycle callback
//! - POST /voice/webhook/conference-wait — conference hold loop
//! - POST /voice/webhook/emergency-call  — emergency contact's leg connected
//! - POST /calls                         — initiate an outbound support call
//! - GET  /health                        — health and wiring check
//! - GET  /sessions                      — live session summaries
//! - DELETE /sessions/:call_sid          — force-close a session

use std::sync::{Arc, OnceLock};

use anyhow::Result;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use regex::Regex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use haven_core::models::events::{
    AnswerContext, AnswerForm, ConferenceWaitForm, ConferenceWaitQuery, EmergencyAnswerForm,
    EmergencyContext, StatusForm, TurnForm,
};
use haven_core::models::session::{EmergencyContact, Phase, Role};
use haven_core::twiml::VoiceResponse;
use haven_core::{CallInitiator, DialogueResponder, HavenConfig, TelephonyError};

use crate::subsystems::planner;
use crate::subsystems::sessions::CallSessionStore;
use crate::subsystems::turns;

/// Shared state for all HTTP handlers
pub struct AppState {
    pub config: HavenConfig,
    pub store: Arc<CallSessionStore>,
    pub dialogue: Arc<dyn DialogueResponder>,
    pub telephony: Arc<dyn CallInitiator>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/calls", post(initiate_call_handler))
        .route("/sessions", get(sessions_handler))
        .route("/sessions/:call_sid", delete(end_session_handler))
        .route("/voice/webhook/answer", post(answer_handler))
        .route("/voice/webhook/gather", post(gather_handler))
        .route("/voice/webhook/status", post(status_handler))
        .route("/voice/webhook/conference-wait", post(conference_wait_handler))
        .route("/voice/webhook/emergency-call", post(emergency_call_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Haven HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

/// Wrap a voice response document for the carrier. Webhooks always return
/// 200 — a planner-built apology is still a valid call experience, an HTTP
/// error is dead air.
fn xml_response(response: VoiceResponse) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        response.to_xml(),
    )
        .into_response()
}

fn e164_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("static pattern compiles"))
}

/// E.164 check for dialable numbers.
pub fn is_valid_phone_number(number: &str) -> bool {
    e164_pattern().is_match(number)
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct InitiateCallRequest {
    pub to_number: String,
    pub name: Option<String>,
    pub initial_mood: Option<String>,
    pub risk_score: Option<f64>,
    pub custom_prompt: Option<String>,
    pub emergency_number: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub context: Option<String>,
}

// ============================================================================
// Inner (directly testable) webhook logic
// ============================================================================

/// Inner answer — the primary call just connected. First delivery stamps the
/// call context onto the session and records the spoken greeting; redelivery
/// replays the greeting from the stored fields without mutating anything.
pub async fn answer_inner(
    state: &AppState,
    form: &AnswerForm,
    ctx: &AnswerContext,
) -> VoiceResponse {
    let session = state.store.get_or_create(&form.call_sid).await;
    let mut s = session.lock().await;

    if s.is_ended() {
        return planner::ended();
    }

    if s.phase != Phase::Greeting {
        // Carrier redelivery after the first answer was processed.
        tracing::debug!(call_sid = %form.call_sid, "Answer webhook redelivered, replaying greeting");
        return planner::greeting(&planner::greeting_line(&s));
    }

    s.subject_name = ctx.name.clone();
    s.mood = ctx.mood.clone();
    s.risk_score = ctx.risk_score;
    s.custom_prompt = ctx.custom_prompt.clone();
    s.context_note = ctx.context.clone();
    if let Some(number) = &ctx.emergency_number {
        s.emergency_contact = Some(EmergencyContact {
            number: number.clone(),
            name: ctx.emergency_contact_name.clone(),
        });
    }

    let line = planner::greeting_line(&s);
    s.push_turn(Role::Assistant, &line);
    s.advance_phase(Phase::Listening);

    tracing::info!(
        call_sid = %form.call_sid,
        has_emergency_contact = s.emergency_contact.is_some(),
        "Call answered, greeting delivered"
    );

    planner::greeting(&line)
}

/// Inner status — terminal lifecycle statuses tear the session down.
/// Removal is a no-op for unknown or already-removed calls.
pub async fn status_inner(state: &AppState, form: &StatusForm) {
    tracing::info!(
        call_sid = %form.call_sid,
        status = %form.call_status,
        duration = form.call_duration.as_deref().unwrap_or("-"),
        "Call status update"
    );

    if form.is_terminal() {
        state.store.remove(&form.call_sid).await;
    }
}

// ============================================================================
// Inner (directly testable) REST logic
// ============================================================================

/// Inner health — reports wiring, never fails.
pub async fn health_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "carrier_configured": state.telephony.name() != "unconfigured",
            "dialogue_responder": state.dialogue.name(),
            "live_sessions": state.store.len().await,
        }),
    )
}

/// Inner sessions — summaries of all live sessions.
pub async fn sessions_inner(state: &AppState) -> serde_json::Value {
    let sessions = state.store.snapshot().await;
    serde_json::json!({
        "active_sessions": sessions.len(),
        "sessions": sessions,
    })
}

/// Inner end-session — force-close one session.
pub async fn end_session_inner(state: &AppState, call_sid: &str) -> (StatusCode, serde_json::Value) {
    if state.store.remove(call_sid).await {
        (
            StatusCode::OK,
            serde_json::json!({ "status": "removed", "call_sid": call_sid }),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "unknown call_sid", "call_sid": call_sid }),
        )
    }
}

/// Inner call initiation — validates numbers, builds the context-bearing
/// answer webhook URL, and asks the carrier to dial.
pub async fn initiate_call_inner(
    state: &AppState,
    req: InitiateCallRequest,
) -> (StatusCode, serde_json::Value) {
    if !is_valid_phone_number(&req.to_number) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({ "error": "to_number must be E.164 (e.g. +15551234567)" }),
        );
    }
    if let Some(emergency) = &req.emergency_number {
        if !is_valid_phone_number(emergency) {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": "emergency_number must be E.164" }),
            );
        }
    }

    let Some(callback_url) = answer_webhook_url(state, &req) else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "could not build answer webhook URL; check http.public_base_url" }),
        );
    };

    match state.telephony.place_call(&req.to_number, &callback_url).await {
        Ok(placed) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "initiated",
                "call_sid": placed.call_sid,
                "call_status": placed.status,
            }),
        ),
        Err(TelephonyError::MissingCredentials) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({ "error": "telephony is not configured" }),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            serde_json::json!({ "error": e.to_string() }),
        ),
    }
}

/// Answer webhook URL for an outbound support call, with the call context
/// url-encoded into query parameters.
fn answer_webhook_url(state: &AppState, req: &InitiateCallRequest) -> Option<String> {
    let base = state.config.http.public_base_url.trim_end_matches('/');
    let mut url = reqwest::Url::parse(&format!("{base}/voice/webhook/answer")).ok()?;

    {
        let mut pairs = url.query_pairs_mut();
        if let Some(name) = &req.name {
            pairs.append_pair("name", name);
        }
        if let Some(mood) = &req.initial_mood {
            pairs.append_pair("mood", mood);
        }
        if let Some(risk) = req.risk_score {
            pairs.append_pair("risk_score", &risk.to_string());
        }
        if let Some(prompt) = &req.custom_prompt {
            pairs.append_pair("custom_prompt", prompt);
        }
        if let Some(number) = &req.emergency_number {
            pairs.append_pair("emergency_number", number);
        }
        if let Some(contact_name) = &req.emergency_contact_name {
            pairs.append_pair("emergency_contact_name", contact_name);
        }
        if let Some(context) = &req.context {
            pairs.append_pair("context", context);
        }
    }

    Some(url.into())
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn answer_handler(
    State(state): State<Arc<AppState>>,
    ctx: Option<Query<AnswerContext>>,
    form: Result<Form<AnswerForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        tracing::warn!("Malformed answer webhook payload");
        return xml_response(planner::answer_error());
    };
    let Query(ctx) = ctx.unwrap_or_default();
    xml_response(answer_inner(&state, &form, &ctx).await)
}

pub async fn gather_handler(
    State(state): State<Arc<AppState>>,
    form: Result<Form<TurnForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        tracing::warn!("Malformed gather webhook payload");
        return xml_response(planner::gather_error());
    };
    xml_response(turns::handle_turn(&state, &form).await)
}

pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    form: Result<Form<StatusForm>, FormRejection>,
) -> Response {
    if let Ok(Form(form)) = form {
        status_inner(&state, &form).await;
    } else {
        tracing::warn!("Malformed status webhook payload");
    }
    // Status callbacks want an acknowledgement, not a voice document.
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], "OK").into_response()
}

pub async fn conference_wait_handler(
    query: Option<Query<ConferenceWaitQuery>>,
    form: Result<Form<ConferenceWaitForm>, FormRejection>,
) -> Response {
    if form.is_err() {
        tracing::warn!("Malformed conference-wait webhook payload");
        return xml_response(planner::conference_error());
    }
    let Query(query) = query.unwrap_or_default();
    xml_response(planner::conference_wait(query.retry.unwrap_or(0)))
}

pub async fn emergency_call_handler(
    ctx: Option<Query<EmergencyContext>>,
    form: Result<Form<EmergencyAnswerForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        tracing::warn!("Malformed emergency-call webhook payload");
        return xml_response(planner::conference_error());
    };
    let Query(ctx) = ctx.unwrap_or_default();
    let fallback_sid = form.call_sid.as_deref().unwrap_or("unknown");
    tracing::info!(
        conference = ctx.conference_name.as_deref().unwrap_or("-"),
        "Emergency contact connected, delivering briefing"
    );
    xml_response(planner::emergency_briefing(&ctx, fallback_sid))
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn sessions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(sessions_inner(&state).await))
}

pub async fn end_session_handler(
    State(state): State<Arc<AppState>>,
    Path(call_sid): Path<String>,
) -> impl IntoResponse {
    let (status, body) = end_session_inner(&state, &call_sid).await;
    (status, Json(body))
}

pub async fn initiate_call_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitiateCallRequest>,
) -> impl IntoResponse {
    let (status, body) = initiate_call_inner(&state, req).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use haven_core::config::{
        CallFlowConfig, DialogueConfig, HttpConfig, ServiceConfig, TelephonyConfig,
    };
    use haven_core::dialogue::{DialogueError, ReplyRequest};
    use haven_core::telephony::PlacedCall;
    use tokio::sync::Mutex;

    struct FixedResponder;

    #[async_trait]
    impl DialogueResponder for FixedResponder {
        async fn generate_reply(&self, _request: &ReplyRequest) -> Result<String, DialogueError> {
            Ok("I'm here with you.".to_string())
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[derive(Default)]
    struct RecordingInitiator {
        dials: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl CallInitiator for RecordingInitiator {
        async fn place_call(
            &self,
            to_number: &str,
            callback_url: &str,
        ) -> Result<PlacedCall, TelephonyError> {
            self.dials
                .lock()
                .await
                .push((to_number.to_string(), callback_url.to_string()));
            Ok(PlacedCall {
                call_sid: "CAplaced".to_string(),
                status: "queued".to_string(),
            })
        }
        fn name(&self) -> &str {
            "recording"
        }
    }

    fn test_config() -> HavenConfig {
        HavenConfig {
            service: ServiceConfig {
                log_level: "info".to_string(),
            },
            http: HttpConfig::default(),
            dialogue: DialogueConfig {
                base_url: "http://localhost:9".to_string(),
                timeout_seconds: 1,
            },
            telephony: TelephonyConfig {
                from_number: "+15550001111".to_string(),
                base_url: "https://api.twilio.com".to_string(),
                max_retries: 1,
                retry_delay_ms: 10,
            },
            call_flow: CallFlowConfig::default(),
        }
    }

    fn test_state() -> (Arc<AppState>, Arc<RecordingInitiator>) {
        let telephony = Arc::new(RecordingInitiator::default());
        let state = Arc::new(AppState {
            config: test_config(),
            store: Arc::new(CallSessionStore::new()),
            dialogue: Arc::new(FixedResponder),
            telephony: telephony.clone(),
        });
        (state, telephony)
    }

    fn answer_form(call_sid: &str) -> AnswerForm {
        AnswerForm {
            call_sid: call_sid.to_string(),
            to: Some("+15551234567".to_string()),
            from: Some("+15550001111".to_string()),
        }
    }

    // ========================================================================
    // TEST 1: e164 validation accepts real numbers and rejects junk
    // ========================================================================
    #[test]
    fn test_phone_number_validation() {
        assert!(is_valid_phone_number("+15551234567"));
        assert!(is_valid_phone_number("+447911123456"));
        assert!(!is_valid_phone_number("15551234567"), "missing +");
        assert!(!is_valid_phone_number("+0551234567"), "leading zero");
        assert!(!is_valid_phone_number("+1555123456789012345"), "too long");
        assert!(!is_valid_phone_number("+1-555-123-4567"), "punctuation");
        assert!(!is_valid_phone_number(""));
    }

    // ========================================================================
    // TEST 2: answer stamps context, greets, and moves to Listening
    // ========================================================================
    #[tokio::test]
    async fn test_answer_inner_first_delivery() {
        let (state, _) = test_state();
        let ctx = AnswerContext {
            name: Some("Alex".to_string()),
            mood: Some("anxious".to_string()),
            emergency_number: Some("+15559876543".to_string()),
            emergency_contact_name: Some("Jordan".to_string()),
            ..AnswerContext::default()
        };

        let xml = answer_inner(&state, &answer_form("CA1"), &ctx).await.to_xml();
        assert!(xml.contains("Hello Alex!"));
        assert!(xml.contains("<Gather"));

        let session = state.store.get("CA1").await.expect("session created");
        let s = session.lock().await;
        assert_eq!(s.phase, Phase::Listening);
        assert_eq!(s.turns.len(), 1, "greeting recorded as an assistant turn");
        assert_eq!(
            s.emergency_contact.as_ref().map(|c| c.number.as_str()),
            Some("+15559876543")
        );
    }

    // ========================================================================
    // TEST 3: answer redelivery replays the greeting without mutating
    // ========================================================================
    #[tokio::test]
    async fn test_answer_inner_redelivery_is_idempotent() {
        let (state, _) = test_state();
        let ctx = AnswerContext {
            name: Some("Alex".to_string()),
            ..AnswerContext::default()
        };

        let first = answer_inner(&state, &answer_form("CA1"), &ctx).await.to_xml();
        let second = answer_inner(&state, &answer_form("CA1"), &ctx).await.to_xml();
        assert_eq!(first, second, "redelivery must replay the same greeting");

        let session = state.store.get("CA1").await.expect("session exists");
        let s = session.lock().await;
        assert_eq!(s.turns.len(), 1, "no duplicate greeting turn");
    }

    // ========================================================================
    // TEST 4: initiate rejects malformed numbers before touching the carrier
    // ========================================================================
    #[tokio::test]
    async fn test_initiate_call_inner_rejects_bad_number() {
        let (state, telephony) = test_state();
        let req = InitiateCallRequest {
            to_number: "555-1234".to_string(),
            name: None,
            initial_mood: None,
            risk_score: None,
            custom_prompt: None,
            emergency_number: None,
            emergency_contact_name: None,
            context: None,
        };

        let (status, body) = initiate_call_inner(&state, req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string());
        assert!(telephony.dials.lock().await.is_empty(), "no dial attempted");
    }

    // ========================================================================
    // TEST 5: initiate dials with a context-bearing answer URL
    // ========================================================================
    #[tokio::test]
    async fn test_initiate_call_inner_builds_context_url() {
        let (state, telephony) = test_state();
        let req = InitiateCallRequest {
            to_number: "+15551234567".to_string(),
            name: Some("Alex Smith".to_string()),
            initial_mood: Some("sad".to_string()),
            risk_score: Some(0.7),
            custom_prompt: None,
            emergency_number: Some("+15559876543".to_string()),
            emergency_contact_name: Some("Jordan".to_string()),
            context: Some("recent crisis episode".to_string()),
        };

        let (status, body) = initiate_call_inner(&state, req).await;
        assert_eq!(status, StatusCode::OK, "unexpected body: {body}");
        assert_eq!(body["call_sid"], "CAplaced");

        let dials = telephony.dials.lock().await;
        assert_eq!(dials.len(), 1);
        let (to, url) = &dials[0];
        assert_eq!(to, "+15551234567");
        assert!(url.contains("/voice/webhook/answer?"));
        assert!(url.contains("name=Alex+Smith"));
        assert!(url.contains("emergency_number=%2B15559876543"));
        assert!(url.contains("risk_score=0.7"));
    }

    // ========================================================================
    // TEST 6: terminal status removes the session, non-terminal keeps it
    // ========================================================================
    #[tokio::test]
    async fn test_status_inner_terminal_teardown() {
        let (state, _) = test_state();
        state.store.get_or_create("CA1").await;

        let ringing = StatusForm {
            call_sid: "CA1".to_string(),
            call_status: "ringing".to_string(),
            call_duration: None,
        };
        status_inner(&state, &ringing).await;
        assert!(state.store.get("CA1").await.is_some());

        let completed = StatusForm {
            call_sid: "CA1".to_string(),
            call_status: "completed".to_string(),
            call_duration: Some("73".to_string()),
        };
        status_inner(&state, &completed).await;
        assert!(state.store.get("CA1").await.is_none());

        // Redelivery of the terminal status is a no-op.
        status_inner(&state, &completed).await;
    }

    // ========================================================================
    // TEST 7: end_session returns 404 for unknown, 200 for live
    // ========================================================================
    #[tokio::test]
    async fn test_end_session_inner() {
        let (state, _) = test_state();
        let (status, _) = end_session_inner(&state, "CA-missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state.store.get_or_create("CA1").await;
        let (status, body) = end_session_inner(&state, "CA1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "removed");
    }

    // ========================================================================
    // TEST 8: health reports wiring and live session count
    // ========================================================================
    #[tokio::test]
    async fn test_health_inner_reports_wiring() {
        let (state, _) = test_state();
        state.store.get_or_create("CA1").await;

        let (status, body) = health_inner(&state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["carrier_configured"], true);
        assert_eq!(body["dialogue_responder"], "fixed");
        assert_eq!(body["live_sessions"], 1);
    }

    // ========================================================================
    // TEST 9: sessions summary lists live sessions
    // ========================================================================
    #[tokio::test]
    async fn test_sessions_inner_lists_sessions() {
        let (state, _) = test_state();
        state.store.get_or_create("CA1").await;
        state.store.get_or_create("CA2").await;

        let body = sessions_inner(&state).await;
        assert_eq!(body["active_sessions"], 2);
        assert_eq!(body["sessions"].as_array().map(|a| a.len()), Some(2));
    }
}
