//! Escalation dialing.
//!
//! When a session crosses the escalation threshold, the handler snapshots
//! everything the dial needs into an [`EscalationTask`] while it still holds
//! the session lock, then hands the task to a background tokio task. The
//! webhook response never waits on the carrier; the dial outcome is written
//! back to the session afterwards, purely for observability.

use std::sync::Arc;

use haven_core::models::session::{CallSession, EmergencyContact, EscalationOutcome};

use crate::http::AppState;
use crate::subsystems::planner;

/// Everything the background dial needs, captured under the session lock.
/// The task never re-reads the session before dialing, so a racing hangup
/// cannot leave it holding a half-updated view.
#[derive(Debug, Clone)]
pub struct EscalationTask {
    pub call_sid: String,
    pub conference_id: String,
    pub subject_name: Option<String>,
    pub context_note: Option<String>,
    pub emergency_contact: Option<EmergencyContact>,
}

impl EscalationTask {
    pub fn from_session(session: &CallSession) -> Self {
        Self {
            call_sid: session.call_sid.clone(),
            conference_id: planner::conference_id(&session.call_sid),
            subject_name: session.subject_name.clone(),
            context_note: session.context_note.clone(),
            emergency_contact: session.emergency_contact.clone(),
        }
    }
}

/// Fire-and-forget escalation dial.
pub fn spawn_escalate(state: Arc<AppState>, task: EscalationTask) {
    tokio::spawn(async move {
        let outcome = escalate(&state, &task).await;
        record_outcome(&state, &task.call_sid, outcome).await;
    });
}

/// Place the emergency-contact call and report how it went. Exactly one
/// attempt per session; the initiator handles transport-level retries
/// internally.
async fn escalate(state: &AppState, task: &EscalationTask) -> EscalationOutcome {
    let Some(contact) = &task.emergency_contact else {
        tracing::info!(
            call_sid = %task.call_sid,
            "No emergency contact on session, skipping escalation dial"
        );
        return EscalationOutcome::Skipped;
    };

    let Some(callback_url) = emergency_callback_url(state, task, contact) else {
        tracing::error!(
            call_sid = %task.call_sid,
            "Could not build emergency callback URL, escalation dial aborted"
        );
        return EscalationOutcome::Failed {
            error: "invalid emergency callback URL".to_string(),
        };
    };

    match state.telephony.place_call(&contact.number, &callback_url).await {
        Ok(placed) => {
            tracing::info!(
                call_sid = %task.call_sid,
                emergency_call_sid = %placed.call_sid,
                conference = %task.conference_id,
                "Emergency contact dialed"
            );
            EscalationOutcome::Dialed {
                call_sid: placed.call_sid,
            }
        }
        Err(e) => {
            tracing::error!(
                call_sid = %task.call_sid,
                error = %e,
                "Escalation dial failed, caller stays in the conference hold loop"
            );
            EscalationOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

/// Callback URL for the emergency contact's leg, with the briefing context
/// url-encoded into query parameters so the leg is self-describing.
fn emergency_callback_url(
    state: &AppState,
    task: &EscalationTask,
    contact: &EmergencyContact,
) -> Option<String> {
    let base = state.config.http.public_base_url.trim_end_matches('/');
    let mut url = reqwest::Url::parse(&format!("{base}/voice/webhook/emergency-call")).ok()?;

    {
        let mut pairs = url.query_pairs_mut();
        if let Some(name) = &task.subject_name {
            pairs.append_pair("user_name", name);
        }
        if let Some(context) = &task.context_note {
            pairs.append_pair("context", context);
        }
        if let Some(contact_name) = &contact.name {
            pairs.append_pair("emergency_contact_name", contact_name);
        }
        pairs.append_pair("conference_name", &task.conference_id);
    }

    Some(url.into())
}

/// Write the dial outcome back onto the session, if it still exists. Only
/// the first recorded outcome sticks.
async fn record_outcome(state: &AppState, call_sid: &str, outcome: EscalationOutcome) {
    let Some(session) = state.store.get(call_sid).await else {
        tracing::info!(
            call_sid = %call_sid,
            "Primary call ended before escalation dial completed"
        );
        return;
    };

    let mut s = session.lock().await;
    if s.escalation == EscalationOutcome::NotAttempted {
        s.escalation = outcome;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // TEST 1: task snapshot carries the conference id derived from the sid
    // ========================================================================
    #[test]
    fn test_task_from_session_derives_conference_id() {
        let mut session = CallSession::new("CA77");
        session.subject_name = Some("Alex".to_string());
        session.emergency_contact = Some(EmergencyContact {
            number: "+15559876543".to_string(),
            name: Some("Jordan".to_string()),
        });

        let task = EscalationTask::from_session(&session);
        assert_eq!(task.call_sid, "CA77");
        assert_eq!(task.conference_id, "crisis_support_CA77");
        assert_eq!(task.subject_name.as_deref(), Some("Alex"));
    }

    // ========================================================================
    // TEST 2: callback URL encodes briefing context as query parameters
    // ========================================================================
    #[test]
    fn test_emergency_callback_url_encodes_context() {
        // Exercise only the URL builder; no AppState needed.
        let mut url = reqwest::Url::parse("http://example.com/voice/webhook/emergency-call")
            .expect("static URL parses");
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("user_name", "Alex Smith");
            pairs.append_pair("context", "feeling hopeless & alone");
            pairs.append_pair("conference_name", "crisis_support_CA77");
        }
        let built: String = url.into();
        assert!(built.contains("user_name=Alex+Smith"));
        assert!(built.contains("conference_name=crisis_support_CA77"));
        assert!(built.contains("%26"), "literal & in a value must be escaped");
    }
}
