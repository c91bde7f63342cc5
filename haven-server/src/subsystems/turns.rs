//! Dialogue turn handling.
//!
//! One captured speech result comes in, one voice response goes out. The
//! session lock is never held across the dialogue responder round-trip: the
//! handler snapshots the request under the lock, releases it for the I/O,
//! then re-acquires it to commit the reply. A call that ended or escalated
//! during the round-trip wins — the late reply is dropped or absorbed.

use std::sync::Arc;

use haven_core::dialogue::ReplyRequest;
use haven_core::models::events::TurnForm;
use haven_core::models::session::{Phase, Role};
use haven_core::twiml::VoiceResponse;

use crate::http::AppState;
use crate::subsystems::escalation::{self, EscalationTask};
use crate::subsystems::planner;

/// Lowercased phrases that end the call when they appear anywhere in the
/// caller's utterance.
pub const GOODBYE_PHRASES: [&str; 7] =
    ["goodbye", "bye", "end call", "hang up", "stop", "quit", "exit"];

pub fn contains_goodbye(text: &str) -> bool {
    let lowered = text.to_lowercase();
    GOODBYE_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// Handle one gather webhook delivery end to end.
pub async fn handle_turn(state: &Arc<AppState>, form: &TurnForm) -> VoiceResponse {
    let speech = form.speech_result.as_deref().unwrap_or("").trim();
    // A missing Confidence field counts as not heard, same as a low score.
    let confidence = form.confidence.unwrap_or(0.0);

    // Nothing usable was heard. Re-prompt without touching the session, so
    // the turn does not count toward escalation.
    if speech.is_empty() || confidence < state.config.call_flow.min_confidence {
        tracing::debug!(
            call_sid = %form.call_sid,
            confidence,
            "Speech below confidence floor, asking caller to repeat"
        );
        return planner::clarification();
    }

    let session = state.store.get_or_create(&form.call_sid).await;

    // First critical section: record the user's turn and decide whether the
    // call is over before any responder I/O happens.
    let request = {
        let mut s = session.lock().await;

        if s.is_ended() {
            return planner::ended();
        }

        // A gather on a session still in Greeting means the answer webhook's
        // greeting played and the caller spoke.
        if s.phase == Phase::Greeting {
            s.advance_phase(Phase::Listening);
        }

        s.push_turn(Role::User, speech);
        tracing::info!(call_sid = %form.call_sid, turn = s.user_turn_count, "User turn recorded");

        if contains_goodbye(speech) {
            s.advance_phase(Phase::Ended);
            drop(s);
            state.store.remove(&form.call_sid).await;
            tracing::info!(call_sid = %form.call_sid, "Caller said goodbye, session closed");
            return planner::ended();
        }

        ReplyRequest {
            message: speech.to_string(),
            history: s.turns.clone(),
            mood: s.mood.clone(),
            risk_score: s.risk_score,
            custom_prompt: s.custom_prompt.clone(),
        }
    };

    // Responder round-trip, lock released. Failures become a fixed spoken
    // fallback rather than an error response.
    let reply = match state.dialogue.generate_reply(&request).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(call_sid = %form.call_sid, error = %e, "Dialogue responder failed");
            e.fallback_utterance().to_string()
        }
    };

    // Second critical section: commit the reply and decide the phase.
    let mut s = session.lock().await;

    if s.is_ended() {
        // Call ended while we waited on the responder; the reply is dropped.
        return planner::ended();
    }

    s.push_turn(Role::Assistant, &reply);
    s.assistant_reply_count += 1;

    if s.phase == Phase::Escalating {
        // Escalation already in flight (duplicate delivery or a racing turn).
        // Re-issue the conference join without dialing again.
        return planner::escalating(&reply, &form.call_sid);
    }

    if s.assistant_reply_count >= state.config.call_flow.escalation_threshold {
        s.advance_phase(Phase::Escalating);
        let task = EscalationTask::from_session(&s);
        drop(s);

        tracing::info!(call_sid = %form.call_sid, "Escalation threshold reached");
        escalation::spawn_escalate(state.clone(), task);
        return planner::escalating(&reply, &form.call_sid);
    }

    planner::continuing(&reply)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // TEST 1: goodbye detection is case-insensitive substring matching
    // ========================================================================
    #[test]
    fn test_contains_goodbye_matching() {
        assert!(contains_goodbye("Goodbye now"));
        assert!(contains_goodbye("okay BYE"));
        assert!(contains_goodbye("please hang up the phone"));
        assert!(contains_goodbye("I want to end call"));
        assert!(!contains_goodbye("I bought a new phone"));
        assert!(!contains_goodbye("I feel terrible today"));
    }

    // ========================================================================
    // TEST 2: every phrase in the list triggers on its own
    // ========================================================================
    #[test]
    fn test_all_goodbye_phrases_trigger() {
        for phrase in GOODBYE_PHRASES {
            assert!(contains_goodbye(phrase), "{phrase} must end the call");
        }
    }
}
