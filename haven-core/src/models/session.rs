//! Per-call conversational state.
//!
//! One `CallSession` exists per live call, keyed by the carrier's opaque
//! `CallSid`. Sessions are in-memory only and die with the call (or the
//! process) — durability is explicitly out of scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    User,
}

/// One role-tagged utterance in the conversation history. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Position of a call in its lifecycle. Transitions only move forward
/// (`Greeting → Listening → Escalating → Ended`, or any phase straight to
/// `Ended`); `Ended` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Greeting,
    Listening,
    Escalating,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub number: String,
    pub name: Option<String>,
}

/// Result of the single escalation dial attempt, recorded for observability.
/// Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum EscalationOutcome {
    NotAttempted,
    /// No emergency contact on the session — silent degrade, not an error.
    Skipped,
    Dialed { call_sid: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub call_sid: String,
    pub turns: Vec<Turn>,
    pub phase: Phase,
    pub user_turn_count: u32,
    /// Dialogue-responder replies since entering `Listening`; drives the
    /// escalation threshold.
    pub assistant_reply_count: u32,
    pub mood: Option<String>,
    pub risk_score: Option<f64>,
    pub emergency_contact: Option<EmergencyContact>,
    pub subject_name: Option<String>,
    pub context_note: Option<String>,
    pub custom_prompt: Option<String>,
    pub escalation: EscalationOutcome,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(call_sid: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            call_sid: call_sid.into(),
            turns: Vec::new(),
            phase: Phase::Greeting,
            user_turn_count: 0,
            assistant_reply_count: 0,
            mood: None,
            risk_score: None,
            emergency_contact: None,
            subject_name: None,
            context_note: None,
            custom_prompt: None,
            escalation: EscalationOutcome::NotAttempted,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Append a turn to the history and bump the activity timestamp.
    /// User turns count toward `user_turn_count` regardless of content.
    pub fn push_turn(&mut self, role: Role, text: impl Into<String>) {
        let now = Utc::now();
        self.turns.push(Turn {
            role,
            text: text.into(),
            timestamp: now,
        });
        if role == Role::User {
            self.user_turn_count += 1;
        }
        self.last_activity_at = now;
    }

    /// Advance the phase. Returns `false` (and leaves the session untouched)
    /// if the move would go backwards or leave `Ended`.
    pub fn advance_phase(&mut self, to: Phase) -> bool {
        if self.phase == Phase::Ended || to < self.phase {
            return false;
        }
        self.phase = to;
        self.last_activity_at = Utc::now();
        true
    }

    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // TEST 1: new session starts in Greeting with empty history
    // ========================================================================
    #[test]
    fn test_new_session_initial_state() {
        let s = CallSession::new("CA123");
        assert_eq!(s.phase, Phase::Greeting);
        assert!(s.turns.is_empty());
        assert_eq!(s.user_turn_count, 0);
        assert_eq!(s.assistant_reply_count, 0);
        assert_eq!(s.escalation, EscalationOutcome::NotAttempted);
    }

    // ========================================================================
    // TEST 2: user turns increment the counter, assistant turns do not
    // ========================================================================
    #[test]
    fn test_push_turn_counts_user_turns_only() {
        let mut s = CallSession::new("CA123");
        s.push_turn(Role::Assistant, "Hello!");
        s.push_turn(Role::User, "hi");
        s.push_turn(Role::User, "how are you");
        assert_eq!(s.user_turn_count, 2);
        assert_eq!(s.turns.len(), 3);
    }

    // ========================================================================
    // TEST 3: phase only moves forward
    // ========================================================================
    #[test]
    fn test_phase_forward_only() {
        let mut s = CallSession::new("CA123");
        assert!(s.advance_phase(Phase::Listening));
        assert!(!s.advance_phase(Phase::Greeting), "must not revisit Greeting");
        assert_eq!(s.phase, Phase::Listening);
        assert!(s.advance_phase(Phase::Escalating));
        assert!(s.advance_phase(Phase::Ended));
    }

    // ========================================================================
    // TEST 4: Ended is absorbing
    // ========================================================================
    #[test]
    fn test_ended_is_absorbing() {
        let mut s = CallSession::new("CA123");
        assert!(s.advance_phase(Phase::Ended));
        assert!(!s.advance_phase(Phase::Listening));
        assert!(!s.advance_phase(Phase::Escalating));
        assert!(!s.advance_phase(Phase::Ended));
        assert_eq!(s.phase, Phase::Ended);
    }

    // ========================================================================
    // TEST 5: any phase may jump straight to Ended
    // ========================================================================
    #[test]
    fn test_greeting_to_ended_allowed() {
        let mut s = CallSession::new("CA123");
        assert!(s.advance_phase(Phase::Ended));
        assert!(s.is_ended());
    }

    // ========================================================================
    // TEST 6: push_turn advances last_activity_at
    // ========================================================================
    #[test]
    fn test_push_turn_touches_activity_timestamp() {
        let mut s = CallSession::new("CA123");
        let before = s.last_activity_at;
        s.push_turn(Role::User, "hello");
        assert!(s.last_activity_at >= before);
    }
}
