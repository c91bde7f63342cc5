//! Response planning.
//!
//! Pure mapping from the session's phase and the payload at hand to the
//! outbound response document. Nothing here touches the store, the dialogue
//! responder, or the network — handlers decide *what* happens, the planner
//! decides *what the caller hears*.

use haven_core::models::events::EmergencyContext;
use haven_core::models::session::CallSession;
use haven_core::twiml::{ConferenceJoin, VoiceResponse};

/// Action URL the carrier posts captured speech to.
pub const GATHER_ACTION: &str = "/voice/webhook/gather";

/// Hold-audio loop URL for a participant waiting alone in the conference.
pub const CONFERENCE_WAIT_ACTION: &str = "/voice/webhook/conference-wait";

const HOLD_MUSIC_URL: &str = "https://demo.twilio.com/docs/classic.mp3";

const DEFAULT_SUBJECT_NAME: &str = "friend";

const HANDOFF_LINE: &str =
    "I'm now connecting you with your emergency contact who can provide additional support.";

const CLOSING_LINE: &str = "Thank you for talking with me today. Take care and remember, \
     I'm always here when you need someone to listen. Goodbye!";

/// Deterministic conference id: both legs derive it from the primary call's
/// sid, so no shared lookup is needed to join the same room.
pub fn conference_id(call_sid: &str) -> String {
    format!("crisis_support_{call_sid}")
}

/// Personalized opening line for a freshly answered call.
pub fn greeting_line(session: &CallSession) -> String {
    let name = session.subject_name.as_deref().unwrap_or(DEFAULT_SUBJECT_NAME);

    if session.custom_prompt.is_some() {
        format!(
            "Hello {name}! I'm Haven, your support companion. I'm here to provide \
             immediate support and listen to you. How are you feeling right now?"
        )
    } else if let Some(mood) = session.mood.as_deref().filter(|m| *m != "neutral") {
        format!(
            "Hello {name}! I'm Haven, your support companion. I understand you might \
             be feeling {mood} today. I'm here to listen and support you. How are you doing?"
        )
    } else {
        format!(
            "Hello {name}! I'm Haven, your support companion. I'm here to listen and \
             chat with you. How are you feeling today?"
        )
    }
}

/// Greeting phase: welcome line, then listen. The trailing re-prompt plus
/// redirect only plays if the carrier never triggers the gather action.
pub fn greeting(welcome_line: &str) -> VoiceResponse {
    VoiceResponse::new()
        .say(welcome_line)
        .gather_speech(GATHER_ACTION)
        .say("I didn't catch that. Please try speaking again.")
        .redirect(GATHER_ACTION)
}

/// Low-confidence or empty speech: ask again without mutating anything.
pub fn clarification() -> VoiceResponse {
    VoiceResponse::new()
        .say("I didn't quite catch that. Could you please speak a bit more clearly?")
        .gather_speech(GATHER_ACTION)
        .say("I'm still here if you'd like to try again.")
}

/// Listening phase, conversation continues.
pub fn continuing(reply: &str) -> VoiceResponse {
    VoiceResponse::new()
        .say(reply)
        .gather_speech(GATHER_ACTION)
        .say("I'm still here if you'd like to continue our conversation.")
        .redirect(GATHER_ACTION)
}

/// Escalating phase: speak the reply and the hand-off disclosure, then put
/// the subject into the conference. The subject keeps the room open when the
/// emergency contact leaves (`endConferenceOnExit=false`) and hears the
/// hold loop while alone.
pub fn escalating(reply: &str, call_sid: &str) -> VoiceResponse {
    VoiceResponse::new()
        .say(reply)
        .say(HANDOFF_LINE)
        .dial_conference(ConferenceJoin {
            name: conference_id(call_sid),
            start_conference_on_enter: true,
            end_conference_on_exit: false,
            wait_url: Some(CONFERENCE_WAIT_ACTION.to_string()),
        })
}

/// Ended phase: closing line, hang up.
pub fn ended() -> VoiceResponse {
    VoiceResponse::new().say(CLOSING_LINE).hangup()
}

/// Hold loop while the emergency contact is being dialed. Idempotent per
/// `retry` value — the carrier may redeliver either pass.
pub fn conference_wait(retry: u32) -> VoiceResponse {
    if retry == 0 {
        VoiceResponse::new()
            .say("Please hold while we connect you with your emergency contact.")
            .play(HOLD_MUSIC_URL)
            .pause(10)
            .say("Connecting you now...")
            .redirect(format!("{CONFERENCE_WAIT_ACTION}?retry=1"))
    } else {
        VoiceResponse::new()
            .say("Please continue to hold.")
            .pause(20)
            .say(
                "If your emergency contact doesn't answer, please stay on the line \
                 and I'll continue to support you.",
            )
    }
}

/// Briefing for the emergency contact's leg, then the conference join.
/// Context comes entirely from the callback URL; the primary session is
/// never read here.
pub fn emergency_briefing(ctx: &EmergencyContext, fallback_call_sid: &str) -> VoiceResponse {
    let subject = ctx.user_name.as_deref().unwrap_or("the user");
    let situation = ctx.context.as_deref().unwrap_or("crisis situation");
    let contact = ctx.emergency_contact_name.as_deref().unwrap_or("emergency contact");
    let conference = ctx
        .conference_name
        .clone()
        .unwrap_or_else(|| conference_id(fallback_call_sid));

    VoiceResponse::new()
        .say(format!(
            "Hello {contact}, this is an emergency call regarding {subject}. \
             They are experiencing a crisis and need immediate support. \
             Context: {situation}. \
             Please join the conference to speak with them directly."
        ))
        .dial_conference(ConferenceJoin {
            name: conference,
            start_conference_on_enter: true,
            end_conference_on_exit: false,
            wait_url: None,
        })
}

/// Internal failure while answering: apologize and end cleanly.
pub fn answer_error() -> VoiceResponse {
    VoiceResponse::new()
        .say("I'm sorry, there was an error. Please try calling again later.")
        .hangup()
}

/// Internal failure mid-conversation: apologize and retry the listen loop.
pub fn gather_error() -> VoiceResponse {
    VoiceResponse::new()
        .say("I'm sorry, I'm having trouble understanding right now. Let's try again.")
        .redirect(GATHER_ACTION)
}

/// Internal failure on the conference paths: apologize and hang up.
pub fn conference_error() -> VoiceResponse {
    VoiceResponse::new()
        .say("I'm sorry, there was an error connecting to your emergency contact.")
        .hangup()
}

// ============================================================================
// TESTS
// ============================================================================
