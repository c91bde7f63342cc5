//! Voice response documents.
//!
//! The carrier interprets each webhook reply as an ordered XML document of
//! directives: speak a line, listen for speech, dial into a conference,
//! pause, redirect, hang up. `VoiceResponse` assembles these in order and
//! renders the XML; escaping is handled here so planner code deals in plain
//! text.

use std::fmt::Write;

const VOICE: &str = "alice";
const LANGUAGE: &str = "en-US";

/// Attributes for joining a named audio conference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceJoin {
    pub name: String,
    pub start_conference_on_enter: bool,
    pub end_conference_on_exit: bool,
    /// URL the carrier polls for hold audio while the participant waits alone.
    pub wait_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Directive {
    Say(String),
    /// Listen for speech; the transcript posts to `action`.
    Gather { action: String, timeout_secs: u32 },
    Play(String),
    Pause(u32),
    Redirect(String),
    DialConference(ConferenceJoin),
    Hangup,
}

/// Ordered response document. Every webhook handler must return one of these,
/// whatever happened internally — the carrier has no recovery for a failed
/// webhook mid-call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceResponse {
    directives: Vec<Directive>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.directives.push(Directive::Say(text.into()));
        self
    }

    pub fn gather_speech(mut self, action: impl Into<String>) -> Self {
        self.directives.push(Directive::Gather {
            action: action.into(),
            timeout_secs: 10,
        });
        self
    }

    pub fn play(mut self, url: impl Into<String>) -> Self {
        self.directives.push(Directive::Play(url.into()));
        self
    }

    pub fn pause(mut self, seconds: u32) -> Self {
        self.directives.push(Directive::Pause(seconds));
        self
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.directives.push(Directive::Redirect(url.into()));
        self
    }

    pub fn dial_conference(mut self, join: ConferenceJoin) -> Self {
        self.directives.push(Directive::DialConference(join));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.directives.push(Directive::Hangup);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Render the response document as XML.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(256);
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        xml.push_str("<Response>");
        for directive in &self.directives {
            match directive {
                Directive::Say(text) => {
                    let _ = write!(
                        xml,
                        "<Say voice=\"{VOICE}\" language=\"{LANGUAGE}\">{}</Say>",
                        escape_text(text)
                    );
                }
                Directive::Gather { action, timeout_secs } => {
                    let _ = write!(
                        xml,
                        "<Gather input=\"speech\" action=\"{}\" method=\"POST\" \
                         speechTimeout=\"auto\" timeout=\"{timeout_secs}\" language=\"{LANGUAGE}\"/>",
                        escape_attr(action)
                    );
                }
                Directive::Play(url) => {
                    let _ = write!(xml, "<Play>{}</Play>", escape_text(url));
                }
                Directive::Pause(seconds) => {
                    let _ = write!(xml, "<Pause length=\"{seconds}\"/>");
                }
                Directive::Redirect(url) => {
                    let _ = write!(xml, "<Redirect>{}</Redirect>", escape_text(url));
                }
                Directive::DialConference(join) => {
                    xml.push_str("<Dial><Conference");
                    let _ = write!(
                        xml,
                        " startConferenceOnEnter=\"{}\" endConferenceOnExit=\"{}\"",
                        join.start_conference_on_enter, join.end_conference_on_exit
                    );
                    if let Some(wait_url) = &join.wait_url {
                        let _ = write!(xml, " waitUrl=\"{}\"", escape_attr(wait_url));
                    }
                    let _ = write!(xml, ">{}</Conference></Dial>", escape_text(&join.name));
                }
                Directive::Hangup => xml.push_str("<Hangup/>"),
            }
        }
        xml.push_str("</Response>");
        xml
    }
}

fn escape_text(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(raw: &str) -> String {
    escape_text(raw).replace('"', "&quot;")
}
