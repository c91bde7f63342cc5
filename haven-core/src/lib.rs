pub mod config;
pub mod dialogue;
pub mod error;
pub mod models;
pub mod telephony;
pub mod twiml;

pub use config::HavenConfig;
pub use dialogue::{
    DialogueError, DialogueResponder, HttpDialogueClient, ReplyRequest,
    FALLBACK_RESPONDER_ERROR, FALLBACK_TRANSPORT_ERROR,
};
pub use error::HavenError;
pub use telephony::{
    CallInitiator, CarrierCallClient, CarrierCredentials, PlacedCall, TelephonyError,
    UnconfiguredCallInitiator,
};
pub use twiml::VoiceResponse;
