use thiserror::Error;

#[derive(Error, Debug)]
pub enum HavenError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dialogue responder error: {0}")]
    Dialogue(#[from] crate::dialogue::DialogueError),

    #[error("Telephony error: {0}")]
    Telephony(#[from] crate::telephony::TelephonyError),

    #[error("Other error: {0}")]
    Other(String),
}
