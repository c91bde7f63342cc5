use config::{Config, File};
use serde::Deserialize;

use crate::error::HavenError;

#[derive(Debug, Deserialize, Clone)]
pub struct HavenConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub dialogue: DialogueConfig,
    pub telephony: TelephonyConfig,
    #[serde(default)]
    pub call_flow: CallFlowConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL the carrier uses for webhook callbacks.
    pub public_base_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
            public_base_url: "http://localhost:8780".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DialogueConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelephonyConfig {
    pub from_number: String,
    #[serde(default = "default_carrier_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_carrier_base_url() -> String {
    "https://api.twilio.com".to_string()
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CallFlowConfig {
    /// Assistant replies before the call is bridged to the emergency contact.
    pub escalation_threshold: u32,
    /// Speech recognition confidence below this is treated as not heard.
    pub min_confidence: f64,
    pub session_idle_timeout_minutes: u64,
    pub reaper_interval_seconds: u64,
}

impl Default for CallFlowConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 2,
            min_confidence: 0.3,
            session_idle_timeout_minutes: 30,
            reaper_interval_seconds: 60,
        }
    }
}

impl HavenConfig {
    pub fn load(path: &str) -> Result<Self, HavenError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        Ok(s.try_deserialize()?)
    }
}
