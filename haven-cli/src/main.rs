//! haven-cli — operator frontend for the Haven voice support server
//!
//! # Subcommands
//! - `call <to-number> [options]` — initiate an outbound support call
//! - `sessions`                   — list live call sessions
//! - `end <call-sid>`             — force-close a session
//! - `status`                     — show server health

use clap::{Parser, Subcommand};
use serde::Serialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "haven-cli",
    version,
    about = "Haven voice crisis-support companion — operator CLI"
)]
struct Cli {
    /// Haven HTTP server URL (overrides HAVEN_HTTP_URL env var)
    #[arg(long, env = "HAVEN_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Initiate an outbound support call
    Call {
        /// Number to dial, E.164 (e.g. +15551234567)
        to_number: String,

        /// Name of the person being called
        #[arg(long)]
        name: Option<String>,

        /// Detected mood to open the conversation with (e.g. sad, anxious)
        #[arg(long)]
        mood: Option<String>,

        /// Upstream risk score in [0, 1]
        #[arg(long)]
        risk_score: Option<f64>,

        /// Custom conversation prompt for the dialogue responder
        #[arg(long)]
        custom_prompt: Option<String>,

        /// Emergency contact number, E.164 — enables escalation
        #[arg(long)]
        emergency_number: Option<String>,

        /// Emergency contact's name, used in the briefing
        #[arg(long)]
        emergency_contact_name: Option<String>,

        /// Situation context passed to the emergency contact
        #[arg(long)]
        context: Option<String>,
    },

    /// List live call sessions
    Sessions,

    /// Force-close a live session
    End {
        /// Carrier call sid of the session to close
        call_sid: String,
    },

    /// Show Haven server status
    Status,
}

// ============================================================================
// Request payloads
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CallRequest {
    pub to_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_mood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn http_client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?)
}

/// Initiate a call via POST /calls.
fn do_call(server: &str, request: &CallRequest) -> anyhow::Result<()> {
    let client = http_client()?;
    let url = format!("{}/calls", server);

    let resp = match client.post(&url).json(request).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("haven-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();

    if !status.is_success() {
        eprintln!(
            "haven-cli: server returned {}: {}",
            status,
            body["error"].as_str().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    println!("Call initiated");
    println!("Call SID: {}", body["call_sid"].as_str().unwrap_or("?"));
    println!("Status:   {}", body["call_status"].as_str().unwrap_or("?"));
    Ok(())
}

/// List live sessions via GET /sessions.
fn do_sessions(server: &str) -> anyhow::Result<()> {
    let client = http_client()?;
    let url = format!("{}/sessions", server);

    let resp = match client.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("haven-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    };

    let body: serde_json::Value = resp.json().unwrap_or_default();
    let sessions = body["sessions"].as_array().cloned().unwrap_or_default();

    if sessions.is_empty() {
        println!("No live sessions");
        return Ok(());
    }

    println!("{} live session(s):", sessions.len());
    for s in &sessions {
        println!(
            "  {}  phase={}  turns={}  last_activity={}",
            s["call_sid"].as_str().unwrap_or("?"),
            s["phase"].as_str().unwrap_or("?"),
            s["message_count"].as_u64().unwrap_or(0),
            s["last_activity_at"].as_str().unwrap_or("?"),
        );
    }
    Ok(())
}

/// Force-close a session via DELETE /sessions/{call_sid}.
fn do_end(server: &str, call_sid: &str) -> anyhow::Result<()> {
    let client = http_client()?;
    let url = format!("{}/sessions/{}", server, call_sid);

    let resp = match client.delete(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("haven-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    };

    if resp.status().is_success() {
        println!("Session {} closed", call_sid);
    } else {
        eprintln!("haven-cli: no session for {}", call_sid);
        std::process::exit(1);
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = http_client()?;
    let url = format!("{}/health", server);

    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Haven server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!(
                "Carrier:      {}",
                if body["carrier_configured"].as_bool().unwrap_or(false) {
                    "configured"
                } else {
                    "not configured"
                }
            );
            println!("Responder:    {}", body["dialogue_responder"].as_str().unwrap_or("?"));
            println!("Sessions:     {}", body["live_sessions"].as_u64().unwrap_or(0));
        }
        Ok(r) => {
            eprintln!("haven-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("haven-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Call {
            to_number,
            name,
            mood,
            risk_score,
            custom_prompt,
            emergency_number,
            emergency_contact_name,
            context,
        } => {
            let request = CallRequest {
                to_number,
                name,
                initial_mood: mood,
                risk_score,
                custom_prompt,
                emergency_number,
                emergency_contact_name,
                context,
            };
            do_call(&server, &request)
        }
        Commands::Sessions => do_sessions(&server),
        Commands::End { call_sid } => do_end(&server, &call_sid),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("haven-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
