//! Haven server binary.
//!
//! Wires config, the dialogue responder client, the carrier call client, the
//! session store, the idle-session reaper, and the HTTP surface together,
//! then runs until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use haven_core::{
    CallInitiator, CarrierCallClient, CarrierCredentials, HavenConfig, HttpDialogueClient,
    UnconfiguredCallInitiator,
};
use haven_server::http::{start_http_server, AppState};
use haven_server::subsystems::reaper;
use haven_server::subsystems::sessions::CallSessionStore;

#[derive(Parser, Debug)]
#[command(name = "haven-server", about = "Voice crisis-support companion server")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "haven.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Carrier credentials may live in a local .env during development.
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match HavenConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", args.config);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.clone())),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting haven-server");

    let public_base = config.http.public_base_url.trim_end_matches('/');
    let status_callback_url = format!("{public_base}/voice/webhook/status");

    let telephony: Arc<dyn CallInitiator> = match CarrierCredentials::from_env() {
        Ok(credentials) => Arc::new(CarrierCallClient::new(
            &config.telephony,
            credentials,
            Some(status_callback_url),
        )?),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Carrier credentials missing, outbound dialing disabled"
            );
            Arc::new(UnconfiguredCallInitiator)
        }
    };

    let dialogue = HttpDialogueClient::new(
        config.dialogue.base_url.clone(),
        Duration::from_secs(config.dialogue.timeout_seconds),
    )?;

    let store = Arc::new(CallSessionStore::new());
    let state = Arc::new(AppState {
        config: config.clone(),
        store: store.clone(),
        dialogue: Arc::new(dialogue),
        telephony,
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received ctrl-c, shutting down");
                let _ = shutdown_tx.send(());
            }
        });
    }

    tokio::spawn(reaper::run_reaper_loop(
        store,
        config.call_flow.clone(),
        shutdown_tx.subscribe(),
    ));

    start_http_server(state, shutdown_tx.subscribe()).await?;

    tracing::info!("haven-server stopped");
    Ok(())
}
