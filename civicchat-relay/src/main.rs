//! `CivicChat` relay -- reference event hub and history server.
//!
//! An axum server exposing the `/ws` event stream and the REST history
//! endpoints the `CivicChat` client talks to. Messages are kept in memory.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000, accepting any non-empty token
//! cargo run --bin civicchat-relay
//!
//! # Custom address and a shared token
//! cargo run --bin civicchat-relay -- --bind 127.0.0.1:8080 --auth-token s3cret
//!
//! # Or via environment variables
//! RELAY_ADDR=127.0.0.1:8080 RELAY_AUTH_TOKEN=s3cret cargo run --bin civicchat-relay
//! ```

use std::sync::Arc;

use civicchat_relay::config::{RelayCliArgs, RelayConfig};
use civicchat_relay::relay::{self, RelayState};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        auth = config.auth_token.is_some(),
        "starting civicchat relay"
    );

    let state = Arc::new(RelayState::with_config(&config));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay");
            std::process::exit(1);
        }
    }
}
