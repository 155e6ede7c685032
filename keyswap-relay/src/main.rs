//! Keyswap relay server -- pairs two clients per room and relays between them.
//!
//! An axum WebSocket server. Clients connect to `/{room}?public_key=<key>`;
//! when a second client joins the same room both receive each other's key,
//! after which `chatting` messages are forwarded between them. The relay
//! never inspects or validates the keys.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8501
//! cargo run --bin keyswap-relay
//!
//! # Run on custom address, closing connections idle for 10 minutes
//! cargo run --bin keyswap-relay -- --bind 127.0.0.1:8080 --idle-timeout-secs 600
//!
//! # Or via environment variable
//! KEYSWAP_ADDR=127.0.0.1:8080 cargo run --bin keyswap-relay
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use keyswap_relay::config::{RelayCliArgs, RelayConfig};
use keyswap_relay::relay::{self, RelayState};
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Keep the guard alive so buffered log lines are flushed on exit.
    let _log_guard = init_tracing(&config.log_level, config.log_file.as_deref());

    tracing::info!(addr = %config.bind_addr, "starting keyswap relay server");
    if let Some(timeout) = config.idle_timeout {
        tracing::info!(timeout = ?timeout, "idle timeout enabled");
    }

    let state = Arc::new(RelayState::with_config(
        config.max_message_size,
        config.idle_timeout,
    ));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}

/// Initialize tracing to stdout, or to `log_file` when one is configured.
///
/// Returns the appender guard when logging to a file.
fn init_tracing(level: &str, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(path) = log_file else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return None;
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map_or_else(|| "keyswap-relay.log".into(), |n| n.to_os_string());

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
