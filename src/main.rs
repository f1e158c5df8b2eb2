//! `switchboard` binary entry point.
//!
//! Application handlers are out of scope for this crate (see the module
//! docs): this binary wires up the ambient stack — configuration, logging,
//! the dispatch core, the reaper, and the WebSocket listener — around an
//! empty [`RpcApi`]. A real deployment builds its own `RpcApi`, registers
//! its endpoints, and calls [`switchboard::server::Switchboard::new`]
//! directly rather than running this binary as-is.

use anyhow::Result;
use ortho_config::OrthoConfig;
use switchboard::config::AppConfig;
use switchboard::facade::RpcApi;
use switchboard::server::{Switchboard, reap_pending};
use switchboard::transport;
use tracing::info;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load_from_iter(std::env::args())?;
    init_tracing(cfg.verbose);

    let server = std::sync::Arc::new(Switchboard::new(RpcApi::new(), cfg.server_config()));
    tokio::spawn(reap_pending(std::sync::Arc::clone(&server), cfg.reap_interval()));

    let listener = tokio::net::TcpListener::bind(&cfg.bind).await?;
    info!(bind = %cfg.bind, "switchboard listening");

    let server_for_shutdown = std::sync::Arc::clone(&server);
    axum::serve(listener, transport::router(server))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    server_for_shutdown.teardown();

    info!("switchboard shut down");
    Ok(())
}
