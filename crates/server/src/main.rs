//! Council Relay
//!
//! Streaming-safe HTTP relay in front of the council analysis engine.
//! Ordinary requests pass through; analysis streams are forwarded chunk by
//! chunk with buffering disabled end to end.

mod config;
mod logging;
mod paths;
mod relay;
mod state;

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::config::RelayConfig;
use crate::logging::init_logging;
use crate::state::RelayState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::parse();

    let data_dir = paths::init_data_dir(config.data_dir.as_deref())?;
    if !config.log_stderr {
        paths::ensure_dirs()?;
    }
    let logging = init_logging(&paths::log_dir(), config.log_stderr)?;

    let routes = config.routes();
    info!(
        component = "relay",
        event = "relay.starting",
        run_id = %logging.run_id,
        bind = %config.bind,
        upstream = %routes.upstream(),
        prefix = %routes.prefix(),
        strip_prefix = config.strip_prefix,
        data_dir = %data_dir.display(),
        version = env!("CARGO_PKG_VERSION"),
    );

    let state = Arc::new(RelayState::new(routes, config.connect_timeout())?);
    let app = relay::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(
        component = "relay",
        event = "relay.listening",
        addr = %listener.local_addr()?,
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(component = "relay", event = "relay.stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            component = "relay",
            event = "relay.signal_failed",
            error = %e,
        );
        std::future::pending::<()>().await;
    }
}
