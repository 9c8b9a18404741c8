//! `cloudterm-gateway` binary entry point: wires the parsed [`Config`] into
//! a [`SessionManager`], the placeholder password verifier, the
//! [`Gateway`] router, and the [`Server`] engine, then runs until a signal
//! asks it to stop.

use std::process::ExitCode;
use std::sync::Arc;

use cloudterm_gateway::auth::PlaceholderVerifier;
use cloudterm_gateway::config::Config;
use cloudterm_gateway::gateway::Gateway;
use cloudterm_gateway::session::SessionManager;
use cloudterm_gateway::Server;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// The original server hardcodes this as the one password its placeholder
/// verifier accepts, independent of the configured `--password-hash`
/// (which is only checked for well-formedness). See `auth` module docs.
const PLACEHOLDER_PASSWORD: &str = "cloudterm123";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse_args();

    let proxy_config = match config.proxy_config() {
        Ok(proxy_config) => proxy_config,
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(config.listen_addr()).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, addr = %config.listen_addr(), "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    let session_limits = config.session_limits();
    let sessions = SessionManager::new(session_limits.max_sessions, session_limits.session_timeout);
    let verifier: Arc<dyn cloudterm_gateway::auth::PasswordVerifier> =
        Arc::new(PlaceholderVerifier::new(PLACEHOLDER_PASSWORD));

    let gateway = Gateway::new(
        sessions,
        verifier,
        config.password_hash.clone(),
        config.static_dir.clone(),
        proxy_config,
        config.compression,
    );

    tracing::info!(
        addr = %config.listen_addr(),
        terminal = %config.terminal,
        static_dir = %config.static_dir.display(),
        "starting cloudterm-gateway",
    );

    let server = Server::builder()
        .listener(listener)
        .handler(gateway)
        .server_limits(config.server_limits())
        .connection_limits(config.connection_limits())
        .request_limits(config.request_limits())
        .response_limits(config.response_limits())
        .build();

    server.launch_until(shutdown_signal()).await;

    tracing::info!("shutdown signal received, no longer accepting new connections");
    ExitCode::SUCCESS
}

/// Resolves once SIGINT or SIGTERM is received. SIGPIPE is left to the
/// default `tokio`/libc behavior of being ignored for socket writes (Rust
/// installs `SIG_IGN` for it at process start), so it never needs its own
/// branch here.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
