//! Command-line configuration, parsed with `clap`'s derive API and
//! validated into the engine's native limit structs.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::errors::GatewayError;
use crate::limits::{ConnLimits, ProxyConfig, ReqLimits, RespLimits, ServerLimits, SessionLimits};

/// `cloudterm-gateway` CLI surface (see `--help` for the generated usage).
#[derive(Debug, Parser)]
#[command(name = "cloudterm-gateway", about = "HTTP/WebSocket gateway in front of a backend terminal service", version)]
pub struct Config {
    /// Address to bind the listener to.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind the listener to.
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    /// Root directory served for non-API, non-upgrade requests.
    #[arg(long = "static-dir", default_value = "./static")]
    pub static_dir: PathBuf,

    /// Backend terminal service, as `host:port`.
    #[arg(long, default_value = "127.0.0.1:7681")]
    pub terminal: String,

    /// bcrypt hash checked against the `password` field of `POST /api/login`.
    #[arg(long = "password-hash", default_value_t = crate::auth::placeholder_hash().to_string())]
    pub password_hash: String,

    /// Maximum number of concurrently processed connections.
    #[arg(long = "max-connections", default_value_t = 10_000)]
    pub max_connections: usize,

    /// Maximum number of concurrently live sessions.
    #[arg(long = "max-sessions", default_value_t = 1_000)]
    pub max_sessions: usize,

    /// Idle session lifetime, in seconds.
    #[arg(long = "session-timeout", default_value_t = 86_400)]
    pub session_timeout_secs: u64,

    /// Gzip-encode static responses when the client advertises `Accept-Encoding: gzip`.
    #[arg(long, default_value_t = false)]
    pub compression: bool,

    /// Reserved for TLS termination; not implemented (see DESIGN.md).
    #[arg(long, default_value_t = false)]
    pub ssl: bool,
}

impl Config {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Splits `--terminal host:port` into its components.
    pub fn terminal_addr(&self) -> Result<(String, u16), GatewayError> {
        let (host, port) = self
            .terminal
            .rsplit_once(':')
            .ok_or_else(|| GatewayError::Configuration(format!("invalid --terminal value: {}", self.terminal)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| GatewayError::Configuration(format!("invalid --terminal port: {port}")))?;
        Ok((host.to_string(), port))
    }

    pub fn server_limits(&self) -> ServerLimits {
        ServerLimits {
            max_connections: self.max_connections,
            ..ServerLimits::default()
        }
    }

    pub fn connection_limits(&self) -> ConnLimits {
        ConnLimits::default()
    }

    pub fn request_limits(&self) -> ReqLimits {
        ReqLimits::default()
    }

    pub fn response_limits(&self) -> RespLimits {
        RespLimits::default()
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_sessions: self.max_sessions,
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            _priv: (),
        }
    }

    pub fn proxy_config(&self) -> Result<ProxyConfig, GatewayError> {
        let (backend_host, backend_port) = self.terminal_addr()?;
        Ok(ProxyConfig {
            backend_host,
            backend_port,
            backend_path: "/ws".to_string(),
            _priv: (),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::parse_from(["cloudterm-gateway"]);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_connections, 10_000);
        assert_eq!(cfg.max_sessions, 1_000);
        assert_eq!(cfg.session_timeout_secs, 86_400);
        assert!(!cfg.compression);
    }

    #[test]
    fn terminal_addr_splits_host_and_port() {
        let cfg = Config::parse_from(["cloudterm-gateway", "--terminal", "10.0.0.5:8081"]);
        assert_eq!(cfg.terminal_addr().unwrap(), ("10.0.0.5".to_string(), 8081));
    }

    #[test]
    fn terminal_addr_rejects_missing_port() {
        let cfg = Config::parse_from(["cloudterm-gateway", "--terminal", "notahostport"]);
        assert!(cfg.terminal_addr().is_err());
    }
}
