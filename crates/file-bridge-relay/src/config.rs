//! Relay configuration from command-line flags and environment variables.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use file_bridge_core::{
    BridgeConfig,
    config::{DEFAULT_CALL_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT},
};
use file_bridge_transport::DEFAULT_MAX_UPLOAD_BYTES;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "file-bridge-relay",
    about = "Public relay between file bridge agents and HTTP clients",
    version
)]
pub struct RelayArgs {
    /// Full listen address (e.g., 127.0.0.1:3000); overrides --port
    #[arg(long, env = "BIND_ADDR")]
    pub bind_addr: Option<SocketAddr>,

    /// Port to listen on, on all interfaces
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Largest accepted upload, in bytes
    #[arg(long, env = "MAX_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_bytes: usize,

    /// Only session token accepted from agents and clients; unset or empty
    /// accepts any non-empty token
    #[arg(long, env = "BRIDGE_TOKEN")]
    pub bridge_token: Option<String>,

    /// Seconds a call waits for the agent's reply
    #[arg(long, env = "CALL_TIMEOUT_SECS", default_value_t = DEFAULT_CALL_TIMEOUT.as_secs())]
    pub call_timeout_secs: u64,

    /// Seconds a new agent connection has to send its token
    #[arg(
        long,
        env = "HANDSHAKE_TIMEOUT_SECS",
        default_value_t = DEFAULT_HANDSHAKE_TIMEOUT.as_secs()
    )]
    pub handshake_timeout_secs: u64,
}

/// Settings for the relay process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Listen address.
    pub bind: SocketAddr,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    /// Bridge timeouts and required token.
    pub bridge: BridgeConfig,
}

impl From<RelayArgs> for RelayConfig {
    fn from(args: RelayArgs) -> Self {
        let mut bridge = BridgeConfig::default()
            .with_call_timeout(Duration::from_secs(args.call_timeout_secs))
            .with_handshake_timeout(Duration::from_secs(args.handshake_timeout_secs));
        if let Some(token) = args.bridge_token.filter(|token| !token.trim().is_empty()) {
            bridge = bridge.with_required_token(token);
        }

        Self {
            bind: args
                .bind_addr
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], args.port))),
            max_upload_bytes: args.max_bytes,
            bridge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(flags: &[&str]) -> Result<RelayConfig, clap::Error> {
        RelayArgs::try_parse_from(std::iter::once("file-bridge-relay").chain(flags.iter().copied()))
            .map(RelayConfig::from)
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
        assert_eq!(config.bridge, BridgeConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            "--port",
            "10000",
            "--max-bytes",
            "1024",
            "--bridge-token",
            "secret",
            "--call-timeout-secs",
            "30",
            "--handshake-timeout-secs",
            "5",
        ])
        .unwrap();
        assert_eq!(config.bind.port(), 10000);
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.bridge.required_token.as_deref(), Some("secret"));
        assert_eq!(config.bridge.call_timeout, Duration::from_secs(30));
        assert_eq!(config.bridge.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_bind_addr_wins_over_port() {
        let config = config(&["--bind-addr", "127.0.0.1:3000", "--port", "9"]).unwrap();
        assert_eq!(config.bind, "127.0.0.1:3000".parse().unwrap());
    }

    #[test]
    fn test_empty_token_means_open() {
        let config = config(&["--bridge-token", ""]).unwrap();
        assert_eq!(config.bridge.required_token, None);
    }

    #[test]
    fn test_invalid_value() {
        let err = config(&["--max-bytes", "lots"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_args_are_well_formed() {
        use clap::CommandFactory;
        RelayArgs::command().debug_assert();
    }
}
