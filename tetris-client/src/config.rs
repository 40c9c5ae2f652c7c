//! Client configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tetris_core::{HeartbeatConfig, ReconnectPolicy, TetrisError};
use tracing_subscriber::EnvFilter;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address. `ws://` and `wss://` addresses use WebSockets;
    /// anything else is dialed as a plain TCP `host:port`.
    pub remote: String,
    /// Channel to join.
    pub channel: u32,
    /// User id sent in the frontend handshake.
    pub user: u64,
    /// Auth key obtained from the API.
    pub key: String,
    /// Connect to the playbook endpoint instead of a channel.
    pub playbook: bool,
    /// Minimum time between two frontend reports, in milliseconds.
    pub report_interval_ms: u64,
    /// Log every inbound and outbound frame.
    pub debug: bool,
    /// Liveness probing. Only applies to transports with a native ping
    /// (WebSockets).
    pub ping: HeartbeatConfig,
    /// Reconnect after the connection is lost.
    pub reconnect: bool,
    /// Delay between reconnect attempts.
    pub backoff: ReconnectPolicy,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `"info"` or
    /// `"tetris_core=debug"`.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote: "ws://127.0.0.1:3443".into(),
            channel: 0,
            user: 0,
            key: String::new(),
            playbook: false,
            report_interval_ms: 50,
            debug: false,
            ping: HeartbeatConfig::default(),
            reconnect: true,
            backoff: ReconnectPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Rejects settings no client can run with.
    pub fn validate(&self) -> Result<(), TetrisError> {
        if self.remote.trim().is_empty() {
            return Err(TetrisError::Config("remote address is empty".into()));
        }
        if self.ping.interval_ms == 0 {
            return Err(TetrisError::Config("ping interval must be positive".into()));
        }
        if !self.playbook && self.report_interval_ms == 0 {
            return Err(TetrisError::Config(
                "report interval is required outside playbook mode".into(),
            ));
        }
        Ok(())
    }

    /// Whether the remote is a WebSocket address.
    pub fn is_websocket(&self) -> bool {
        self.remote.starts_with("ws://") || self.remote.starts_with("wss://")
    }

    fn base(&self) -> &str {
        self.remote.trim_end_matches('/')
    }

    /// Robot endpoint: `<remote>/robot` over WebSockets, the bare address
    /// over TCP.
    pub fn robot_endpoint(&self) -> String {
        if self.is_websocket() {
            format!("{}/robot", self.base())
        } else {
            self.base().to_owned()
        }
    }

    /// Frontend endpoint: `<remote>/playbook` in playbook mode, otherwise
    /// `<remote>/play/<channel>`.
    pub fn frontend_endpoint(&self) -> String {
        if self.playbook {
            format!("{}/playbook", self.base())
        } else {
            format!("{}/play/{}", self.base(), self.channel)
        }
    }

    /// Backoff policy, if reconnecting is enabled.
    pub fn reconnect_policy(&self) -> Option<ReconnectPolicy> {
        self.reconnect.then(|| self.backoff.clone())
    }
}

impl LoggingConfig {
    /// Installs a `tracing` subscriber writing to stderr. `RUST_LOG` takes
    /// precedence over `level`. Does nothing if a subscriber is already set.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    }
}

// ── Tests ────────────────────────────────────────────────────────
