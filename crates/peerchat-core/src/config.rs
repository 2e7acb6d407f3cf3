//! Configuration system for Peerchat.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PEERCHAT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/peerchat/config.toml
//!   3. ~/.config/peerchat/config.toml
//!
//! The listening port is not configured here; it is the one required
//! command-line argument.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerchatConfig {
    pub network: NetworkConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the listener binds to.
    pub bind_addr: IpAddr,
    /// Address reported by `myip` and used for self-connection checks.
    /// Unset = discover the outbound interface address.
    pub advertise_ip: Option<IpAddr>,
    /// Upper bound on an outbound TCP connect (and name resolution).
    pub connect_timeout_secs: u64,
    /// How long an accepted socket may take to announce its listening port.
    pub handshake_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// tracing EnvFilter directive. RUST_LOG wins when set.
    pub filter: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_ip: None,
            connect_timeout_secs: 10,
            handshake_timeout_ms: 2_000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("peerchat")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PeerchatConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            PeerchatConfig::default()
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PEERCHAT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply PEERCHAT_* overrides. `lookup` stands in for `std::env::var`.
    fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var, value })
        }

        const BIND_ADDR: &str = "PEERCHAT_NETWORK__BIND_ADDR";
        const ADVERTISE_IP: &str = "PEERCHAT_NETWORK__ADVERTISE_IP";
        const CONNECT_TIMEOUT: &str = "PEERCHAT_NETWORK__CONNECT_TIMEOUT_SECS";
        const HANDSHAKE_TIMEOUT: &str = "PEERCHAT_NETWORK__HANDSHAKE_TIMEOUT_MS";
        const LOG_FILTER: &str = "PEERCHAT_LOG__FILTER";

        if let Some(v) = lookup(BIND_ADDR) {
            self.network.bind_addr = parse(BIND_ADDR, v)?;
        }
        if let Some(v) = lookup(ADVERTISE_IP) {
            self.network.advertise_ip = if v.trim().is_empty() {
                None
            } else {
                Some(parse(ADVERTISE_IP, v)?)
            };
        }
        if let Some(v) = lookup(CONNECT_TIMEOUT) {
            self.network.connect_timeout_secs = parse(CONNECT_TIMEOUT, v)?;
        }
        if let Some(v) = lookup(HANDSHAKE_TIMEOUT) {
            self.network.handshake_timeout_ms = parse(HANDSHAKE_TIMEOUT, v)?;
        }
        if let Some(v) = lookup(LOG_FILTER) {
            self.log.filter = v;
        }
        Ok(())
    }
}
