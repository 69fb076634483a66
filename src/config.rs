//! Service configuration loaded from environment variables.
//!
//! Call [`PairingConfig::from_env`] after `dotenvy::dotenv()` so a local
//! `.env` file can supply values. Every variable is optional.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;
use crate::pairing::TargetFormat;

/// Client version reported to callers and passed to the transport.
pub const DEFAULT_CLIENT_VERSION: [u32; 3] = [2, 3000, 1015901307];

/// Upper bound for the credential wipe grace delay.
const MAX_CLEANUP_GRACE: Duration = Duration::from_secs(5);

/// Client version triple, serialized as a JSON array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ClientVersion(pub [u32; 3]);

impl Default for ClientVersion {
    fn default() -> Self {
        Self(DEFAULT_CLIENT_VERSION)
    }
}

impl std::fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [major, minor, patch] = self.0;
        write!(f, "{}.{}.{}", major, minor, patch)
    }
}

impl FromStr for ClientVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(format!("expected three dot-separated numbers, got '{}'", s));
        }
        let mut out = [0u32; 3];
        for (slot, part) in out.iter_mut().zip(parts) {
            *slot = part
                .parse()
                .map_err(|e| format!("invalid version component '{}': {}", part, e))?;
        }
        Ok(Self(out))
    }
}

/// Timing knobs for one pairing session.
#[derive(Debug, Clone)]
pub struct SessionTimings {
    /// Overall deadline from transport open to a terminal stage.
    pub deadline: Duration,
    /// Wait after the transport opens before inspecting registration state.
    pub connect_settle: Duration,
    /// Wait after the link is confirmed before reading the artifact.
    pub stabilization: Duration,
    /// Wait after delivery before releasing the session.
    pub linger: Duration,
    /// Wait before wiping credentials once observers were attached.
    pub cleanup_grace: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(180),
            connect_settle: Duration::from_millis(3000),
            stabilization: Duration::from_millis(3000),
            linger: Duration::from_millis(2000),
            cleanup_grace: Duration::from_millis(3000),
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct PairingConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Root directory of the filesystem credential store.
    pub session_dir: PathBuf,
    /// Namespace wiped at the start and end of every session.
    pub session_namespace: String,
    pub timings: SessionTimings,
    /// Suggested retry interval returned with a busy rejection.
    pub retry_after: Duration,
    pub target_format: TargetFormat,
    pub client_version: ClientVersion,
    /// Client descriptor handed to the transport (name, platform, release).
    pub browser: [String; 3],
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8000,
            session_dir: PathBuf::from("./session-store"),
            session_namespace: "session".to_string(),
            timings: SessionTimings::default(),
            retry_after: Duration::from_secs(30),
            target_format: TargetFormat::LeadingPlus,
            client_version: ClientVersion::default(),
            browser: [
                "Chrome".to_string(),
                "Windows".to_string(),
                "10.0.0".to_string(),
            ],
        }
    }
}

impl PairingConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("PAIRGATE_HOST") {
            config.host = parse_value("PAIRGATE_HOST", &v)?;
        }
        if let Some(v) = lookup("PAIRGATE_PORT") {
            config.port = parse_value("PAIRGATE_PORT", &v)?;
        }
        if let Some(v) = lookup("PAIRGATE_SESSION_DIR") {
            config.session_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PAIRGATE_SESSION_NAMESPACE") {
            config.session_namespace = parse_namespace(&v)?;
        }
        if let Some(v) = lookup("PAIRGATE_DEADLINE_SECS") {
            config.timings.deadline = Duration::from_secs(parse_value("PAIRGATE_DEADLINE_SECS", &v)?);
        }
        if let Some(v) = lookup("PAIRGATE_CONNECT_SETTLE_MS") {
            config.timings.connect_settle =
                Duration::from_millis(parse_value("PAIRGATE_CONNECT_SETTLE_MS", &v)?);
        }
        if let Some(v) = lookup("PAIRGATE_STABILIZATION_MS") {
            config.timings.stabilization =
                Duration::from_millis(parse_value("PAIRGATE_STABILIZATION_MS", &v)?);
        }
        if let Some(v) = lookup("PAIRGATE_LINGER_MS") {
            config.timings.linger = Duration::from_millis(parse_value("PAIRGATE_LINGER_MS", &v)?);
        }
        if let Some(v) = lookup("PAIRGATE_CLEANUP_GRACE_MS") {
            let grace = Duration::from_millis(parse_value("PAIRGATE_CLEANUP_GRACE_MS", &v)?);
            if grace > MAX_CLEANUP_GRACE {
                return Err(ConfigError::InvalidValue {
                    key: "PAIRGATE_CLEANUP_GRACE_MS".to_string(),
                    message: format!("must not exceed {}ms", MAX_CLEANUP_GRACE.as_millis()),
                });
            }
            config.timings.cleanup_grace = grace;
        }
        if let Some(v) = lookup("PAIRGATE_RETRY_AFTER_SECS") {
            config.retry_after = Duration::from_secs(parse_value("PAIRGATE_RETRY_AFTER_SECS", &v)?);
        }
        if let Some(v) = lookup("PAIRGATE_TARGET_FORMAT") {
            config.target_format = parse_value("PAIRGATE_TARGET_FORMAT", &v)?;
        }
        if let Some(v) = lookup("PAIRGATE_CLIENT_VERSION") {
            config.client_version = parse_value("PAIRGATE_CLIENT_VERSION", &v)?;
        }
        if let Some(v) = lookup("PAIRGATE_BROWSER") {
            config.browser = parse_browser(&v)?;
        }

        if config.timings.deadline.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "PAIRGATE_DEADLINE_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(config)
    }

    /// Socket address the HTTP entry point binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{}': {}", raw, e),
        })
}

fn parse_namespace(raw: &str) -> Result<String, ConfigError> {
    let ns = raw.trim();
    let valid = !ns.is_empty()
        && ns
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ConfigError::InvalidValue {
            key: "PAIRGATE_SESSION_NAMESPACE".to_string(),
            message: format!("'{}' must be non-empty and contain only [A-Za-z0-9_-]", raw),
        });
    }
    Ok(ns.to_string())
}

fn parse_browser(raw: &str) -> Result<[String; 3], ConfigError> {
    let parts: Vec<String> = raw.split(',').map(|p| p.trim().to_string()).collect();
    <[String; 3]>::try_from(parts).map_err(|_| ConfigError::InvalidValue {
        key: "PAIRGATE_BROWSER".to_string(),
        message: format!("expected 'name,platform,release', got '{}'", raw),
    })
}
