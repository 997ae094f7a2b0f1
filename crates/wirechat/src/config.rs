//! Server configuration.
//!
//! Settings come from, in increasing priority: built-in defaults, an
//! optional JSON file named by `WIRECHAT_CONFIG`, then individual
//! `WIRECHAT_*` environment variables (`PROTOCOL_FILE` is read as a
//! fallback for `WIRECHAT_SCHEMA`). [`ChatServerBuilder`] setters
//! override all of them.
//!
//! [`ChatServerBuilder`]: crate::ChatServerBuilder

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use wirechat_protocol::WireMode;
use wirechat_transport::TransportConfig;

/// Everything needed to start a server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_addr: String,
    /// JSON or schema-driven binary payloads.
    pub mode: WireMode,
    /// Schema document for binary mode. `None` uses the built-in schema.
    pub schema_path: Option<PathBuf>,
    /// Largest inbound frame payload accepted.
    pub max_frame_bytes: u64,
    /// Messages returned when a user has no stored preference.
    pub history_limit: u32,
    /// Read deadline for the handshake and each frame. `None` waits forever.
    pub idle_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            mode: WireMode::Json,
            schema_path: None,
            max_frame_bytes: 16 * 1024 * 1024,
            history_limit: 50,
            idle_timeout_secs: None,
        }
    }
}

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("{0}")]
    Validation(String),
}

impl ServerConfig {
    /// Builds the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("WIRECHAT_CONFIG") {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(addr) = lookup("WIRECHAT_BIND") {
            config.bind_addr = addr;
        }
        if let Some(mode) = lookup("WIRECHAT_MODE") {
            config.mode = parse("WIRECHAT_MODE", &mode)?;
        }
        // PROTOCOL_FILE is the older name for the schema path.
        if let Some(path) = lookup("WIRECHAT_SCHEMA").or_else(|| lookup("PROTOCOL_FILE")) {
            config.schema_path = Some(PathBuf::from(path));
        }
        if let Some(bytes) = lookup("WIRECHAT_MAX_FRAME_BYTES") {
            config.max_frame_bytes = parse("WIRECHAT_MAX_FRAME_BYTES", &bytes)?;
        }
        if let Some(limit) = lookup("WIRECHAT_HISTORY_LIMIT") {
            config.history_limit = parse("WIRECHAT_HISTORY_LIMIT", &limit)?;
        }
        if let Some(secs) = lookup("WIRECHAT_IDLE_TIMEOUT_SECS") {
            config.idle_timeout_secs = Some(parse("WIRECHAT_IDLE_TIMEOUT_SECS", &secs)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file. Absent keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&source).map_err(ConfigError::Parse)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.trim().is_empty() {
            return Err(ConfigError::Validation("bind_addr must not be empty".into()));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Validation("max_frame_bytes must be > 0".into()));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Validation("history_limit must be > 0".into()));
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(ConfigError::Validation("idle_timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            max_frame_bytes: self.max_frame_bytes,
            read_timeout: self.idle_timeout(),
        }
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8000");
        assert_eq!(config.mode, WireMode::Json);
        assert_eq!(config.history_limit, 50);
        assert!(config.idle_timeout().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = from_pairs(&[
            ("WIRECHAT_BIND", "0.0.0.0:9000"),
            ("WIRECHAT_MODE", "binary"),
            ("WIRECHAT_SCHEMA", "/etc/wirechat/schema.json"),
            ("WIRECHAT_MAX_FRAME_BYTES", "4096"),
            ("WIRECHAT_HISTORY_LIMIT", "10"),
            ("WIRECHAT_IDLE_TIMEOUT_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.mode, WireMode::Binary);
        assert_eq!(config.schema_path, Some(PathBuf::from("/etc/wirechat/schema.json")));
        assert_eq!(config.transport().max_frame_bytes, 4096);
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.transport().read_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_protocol_file_sets_schema_path() {
        let config = from_pairs(&[("PROTOCOL_FILE", "protocol.json")]).unwrap();
        assert_eq!(config.schema_path, Some(PathBuf::from("protocol.json")));
    }

    #[test]
    fn test_wirechat_schema_wins_over_protocol_file() {
        let config = from_pairs(&[
            ("PROTOCOL_FILE", "protocol.json"),
            ("WIRECHAT_SCHEMA", "schema.json"),
        ])
        .unwrap();
        assert_eq!(config.schema_path, Some(PathBuf::from("schema.json")));
    }

    #[test]
    fn test_bad_values_rejected() {
        let err = from_pairs(&[("WIRECHAT_MODE", "xml")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "WIRECHAT_MODE", .. }));

        let err = from_pairs(&[("WIRECHAT_HISTORY_LIMIT", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = from_pairs(&[("WIRECHAT_HISTORY_LIMIT", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_partial_json_file_keeps_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"mode": "binary", "history_limit": 5}"#).unwrap();
        assert_eq!(config.mode, WireMode::Binary);
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.bind_addr, "127.0.0.1:8000");
    }

    #[test]
    fn test_unknown_json_key_rejected() {
        assert!(serde_json::from_str::<ServerConfig>(r#"{"port": 1}"#).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let err = from_pairs(&[("WIRECHAT_CONFIG", "/no/such/wirechat.json")]).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
