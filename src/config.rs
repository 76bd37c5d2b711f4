//! Client configuration.

use std::{fs, io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json as json;
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;

use crate::abiencode::types::Address;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration JSON error: {0}")]
    Json(#[from] json::Error),
    #[error("configuration error: {0}")]
    Invalid(String),
}

/// Connection settings. Missing fields take their defaults.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WebSocket endpoint of the node.
    pub url: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "handshake_timeout_ms")]
    pub handshake_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "keepalive_interval_ms")]
    pub keepalive_interval: Duration,
    /// Events beyond this many unread ones push out the oldest.
    pub event_queue_capacity: usize,
    /// The node's signing address. Fetched with `node.v1.get_config` if not
    /// set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_address: Option<Address>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            url: "ws://localhost:7824/ws".into(),
            handshake_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(5),
            event_queue_capacity: 1024,
            node_address: None,
        }
    }
}

impl Config {
    pub fn new(url: impl Into<String>) -> Self {
        Config {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a configuration from the given path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg: Self = json::from_reader(fs::File::open(path)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "url {:?} is not a websocket url",
                self.url
            )));
        }
        if self.handshake_timeout.is_zero() || self.keepalive_interval.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid("event queue capacity is zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg, Config::default());

        let cfg = Config::from_json(
            r#"{"url": "wss://node.example/ws", "keepalive_interval_ms": 250, "event_queue_capacity": 8}"#,
        )
        .unwrap();
        assert_eq!(cfg.url, "wss://node.example/ws");
        assert_eq!(cfg.keepalive_interval, Duration::from_millis(250));
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(5));
        assert_eq!(cfg.event_queue_capacity, 8);
        assert_eq!(cfg.node_address, None);
    }

    #[test]
    fn serialized_names() {
        let json = json::to_value(Config::new("ws://a/b")).unwrap();
        assert_eq!(json["handshake_timeout_ms"], 5000);
        assert_eq!(json["keepalive_interval_ms"], 5000);
        assert!(json.get("node_address").is_none());
    }

    #[test]
    fn invalid() {
        for s in [
            r#"{"url": "http://node.example"}"#,
            r#"{"event_queue_capacity": 0}"#,
            r#"{"keepalive_interval_ms": 0}"#,
        ] {
            assert!(matches!(Config::from_json(s), Err(ConfigError::Invalid(_))), "{}", s);
        }
        assert!(matches!(
            Config::from_json(r#"{"url": 5}"#),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            Config::load(Path::new("/nonexistent/nitrolink.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
