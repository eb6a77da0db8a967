// Client defaults and configuration overrides.
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tether_wire::{EnvelopeCodec, JsonCodec};

use crate::{Error, Result};

pub(crate) const DEFAULT_PING_INTERVAL_MS: u64 = 5_000;

/// Suggested bound for the transport command/event queues. Callers build
/// the pipe themselves and may size it differently.
pub const DEFAULT_PIPE_DEPTH: usize = 1024;

/// Tunables for one bridge connection.
#[derive(Clone)]
pub struct ClientConfig {
    /// Keep-alive cadence while the connection is open.
    pub ping_interval: Duration,
    /// Envelope encode/decode strategy; the JSON mapping by default.
    pub codec: Arc<dyn EnvelopeCodec>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(DEFAULT_PING_INTERVAL_MS),
            codec: Arc::new(JsonCodec),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ClientConfigOverride {
    ping_interval_ms: Option<u64>,
}

impl ClientConfig {
    /// Defaults adjusted by `TETHER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = read_u64_env("TETHER_PING_INTERVAL_MS") {
            config.ping_interval = Duration::from_millis(value);
        }
        config
    }

    /// Environment config, then a YAML override file on top. The path
    /// argument wins over `TETHER_CLIENT_CONFIG`; no file means env only.
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("TETHER_CLIENT_CONFIG").ok());
        let Some(path) = override_path else {
            return Ok(config);
        };
        let contents = fs::read_to_string(&path)
            .map_err(|err| Error::Config(format!("read client config {path}: {err}")))?;
        let override_cfg: ClientConfigOverride = serde_yaml::from_str(&contents)
            .map_err(|err| Error::Config(format!("parse client config yaml: {err}")))?;
        override_cfg.apply(&mut config);
        Ok(config)
    }

    pub fn with_codec(mut self, codec: Arc<dyn EnvelopeCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

impl ClientConfigOverride {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(value) = self.ping_interval_ms {
            if value > 0 {
                config.ping_interval = Duration::from_millis(value);
            }
        }
    }
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ping_interval_is_five_seconds() {
        let config = ClientConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(5));
    }

    #[test]
    fn yaml_override_wins_over_defaults() {
        let mut config = ClientConfig::default();
        let override_cfg: ClientConfigOverride =
            serde_yaml::from_str("ping_interval_ms: 250").expect("yaml");
        override_cfg.apply(&mut config);
        assert_eq!(config.ping_interval, Duration::from_millis(250));
    }

    #[test]
    fn zero_override_is_ignored() {
        let mut config = ClientConfig::default();
        let override_cfg: ClientConfigOverride =
            serde_yaml::from_str("ping_interval_ms: 0").expect("yaml");
        override_cfg.apply(&mut config);
        assert_eq!(config.ping_interval, Duration::from_secs(5));
    }

    #[test]
    fn missing_override_file_is_an_error() {
        let result = ClientConfig::from_env_or_yaml(Some("/nonexistent/tether.yaml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
