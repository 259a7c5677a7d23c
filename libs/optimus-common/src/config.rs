// Client configuration for the evaluation pipeline
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_POINTS_POOL: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub redis_url: String,
    pub reconnect_attempts: u32,
    pub reconnect_interval_ms: u64,
    pub points_pool: u32,
    /// Unset keeps a collecting track pending until its total arrives
    pub track_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            points_pool: DEFAULT_POINTS_POOL,
            track_timeout_secs: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file, missing keys fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Client config file not found: {}", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: ClientConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `REDIS_URL` and `OPTIMUS_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(raw) = lookup("OPTIMUS_RECONNECT_ATTEMPTS") {
            self.reconnect_attempts = raw
                .parse()
                .with_context(|| format!("Invalid OPTIMUS_RECONNECT_ATTEMPTS: {}", raw))?;
        }
        if let Some(raw) = lookup("OPTIMUS_RECONNECT_INTERVAL_MS") {
            self.reconnect_interval_ms = raw
                .parse()
                .with_context(|| format!("Invalid OPTIMUS_RECONNECT_INTERVAL_MS: {}", raw))?;
        }
        if let Some(raw) = lookup("OPTIMUS_POINTS_POOL") {
            self.points_pool = raw
                .parse()
                .with_context(|| format!("Invalid OPTIMUS_POINTS_POOL: {}", raw))?;
        }
        if let Some(raw) = lookup("OPTIMUS_TRACK_TIMEOUT_SECS") {
            self.track_timeout_secs = if raw.is_empty() {
                None
            } else {
                Some(
                    raw.parse()
                        .with_context(|| format!("Invalid OPTIMUS_TRACK_TIMEOUT_SECS: {}", raw))?,
                )
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.points_pool == 0 {
            bail!("points_pool must be positive");
        }
        if self.track_timeout_secs == Some(0) {
            bail!("track_timeout_secs must be positive when set");
        }
        Ok(())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn track_timeout(&self) -> Option<Duration> {
        self.track_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_reference_policy() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_attempts, 10);
        assert_eq!(config.reconnect_interval(), Duration::from_secs(2));
        assert_eq!(config.points_pool, 100);
        assert_eq!(config.track_timeout(), None);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("REDIS_URL", "redis://judge:6379"),
            ("OPTIMUS_RECONNECT_ATTEMPTS", "3"),
            ("OPTIMUS_TRACK_TIMEOUT_SECS", "120"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.redis_url, "redis://judge:6379");
        assert_eq!(config.reconnect_attempts, 3);
        assert_eq!(config.reconnect_interval_ms, DEFAULT_RECONNECT_INTERVAL_MS);
        assert_eq!(config.track_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_invalid_override_is_reported() {
        let mut config = ClientConfig::default();
        let err = config
            .apply_overrides(|key| (key == "OPTIMUS_POINTS_POOL").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("OPTIMUS_POINTS_POOL"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"points_pool": 60}"#).unwrap();
        assert_eq!(config.points_pool, 60);
        assert_eq!(config.reconnect_attempts, DEFAULT_RECONNECT_ATTEMPTS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_pool_rejected() {
        let config = ClientConfig {
            points_pool: 0,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = ClientConfig::load(Path::new("config/does-not-exist.json"));
        assert!(result.is_err());
    }
}
