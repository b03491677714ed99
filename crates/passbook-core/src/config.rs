//! Passbook configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling on tickets folded into one split code
pub const MAX_SPLIT_TICKETS: usize = 50;

/// Environment override for the station URL
pub const ENV_STATION_URL: &str = "PASSBOOK_STATION_URL";

/// Environment override for the data directory
pub const ENV_DATA_DIR: &str = "PASSBOOK_DATA_DIR";

/// Passbook configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassbookConfig {
    /// Base URL of the issuing station
    pub station_url: String,
    /// Timeout applied to every station call, in milliseconds
    pub remote_timeout_ms: u64,
    /// Extra exchange attempts allowed beyond the tickets required
    pub retry_margin: u32,
    /// Largest split the client will request
    pub max_split: usize,
    /// Expiry recomputation cadence, in milliseconds
    pub tick_interval_ms: u64,
    /// Directory holding the persisted ledger
    pub data_dir: PathBuf,
}

impl PassbookConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With station URL
    #[inline]
    #[must_use]
    pub fn with_station_url(mut self, url: impl Into<String>) -> Self {
        self.station_url = url.into();
        self
    }

    /// With remote timeout
    #[inline]
    #[must_use]
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    /// With retry margin
    #[inline]
    #[must_use]
    pub fn with_retry_margin(mut self, margin: u32) -> Self {
        self.retry_margin = margin;
        self
    }

    /// With maximum split size
    #[inline]
    #[must_use]
    pub fn with_max_split(mut self, max: usize) -> Self {
        self.max_split = max;
        self
    }

    /// With expiry tick interval
    #[inline]
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    /// With data directory
    #[inline]
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        let config = config.with_env_overrides();
        config.validate()?;
        tracing::debug!(path = %path.display(), station = %config.station_url, "Loaded config");
        Ok(config)
    }

    /// Apply `PASSBOOK_*` environment overrides
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_STATION_URL) {
            self.station_url = url;
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    /// Check values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.station_url.trim().is_empty() {
            return Err(ConfigError::Invalid("station_url is empty".into()));
        }
        if self.remote_timeout_ms == 0 {
            return Err(ConfigError::Invalid("remote_timeout_ms must be positive".into()));
        }
        if self.max_split == 0 || self.max_split > MAX_SPLIT_TICKETS {
            return Err(ConfigError::Invalid(format!(
                "max_split must be within 1..={MAX_SPLIT_TICKETS}"
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

impl Default for PassbookConfig {
    fn default() -> Self {
        Self {
            station_url: "http://localhost:8787".to_string(),
            remote_timeout_ms: 30_000,
            retry_margin: 3,
            max_split: MAX_SPLIT_TICKETS,
            tick_interval_ms: 1000,
            data_dir: PathBuf::from(".passbook"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PassbookConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.max_split, 50);
    }

    #[test]
    fn load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "station_url = \"https://station.example\"").unwrap();
        writeln!(file, "retry_margin = 5").unwrap();

        let config = PassbookConfig::load(file.path()).unwrap();
        assert_eq!(config.retry_margin, 5);
        assert_eq!(config.remote_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_oversized_split() {
        let mut config = PassbookConfig::new();
        config.max_split = 51;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn builders_apply() {
        let config = PassbookConfig::new()
            .with_station_url("https://s.example")
            .with_retry_margin(1)
            .with_remote_timeout(Duration::from_millis(10));
        assert_eq!(config.station_url, "https://s.example");
        assert_eq!(config.retry_margin, 1);
        assert_eq!(config.remote_timeout(), Duration::from_millis(10));
    }
}
