//! Monitor timing and buffer configuration
//!
//! Every field has a default, so a TOML file only needs the keys it wants
//! to override:
//!
//! ```toml
//! kill_timeout_ms = 5000
//! rename_grace_ms = 1500
//! ```

use crate::error::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Time to wait for a thread before giving up on it
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 5_000;
/// Wake-up interval when no events are pending
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 250;
/// Wake-up interval when events (like moves) are pending
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 50;
pub const DEFAULT_RENAME_GRACE_MS: u64 = 1_000;
pub const DEFAULT_STREAM_LATENCY_MS: u64 = 1_000;
pub const DEFAULT_BUCKET_MILLIS: u64 = 1_000;

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// How long `stop` waits for each owned thread before abandoning it
    pub kill_timeout_ms: u64,

    /// Wait between wake-ups while nothing is pending
    pub poll_timeout_ms: u64,

    /// Wait between wake-ups while move correlations are pending
    pub queue_timeout_ms: u64,

    /// Age after which an unmatched move departure becomes a delete
    pub rename_grace_ms: u64,

    /// Coalescing latency requested from the macOS event stream
    pub stream_latency_ms: u64,

    /// Width of one move-ring bucket (macOS)
    pub bucket_millis: u64,

    /// Capacity of the queue between native completions and the callback thread
    pub event_queue_capacity: usize,

    /// Size of the native read buffer in bytes
    pub read_buffer_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            kill_timeout_ms: DEFAULT_KILL_TIMEOUT_MS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            queue_timeout_ms: DEFAULT_QUEUE_TIMEOUT_MS,
            rename_grace_ms: DEFAULT_RENAME_GRACE_MS,
            stream_latency_ms: DEFAULT_STREAM_LATENCY_MS,
            bucket_millis: DEFAULT_BUCKET_MILLIS,
            event_queue_capacity: 4096,
            read_buffer_size: 16380 * 4,
        }
    }
}

impl MonitorConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| WatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            WatchError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let timings = [
            ("kill_timeout_ms", self.kill_timeout_ms),
            ("poll_timeout_ms", self.poll_timeout_ms),
            ("queue_timeout_ms", self.queue_timeout_ms),
            ("rename_grace_ms", self.rename_grace_ms),
            ("bucket_millis", self.bucket_millis),
        ];
        for (name, value) in timings {
            if value == 0 {
                return Err(WatchError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.stream_latency_ms > self.bucket_millis {
            return Err(WatchError::Config(format!(
                "stream_latency_ms ({}) must not exceed bucket_millis ({})",
                self.stream_latency_ms, self.bucket_millis
            )));
        }

        if self.event_queue_capacity == 0 {
            return Err(WatchError::Config(
                "event_queue_capacity must be greater than 0".to_string(),
            ));
        }

        // Room for at least one record header plus a long file name
        if self.read_buffer_size < 1024 {
            return Err(WatchError::Config(format!(
                "read_buffer_size ({}) must be at least 1024",
                self.read_buffer_size
            )));
        }

        Ok(())
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn rename_grace(&self) -> Duration {
        Duration::from_millis(self.rename_grace_ms)
    }

    pub fn stream_latency(&self) -> Duration {
        Duration::from_millis(self.stream_latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.kill_timeout(), Duration::from_secs(5));
        assert_eq!(config.poll_timeout(), Duration::from_millis(250));
        assert_eq!(config.queue_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MonitorConfig::from_toml_str("rename_grace_ms = 1500\n").unwrap();
        assert_eq!(config.rename_grace_ms, 1500);
        assert_eq!(config.kill_timeout_ms, DEFAULT_KILL_TIMEOUT_MS);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = MonitorConfig::from_toml_str("poll_timeout_ms = 0").unwrap_err();
        assert!(err.to_string().contains("poll_timeout_ms"));
    }

    #[test]
    fn test_rejects_latency_beyond_bucket() {
        let err = MonitorConfig::from_toml_str(
            "stream_latency_ms = 2000\nbucket_millis = 1000",
        )
        .unwrap_err();
        assert!(err.to_string().contains("stream_latency_ms"));
    }

    #[test]
    fn test_rejects_unknown_syntax() {
        assert!(MonitorConfig::from_toml_str("kill_timeout_ms = \"soon\"").is_err());
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("famwatch.toml");

        let mut config = MonitorConfig::default();
        config.queue_timeout_ms = 20;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(MonitorConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = MonitorConfig::load(Path::new("/nonexistent/famwatch.toml")).unwrap_err();
        assert!(matches!(err, WatchError::Config(_)));
    }
}
