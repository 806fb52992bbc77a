//! Monitor configuration as seen from the command line

use anyhow::{Context, Result};
use famwatch::MonitorConfig;
use std::path::{Path, PathBuf};

/// Environment variable naming a config file when `--config` is absent
pub const CONFIG_ENV: &str = "FAMWATCH_CONFIG";

/// Resolve which config file to use, if any
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

/// Load the monitor configuration, falling back to defaults
pub fn load(explicit: Option<&Path>) -> Result<MonitorConfig> {
    match config_path(explicit) {
        Some(path) => MonitorConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(MonitorConfig::default()),
    }
}

/// Every setting with its current value, in file order
pub fn entries(config: &MonitorConfig) -> Vec<(&'static str, String)> {
    vec![
        ("kill_timeout_ms", config.kill_timeout_ms.to_string()),
        ("poll_timeout_ms", config.poll_timeout_ms.to_string()),
        ("queue_timeout_ms", config.queue_timeout_ms.to_string()),
        ("rename_grace_ms", config.rename_grace_ms.to_string()),
        ("stream_latency_ms", config.stream_latency_ms.to_string()),
        ("bucket_millis", config.bucket_millis.to_string()),
        ("event_queue_capacity", config.event_queue_capacity.to_string()),
        ("read_buffer_size", config.read_buffer_size.to_string()),
    ]
}
