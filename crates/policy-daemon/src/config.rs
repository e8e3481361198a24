//! Daemon configuration, loaded from the environment.
//!
//! This is scaffolding only: a data directory and a log level. The
//! socket bind address, auth mount table, and everything else the event
//! loop named out-of-scope belong to a future daemon crate, not here.

use std::path::PathBuf;

/// Configuration for the thin checkpoint-exercising binary.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Directory holding the index file and per-bucket files.
    pub data_dir: PathBuf,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
}

impl DaemonConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `POLICY_ENGINE_DATA_DIR` — checkpoint directory (default: `./data`)
    /// - `POLICY_ENGINE_LOG_LEVEL` — log filter (default: `info`)
    #[must_use]
    pub fn from_env() -> Self {
        let data_dir = std::env::var("POLICY_ENGINE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let log_level = std::env::var("POLICY_ENGINE_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
        Self { data_dir, log_level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let config = DaemonConfig::from_env();
        assert!(!config.log_level.is_empty());
        assert!(!config.data_dir.as_os_str().is_empty());
    }
}
