//! Configuration loading.
//!
//! A small JSON key-value file colocated with the binary. Per the error
//! taxonomy, a missing file or malformed JSON is never fatal — it is treated
//! as an empty config and every field falls back to its default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_true")]
    pub use_in_memory_db: bool,
    #[serde(default)]
    pub inspect_every_device_by_default: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            use_in_memory_db: true,
            inspect_every_device_by_default: false,
        }
    }
}

impl AppConfig {
    /// Load from a JSON file. Any failure (missing file, unreadable, malformed
    /// JSON) is logged and swallowed in favor of defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file unreadable, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file malformed, using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_returns_defaults() {
        let config = AppConfig::from_file("/nonexistent/path/inspector_config.json");
        assert!(config.use_in_memory_db);
        assert!(!config.inspect_every_device_by_default);
    }

    #[test]
    fn test_malformed_json_returns_defaults() {
        let dir = std::env::temp_dir().join(format!("lan-inspector-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad_config.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        let config = AppConfig::from_file(&path);
        assert!(config.use_in_memory_db);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let dir = std::env::temp_dir().join(format!("lan-inspector-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial_config.json");
        std::fs::write(&path, r#"{"inspect_every_device_by_default": true}"#).unwrap();

        let config = AppConfig::from_file(&path);
        assert!(config.use_in_memory_db, "missing key should default to true");
        assert!(config.inspect_every_device_by_default);

        std::fs::remove_file(&path).ok();
    }
}
