use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::clock::DEFAULT_EVENT_CACHE_CAPACITY;

/// Tunables for a [`crate::Crdt`] instance.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound, in milliseconds, on a writer's wait in the queue.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Compact automatically after this many writes. `None` disables it.
    #[serde(default)]
    pub auto_compact_after: Option<usize>,
    /// Decoded events memoized per traversal.
    #[serde(default = "default_event_cache_capacity")]
    pub event_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            auto_compact_after: None,
            event_cache_capacity: default_event_cache_capacity(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Fails on malformed TOML or unknown keys.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content).context("Failed to parse engine config")
    }
}

/// Load an engine config from `path`, falling back to defaults when the
/// file does not exist.
///
/// # Errors
///
/// Fails when the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

const fn default_lock_timeout_ms() -> u64 {
    30_000
}

const fn default_event_cache_capacity() -> usize {
    DEFAULT_EVENT_CACHE_CAPACITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().expect("temp dir must be created");
        let cfg = load_config(&dir.path().join("cairn.toml")).expect("load should succeed");
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.lock_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.auto_compact_after, None);
        assert_eq!(cfg.event_cache_capacity, 4096);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let cfg = EngineConfig::from_toml_str("auto_compact_after = 10\n").expect("parse");
        assert_eq!(cfg.auto_compact_after, Some(10));
        assert_eq!(cfg.lock_timeout_ms, 30_000);
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempfile::tempdir().expect("temp dir must be created");
        let path = dir.path().join("cairn.toml");
        std::fs::write(&path, "lock_timeout_ms = 250\nevent_cache_capacity = 16\n")
            .expect("write config");
        let cfg = load_config(&path).expect("load should succeed");
        assert_eq!(cfg.lock_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.event_cache_capacity, 16);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("temp dir must be created");
        let path = dir.path().join("cairn.toml");
        std::fs::write(&path, "lock_timeout = 5\n").expect("write config");
        let err = load_config(&path).expect_err("unknown key must fail");
        assert!(err.to_string().contains("Failed to parse"), "{err}");
    }
}
