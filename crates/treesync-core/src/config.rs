//! Engine configuration.

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for a synchronization engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Scan root. Repository discovery never walks above it.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Include dotfiles in child listings.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub show_hidden: bool,

    /// Include git-ignored entries in child listings.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub show_ignored: bool,

    /// Query git status at all.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub git_enabled: bool,

    /// Per-refresh timeout for git status queries, in milliseconds.
    #[builder(default = "5000")]
    #[serde(default = "default_git_timeout_ms")]
    pub git_timeout_ms: u64,

    /// Refresh git status for touched repositories after each batch.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub refresh_after_batch: bool,

    /// Send non-atomic deletes to the OS trash instead of unlinking.
    #[builder(default = "false")]
    #[serde(default)]
    pub use_trash: bool,

    /// Maximum number of independent operation groups run at once.
    #[builder(default = "4")]
    #[serde(default = "default_max_concurrent_groups")]
    pub max_concurrent_groups: usize,

    /// Capacity of the event broadcast channel.
    #[builder(default = "256")]
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn default_git_timeout_ms() -> u64 {
    5000
}

fn default_max_concurrent_groups() -> usize {
    4
}

fn default_event_capacity() -> usize {
    256
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.root {
            Some(ref root) if root.as_os_str().is_empty() => {
                return Err("Root path cannot be empty".to_string());
            }
            None => return Err("Root path is required".to_string()),
            _ => {}
        }
        if self.max_concurrent_groups == Some(0) {
            return Err("max_concurrent_groups must be at least 1".to_string());
        }
        if self.event_capacity == Some(0) {
            return Err("event_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Create a config with defaults for the given root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            show_hidden: true,
            show_ignored: true,
            git_enabled: true,
            git_timeout_ms: default_git_timeout_ms(),
            refresh_after_batch: true,
            use_trash: false,
            max_concurrent_groups: default_max_concurrent_groups(),
            event_capacity: default_event_capacity(),
        }
    }

    /// Git timeout as a duration.
    pub fn git_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.git_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .root("/home/user")
            .show_hidden(false)
            .git_timeout_ms(250u64)
            .build()
            .unwrap();

        assert_eq!(config.root, PathBuf::from("/home/user"));
        assert!(!config.show_hidden);
        assert!(config.show_ignored);
        assert_eq!(config.git_timeout().as_millis(), 250);
    }

    #[test]
    fn test_config_builder_requires_root() {
        assert!(EngineConfig::builder().build().is_err());
        assert!(EngineConfig::builder().root("").build().is_err());
    }

    #[test]
    fn test_config_builder_rejects_zero_groups() {
        let result = EngineConfig::builder()
            .root("/tmp")
            .max_concurrent_groups(0usize)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("show_hidden = false\ngit_timeout_ms = 100\n").unwrap();
        assert_eq!(config.root, PathBuf::from("."));
        assert!(!config.show_hidden);
        assert!(config.refresh_after_batch);
        assert_eq!(config.git_timeout_ms, 100);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_config_simple() {
        let config = EngineConfig::new("/srv");
        assert!(config.git_enabled);
        assert!(!config.use_trash);
        assert_eq!(config.max_concurrent_groups, 4);
    }
}
