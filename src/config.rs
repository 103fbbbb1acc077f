//! Configuration for Stratum backends and segment stores.
//!
//! The configuration is plain serializable data so it can be loaded from JSON
//! (or TOML with the `toml` feature) and handed to a [`crate::BackendBuilder`].

use crate::backend::history_tree::config::min_block_size;
use crate::error::{Result, StratumError};
use serde::{Deserialize, Serialize};

/// Which state history strategy to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Discard all intervals; only ongoing state is kept upstream.
    Null,
    /// Keep every interval in memory.
    #[default]
    InMemory,
    /// Persist intervals in a history tree file, written on the caller's thread.
    HistoryTree,
    /// Persist intervals in a history tree file through a bounded queue and a writer thread.
    ThreadedHistoryTree,
}

impl BackendKind {
    pub fn is_persistent(self) -> bool {
        matches!(
            self,
            BackendKind::HistoryTree | BackendKind::ThreadedHistoryTree
        )
    }
}

/// Which segment store to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStoreKind {
    /// Always sorted; each insertion shifts elements.
    Stable,
    /// Append-only with a deferred sort; best for bulk or out-of-order loads.
    #[default]
    Fast,
}

/// Stratum configuration
///
/// # Example
///
/// ```rust
/// use stratum::{BackendKind, Config};
///
/// let json = r#"{
///     "backend": "threaded_history_tree",
///     "queue_size": 512,
///     "provider_version": 3
/// }"#;
/// let config = Config::from_json_str(json).unwrap();
/// assert_eq!(config.backend, BackendKind::ThreadedHistoryTree);
/// assert_eq!(config.block_size, 64 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendKind,

    /// Size in bytes of one history tree node.
    #[serde(default = "Config::default_block_size")]
    pub block_size: usize,

    /// Maximum number of children of a history tree core node.
    #[serde(default = "Config::default_max_children")]
    pub max_children: usize,

    /// Capacity of the queue feeding the threaded writer.
    #[serde(default = "Config::default_queue_size")]
    pub queue_size: usize,

    /// Version of the component producing the intervals, checked when a history file is reopened.
    #[serde(default)]
    pub provider_version: u32,

    #[serde(default)]
    pub segment_store: SegmentStoreKind,
}

impl Config {
    /// Smallest node size that still fits a node header and a core child table.
    pub const MIN_BLOCK_SIZE: usize = 4 * 1024;

    const fn default_block_size() -> usize {
        64 * 1024
    }

    const fn default_max_children() -> usize {
        50
    }

    const fn default_queue_size() -> usize {
        10_000
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        assert!(
            block_size >= Self::MIN_BLOCK_SIZE,
            "Block size must be at least {} bytes",
            Self::MIN_BLOCK_SIZE
        );
        self.block_size = block_size;
        self
    }

    pub fn with_max_children(mut self, max_children: usize) -> Self {
        assert!(max_children >= 2, "A core node needs room for two children");
        self.max_children = max_children;
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        assert!(queue_size > 0, "Queue size must be greater than zero");
        self.queue_size = queue_size;
        self
    }

    pub fn with_provider_version(mut self, version: u32) -> Self {
        self.provider_version = version;
        self
    }

    pub fn with_segment_store(mut self, kind: SegmentStoreKind) -> Self {
        self.segment_store = kind;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.block_size < Self::MIN_BLOCK_SIZE {
            return Err(format!(
                "Block size must be at least {} bytes, got {}",
                Self::MIN_BLOCK_SIZE,
                self.block_size
            ));
        }
        if self.block_size > i32::MAX as usize {
            return Err("Block size is too large".to_string());
        }
        if self.max_children < 2 {
            return Err("Max children must be at least 2".to_string());
        }
        if min_block_size(self.max_children) > self.block_size {
            return Err(format!(
                "{} children do not fit in a {} byte node",
                self.max_children, self.block_size
            ));
        }
        if self.queue_size == 0 {
            return Err("Queue size must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| StratumError::InvalidInput(format!("invalid JSON config: {}", e)))?;
        config.validate().map_err(StratumError::InvalidInput)?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StratumError::Serialization(e.to_string()))
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Config = toml::from_str(input)
            .map_err(|e| StratumError::InvalidInput(format!("invalid TOML config: {}", e)))?;
        config.validate().map_err(StratumError::InvalidInput)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            block_size: Self::default_block_size(),
            max_children: Self::default_max_children(),
            queue_size: Self::default_queue_size(),
            provider_version: 0,
            segment_store: SegmentStoreKind::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, BackendKind::InMemory);
        assert_eq!(config.segment_store, SegmentStoreKind::Fast);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = Config::default()
            .with_backend(BackendKind::HistoryTree)
            .with_block_size(8192)
            .with_max_children(8)
            .with_provider_version(4);
        let json = config.to_json_string().unwrap();
        assert_eq!(Config::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_tiny_blocks() {
        let json = r#"{ "block_size": 512 }"#;
        assert!(matches!(
            Config::from_json_str(json),
            Err(StratumError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_child_table() {
        let config = Config {
            block_size: 4096,
            max_children: 400,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_child_table_counts_the_node_header() {
        let config = Config {
            block_size: 4096,
            max_children: 334,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_children: 333,
            ..config
        };
        assert!(config.validate().is_ok());
        let dir = tempfile::tempdir().unwrap();
        assert!(crate::new_history_tree_backend("edge", dir.path().join("edge.ht"), &config, 0).is_ok());
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_toml() {
        let config = Config::from_toml_str("backend = \"null\"\nqueue_size = 3\n").unwrap();
        assert_eq!(config.backend, BackendKind::Null);
        assert_eq!(config.queue_size, 3);
    }
}
