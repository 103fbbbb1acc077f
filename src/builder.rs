//! Backend builder
//!
//! Selects and constructs a state history strategy from a [`Config`] plus the
//! few settings that are specific to one history (its id, start time and file).

use crate::backend::StateHistoryBackend;
use crate::backend::factory;
use crate::config::{BackendKind, Config};
use crate::error::{Result, StratumError};
use std::path::PathBuf;

#[cfg(feature = "snapshot")]
use crate::backend::InMemoryBackend;

/// Builder for state history backends.
#[derive(Debug)]
pub struct BackendBuilder {
    ssid: String,
    config: Config,
    start_time: i64,
    path: Option<PathBuf>,
    reopen: bool,
    #[cfg(feature = "snapshot")]
    snapshot_path: Option<PathBuf>,
}

impl BackendBuilder {
    /// Create a builder for state system `ssid` with the default (in-memory) configuration.
    pub fn new(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            config: Config::default(),
            start_time: 0,
            path: None,
            reopen: false,
            #[cfg(feature = "snapshot")]
            snapshot_path: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    /// Earliest time the history can hold.
    pub fn start_time(mut self, start_time: i64) -> Self {
        self.start_time = start_time;
        self
    }

    /// History file used by the history tree backends.
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Open the existing history file instead of building a new one.
    ///
    /// The file's provider version must match `Config::provider_version`.
    pub fn reopen(mut self, reopen: bool) -> Self {
        self.reopen = reopen;
        self
    }

    /// Load an in-memory history from this snapshot file when it exists.
    #[cfg(feature = "snapshot")]
    pub fn snapshot_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    fn require_path(&self) -> Result<PathBuf> {
        self.path.clone().ok_or_else(|| {
            StratumError::InvalidInput(format!(
                "a {:?} backend needs a history file path",
                self.config.backend
            ))
        })
    }

    pub fn build(self) -> Result<Box<dyn StateHistoryBackend>> {
        self.config.validate().map_err(StratumError::InvalidInput)?;

        match self.config.backend {
            BackendKind::Null => Ok(factory::new_null_backend(self.ssid)),
            BackendKind::InMemory => {
                #[cfg(feature = "snapshot")]
                if let Some(snapshot_path) = &self.snapshot_path {
                    if snapshot_path.exists() {
                        let backend = InMemoryBackend::load_snapshot(snapshot_path)?;
                        return Ok(Box::new(backend));
                    }
                }
                Ok(factory::new_in_memory_backend(self.ssid, self.start_time))
            }
            BackendKind::HistoryTree => {
                let path = self.require_path()?;
                if self.reopen {
                    factory::open_history_tree_backend(
                        self.ssid,
                        path,
                        self.config.provider_version,
                    )
                } else {
                    factory::new_history_tree_backend(self.ssid, path, &self.config, self.start_time)
                }
            }
            BackendKind::ThreadedHistoryTree => {
                let path = self.require_path()?;
                if self.reopen {
                    // A finished file has nothing left to write: no writer thread needed.
                    factory::open_history_tree_backend(
                        self.ssid,
                        path,
                        self.config.provider_version,
                    )
                } else {
                    factory::new_threaded_history_tree_backend(
                        self.ssid,
                        path,
                        &self.config,
                        self.start_time,
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_types::StateValue;

    #[test]
    fn test_builder_default_is_in_memory() {
        let mut backend = BackendBuilder::new("default").start_time(5).build().unwrap();
        assert_eq!(backend.start_time(), 5);
        backend.insert_past_state(5, 9, 0, StateValue::Int(3)).unwrap();
        assert!(backend.supply_attribute_tree_writer_file().is_none());
    }

    #[test]
    fn test_builder_null() {
        let backend = BackendBuilder::new("null")
            .backend(BackendKind::Null)
            .build()
            .unwrap();
        assert!(!backend.check_valid_time(0));
    }

    #[test]
    fn test_history_tree_needs_path() {
        let result = BackendBuilder::new("ht")
            .backend(BackendKind::HistoryTree)
            .build();
        assert!(matches!(result, Err(StratumError::InvalidInput(_))));
    }

    #[test]
    fn test_builder_history_tree_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("builder.ht");
        let config = Config::default()
            .with_backend(BackendKind::HistoryTree)
            .with_provider_version(2);

        let mut backend = BackendBuilder::new("ht")
            .config(config.clone())
            .path(&path)
            .build()
            .unwrap();
        backend.insert_past_state(0, 10, 1, "idle".into()).unwrap();
        backend.finished_building(10).unwrap();
        drop(backend);

        let reopened = BackendBuilder::new("ht")
            .config(config)
            .path(&path)
            .reopen(true)
            .build()
            .unwrap();
        let interval = reopened.do_singular_query(7, 1).unwrap();
        assert_eq!(interval.value(), &StateValue::from("idle"));
    }

    #[cfg(feature = "snapshot")]
    #[test]
    fn test_builder_loads_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("history.snap");

        let mut backend = InMemoryBackend::new("mem", 0);
        backend.insert_past_state(0, 4, 0, StateValue::Long(8)).unwrap();
        backend.save_snapshot(&snapshot).unwrap();

        let loaded = BackendBuilder::new("mem")
            .snapshot_path(&snapshot)
            .build()
            .unwrap();
        assert_eq!(loaded.end_time(), 4);
        assert_eq!(
            loaded.do_singular_query(2, 0).unwrap().value(),
            &StateValue::Long(8)
        );
    }
}
