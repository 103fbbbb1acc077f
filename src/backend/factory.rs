//! Constructors for each history strategy.

use super::history_tree::{HistoryTreeBackend, HtConfig};
use super::{InMemoryBackend, NullBackend, StateHistoryBackend, ThreadedHistoryTreeBackend};
use crate::config::Config;
use crate::error::{Result, StratumError};
use std::path::Path;

/// A history that discards everything.
pub fn new_null_backend(ssid: impl Into<String>) -> Box<dyn StateHistoryBackend> {
    Box::new(NullBackend::new(ssid))
}

/// A history kept entirely in memory. Good for small traces or short-lived analyses.
pub fn new_in_memory_backend(ssid: impl Into<String>, start_time: i64) -> Box<dyn StateHistoryBackend> {
    Box::new(InMemoryBackend::new(ssid, start_time))
}

/// A new history tree file at `path`, built on the calling thread.
pub fn new_history_tree_backend<P: AsRef<Path>>(
    ssid: impl Into<String>,
    path: P,
    config: &Config,
    start_time: i64,
) -> Result<Box<dyn StateHistoryBackend>> {
    config.validate().map_err(StratumError::InvalidInput)?;
    let ht_config = HtConfig::new(path, config, start_time);
    Ok(Box::new(HistoryTreeBackend::new(ssid, ht_config)?))
}

/// An existing, finished history tree file.
pub fn open_history_tree_backend<P: AsRef<Path>>(
    ssid: impl Into<String>,
    path: P,
    provider_version: u32,
) -> Result<Box<dyn StateHistoryBackend>> {
    Ok(Box::new(HistoryTreeBackend::open(
        ssid,
        path,
        provider_version,
    )?))
}

/// A new history tree file at `path`, written by a background thread fed through a
/// queue of `config.queue_size` intervals.
pub fn new_threaded_history_tree_backend<P: AsRef<Path>>(
    ssid: impl Into<String>,
    path: P,
    config: &Config,
    start_time: i64,
) -> Result<Box<dyn StateHistoryBackend>> {
    config.validate().map_err(StratumError::InvalidInput)?;
    let ht_config = HtConfig::new(path, config, start_time);
    Ok(Box::new(ThreadedHistoryTreeBackend::new(
        ssid,
        ht_config,
        config.queue_size,
    )?))
}
