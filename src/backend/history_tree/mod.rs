//! Disk-resident state history stored as a history tree file.

pub mod config;
pub(crate) mod io;
pub(crate) mod node;
mod tree;

pub use config::{HtConfig, TREE_HEADER_SIZE};
pub use tree::HistoryTree;

use super::StateHistoryBackend;
use crate::condition::{QuarkRange, TimeRange};
use crate::error::{Result, StratumError};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use stratum_types::{Quark, StateInterval, StateValue};

/// History tree written on the caller's thread.
pub struct HistoryTreeBackend {
    ssid: String,
    tree: HistoryTree,
}

impl HistoryTreeBackend {
    /// Build a new history file at `config.path`.
    pub fn new(ssid: impl Into<String>, config: HtConfig) -> Result<Self> {
        Ok(Self {
            ssid: ssid.into(),
            tree: HistoryTree::create(config)?,
        })
    }

    /// Open a finished history file for querying.
    pub fn open<P: AsRef<Path>>(
        ssid: impl Into<String>,
        path: P,
        provider_version: u32,
    ) -> Result<Self> {
        Ok(Self {
            ssid: ssid.into(),
            tree: HistoryTree::open(path, provider_version)?,
        })
    }

    pub fn tree(&self) -> &HistoryTree {
        &self.tree
    }
}

impl StateHistoryBackend for HistoryTreeBackend {
    fn ssid(&self) -> &str {
        &self.ssid
    }

    fn start_time(&self) -> i64 {
        self.tree.start_time()
    }

    fn end_time(&self) -> i64 {
        self.tree.end_time()
    }

    fn insert_past_state(
        &mut self,
        start: i64,
        end: i64,
        quark: Quark,
        value: StateValue,
    ) -> Result<()> {
        StratumError::check_insertion(start, end, self.tree.start_time())?;
        self.tree.insert(StateInterval::new(start, end, quark, value))
    }

    fn finished_building(&mut self, end_time: i64) -> Result<()> {
        self.tree.close_tree(end_time)
    }

    fn supply_attribute_tree_reader(&self) -> Result<File> {
        self.tree.attribute_tree_reader()
    }

    fn supply_attribute_tree_writer_file(&self) -> Option<PathBuf> {
        Some(self.tree.config().path.clone())
    }

    fn supply_attribute_tree_writer_file_pos(&self) -> Option<u64> {
        Some(self.tree.attribute_tree_offset())
    }

    fn remove_files(&mut self) -> Result<()> {
        self.tree.delete_file()
    }

    fn dispose(&mut self) -> Result<()> {
        self.tree.close_file();
        Ok(())
    }

    fn do_query(&self, slots: &mut [Option<StateInterval>], t: i64) -> Result<()> {
        self.tree.query(slots, t)
    }

    fn do_singular_query(&self, t: i64, quark: Quark) -> Result<StateInterval> {
        self.tree.singular_query(t, quark)
    }

    fn query_2d(&self, quarks: &QuarkRange, times: &TimeRange) -> Result<Vec<StateInterval>> {
        self.tree.query_2d(quarks, times)
    }

    fn debug_print(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "State system '{}'", self.ssid)?;
        self.tree.debug_print(out)
    }
}
