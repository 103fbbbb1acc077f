//! State history backends.
//!
//! A backend stores the intervals produced while a trace is read forward in
//! time and answers "what was attribute A at time T" afterwards. Strategies:
//! - `NullBackend`: keeps nothing
//! - `InMemoryBackend`: append-only vector with binary search queries
//! - `HistoryTreeBackend`: persistent history tree file
//! - `ThreadedHistoryTreeBackend`: history tree fed through a bounded queue by a writer thread

pub mod factory;
pub mod history_tree;
mod memory;
mod null;
mod threaded;

pub use history_tree::HistoryTreeBackend;
pub use memory::InMemoryBackend;
pub use null::NullBackend;
pub use threaded::ThreadedHistoryTreeBackend;

use crate::condition::{QuarkRange, TimeRange};
use crate::error::{Result, StratumError};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use stratum_types::{Quark, StateInterval, StateValue};

/// Operations every history storage strategy provides.
///
/// Insertion takes `&mut self`: a backend has a single writer. Queries take
/// `&self`, so readers running while the history is still being built need the
/// caller to share the backend behind a lock.
pub trait StateHistoryBackend: Send + Sync {
    /// Id of the state system owning this history.
    fn ssid(&self) -> &str;

    fn start_time(&self) -> i64;

    /// Latest end time recorded so far.
    fn end_time(&self) -> i64;

    /// Record that `quark` held `value` during `[start, end]`.
    ///
    /// Calls must come with non-decreasing `end`.
    fn insert_past_state(
        &mut self,
        start: i64,
        end: i64,
        quark: Quark,
        value: StateValue,
    ) -> Result<()>;

    /// No more intervals will be inserted before `end_time`.
    fn finished_building(&mut self, end_time: i64) -> Result<()>;

    /// Reader positioned at the start of the attribute tree section of the history file.
    fn supply_attribute_tree_reader(&self) -> Result<File> {
        Err(StratumError::Unsupported(
            "this backend does not store an attribute tree",
        ))
    }

    /// File into which the attribute tree should be written.
    fn supply_attribute_tree_writer_file(&self) -> Option<PathBuf> {
        None
    }

    /// Offset at which the attribute tree should be written.
    fn supply_attribute_tree_writer_file_pos(&self) -> Option<u64> {
        None
    }

    /// Delete any file backing this history.
    fn remove_files(&mut self) -> Result<()>;

    /// Release runtime resources. Queries made afterwards may fail with [`StratumError::Disposed`].
    fn dispose(&mut self) -> Result<()>;

    /// Fill `slots[q]` with the interval of attribute `q` valid at `t`.
    ///
    /// Slots of attributes with no interval at `t` are left untouched; intervals
    /// whose attribute has no slot are ignored.
    fn do_query(&self, slots: &mut [Option<StateInterval>], t: i64) -> Result<()>;

    /// The interval of `quark` valid at `t`.
    fn do_singular_query(&self, t: i64, quark: Quark) -> Result<StateInterval>;

    /// Every interval whose attribute is in `quarks` and which overlaps `times`, in no particular order.
    fn query_2d(&self, _quarks: &QuarkRange, _times: &TimeRange) -> Result<Vec<StateInterval>> {
        Err(StratumError::Unsupported(
            "two-dimensional queries are not supported by this backend",
        ))
    }

    fn check_valid_time(&self, t: i64) -> bool {
        t >= self.start_time() && t <= self.end_time()
    }

    /// Write a human readable dump of the history. The format is not stable.
    fn debug_print(&self, out: &mut dyn Write) -> Result<()>;

    /// Full state at `t` for attributes `0..nb_attributes`.
    fn query_full_state(&self, t: i64, nb_attributes: usize) -> Result<Vec<Option<StateInterval>>> {
        let mut slots = vec![None; nb_attributes];
        self.do_query(&mut slots, t)?;
        Ok(slots)
    }
}

/// Raise a range error unless `t` lies within the backend's history.
pub(crate) fn check_query_time(backend: &(impl StateHistoryBackend + ?Sized), t: i64) -> Result<()> {
    if backend.check_valid_time(t) {
        Ok(())
    } else {
        Err(StratumError::time_out_of_range(
            t,
            backend.start_time(),
            backend.end_time(),
        ))
    }
}
