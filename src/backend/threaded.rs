//! History tree fed by a dedicated writer thread.
//!
//! Inserted intervals go through a bounded channel; when it is full the
//! inserting thread blocks until the writer catches up. Queries go straight to
//! the tree and see the intervals the writer has applied so far.

use super::StateHistoryBackend;
use super::history_tree::{HistoryTree, HtConfig};
use crate::condition::{QuarkRange, TimeRange};
use crate::error::{Result, StratumError};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{SyncSender, sync_channel};
use std::thread::JoinHandle;
use stratum_types::{Quark, StateInterval, StateValue};

/// History tree backend whose insertions are applied by a writer thread.
///
/// [`end_time`](StateHistoryBackend::end_time) and every query reflect only
/// the intervals the writer has already taken off the queue, so while the
/// history is building they can trail the latest insertion. Once
/// [`finished_building`](StateHistoryBackend::finished_building) returns,
/// the queue is drained and everything inserted is visible.
pub struct ThreadedHistoryTreeBackend {
    ssid: String,
    tree: Arc<HistoryTree>,
    sender: Option<SyncSender<StateInterval>>,
    writer: Option<JoinHandle<Result<()>>>,
}

impl ThreadedHistoryTreeBackend {
    pub fn new(ssid: impl Into<String>, config: HtConfig, queue_size: usize) -> Result<Self> {
        if queue_size == 0 {
            return Err(StratumError::InvalidInput(
                "queue size must be greater than zero".to_string(),
            ));
        }
        let ssid = ssid.into();
        let tree = Arc::new(HistoryTree::create(config)?);
        let (sender, receiver) = sync_channel::<StateInterval>(queue_size);

        let writer_tree = Arc::clone(&tree);
        let writer = std::thread::Builder::new()
            .name(format!("stratum-writer-{}", ssid))
            .spawn(move || -> Result<()> {
                log::debug!("History writer thread started");
                // Ends once every sender is dropped and the queue is drained.
                for interval in receiver {
                    writer_tree.insert(interval)?;
                }
                log::debug!("History writer thread drained its queue");
                Ok(())
            })?;

        Ok(Self {
            ssid,
            tree,
            sender: Some(sender),
            writer: Some(writer),
        })
    }

    /// Close the queue, then wait for the writer to apply what is left in it.
    fn stop_writer(&mut self) -> Result<()> {
        self.sender.take();
        match self.writer.take().map(JoinHandle::join) {
            Some(Ok(result)) => result.map_err(|e| StratumError::WriterThread(e.to_string())),
            Some(Err(_)) => Err(StratumError::WriterThread(
                "writer thread panicked".to_string(),
            )),
            None => Ok(()),
        }
    }

    /// Whether the writer thread is still accepting intervals.
    pub fn is_building(&self) -> bool {
        self.sender.is_some()
    }
}

impl StateHistoryBackend for ThreadedHistoryTreeBackend {
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
        let interval = StateInterval::new(start, end, quark, value);
        self.tree.check_interval(&interval)?;

        let sender = self.sender.as_ref().ok_or_else(|| {
            StratumError::WriterThread("the history has finished building".to_string())
        })?;
        if sender.send(interval).is_err() {
            // The receiver only goes away when the writer returned early.
            self.stop_writer()?;
            return Err(StratumError::WriterThread(
                "writer thread stopped unexpectedly".to_string(),
            ));
        }
        Ok(())
    }

    fn finished_building(&mut self, end_time: i64) -> Result<()> {
        self.stop_writer()?;
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
        let stopped = self.stop_writer();
        self.tree.delete_file()?;
        stopped
    }

    fn dispose(&mut self) -> Result<()> {
        let stopped = self.stop_writer();
        self.tree.close_file();
        stopped
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
        writeln!(
            out,
            "State system '{}' (writer thread {})",
            self.ssid,
            if self.is_building() { "running" } else { "stopped" }
        )?;
        self.tree.debug_print(out)
    }
}

impl Drop for ThreadedHistoryTreeBackend {
    fn drop(&mut self) {
        if let Err(e) = self.stop_writer() {
            log::warn!("History writer for '{}' failed: {}", self.ssid, e);
        }
    }
}
