//! In-memory state history.
//!
//! Intervals are kept in insertion order. Because the builder inserts with
//! non-decreasing end times, the vector is also sorted by end time and a point
//! query is a binary search followed by a forward scan.

use super::{StateHistoryBackend, check_query_time};
use crate::condition::{QuarkRange, TimeRange};
use crate::error::{Result, StratumError};
use std::io::Write;
use stratum_types::{Quark, StateInterval, StateValue};

#[cfg(feature = "snapshot")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "snapshot")]
use std::path::Path;

#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    ssid: String,
    start_time: i64,
    end_time: i64,
    intervals: Vec<StateInterval>,
}

impl InMemoryBackend {
    pub fn new(ssid: impl Into<String>, start_time: i64) -> Self {
        let ssid = ssid.into();
        log::debug!(
            "Creating in-memory history for '{}' starting at {}",
            ssid,
            start_time
        );
        Self {
            ssid,
            start_time,
            end_time: start_time,
            intervals: Vec::new(),
        }
    }

    /// Number of stored intervals.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Stored intervals in insertion order.
    pub fn intervals(&self) -> &[StateInterval] {
        &self.intervals
    }

    /// Index of the first interval whose end time is `>= t`.
    fn first_candidate(&self, t: i64) -> usize {
        self.intervals.partition_point(|i| i.end_time() < t)
    }
}

impl StateHistoryBackend for InMemoryBackend {
    fn ssid(&self) -> &str {
        &self.ssid
    }

    fn start_time(&self) -> i64 {
        self.start_time
    }

    fn end_time(&self) -> i64 {
        self.end_time
    }

    fn insert_past_state(
        &mut self,
        start: i64,
        end: i64,
        quark: Quark,
        value: StateValue,
    ) -> Result<()> {
        StratumError::check_insertion(start, end, self.start_time)?;
        // Queries rely on this ordering; it is not re-checked in release builds.
        debug_assert!(
            self.intervals.last().is_none_or(|last| last.end_time() <= end),
            "intervals must be inserted with non-decreasing end times"
        );
        self.intervals
            .push(StateInterval::new(start, end, quark, value));
        self.end_time = self.end_time.max(end);
        Ok(())
    }

    fn finished_building(&mut self, end_time: i64) -> Result<()> {
        self.end_time = self.end_time.max(end_time);
        self.intervals.shrink_to_fit();
        Ok(())
    }

    fn remove_files(&mut self) -> Result<()> {
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        self.intervals = Vec::new();
        Ok(())
    }

    fn do_query(&self, slots: &mut [Option<StateInterval>], t: i64) -> Result<()> {
        check_query_time(self, t)?;
        let first = self.first_candidate(t);
        for interval in &self.intervals[first..] {
            if interval.start_time() <= t {
                if let Some(slot) = slots.get_mut(interval.quark()) {
                    *slot = Some(interval.clone());
                }
            }
        }
        Ok(())
    }

    fn do_singular_query(&self, t: i64, quark: Quark) -> Result<StateInterval> {
        check_query_time(self, t)?;
        let first = self.first_candidate(t);
        self.intervals[first..]
            .iter()
            .find(|i| i.quark() == quark && i.start_time() <= t)
            .cloned()
            .ok_or(StratumError::AttributeNotFound { quark, time: t })
    }

    fn query_2d(&self, quarks: &QuarkRange, times: &TimeRange) -> Result<Vec<StateInterval>> {
        let first = self.first_candidate(times.min());
        Ok(self.intervals[first..]
            .iter()
            .filter(|i| quarks.test(i.quark()))
            .filter(|i| times.intersects(i.start_time(), i.end_time()))
            .cloned()
            .collect())
    }

    fn debug_print(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(
            out,
            "In-memory history '{}' [{}, {}], {} intervals",
            self.ssid,
            self.start_time,
            self.end_time,
            self.intervals.len()
        )?;
        for interval in &self.intervals {
            writeln!(out, "{}", interval)?;
        }
        Ok(())
    }
}

#[cfg(feature = "snapshot")]
const SNAPSHOT_MAGIC: &[u8] = b"STRATUM_MEMSNAP";
#[cfg(feature = "snapshot")]
const SNAPSHOT_VERSION: u8 = 1;

#[cfg(feature = "snapshot")]
#[derive(Serialize, Deserialize)]
struct SnapshotBody {
    ssid: String,
    start_time: i64,
    end_time: i64,
    intervals: Vec<StateInterval>,
}

#[cfg(feature = "snapshot")]
impl InMemoryBackend {
    /// Write the whole history to `path`, replacing any previous snapshot.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::fs::OpenOptions;
        use std::io::BufWriter;

        let path = path.as_ref();
        let mut temp_path = path.to_path_buf();
        temp_path.as_mut_os_string().push(".tmp");

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(SNAPSHOT_MAGIC)?;
        writer.write_all(&[SNAPSHOT_VERSION])?;

        let body = SnapshotBody {
            ssid: self.ssid.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            intervals: self.intervals.clone(),
        };
        bincode::serialize_into(&mut writer, &body)
            .map_err(|e| StratumError::Serialization(e.to_string()))?;

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, path)?;
        log::debug!(
            "Saved {} intervals of '{}' to {}",
            self.intervals.len(),
            self.ssid,
            path.display()
        );
        Ok(())
    }

    /// Restore a history written by [`InMemoryBackend::save_snapshot`].
    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Self> {
        use std::fs::File;
        use std::io::{BufReader, Read};

        let mut reader = BufReader::new(File::open(path.as_ref())?);

        let mut magic = vec![0u8; SNAPSHOT_MAGIC.len()];
        reader.read_exact(&mut magic).map_err(|_| {
            StratumError::InvalidFormat("snapshot is too short to hold a header".to_string())
        })?;
        if magic != SNAPSHOT_MAGIC {
            return Err(StratumError::InvalidFormat(
                "not an in-memory history snapshot".to_string(),
            ));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(StratumError::InvalidFormat(format!(
                "unsupported snapshot version {}",
                version[0]
            )));
        }

        let body: SnapshotBody = bincode::deserialize_from(&mut reader)
            .map_err(|e| StratumError::Serialization(e.to_string()))?;
        if body
            .intervals
            .windows(2)
            .any(|w| w[0].end_time() > w[1].end_time())
        {
            return Err(StratumError::InvalidFormat(
                "snapshot intervals are not ordered by end time".to_string(),
            ));
        }

        Ok(Self {
            ssid: body.ssid,
            start_time: body.start_time,
            end_time: body.end_time,
            intervals: body.intervals,
        })
    }
}
