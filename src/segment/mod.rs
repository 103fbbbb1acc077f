//! Append-only stores of time segments.
//!
//! A segment store holds an unordered collection of [`Segment`]s and answers
//! intersection queries. Iteration always follows the natural order
//! (start, then end, then the segment's own `Ord`). Two strategies are
//! provided in memory, picked with [`SegmentStoreKind`]:
//! - [`ArrayListStore`]: kept sorted on every insertion
//! - [`LazyArrayListStore`]: appended as-is and sorted on the next read
//!
//! [`HistoryTreeSegmentStore`] keeps segments in a file instead. It needs a
//! path and a [`DiskSegment`] encoding, so it has its own constructors.

mod eager;
pub mod history_tree;
mod lazy;

pub use eager::ArrayListStore;
pub use history_tree::{DiskSegment, HistoryTreeSegmentStore, SegmentOrder, SortField};
pub use lazy::LazyArrayListStore;

use crate::backend::history_tree::config::HtConfig;
use crate::config::{Config, SegmentStoreKind};
use crate::error::{Result, StratumError};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use stratum_types::Segment;

pub use stratum_types::segment::{by_end, by_length, by_start, natural_order, reversed};

/// Operations shared by every segment store.
///
/// Stores lock internally, so all methods take `&self` and a store can be
/// shared between a writer and any number of readers.
pub trait SegmentStore<S>: Send + Sync
where
    S: Segment + Ord + Clone + Send + Sync,
{
    /// Add one segment. Fails if the segment ends before it starts.
    fn add(&self, segment: S) -> Result<bool>;

    /// Add every segment, or none of them if one is invalid.
    fn add_all(&self, segments: Vec<S>) -> Result<bool>;

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn contains(&self, segment: &S) -> bool;

    fn contains_all(&self, segments: &[S]) -> bool {
        segments.iter().all(|s| self.contains(s))
    }

    /// Iterate over an immutable snapshot, in natural order. Later
    /// insertions are not visible to an iterator already handed out.
    fn iter(&self) -> SnapshotIter<S>;

    fn to_vec(&self) -> Vec<S> {
        self.iter().collect()
    }

    /// Segments overlapping `[start, end]`, in natural order.
    fn intersecting_elements(&self, start: i64, end: i64) -> Vec<S>;

    fn intersecting_at(&self, t: i64) -> Vec<S> {
        self.intersecting_elements(t, t)
    }

    /// Every segment, sorted by `cmp`. Ties keep their natural order.
    fn sorted_by(&self, cmp: &dyn Fn(&S, &S) -> Ordering) -> Vec<S> {
        let mut segments = self.to_vec();
        segments.sort_by(cmp);
        segments
    }

    fn intersecting_sorted_by(
        &self,
        start: i64,
        end: i64,
        cmp: &dyn Fn(&S, &S) -> Ordering,
    ) -> Vec<S> {
        let mut segments = self.intersecting_elements(start, end);
        segments.sort_by(cmp);
        segments
    }

    fn clear(&self);

    /// Release the store's contents.
    fn dispose(&self) {
        self.clear();
    }
}

/// Build an empty store of the requested kind.
pub fn create_segment_store<S>(kind: SegmentStoreKind) -> Box<dyn SegmentStore<S>>
where
    S: Segment + Ord + Clone + Send + Sync + 'static,
{
    match kind {
        SegmentStoreKind::Stable => Box::new(ArrayListStore::new()),
        SegmentStoreKind::Fast => Box::new(LazyArrayListStore::new()),
    }
}

/// A new segment file at `path`, laid out with `config`'s block size, fan-out and provider version.
pub fn create_on_disk_segment_store<S, P>(
    path: P,
    config: &Config,
    start_time: i64,
) -> Result<HistoryTreeSegmentStore<S>>
where
    S: DiskSegment,
    P: AsRef<Path>,
{
    config.validate().map_err(StratumError::InvalidInput)?;
    HistoryTreeSegmentStore::create(HtConfig::new(path, config, start_time))
}

/// An existing, finished segment file.
pub fn open_on_disk_segment_store<S, P>(
    path: P,
    provider_version: u32,
) -> Result<HistoryTreeSegmentStore<S>>
where
    S: DiskSegment,
    P: AsRef<Path>,
{
    HistoryTreeSegmentStore::open(path, provider_version)
}

/// Iterator over a point-in-time copy of a store.
#[derive(Debug, Clone)]
pub struct SnapshotIter<S> {
    items: Arc<[S]>,
    pos: usize,
}

impl<S> SnapshotIter<S> {
    fn new(items: Arc<[S]>) -> Self {
        Self { items, pos: 0 }
    }
}

impl<S: Clone> Iterator for SnapshotIter<S> {
    type Item = S;

    fn next(&mut self) -> Option<S> {
        let item = self.items.get(self.pos)?.clone();
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len() - self.pos;
        (remaining, Some(remaining))
    }
}

impl<S: Clone> ExactSizeIterator for SnapshotIter<S> {}

fn check_segment<S: Segment>(segment: &S) -> Result<()> {
    if segment.start() > segment.end() {
        return Err(StratumError::InvalidInput(format!(
            "segment start {} is after its end {}",
            segment.start(),
            segment.end()
        )));
    }
    Ok(())
}
