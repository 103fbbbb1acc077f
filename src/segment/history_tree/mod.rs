//! Disk-resident segment store backed by a segment history tree.
//!
//! Segments are written to fixed-size blocks as they arrive and only the
//! latest branch of the tree stays in memory, so the store scales past what
//! the in-memory stores can hold. Once [`HistoryTreeSegmentStore::finish`] is
//! called the file can be reopened later with
//! [`HistoryTreeSegmentStore::open`].

mod node;
mod tree;

pub use tree::SegmentHistoryTree;

use super::{SegmentStore, SnapshotIter, by_end, by_length, by_start};
use crate::backend::history_tree::config::HtConfig;
use crate::error::{Result, StratumError};
use bytes::{Buf, BufMut, BytesMut};
use node::SegmentChild;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use stratum_types::{BasicSegment, Segment};

/// A segment with a fixed binary encoding, storable in a segment tree file.
pub trait DiskSegment: Segment + Ord + Clone + Send + Sync + 'static {
    /// Bytes written by [`write_to`](DiskSegment::write_to).
    fn size_on_disk(&self) -> usize;

    fn write_to(&self, buf: &mut BytesMut);

    fn read_from(buf: &mut &[u8]) -> Result<Self>;
}

impl DiskSegment for BasicSegment {
    fn size_on_disk(&self) -> usize {
        16
    }

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_i64_le(self.start());
        buf.put_i64_le(self.end());
    }

    fn read_from(buf: &mut &[u8]) -> Result<Self> {
        if buf.remaining() < 16 {
            return Err(StratumError::InvalidFormat(
                "segment node block is truncated".to_string(),
            ));
        }
        let start = buf.get_i64_le();
        let end = buf.get_i64_le();
        BasicSegment::try_new(start, end).ok_or_else(|| {
            StratumError::InvalidFormat(format!("corrupted segment [{}, {}]", start, end))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    Start,
    End,
    Length,
}

/// One of the orders a segment tree can walk without sorting everything first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentOrder {
    field: SortField,
    descending: bool,
}

impl SegmentOrder {
    pub const START: SegmentOrder = SegmentOrder::ascending(SortField::Start);
    pub const END: SegmentOrder = SegmentOrder::ascending(SortField::End);
    pub const LENGTH: SegmentOrder = SegmentOrder::ascending(SortField::Length);

    const fn ascending(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn reversed(self) -> Self {
        Self {
            descending: !self.descending,
            ..self
        }
    }

    pub fn field(self) -> SortField {
        self.field
    }

    pub fn is_descending(self) -> bool {
        self.descending
    }

    /// The comparator of this order, usable with [`SegmentStore::sorted_by`].
    pub fn compare<S: Segment>(self, a: &S, b: &S) -> Ordering {
        let ordering = match self.field {
            SortField::Start => by_start(a, b),
            SortField::End => by_end(a, b),
            SortField::Length => by_length(a, b),
        };
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }

    /// Bitwise negation flips the order without overflowing.
    fn directed(self, key: i64) -> i64 {
        if self.descending { !key } else { key }
    }

    fn segment_key<S: Segment>(self, segment: &S) -> i64 {
        self.directed(match self.field {
            SortField::Start => segment.start(),
            SortField::End => segment.end(),
            SortField::Length => segment.length(),
        })
    }

    /// Lower bound, in this order, of every segment under `child`.
    fn child_key(self, child: &SegmentChild) -> i64 {
        let bound = match (self.field, self.descending) {
            (SortField::Start, false) => child.start,
            (SortField::Start, true) => child.stats.max_start,
            (SortField::End, false) => child.stats.min_end,
            (SortField::End, true) => child.end,
            (SortField::Length, false) => child.stats.shortest,
            (SortField::Length, true) => child.stats.longest,
        };
        self.directed(bound)
    }
}

/// Segment store kept in a history tree file.
///
/// The [`SegmentStore`] reads cannot fail, so a block that cannot be read is
/// reported with `log::error!` and the read returns nothing; the `try_*`
/// methods return the error instead.
pub struct HistoryTreeSegmentStore<S> {
    tree: SegmentHistoryTree<S>,
    /// Natural-order copy handed to iterators. The mutex also orders rebuilds after writes.
    snapshot: Mutex<Option<Arc<[S]>>>,
}

impl<S: DiskSegment> HistoryTreeSegmentStore<S> {
    /// A new, empty store at `config.path`. Segments may not start before `config.start_time`.
    pub fn create(config: HtConfig) -> Result<Self> {
        Ok(Self {
            tree: SegmentHistoryTree::create(config)?,
            snapshot: Mutex::new(None),
        })
    }

    /// Reopen a finished store. Fails when it was built by another provider version.
    pub fn open<P: AsRef<Path>>(path: P, provider_version: u32) -> Result<Self> {
        Ok(Self {
            tree: SegmentHistoryTree::open(path, provider_version)?,
            snapshot: Mutex::new(None),
        })
    }

    pub fn tree(&self) -> &SegmentHistoryTree<S> {
        &self.tree
    }

    /// Close the tree and write the file header. The store stays readable.
    pub fn finish(&self) -> Result<()> {
        self.tree.close_tree()
    }

    pub fn remove_files(&self) -> Result<()> {
        self.snapshot.lock().take();
        self.tree.clear();
        self.tree.delete_file()
    }

    pub fn try_intersecting(&self, start: i64, end: i64) -> Result<Vec<S>> {
        self.tree.intersecting(start, end)
    }

    /// Every segment in `order`.
    pub fn try_sorted(&self, order: SegmentOrder) -> Result<Vec<S>> {
        self.tree.sorted(order, usize::MAX)
    }

    /// The first `count` segments in `order`, reading only the nodes needed to find them.
    pub fn try_first(&self, order: SegmentOrder, count: usize) -> Result<Vec<S>> {
        self.tree.sorted(order, count)
    }

    fn or_report(&self, result: Result<Vec<S>>) -> Vec<S> {
        result.unwrap_or_else(|e| {
            log::error!(
                "Failed to read segment file {}: {}",
                self.tree.config().path.display(),
                e
            );
            Vec::new()
        })
    }
}

impl<S: DiskSegment> SegmentStore<S> for HistoryTreeSegmentStore<S> {
    fn add(&self, segment: S) -> Result<bool> {
        let mut snapshot = self.snapshot.lock();
        self.tree.insert(segment)?;
        *snapshot = None;
        Ok(true)
    }

    fn add_all(&self, segments: Vec<S>) -> Result<bool> {
        for segment in &segments {
            self.tree.check_segment(segment)?;
        }
        if segments.is_empty() {
            return Ok(false);
        }
        let mut snapshot = self.snapshot.lock();
        *snapshot = None;
        for segment in segments {
            self.tree.insert(segment)?;
        }
        Ok(true)
    }

    fn size(&self) -> usize {
        self.tree.segment_count() as usize
    }

    fn contains(&self, segment: &S) -> bool {
        self.intersecting_elements(segment.start(), segment.end())
            .contains(segment)
    }

    fn iter(&self) -> SnapshotIter<S> {
        let mut snapshot = self.snapshot.lock();
        if let Some(items) = snapshot.as_ref() {
            return SnapshotIter::new(Arc::clone(items));
        }
        let items: Arc<[S]> = Arc::from(self.or_report(self.tree.intersecting(i64::MIN, i64::MAX)));
        *snapshot = Some(Arc::clone(&items));
        SnapshotIter::new(items)
    }

    fn intersecting_elements(&self, start: i64, end: i64) -> Vec<S> {
        self.or_report(self.try_intersecting(start, end))
    }

    fn clear(&self) {
        let mut snapshot = self.snapshot.lock();
        self.tree.clear();
        *snapshot = None;
    }

    /// Empty the store and close its file. Later insertions fail.
    fn dispose(&self) {
        self.clear();
        self.tree.close_file();
    }
}
