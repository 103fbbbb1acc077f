use super::{SegmentStore, SnapshotIter, check_segment, natural_order};
use crate::error::Result;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::Arc;
use stratum_types::Segment;

struct Inner<S> {
    store: Vec<S>,
    /// Set when an append broke the natural order.
    dirty: bool,
    snapshot: Option<Arc<[S]>>,
    min_start: i64,
    max_end: i64,
    sorts: usize,
}

impl<S: Segment + Ord> Inner<S> {
    fn push(&mut self, segment: S) {
        if self
            .store
            .last()
            .is_some_and(|last| natural_order(last, &segment) == Ordering::Greater)
        {
            self.dirty = true;
        }
        self.min_start = self.min_start.min(segment.start());
        self.max_end = self.max_end.max(segment.end());
        self.store.push(segment);
        self.snapshot = None;
    }

    fn sort_if_dirty(&mut self) {
        if self.dirty {
            self.store.sort_by(natural_order);
            self.dirty = false;
            self.sorts += 1;
        }
    }
}

/// Segment store that appends on insertion and sorts on the next read.
///
/// Cheap for bulk or out-of-order loads. One mutex guards the data and the
/// dirty flag, so reads are serialized with writes.
pub struct LazyArrayListStore<S> {
    inner: Mutex<Inner<S>>,
}

impl<S> LazyArrayListStore<S>
where
    S: Segment + Ord + Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                store: Vec::new(),
                dirty: false,
                snapshot: None,
                min_start: i64::MAX,
                max_end: i64::MIN,
                sorts: 0,
            }),
        }
    }

    /// Build a store from segments in any order. Sorting is deferred to the first read.
    pub fn from_slice(segments: &[S]) -> Result<Self> {
        for segment in segments {
            check_segment(segment)?;
        }
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            inner.store.reserve(segments.len());
            for segment in segments {
                inner.push(segment.clone());
            }
        }
        Ok(store)
    }

    /// Whether the next read will have to sort.
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    /// Number of sorts performed so far.
    pub fn sort_count(&self) -> usize {
        self.inner.lock().sorts
    }
}

impl<S> Default for LazyArrayListStore<S>
where
    S: Segment + Ord + Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SegmentStore<S> for LazyArrayListStore<S>
where
    S: Segment + Ord + Clone + Send + Sync,
{
    fn add(&self, segment: S) -> Result<bool> {
        check_segment(&segment)?;
        self.inner.lock().push(segment);
        Ok(true)
    }

    fn add_all(&self, segments: Vec<S>) -> Result<bool> {
        for segment in &segments {
            check_segment(segment)?;
        }
        if segments.is_empty() {
            return Ok(false);
        }
        let mut inner = self.inner.lock();
        inner.store.reserve(segments.len());
        for segment in segments {
            inner.push(segment);
        }
        Ok(true)
    }

    fn size(&self) -> usize {
        self.inner.lock().store.len()
    }

    fn contains(&self, segment: &S) -> bool {
        let mut inner = self.inner.lock();
        inner.sort_if_dirty();
        inner
            .store
            .binary_search_by(|s| natural_order(s, segment))
            .is_ok()
    }

    fn iter(&self) -> SnapshotIter<S> {
        let mut inner = self.inner.lock();
        if let Some(snapshot) = &inner.snapshot {
            return SnapshotIter::new(Arc::clone(snapshot));
        }
        inner.sort_if_dirty();
        let snapshot: Arc<[S]> = Arc::from(inner.store.as_slice());
        inner.snapshot = Some(Arc::clone(&snapshot));
        SnapshotIter::new(snapshot)
    }

    fn intersecting_elements(&self, start: i64, end: i64) -> Vec<S> {
        let mut inner = self.inner.lock();
        inner.sort_if_dirty();
        if start <= inner.min_start && end >= inner.max_end {
            return inner.store.clone();
        }
        let upper = inner.store.partition_point(|s| s.start() <= end);
        inner.store[..upper]
            .iter()
            .filter(|s| s.end() >= start)
            .cloned()
            .collect()
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.store.clear();
        inner.dirty = false;
        inner.snapshot = None;
        inner.min_start = i64::MAX;
        inner.max_end = i64::MIN;
    }
}
