use super::{SegmentStore, SnapshotIter, check_segment, natural_order};
use crate::error::Result;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::cmp::Ordering;
use std::sync::Arc;
use stratum_types::Segment;

struct Inner<S> {
    store: Vec<S>,
    /// Copy handed to iterators, dropped on every mutation.
    snapshot: Option<Arc<[S]>>,
}

/// Segment store kept sorted at all times.
///
/// Each insertion is a binary search plus a shift, so reads never sort.
/// Writers take the lock exclusively; readers share it.
pub struct ArrayListStore<S> {
    inner: RwLock<Inner<S>>,
}

impl<S> ArrayListStore<S>
where
    S: Segment + Ord + Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                store: Vec::new(),
                snapshot: None,
            }),
        }
    }

    /// Build a store from segments in any order.
    pub fn from_slice(segments: &[S]) -> Result<Self> {
        for segment in segments {
            check_segment(segment)?;
        }
        let mut store = segments.to_vec();
        store.sort_by(natural_order);
        Ok(Self {
            inner: RwLock::new(Inner {
                store,
                snapshot: None,
            }),
        })
    }

    fn insert_sorted(store: &mut Vec<S>, segment: S) {
        let pos = store.partition_point(|s| natural_order(s, &segment) != Ordering::Greater);
        store.insert(pos, segment);
    }

    fn snapshot(&self) -> Arc<[S]> {
        let inner = self.inner.upgradable_read();
        if let Some(snapshot) = &inner.snapshot {
            return Arc::clone(snapshot);
        }
        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        let snapshot: Arc<[S]> = Arc::from(inner.store.as_slice());
        inner.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }
}

impl<S> Default for ArrayListStore<S>
where
    S: Segment + Ord + Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SegmentStore<S> for ArrayListStore<S>
where
    S: Segment + Ord + Clone + Send + Sync,
{
    fn add(&self, segment: S) -> Result<bool> {
        check_segment(&segment)?;
        let mut inner = self.inner.write();
        Self::insert_sorted(&mut inner.store, segment);
        inner.snapshot = None;
        Ok(true)
    }

    fn add_all(&self, segments: Vec<S>) -> Result<bool> {
        for segment in &segments {
            check_segment(segment)?;
        }
        if segments.is_empty() {
            return Ok(false);
        }
        let mut inner = self.inner.write();
        inner.store.reserve(segments.len());
        for segment in segments {
            Self::insert_sorted(&mut inner.store, segment);
        }
        inner.snapshot = None;
        Ok(true)
    }

    fn size(&self) -> usize {
        self.inner.read().store.len()
    }

    fn contains(&self, segment: &S) -> bool {
        self.inner
            .read()
            .store
            .binary_search_by(|s| natural_order(s, segment))
            .is_ok()
    }

    fn iter(&self) -> SnapshotIter<S> {
        SnapshotIter::new(self.snapshot())
    }

    fn intersecting_elements(&self, start: i64, end: i64) -> Vec<S> {
        let inner = self.inner.read();
        // Past this index every segment starts after `end`.
        let upper = inner.store.partition_point(|s| s.start() <= end);
        inner.store[..upper]
            .iter()
            .filter(|s| s.intersects(start, end))
            .cloned()
            .collect()
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        inner.store.clear();
        inner.snapshot = None;
    }
}
