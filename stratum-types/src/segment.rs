//! Time-span segments and the orderings used to sort them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A closed time span `[start, end]`, possibly carrying a payload.
pub trait Segment {
    fn start(&self) -> i64;

    fn end(&self) -> i64;

    /// Saturates at `i64::MAX` for spans wider than the `i64` range.
    fn length(&self) -> i64 {
        self.end().saturating_sub(self.start())
    }

    /// Whether `[low, high]` overlaps this segment.
    fn intersects(&self, low: i64, high: i64) -> bool {
        !(low > self.end() || high < self.start())
    }
}

/// A segment with no payload.
///
/// Field order makes the derived `Ord` the natural order: start, then end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BasicSegment {
    start: i64,
    end: i64,
}

impl BasicSegment {
    /// # Panics
    ///
    /// Panics if `start > end`.
    pub fn new(start: i64, end: i64) -> Self {
        assert!(start <= end, "segment start {} after end {}", start, end);
        Self { start, end }
    }

    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }
}

impl Segment for BasicSegment {
    fn start(&self) -> i64 {
        self.start
    }

    fn end(&self) -> i64 {
        self.end
    }
}

impl fmt::Display for BasicSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

impl<T: Segment + ?Sized> Segment for std::sync::Arc<T> {
    fn start(&self) -> i64 {
        (**self).start()
    }

    fn end(&self) -> i64 {
        (**self).end()
    }
}

/// Natural segment order: ascending start, then end, then the type's own `Ord`.
pub fn natural_order<S: Segment + Ord>(a: &S, b: &S) -> Ordering {
    a.start()
        .cmp(&b.start())
        .then_with(|| a.end().cmp(&b.end()))
        .then_with(|| a.cmp(b))
}

pub fn by_start<S: Segment>(a: &S, b: &S) -> Ordering {
    a.start().cmp(&b.start())
}

pub fn by_end<S: Segment>(a: &S, b: &S) -> Ordering {
    a.end().cmp(&b.end())
}

pub fn by_length<S: Segment>(a: &S, b: &S) -> Ordering {
    a.length().cmp(&b.length())
}

/// Flip a comparator.
pub fn reversed<S, F>(cmp: F) -> impl Fn(&S, &S) -> Ordering
where
    F: Fn(&S, &S) -> Ordering,
{
    move |a: &S, b: &S| cmp(b, a)
}
