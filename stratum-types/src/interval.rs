use crate::value::StateValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense integer handle of one attribute's time series.
pub type Quark = usize;

/// The value of one attribute over one closed time span `[start, end]`.
///
/// ```
/// use stratum_types::{StateInterval, StateValue};
///
/// let interval = StateInterval::new(0, 10, 3, StateValue::from("running"));
/// assert!(interval.intersects(0));
/// assert!(interval.intersects(10));
/// assert!(!interval.intersects(11));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateInterval {
    start: i64,
    end: i64,
    quark: Quark,
    value: StateValue,
}

impl StateInterval {
    /// Callers are expected to pass `start <= end`; backends validate before building one.
    pub fn new(start: i64, end: i64, quark: Quark, value: StateValue) -> Self {
        debug_assert!(start <= end, "interval start {} after end {}", start, end);
        Self {
            start,
            end,
            quark,
            value,
        }
    }

    #[inline]
    pub fn start_time(&self) -> i64 {
        self.start
    }

    #[inline]
    pub fn end_time(&self) -> i64 {
        self.end
    }

    #[inline]
    pub fn quark(&self) -> Quark {
        self.quark
    }

    #[inline]
    pub fn value(&self) -> &StateValue {
        &self.value
    }

    pub fn into_value(self) -> StateValue {
        self.value
    }

    /// Whether `t` falls within `[start, end]`.
    #[inline]
    pub fn intersects(&self, t: i64) -> bool {
        self.start <= t && t <= self.end
    }

    /// Whether `[low, high]` overlaps this interval.
    #[inline]
    pub fn overlaps(&self, low: i64, high: i64) -> bool {
        !(low > self.end || high < self.start)
    }
}

impl fmt::Display for StateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}], attribute = {}, value = {}",
            self.start, self.end, self.quark, self.value
        )
    }
}
