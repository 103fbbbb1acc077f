//! Predicates bounding a two-dimensional (attribute × time) query.

use crate::error::{Result, StratumError};
use smallvec::SmallVec;
use stratum_types::Quark;

/// A set of attributes, either a contiguous range or a discrete list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuarkRange {
    Range { min: Quark, max: Quark },
    Discrete(SmallVec<[Quark; 8]>),
}

impl QuarkRange {
    pub fn range(min: Quark, max: Quark) -> Result<Self> {
        if min > max {
            return Err(StratumError::InvalidInput(format!(
                "quark range min {} is greater than max {}",
                min, max
            )));
        }
        Ok(QuarkRange::Range { min, max })
    }

    pub fn single(quark: Quark) -> Self {
        QuarkRange::Range {
            min: quark,
            max: quark,
        }
    }

    pub fn discrete<I: IntoIterator<Item = Quark>>(quarks: I) -> Result<Self> {
        let mut set: SmallVec<[Quark; 8]> = quarks.into_iter().collect();
        if set.is_empty() {
            return Err(StratumError::InvalidInput(
                "a discrete quark range needs at least one quark".to_string(),
            ));
        }
        set.sort_unstable();
        set.dedup();
        Ok(QuarkRange::Discrete(set))
    }

    pub fn min(&self) -> Quark {
        match self {
            QuarkRange::Range { min, .. } => *min,
            QuarkRange::Discrete(set) => set[0],
        }
    }

    pub fn max(&self) -> Quark {
        match self {
            QuarkRange::Range { max, .. } => *max,
            QuarkRange::Discrete(set) => set[set.len() - 1],
        }
    }

    pub fn test(&self, quark: Quark) -> bool {
        match self {
            QuarkRange::Range { min, max } => (*min..=*max).contains(&quark),
            QuarkRange::Discrete(set) => set.binary_search(&quark).is_ok(),
        }
    }
}

/// A set of timestamps, either a closed range or a discrete list of instants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeRange {
    Range { min: i64, max: i64 },
    Discrete(Vec<i64>),
}

impl TimeRange {
    pub fn range(min: i64, max: i64) -> Result<Self> {
        if min > max {
            return Err(StratumError::TimeRange(format!(
                "time range min {} is greater than max {}",
                min, max
            )));
        }
        Ok(TimeRange::Range { min, max })
    }

    pub fn singleton(t: i64) -> Self {
        TimeRange::Range { min: t, max: t }
    }

    pub fn discrete<I: IntoIterator<Item = i64>>(times: I) -> Result<Self> {
        let mut set: Vec<i64> = times.into_iter().collect();
        if set.is_empty() {
            return Err(StratumError::InvalidInput(
                "a discrete time range needs at least one timestamp".to_string(),
            ));
        }
        set.sort_unstable();
        set.dedup();
        Ok(TimeRange::Discrete(set))
    }

    pub fn min(&self) -> i64 {
        match self {
            TimeRange::Range { min, .. } => *min,
            TimeRange::Discrete(set) => set[0],
        }
    }

    pub fn max(&self) -> i64 {
        match self {
            TimeRange::Range { max, .. } => *max,
            TimeRange::Discrete(set) => set[set.len() - 1],
        }
    }

    pub fn test(&self, t: i64) -> bool {
        match self {
            TimeRange::Range { min, max } => (*min..=*max).contains(&t),
            TimeRange::Discrete(set) => set.binary_search(&t).is_ok(),
        }
    }

    /// Whether any timestamp of this condition falls in `[low, high]`.
    pub fn intersects(&self, low: i64, high: i64) -> bool {
        match self {
            TimeRange::Range { min, max } => !(low > *max || high < *min),
            TimeRange::Discrete(set) => {
                let first = set.partition_point(|t| *t < low);
                set.get(first).is_some_and(|t| *t <= high)
            }
        }
    }

    /// Restrict to `[low, high]`, or `None` when nothing remains.
    pub fn sub_condition(&self, low: i64, high: i64) -> Option<Self> {
        match self {
            TimeRange::Range { min, max } => {
                let (min, max) = ((*min).max(low), (*max).min(high));
                (min <= max).then_some(TimeRange::Range { min, max })
            }
            TimeRange::Discrete(set) => {
                let kept: Vec<i64> = set
                    .iter()
                    .copied()
                    .filter(|t| (low..=high).contains(t))
                    .collect();
                (!kept.is_empty()).then_some(TimeRange::Discrete(kept))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quark_range() {
        let range = QuarkRange::range(2, 5).unwrap();
        assert!(range.test(2) && range.test(5));
        assert!(!range.test(6));
        assert!(QuarkRange::range(5, 2).is_err());

        let discrete = QuarkRange::discrete([9, 1, 4, 4]).unwrap();
        assert_eq!(discrete.min(), 1);
        assert_eq!(discrete.max(), 9);
        assert!(discrete.test(4));
        assert!(!discrete.test(5));
    }

    #[test]
    fn test_time_range_intersects() {
        let range = TimeRange::range(10, 20).unwrap();
        assert!(range.intersects(0, 10));
        assert!(range.intersects(20, 30));
        assert!(!range.intersects(21, 30));

        let discrete = TimeRange::discrete([5, 15, 25]).unwrap();
        assert!(discrete.intersects(14, 16));
        assert!(!discrete.intersects(6, 14));
        assert!(discrete.intersects(25, 25));
        assert!(!discrete.intersects(26, 100));
    }

    #[test]
    fn test_sub_condition() {
        let range = TimeRange::range(10, 20).unwrap();
        assert_eq!(
            range.sub_condition(15, 30),
            Some(TimeRange::Range { min: 15, max: 20 })
        );
        assert_eq!(range.sub_condition(21, 30), None);

        let discrete = TimeRange::discrete([1, 2, 3]).unwrap();
        assert_eq!(
            discrete.sub_condition(2, 9),
            Some(TimeRange::Discrete(vec![2, 3]))
        );
    }
}
