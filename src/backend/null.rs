use super::StateHistoryBackend;
use crate::error::{Result, StratumError};
use std::io::Write;
use stratum_types::{Quark, StateInterval, StateValue};

/// A history that keeps nothing.
///
/// Useful when only the ongoing state matters: every insertion is dropped and
/// no point in time is ever valid for a past query.
#[derive(Debug, Clone)]
pub struct NullBackend {
    ssid: String,
}

impl NullBackend {
    pub fn new(ssid: impl Into<String>) -> Self {
        Self { ssid: ssid.into() }
    }
}

impl StateHistoryBackend for NullBackend {
    fn ssid(&self) -> &str {
        &self.ssid
    }

    fn start_time(&self) -> i64 {
        0
    }

    fn end_time(&self) -> i64 {
        0
    }

    fn insert_past_state(
        &mut self,
        _start: i64,
        _end: i64,
        _quark: Quark,
        _value: StateValue,
    ) -> Result<()> {
        Ok(())
    }

    fn finished_building(&mut self, _end_time: i64) -> Result<()> {
        Ok(())
    }

    fn remove_files(&mut self) -> Result<()> {
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }

    fn do_query(&self, _slots: &mut [Option<StateInterval>], _t: i64) -> Result<()> {
        Ok(())
    }

    fn do_singular_query(&self, t: i64, quark: Quark) -> Result<StateInterval> {
        Err(StratumError::AttributeNotFound { quark, time: t })
    }

    fn check_valid_time(&self, _t: i64) -> bool {
        false
    }

    fn debug_print(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "Null history '{}' holds no intervals", self.ssid)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{QuarkRange, TimeRange};

    #[test]
    fn test_discards_everything() {
        let mut backend = NullBackend::new("null");
        backend.insert_past_state(0, 100, 3, StateValue::Int(1)).unwrap();
        backend.finished_building(100).unwrap();

        assert_eq!(backend.start_time(), 0);
        assert_eq!(backend.end_time(), 0);
        assert!(!backend.check_valid_time(50));

        let mut slots: Vec<Option<StateInterval>> = vec![None; 4];
        backend.do_query(&mut slots, 50).unwrap();
        assert!(slots.iter().all(Option::is_none));
        assert!(backend.do_singular_query(50, 3).is_err());
        assert!(backend.supply_attribute_tree_reader().is_err());
        assert!(backend.supply_attribute_tree_writer_file().is_none());
        assert!(matches!(
            backend.query_2d(&QuarkRange::single(3), &TimeRange::singleton(50)),
            Err(StratumError::Unsupported(_))
        ));
    }
}
