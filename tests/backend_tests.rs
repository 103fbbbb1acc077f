use parking_lot::RwLock;
use std::sync::Arc;
use std::thread;
use stratum::{
    BackendKind, Config, InMemoryBackend, QuarkRange, StateHistoryBackend, StateInterval,
    StateValue, StratumError, TimeRange, new_history_tree_backend, new_in_memory_backend,
    new_threaded_history_tree_backend,
};
use tempfile::TempDir;

const NB_ATTRIBUTES: usize = 5;
const PERIODS: [i64; NB_ATTRIBUTES] = [3, 5, 7, 11, 13];

/// Contiguous intervals for every attribute, sorted by end time.
fn full_intervals(start: i64, end: i64) -> Vec<StateInterval> {
    let mut intervals = Vec::new();
    for (quark, period) in PERIODS.iter().enumerate() {
        let mut t = start;
        let mut k = 0i64;
        while t <= end {
            let interval_end = (t + period - 1).min(end);
            let value = match quark {
                0 => StateValue::Int(k as i32),
                1 => StateValue::Long(k * 1_000_000_000),
                2 => StateValue::Double(k as f64 / 2.0),
                3 => StateValue::from(format!("state-{}", k)),
                _ if k % 2 == 0 => StateValue::Null,
                _ => StateValue::Int(-(k as i32)),
            };
            intervals.push(StateInterval::new(t, interval_end, quark, value));
            t = interval_end + 1;
            k += 1;
        }
    }
    intervals.sort_by_key(|i| i.end_time());
    intervals
}

fn reference_lookup(intervals: &[StateInterval], t: i64, quark: usize) -> Option<&StateInterval> {
    intervals
        .iter()
        .find(|i| i.quark() == quark && i.start_time() <= t && t <= i.end_time())
}

fn small_tree_config() -> Config {
    Config::default()
        .with_block_size(4096)
        .with_max_children(3)
}

/// One backend of every kind able to store intervals.
fn all_backends(dir: &TempDir, start: i64) -> Vec<(&'static str, Box<dyn StateHistoryBackend>)> {
    vec![
        ("in_memory", new_in_memory_backend("test", start)),
        (
            "history_tree",
            new_history_tree_backend("test", dir.path().join("plain.ht"), &small_tree_config(), start)
                .unwrap(),
        ),
        (
            "threaded_history_tree",
            new_threaded_history_tree_backend(
                "test",
                dir.path().join("threaded.ht"),
                &small_tree_config().with_queue_size(16),
                start,
            )
            .unwrap(),
        ),
    ]
}

fn fill(backend: &mut dyn StateHistoryBackend, intervals: &[StateInterval], end: i64) {
    for interval in intervals {
        backend
            .insert_past_state(
                interval.start_time(),
                interval.end_time(),
                interval.quark(),
                interval.value().clone(),
            )
            .unwrap();
    }
    backend.finished_building(end).unwrap();
}

#[test]
fn test_queries_match_linear_scan() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let (start, end) = (0, 1500);
    let intervals = full_intervals(start, end);

    for (name, mut backend) in all_backends(&dir, start) {
        fill(backend.as_mut(), &intervals, end);
        assert_eq!(backend.end_time(), end, "{}", name);

        for t in start..=end {
            let state = backend.query_full_state(t, NB_ATTRIBUTES).unwrap();
            for quark in 0..NB_ATTRIBUTES {
                let expected = reference_lookup(&intervals, t, quark);
                assert_eq!(state[quark].as_ref(), expected, "{} full query at {}", name, t);

                let single = backend.do_singular_query(t, quark).unwrap();
                assert_eq!(Some(&single), expected, "{} singular query at {}", name, t);
            }
        }
    }
}

#[test]
fn test_cascading_intervals() {
    let dir = tempfile::tempdir().unwrap();
    // Each attribute changes once per step, staggered so ends are strictly increasing.
    let mut intervals = Vec::new();
    let mut last_end = vec![-1i64; 4];
    for step in 0..400i64 {
        for quark in 0..4usize {
            let end = step * 4 + quark as i64;
            intervals.push(StateInterval::new(
                last_end[quark] + 1,
                end,
                quark,
                StateValue::Long(step),
            ));
            last_end[quark] = end;
        }
    }

    for (name, mut backend) in all_backends(&dir, 0) {
        fill(backend.as_mut(), &intervals, 1599);
        let state = backend.query_full_state(1000, 4).unwrap();
        for (quark, slot) in state.iter().enumerate() {
            let interval = slot.as_ref().unwrap();
            assert!(interval.intersects(1000), "{}", name);
            assert_eq!(Some(interval), reference_lookup(&intervals, 1000, quark), "{}", name);
        }
    }
}

#[test]
fn test_insert_and_query_each_value_type() {
    let dir = tempfile::tempdir().unwrap();
    let values = [
        StateValue::Null,
        StateValue::Int(-42),
        StateValue::Long(i64::MAX),
        StateValue::Double(std::f64::consts::PI),
        StateValue::from("a somewhat longer string value"),
    ];

    for (name, mut backend) in all_backends(&dir, 0) {
        for (quark, value) in values.iter().enumerate() {
            backend
                .insert_past_state(0, 10 + quark as i64, quark, value.clone())
                .unwrap();
        }
        backend.finished_building(20).unwrap();

        for (quark, value) in values.iter().enumerate() {
            let interval = backend.do_singular_query(5, quark).unwrap();
            assert_eq!(interval.value(), value, "{}", name);
            assert_eq!(interval.value().value_type(), value.value_type(), "{}", name);
        }
        let state = backend.query_full_state(13, values.len()).unwrap();
        assert!(state[2].is_none(), "{}", name);
        assert_eq!(state[3].as_ref().unwrap().value().unbox_double().unwrap(), std::f64::consts::PI);
    }
}

#[test]
fn test_scenario_two_states() {
    let dir = tempfile::tempdir().unwrap();
    for (name, mut backend) in all_backends(&dir, 0) {
        backend.insert_past_state(0, 10, 0, "A".into()).unwrap();
        backend.insert_past_state(11, 20, 0, "B".into()).unwrap();
        backend.finished_building(20).unwrap();

        let at_10 = backend.do_singular_query(10, 0).unwrap();
        assert_eq!(at_10.value().unbox_str().unwrap(), "A", "{}", name);
        let at_15 = backend.do_singular_query(15, 0).unwrap();
        assert_eq!(at_15.value().unbox_str().unwrap(), "B", "{}", name);
        assert!(
            matches!(
                backend.do_singular_query(10, 1),
                Err(StratumError::AttributeNotFound { quark: 1, time: 10 })
            ),
            "{}",
            name
        );
    }
}

#[test]
fn test_range_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    for (name, mut backend) in all_backends(&dir, 100) {
        backend.insert_past_state(100, 150, 0, StateValue::Int(1)).unwrap();
        backend.insert_past_state(151, 200, 0, StateValue::Int(2)).unwrap();
        backend.finished_building(200).unwrap();

        assert!(backend.check_valid_time(100), "{}", name);
        assert!(backend.check_valid_time(200), "{}", name);
        assert!(!backend.check_valid_time(99), "{}", name);
        assert!(!backend.check_valid_time(201), "{}", name);

        assert!(backend.do_singular_query(100, 0).is_ok(), "{}", name);
        assert!(backend.do_singular_query(200, 0).is_ok(), "{}", name);
        let mut slots: Vec<Option<StateInterval>> = vec![None; 1];
        for t in [99, 201] {
            assert!(
                matches!(backend.do_query(&mut slots, t), Err(StratumError::TimeRange(_))),
                "{} at {}",
                name,
                t
            );
            assert!(
                matches!(backend.do_singular_query(t, 0), Err(StratumError::TimeRange(_))),
                "{} at {}",
                name,
                t
            );
        }
    }
}

#[test]
fn test_invalid_insertions() {
    let dir = tempfile::tempdir().unwrap();
    for (name, mut backend) in all_backends(&dir, 10) {
        assert!(
            matches!(
                backend.insert_past_state(5, 20, 0, StateValue::Null),
                Err(StratumError::TimeRange(_))
            ),
            "{}",
            name
        );
        assert!(
            matches!(
                backend.insert_past_state(30, 20, 0, StateValue::Null),
                Err(StratumError::TimeRange(_))
            ),
            "{}",
            name
        );
        backend.finished_building(10).unwrap();
    }
}

#[test]
fn test_negative_times() {
    let dir = tempfile::tempdir().unwrap();
    let (start, end) = (-1000, -1);
    let intervals = full_intervals(start, end);

    for (name, mut backend) in all_backends(&dir, start) {
        fill(backend.as_mut(), &intervals, end);
        assert_eq!(backend.start_time(), -1000, "{}", name);
        for t in [-1000, -999, -500, -1] {
            for quark in 0..NB_ATTRIBUTES {
                let found = backend.do_singular_query(t, quark).unwrap();
                assert_eq!(Some(&found), reference_lookup(&intervals, t, quark), "{}", name);
            }
        }
        assert!(!backend.check_valid_time(0), "{}", name);
    }
}

#[test]
fn test_query_2d_matches_filter() {
    let dir = tempfile::tempdir().unwrap();
    let (start, end) = (0, 800);
    let intervals = full_intervals(start, end);

    for (name, mut backend) in all_backends(&dir, start) {
        fill(backend.as_mut(), &intervals, end);

        let conditions = [
            (QuarkRange::range(1, 3).unwrap(), TimeRange::range(100, 250).unwrap()),
            (QuarkRange::discrete([0, 4]).unwrap(), TimeRange::discrete([5, 400, 799]).unwrap()),
            (QuarkRange::single(2), TimeRange::singleton(800)),
        ];
        for (quarks, times) in &conditions {
            let mut found = backend.query_2d(quarks, times).unwrap();
            let mut expected: Vec<StateInterval> = intervals
                .iter()
                .filter(|i| quarks.test(i.quark()))
                .filter(|i| times.intersects(i.start_time(), i.end_time()))
                .cloned()
                .collect();
            let key = |i: &StateInterval| (i.quark(), i.start_time());
            found.sort_by_key(key);
            expected.sort_by_key(key);
            assert_eq!(found, expected, "{} with {:?} x {:?}", name, quarks, times);
        }
    }
}

#[test]
fn test_debug_print_lists_intervals() {
    let dir = tempfile::tempdir().unwrap();
    for (name, mut backend) in all_backends(&dir, 0) {
        backend.insert_past_state(0, 9, 3, StateValue::Int(77)).unwrap();
        backend.finished_building(9).unwrap();
        let mut out = Vec::new();
        backend.debug_print(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[0, 9], attribute = 3, value = 77"), "{}: {}", name, text);
    }
}

#[test]
fn test_in_memory_read_during_write() {
    let backend = Arc::new(RwLock::new(InMemoryBackend::new("shared", 0)));

    let writer = {
        let backend = Arc::clone(&backend);
        thread::spawn(move || {
            for t in 0..2000i64 {
                backend
                    .write()
                    .insert_past_state(t, t, 0, StateValue::Long(t))
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                for _ in 0..200 {
                    let guard = backend.read();
                    let end = guard.end_time();
                    if guard.is_empty() {
                        continue;
                    }
                    let interval = guard.do_singular_query(end, 0).unwrap();
                    assert_eq!(interval.value(), &StateValue::Long(end));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(backend.read().len(), 2000);
}

#[test]
fn test_config_driven_backends() {
    let dir = tempfile::tempdir().unwrap();
    for kind in [BackendKind::InMemory, BackendKind::HistoryTree, BackendKind::ThreadedHistoryTree] {
        let config = small_tree_config().with_backend(kind);
        let mut backend = stratum::BackendBuilder::new("cfg")
            .config(config)
            .path(dir.path().join(format!("{:?}.ht", kind)))
            .build()
            .unwrap();
        backend.insert_past_state(0, 5, 0, StateValue::Int(1)).unwrap();
        backend.finished_building(5).unwrap();
        assert_eq!(backend.do_singular_query(3, 0).unwrap().value(), &StateValue::Int(1));
        assert_eq!(kind.is_persistent(), backend.supply_attribute_tree_writer_file().is_some());
    }
}
