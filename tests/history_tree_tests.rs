use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use stratum::backend::history_tree::{HistoryTreeBackend, HtConfig, TREE_HEADER_SIZE};
use stratum::{
    Config, StateHistoryBackend, StateInterval, StateValue, StratumError,
    ThreadedHistoryTreeBackend,
    new_history_tree_backend, open_history_tree_backend,
};

fn build_history(path: &std::path::Path, config: &Config) {
    let mut backend = new_history_tree_backend("ht", path, config, 0).unwrap();
    for t in 0..2000i64 {
        backend
            .insert_past_state(t * 5, t * 5 + 4, (t % 7) as usize, StateValue::Int(t as i32))
            .unwrap();
    }
    backend.finished_building(9999).unwrap();
}

fn small_config() -> Config {
    Config::default()
        .with_block_size(4096)
        .with_max_children(4)
        .with_provider_version(7)
}

#[test]
fn test_reopen_gives_same_answers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.ht");
    build_history(&path, &small_config());

    let backend = open_history_tree_backend("ht", &path, 7).unwrap();
    assert_eq!(backend.start_time(), 0);
    assert_eq!(backend.end_time(), 9999);

    for t in [0i64, 4, 5, 1234, 5000, 9999] {
        let step = t / 5;
        let quark = (step % 7) as usize;
        let interval = backend.do_singular_query(t, quark).unwrap();
        assert_eq!(interval.value(), &StateValue::Int(step as i32));
        assert_eq!(interval.start_time(), step * 5);
    }

    // Only the attribute written last is set at the very end.
    let state = backend.query_full_state(9999, 7).unwrap();
    let set: Vec<usize> = (0..7).filter(|q| state[*q].is_some()).collect();
    assert_eq!(set, vec![4]);
    assert_eq!(state[4].as_ref().unwrap().start_time(), 9995);
}

#[test]
fn test_reopen_with_wrong_provider_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("provider.ht");
    build_history(&path, &small_config());

    let result = open_history_tree_backend("ht", &path, 8);
    assert!(matches!(
        result,
        Err(StratumError::ProviderVersionMismatch {
            expected: 8,
            found: 7
        })
    ));
}

#[test]
fn test_reopen_rejects_foreign_files() {
    let dir = tempfile::tempdir().unwrap();

    let short = dir.path().join("short.ht");
    std::fs::write(&short, b"not a history").unwrap();
    assert!(matches!(
        open_history_tree_backend("ht", &short, 0),
        Err(StratumError::InvalidFormat(_))
    ));

    let zeroes = dir.path().join("zeroes.ht");
    std::fs::write(&zeroes, vec![0u8; 2 * TREE_HEADER_SIZE]).unwrap();
    assert!(matches!(
        open_history_tree_backend("ht", &zeroes, 0),
        Err(StratumError::InvalidFormat(_))
    ));

    assert!(matches!(
        open_history_tree_backend("ht", dir.path().join("missing.ht"), 0),
        Err(StratumError::Io(_))
    ));
}

#[test]
fn test_corrupted_start_time_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.ht");
    build_history(&path, &small_config());

    // Start time lives after seven 4-byte header fields.
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(28)).unwrap();
    file.write_all(&42i64.to_le_bytes()).unwrap();
    drop(file);

    assert!(matches!(
        open_history_tree_backend("ht", &path, 7),
        Err(StratumError::InvalidFormat(_))
    ));
}

#[test]
fn test_unclosed_root_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unclosed.ht");
    build_history(&path, &small_config());

    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    let mut root_seq = [0u8; 4];
    file.seek(SeekFrom::Start(24)).unwrap();
    file.read_exact(&mut root_seq).unwrap();
    let root_seq = i32::from_le_bytes(root_seq) as u64;

    // The done flag is the last byte of the 30-byte node header.
    let done = TREE_HEADER_SIZE as u64 + root_seq * 4096 + 29;
    file.seek(SeekFrom::Start(done)).unwrap();
    file.write_all(&[0]).unwrap();
    drop(file);

    assert!(matches!(
        open_history_tree_backend("ht", &path, 7),
        Err(StratumError::InvalidFormat(_))
    ));
}

#[test]
fn test_reopen_keeps_interval_count() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("count.ht");
    build_history(&path, &small_config());

    let backend = HistoryTreeBackend::open("ht", &path, 7).unwrap();
    assert_eq!(backend.tree().interval_count(), 2000);
}

#[test]
fn test_attribute_tree_section() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attributes.ht");
    let config = small_config();

    let mut backend =
        HistoryTreeBackend::new("ht", HtConfig::new(&path, &config, 0)).unwrap();
    for t in 0..500i64 {
        backend
            .insert_past_state(t, t, 0, StateValue::Long(t))
            .unwrap();
    }
    backend.finished_building(499).unwrap();

    let node_count = backend.tree().node_count() as u64;
    let offset = backend.supply_attribute_tree_writer_file_pos().unwrap();
    assert_eq!(offset, TREE_HEADER_SIZE as u64 + node_count * 4096);
    assert_eq!(backend.supply_attribute_tree_writer_file().unwrap(), path);

    let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
    writer.seek(SeekFrom::Start(offset)).unwrap();
    writer.write_all(b"attribute tree").unwrap();
    drop(writer);

    let mut reader = backend.supply_attribute_tree_reader().unwrap();
    let mut contents = String::new();
    reader.read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "attribute tree");

    // The trailing section does not disturb a reopened history.
    drop(backend);
    let reopened = open_history_tree_backend("ht", &path, 7).unwrap();
    assert_eq!(
        reopened.do_singular_query(321, 0).unwrap().value(),
        &StateValue::Long(321)
    );
    assert_eq!(
        reopened.supply_attribute_tree_writer_file_pos(),
        Some(offset)
    );
}

#[test]
fn test_queries_after_dispose_fail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dispose.ht");
    build_history(&path, &small_config());

    let mut backend = open_history_tree_backend("ht", &path, 7).unwrap();
    assert!(backend.do_singular_query(10, 2).is_ok());
    backend.dispose().unwrap();

    assert!(matches!(
        backend.do_singular_query(10, 2),
        Err(StratumError::Disposed)
    ));
    let mut slots: Vec<Option<StateInterval>> = vec![None; 7];
    assert!(matches!(
        backend.do_query(&mut slots, 10),
        Err(StratumError::Disposed)
    ));
    assert!(matches!(
        backend.supply_attribute_tree_reader(),
        Err(StratumError::Disposed)
    ));
    // The file itself is left in place.
    assert!(path.exists());
}

#[test]
fn test_remove_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("removed.ht");
    let mut backend = new_history_tree_backend("ht", &path, &small_config(), 0).unwrap();
    backend.insert_past_state(0, 3, 0, StateValue::Null).unwrap();
    backend.finished_building(3).unwrap();
    assert!(path.exists());

    backend.remove_files().unwrap();
    assert!(!path.exists());
    assert!(matches!(
        backend.do_singular_query(1, 0),
        Err(StratumError::Disposed)
    ));
}

#[test]
fn test_threaded_back_pressure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.ht");
    let config = small_config();

    // A single-slot queue forces the inserter to wait on the writer for nearly every interval.
    let mut backend =
        ThreadedHistoryTreeBackend::new("threaded", HtConfig::new(&path, &config, 0), 1).unwrap();
    assert!(backend.is_building());
    for t in 0..5000i64 {
        backend
            .insert_past_state(t, t, (t % 3) as usize, StateValue::from(format!("v{}", t)))
            .unwrap();
    }
    backend.finished_building(4999).unwrap();

    for t in [0i64, 2500, 4999] {
        let interval = backend.do_singular_query(t, (t % 3) as usize).unwrap();
        assert_eq!(interval.value().unbox_str().unwrap(), format!("v{}", t));
    }

    backend.dispose().unwrap();
    let reopened = open_history_tree_backend("threaded", &path, 7).unwrap();
    assert_eq!(reopened.end_time(), 4999);
}

#[test]
fn test_threaded_rejects_bad_intervals_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.ht");
    let config = small_config();
    let mut backend =
        ThreadedHistoryTreeBackend::new("threaded", HtConfig::new(&path, &config, 50), 4).unwrap();

    assert!(matches!(
        backend.insert_past_state(10, 60, 0, StateValue::Null),
        Err(StratumError::TimeRange(_))
    ));
    let oversized = StateValue::from("x".repeat(8000));
    assert!(matches!(
        backend.insert_past_state(50, 60, 0, oversized),
        Err(StratumError::InvalidInput(_))
    ));

    assert!(matches!(
        backend.insert_past_state(50, i64::MAX, 0, StateValue::Null),
        Err(StratumError::TimeRange(_))
    ));

    // The writer is still healthy afterwards.
    backend.insert_past_state(50, 60, 0, StateValue::Int(1)).unwrap();
    backend.finished_building(60).unwrap();
    assert_eq!(
        backend.do_singular_query(55, 0).unwrap().value(),
        &StateValue::Int(1)
    );
}

#[test]
fn test_debug_print_walks_every_node() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("debug.ht");
    build_history(&path, &small_config());
    let backend = open_history_tree_backend("ht", &path, 7).unwrap();

    let mut out = Vec::new();
    backend.debug_print(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("node #0"));
    assert!(text.contains("[9995, 9999], attribute = 4, value = 1999"));
}
