//! End-to-end runs of the engine with real forked worker pools.
//!
//! Forking while another test thread holds pipe ends would leak those ends into the children,
//! so every test here runs under one lock.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use procmr::phases::output::{read_all_outputs, read_reduce_output};
use procmr::{word_freq, ClosureMapReducer, Error, MEmitter, MRController, MRParameters, Record};
use tempfile::TempDir;

static FORK_LOCK: Mutex<()> = Mutex::new(());

fn fork_lock() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn word_count() -> ClosureMapReducer {
    ClosureMapReducer::new(word_freq::map, word_freq::reduce)
}

/// Writes `contents[i]` to `<dir>/f<i>` (zero padded so `ls` keeps the order) and returns the
/// paths in that order.
fn write_inputs(dir: &Path, contents: &[&str]) -> Vec<PathBuf> {
    contents
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let p = dir.join(format!("f{:03}", i));
            fs::write(&p, c).unwrap();
            p
        })
        .collect()
}

fn counts(records: Vec<Record>) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    for r in records {
        assert!(m.insert(r.key.clone(), r.value).is_none(), "key {} reduced twice", r.key);
    }
    m
}

fn params(out: &TempDir, mappers: usize, reducers: usize) -> MRParameters {
    MRParameters::new()
        .set_concurrency(mappers, reducers)
        .set_output_dir(out.path())
}

#[test]
fn test_word_count_example() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_inputs(input.path(), &["a b a", "b c", "a c c"]);

    let mr = word_count();
    let report = MRController::run(&mr, params(&out, 2, 1), input.path()).unwrap();

    assert_eq!(report.files, 3);
    assert_eq!(report.pairs, 8);
    assert_eq!(report.groups, 3);
    assert_eq!(report.map_workers.len(), 2);
    assert_eq!(report.outputs.len(), 1);
    assert_eq!(
        report.outputs[0],
        out.path().join(format!("{}.out", report.reduce_workers[0].pid))
    );

    let mut got = read_reduce_output(&report.outputs[0]).unwrap();
    got.sort();
    assert_eq!(
        got,
        vec![Record::new("a", "3"), Record::new("b", "2"), Record::new("c", "3")]
    );
}

#[test]
fn test_results_independent_of_pool_sizes() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let texts: Vec<String> = (0..11)
        .map(|i| {
            (0..(i * 7 + 3))
                .map(|j| format!("w{}", (i * j) % 13))
                .collect::<Vec<_>>()
                .join(if i % 2 == 0 { " " } else { "\n" })
        })
        .collect();
    let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
    let files = write_inputs(input.path(), &refs);

    let mut expected: BTreeMap<String, u64> = BTreeMap::new();
    for t in &texts {
        for w in t.split_whitespace() {
            *expected.entry(String::from(w)).or_insert(0) += 1;
        }
    }
    let expected: BTreeMap<String, String> =
        expected.into_iter().map(|(k, v)| (k, v.to_string())).collect();

    let mr = word_count();
    for &(m, r) in &[(1, 1), (2, 3), (4, 2), (5, 5)] {
        let out = tempfile::tempdir().unwrap();
        // A tiny read size puts plenty of words across chunk boundaries.
        let p = params(&out, m, r).set_read_size(5);
        let report = MRController::new(&mr, p).run_files(&files).unwrap();
        assert_eq!(report.outputs.len(), r);
        assert_eq!(counts(read_all_outputs(&report.outputs).unwrap()), expected, "m={} r={}", m, r);
    }
}

fn pid_map(e: &mut MEmitter, chunk: &str) {
    for w in chunk.split_whitespace() {
        e.emit(std::process::id().to_string(), w);
    }
}

fn pid_reduce(key: &str, _: &[String]) -> Record {
    Record::new(key, std::process::id().to_string())
}

#[test]
fn test_file_i_goes_to_mapper_i_mod_n() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let tags: Vec<String> = (0..10).map(|i| format!("file{}", i)).collect();
    let refs: Vec<&str> = tags.iter().map(|s| s.as_str()).collect();
    let files = write_inputs(input.path(), &refs);

    let mr = ClosureMapReducer::new(pid_map, pid_reduce);
    let controller = MRController::new(&mr, params(&out, 3, 1));
    let (agg, exits) = controller.run_map(&files).unwrap();

    assert_eq!(exits.len(), 3);
    for (w, exit) in exits.iter().enumerate() {
        assert!(exit.state.is_success());
        let expected: Vec<String> = (0..10).filter(|i| i % 3 == w).map(|i| format!("file{}", i)).collect();
        let group = agg.get(&exit.pid.to_string()).unwrap();
        // Within one worker the dispatch order is preserved.
        assert_eq!(group.values, expected);
    }
}

#[test]
fn test_group_j_goes_to_reducer_j_mod_r() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let words: Vec<String> = (0..10).map(|i| format!("k{}", i)).collect();
    // One file, one mapper: the groups are created in the order the words appear.
    let files = write_inputs(input.path(), &[&words.join(" ")]);

    let mr = ClosureMapReducer::new(word_freq::map, pid_reduce);
    let report = MRController::new(&mr, params(&out, 1, 3)).run_files(&files).unwrap();
    assert_eq!(report.groups, 10);

    for (j, path) in report.outputs.iter().enumerate() {
        let pid = report.reduce_workers[j].pid.to_string();
        let got = read_reduce_output(path).unwrap();
        let keys: Vec<String> = got.iter().map(|r| r.key.clone()).collect();
        let expected: Vec<String> = (0..10).filter(|i| i % 3 == j).map(|i| format!("k{}", i)).collect();
        assert_eq!(keys, expected);
        assert!(got.iter().all(|r| r.value == pid));
    }
}

#[test]
fn test_no_input_files() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let mr = word_count();
    let report = MRController::run(&mr, params(&out, 2, 2), input.path()).unwrap();
    assert_eq!((report.files, report.pairs, report.groups), (0, 0, 0));
    assert_eq!(report.outputs.len(), 2);
    for p in &report.outputs {
        assert!(read_reduce_output(p).unwrap().is_empty());
    }
}

#[test]
fn test_repeated_runs_build_identical_groups() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let files = write_inputs(input.path(), &["x y z x", "y y q", "z x", "q r s", "x"]);

    let mr = word_count();
    let controller = MRController::new(&mr, params(&out, 3, 2));
    let (first, _) = controller.run_map(&files).unwrap();
    let (second, _) = controller.run_map(&files).unwrap();
    assert_eq!(first.into_groups(), second.into_groups());
}

fn flood_map(e: &mut MEmitter, chunk: &str) {
    for w in chunk.split_whitespace() {
        for i in 0..20_000 {
            e.emit(format!("{}-{}", w, i % 7), "1");
        }
    }
}

#[test]
fn test_large_map_output() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let files = write_inputs(input.path(), &["a", "b", "c", "d", "e"]);

    let mr = ClosureMapReducer::new(flood_map, word_freq::reduce);
    let report = MRController::new(&mr, params(&out, 2, 2)).run_files(&files).unwrap();
    assert_eq!(report.pairs, 5 * 20_000);
    assert_eq!(report.groups, 5 * 7);

    let total: u64 = read_all_outputs(&report.outputs)
        .unwrap()
        .iter()
        .map(|r| r.value.parse::<u64>().unwrap())
        .sum();
    assert_eq!(total, 100_000);
}

fn one_key_map(e: &mut MEmitter, chunk: &str) {
    let value = "v".repeat(256);
    for _ in chunk.split_whitespace() {
        for _ in 0..270_000 {
            e.emit("k", value.as_str());
        }
    }
}

fn count_reduce(key: &str, values: &[String]) -> Record {
    Record::new(key, values.len().to_string())
}

#[test]
fn test_group_bigger_than_default_frame_limit() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let files = write_inputs(input.path(), &["x"]);

    // 270,000 values of 256 bytes make one group of roughly 70 MB, all pairs within bounds.
    let mr = ClosureMapReducer::new(one_key_map, count_reduce);
    let report = MRController::new(&mr, params(&out, 1, 1)).run_files(&files).unwrap();
    assert_eq!(report.groups, 1);
    assert_eq!(
        read_reduce_output(&report.outputs[0]).unwrap(),
        vec![Record::new("k", "270000")]
    );
}

#[test]
fn test_unreadable_input_fails_the_job() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let mut files = write_inputs(input.path(), &["a", "b"]);
    files.push(input.path().join("missing"));

    let mr = word_count();
    match MRController::new(&mr, params(&out, 2, 1)).run_files(&files) {
        Err(Error::WorkerFailed { role, index, .. }) => {
            assert_eq!(role, "map");
            assert_eq!(index, 0);
        }
        other => panic!("unexpected {:?}", other),
    }
    // The map phase failed, so no reducer ever ran.
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn test_overlong_path_is_rejected_before_forking() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_inputs(input.path(), &["a"]);
    let max = input.path().as_os_str().len() + 2;

    let mr = word_count();
    let p = params(&out, 1, 1).set_bounds(max, 64, 256);
    match MRController::run(&mr, p, input.path()) {
        Err(Error::TooLong { what: "path", .. }) => (),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

fn long_key_map(e: &mut MEmitter, _: &str) {
    e.emit("k".repeat(100), "1");
}

#[test]
fn test_overlong_key_fails_the_mapper() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let files = write_inputs(input.path(), &["a"]);

    let mr = ClosureMapReducer::new(long_key_map, word_freq::reduce);
    match MRController::new(&mr, params(&out, 1, 1)).run_files(&files) {
        Err(Error::WorkerFailed { role: "map", state, .. }) => assert!(state.contains("status 1")),
        other => panic!("unexpected {:?}", other),
    }
}

fn panicking_reduce(_: &str, _: &[String]) -> Record {
    panic!("reduce blew up");
}

#[test]
fn test_reducer_panic_fails_the_job() {
    let _g = fork_lock();
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let files = write_inputs(input.path(), &["a b"]);

    let mr = ClosureMapReducer::new(word_freq::map, panicking_reduce);
    match MRController::new(&mr, params(&out, 1, 1)).run_files(&files) {
        Err(Error::WorkerFailed { role: "reduce", state, .. }) => assert!(state.contains("status 101")),
        other => panic!("unexpected {:?}", other),
    }
}
