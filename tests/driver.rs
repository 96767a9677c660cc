//! Batch driver: discovery, concurrency, completion markers and reporting.

use anyhow::Result;
use appsload::config::{LoaderConfig, MarkPolicy};
use appsload::driver::BatchDriver;
use appsload::orchestrator::FileStatus;
use appsload::retry::RetryPolicy;
use appsload::testing::{InputDir, MemoryConnector, default_shards, line, sample_lines, write_lines};
use std::sync::Arc;
use std::time::Duration;

fn config(dir: &InputDir) -> LoaderConfig {
    let mut config = LoaderConfig::new(dir.pattern("*.tsv.gz"), default_shards());
    config.retry = RetryPolicy::new(2, Duration::ZERO);
    config.max_concurrent_files = 2;
    config
}

fn noisy_lines() -> Vec<String> {
    vec![
        line("idfa", "A", 1.0, 2.0, &[1]),
        "idfa\tbroken".to_string(),
    ]
}

#[test]
fn processed_files_are_marked_and_skipped_next_run() -> Result<()> {
    let dir = InputDir::new()?;
    for name in ["b.tsv.gz", "a.tsv.gz", "c.tsv.gz"] {
        write_lines(dir.file(name), &sample_lines())?;
    }
    let store = MemoryConnector::new();
    let driver = BatchDriver::new(config(&dir), Arc::new(store.clone()))?;

    let report = driver.run()?;

    assert_eq!(report.files.len(), 3);
    assert_eq!(report.accepted(), 3);
    assert_eq!(report.marked(), 3);
    let order: Vec<_> = report.files.iter().map(|e| e.file.path.clone()).collect();
    assert_eq!(
        order,
        vec![dir.file("a.tsv.gz"), dir.file("b.tsv.gz"), dir.file("c.tsv.gz")]
    );
    assert_eq!(report.files[0].marked_as, Some(dir.file(".a.tsv.gz")));
    assert_eq!(
        dir.file_names()?,
        vec![".a.tsv.gz", ".b.tsv.gz", ".c.tsv.gz"]
    );
    assert_eq!(store.total_writes(), 12);

    let again = driver.run()?;
    assert!(again.files.is_empty());
    assert_eq!(store.total_writes(), 12);
    Ok(())
}

#[test]
fn rejected_files_are_marked_by_default() -> Result<()> {
    let dir = InputDir::new()?;
    write_lines(dir.file("noisy.tsv.gz"), &noisy_lines())?;
    let driver = BatchDriver::new(config(&dir), Arc::new(MemoryConnector::new()))?;

    let report = driver.run()?;

    assert_eq!(report.rejected(), 1);
    assert_eq!(report.marked(), 1);
    assert_eq!(dir.file_names()?, vec![".noisy.tsv.gz"]);
    Ok(())
}

#[test]
fn accepted_only_policy_leaves_rejected_files_in_place() -> Result<()> {
    let dir = InputDir::new()?;
    write_lines(dir.file("good.tsv.gz"), &sample_lines())?;
    write_lines(dir.file("noisy.tsv.gz"), &noisy_lines())?;
    let mut config = config(&dir);
    config.mark_policy = MarkPolicy::AcceptedOnly;
    let driver = BatchDriver::new(config, Arc::new(MemoryConnector::new()))?;

    let report = driver.run()?;

    assert_eq!((report.accepted(), report.rejected()), (1, 1));
    assert_eq!(dir.file_names()?, vec![".good.tsv.gz", "noisy.tsv.gz"]);
    assert_eq!(driver.discover()?, vec![dir.file("noisy.tsv.gz")]);
    Ok(())
}

#[test]
fn already_marked_files_are_not_discovered() -> Result<()> {
    let dir = InputDir::new()?;
    write_lines(dir.file(".done.tsv.gz"), &sample_lines())?;
    write_lines(dir.file("todo.tsv.gz"), &sample_lines())?;
    std::fs::create_dir(dir.file("subdir.tsv.gz"))?;
    let driver = BatchDriver::new(config(&dir), Arc::new(MemoryConnector::new()))?;

    assert_eq!(driver.discover()?, vec![dir.file("todo.tsv.gz")]);
    Ok(())
}

#[test]
fn no_matches_is_an_empty_batch() -> Result<()> {
    let dir = InputDir::new()?;
    let driver = BatchDriver::new(config(&dir), Arc::new(MemoryConnector::new()))?;

    let report = driver.run()?;
    assert!(report.files.is_empty());
    Ok(())
}

#[test]
fn bad_patterns_fail_the_batch() -> Result<()> {
    let dir = InputDir::new()?;

    let mut empty = config(&dir);
    empty.pattern = String::new();
    assert!(BatchDriver::new(empty, Arc::new(MemoryConnector::new())).is_err());

    let mut invalid = config(&dir);
    invalid.pattern = dir.pattern("[");
    let driver = BatchDriver::new(invalid, Arc::new(MemoryConnector::new()))?;
    assert!(driver.run().is_err());
    Ok(())
}

#[test]
fn report_is_saved_as_json() -> Result<()> {
    let dir = InputDir::new()?;
    let input = InputDir::new()?;
    write_lines(input.file("a.tsv.gz"), &sample_lines())?;
    let driver = BatchDriver::new(config(&input), Arc::new(MemoryConnector::new()))?;
    let report = driver.run()?;
    assert!(matches!(report.files[0].file.status, FileStatus::Completed { .. }));

    let path = dir.file("report.json");
    report.save_to_file(&path)?;

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    let entry = &json["files"][0];
    assert_eq!(entry["status"]["status"], "completed");
    assert_eq!(entry["status"]["outcome"]["processed_count"], 4);
    assert_eq!(entry["status"]["outcome"]["accepted"], true);
    assert!(entry["marked_as"].as_str().unwrap().ends_with(".a.tsv.gz"));
    assert_eq!(entry["writers"].as_array().unwrap().len(), 4);
    Ok(())
}

#[test]
fn undecodable_files_are_never_marked() -> Result<()> {
    let dir = InputDir::new()?;
    std::fs::write(dir.file("bad.tsv.gz"), b"not gzip at all\n")?;
    write_lines(dir.file("good.tsv.gz"), &sample_lines())?;
    let driver = BatchDriver::new(config(&dir), Arc::new(MemoryConnector::new()))?;

    let report = driver.run()?;

    assert_eq!((report.aborted(), report.accepted()), (1, 1));
    let bad = &report.files[0];
    assert!(matches!(bad.file.status, FileStatus::Aborted { .. }));
    assert_eq!(bad.marked_as, None);
    assert_eq!(dir.file_names()?, vec![".good.tsv.gz", "bad.tsv.gz"]);
    assert_eq!(driver.discover()?, vec![dir.file("bad.tsv.gz")]);
    Ok(())
}

#[test]
fn dry_run_accepts_and_marks_without_a_server() -> Result<()> {
    let dir = InputDir::new()?;
    write_lines(dir.file("a.tsv.gz"), &sample_lines())?;
    let mut config = config(&dir);
    config.dry_run = true;
    // Nothing listens here; a real write would fail.
    config.shards = "idfa=127.0.0.1:1,gaid=127.0.0.1:1,adid=127.0.0.1:1,dvid=127.0.0.1:1".parse()?;

    let report = BatchDriver::from_config(config)?.run()?;

    assert_eq!(report.accepted(), 1);
    assert_eq!(report.marked(), 1);
    let writers = &report.files[0].file.writers;
    assert_eq!(writers.iter().map(|w| w.written).sum::<u64>(), 4);
    assert_eq!(writers.iter().map(|w| w.failed).sum::<u64>(), 0);
    assert_eq!(dir.file_names()?, vec![".a.tsv.gz"]);
    Ok(())
}
