//! File orchestrator: end-to-end runs of single files against in-memory stores.

use anyhow::Result;
use appsload::config::LoaderConfig;
use appsload::orchestrator::{FileOrchestrator, FileState, FileStatus};
use appsload::record::UserApps;
use appsload::retry::RetryPolicy;
use appsload::testing::{
    DEVICE_TYPES, FailingConnector, InputDir, MemoryConnector, default_shards, line,
    sample_lines, write_lines,
};
use std::time::Duration;

fn config(dir: &InputDir) -> LoaderConfig {
    let mut config = LoaderConfig::new(dir.pattern("*.tsv.gz"), default_shards());
    config.retry = RetryPolicy::new(5, Duration::ZERO);
    config
}

#[test]
fn sample_file_writes_one_record_per_shard() -> Result<()> {
    let dir = InputDir::new()?;
    let path = dir.file("sample.tsv.gz");
    write_lines(&path, &sample_lines())?;
    let store = MemoryConnector::new();
    let config = config(&dir);

    let orchestrator = FileOrchestrator::new(&path, &config, &store);
    assert_eq!(orchestrator.state(), FileState::Opening);
    let report = orchestrator.run();

    let outcome = match &report.status {
        FileStatus::Completed { outcome } => *outcome,
        other => panic!("unexpected status: {other:?}"),
    };
    assert_eq!(outcome.processed_count, 4);
    assert_eq!(outcome.error_count, 0);
    assert!(outcome.accepted);
    for device in DEVICE_TYPES {
        assert_eq!(store.writes_for(device).len(), 1, "{device}");
    }

    let (key, payload) = &store.writes_for("idfa")[0];
    assert_eq!(key, "idfa:1rfw452y52g2gq4g");
    let apps = UserApps::decode(payload)?;
    assert_eq!(apps.apps, vec![1423, 43, 567, 3, 7, 23]);
    assert_eq!((apps.lat, apps.lon), (55.55, 42.42));
    assert!(UserApps::decode(&store.writes_for("dvid")[0].1)?.apps.is_empty());
    Ok(())
}

#[test]
fn every_parsed_line_is_drained_before_the_file_finishes() -> Result<()> {
    let dir = InputDir::new()?;
    let path = dir.file("large.tsv.gz");
    let lines: Vec<String> = (0..2000)
        .map(|i| line(DEVICE_TYPES[i % 4], &format!("dev{i}"), 1.0, 2.0, &[i as u32]))
        .collect();
    write_lines(&path, &lines)?;
    let store = MemoryConnector::new();
    let mut config = config(&dir);
    config.queue_capacity = 2;
    config.parser_workers = 3;

    let report = FileOrchestrator::new(&path, &config, &store).run();

    assert!(report.status.is_accepted());
    assert_eq!(store.total_writes(), 2000);
    assert_eq!(report.parsers.len(), 3);
    assert_eq!(report.parsers.iter().map(|p| p.routed).sum::<u64>(), 2000);
    assert_eq!(report.writers.iter().map(|w| w.written).sum::<u64>(), 2000);
    Ok(())
}

#[test]
fn parse_errors_over_threshold_reject_the_file() -> Result<()> {
    let dir = InputDir::new()?;
    let path = dir.file("noisy.tsv.gz");
    let mut lines: Vec<String> = (0..98)
        .map(|i| line("gaid", &format!("g{i}"), 1.0, 2.0, &[1]))
        .collect();
    lines.push("gaid\tbroken".to_string());
    lines.push("xbox\tX\t1.0\t2.0\t1".to_string());
    write_lines(&path, &lines)?;
    let store = MemoryConnector::new();

    let report = FileOrchestrator::new(&path, &config(&dir), &store).run();

    let outcome = report.status.outcome().copied().unwrap();
    assert_eq!(outcome.processed_count, 100);
    assert_eq!(outcome.error_count, 2);
    assert!(!outcome.accepted);
    assert!(matches!(report.status, FileStatus::Completed { .. }));
    assert_eq!(store.total_writes(), 98);
    Ok(())
}

#[test]
fn write_failures_count_against_the_budget() -> Result<()> {
    let dir = InputDir::new()?;
    let path = dir.file("down.tsv.gz");
    write_lines(&path, &sample_lines())?;
    let store = FailingConnector::new();

    let report = FileOrchestrator::new(&path, &config(&dir), &store).run();

    let outcome = report.status.outcome().copied().unwrap();
    assert_eq!(outcome.error_count, 4);
    assert!(!outcome.accepted);
    assert_eq!(store.attempts(), 4 * 5);
    assert_eq!(report.writers.iter().map(|w| w.failed).sum::<u64>(), 4);
    Ok(())
}

#[test]
fn missing_file_is_aborted() -> Result<()> {
    let dir = InputDir::new()?;
    let store = MemoryConnector::new();

    let report = FileOrchestrator::new(dir.file("absent.tsv.gz"), &config(&dir), &store).run();

    assert!(matches!(report.status, FileStatus::Aborted { .. }));
    assert!(report.status.outcome().is_none());
    assert!(report.parsers.is_empty() && report.writers.is_empty());
    assert_eq!(store.total_writes(), 0);
    Ok(())
}

#[test]
fn file_that_is_not_gzip_is_aborted() -> Result<()> {
    let dir = InputDir::new()?;
    let path = dir.file("corrupt.tsv.gz");
    std::fs::write(&path, b"this is not gzip data at all\n")?;
    let store = MemoryConnector::new();

    let report = FileOrchestrator::new(&path, &config(&dir), &store).run();

    match &report.status {
        FileStatus::Aborted { reason } => assert!(reason.contains("decompress"), "{reason}"),
        other => panic!("unexpected status: {other:?}"),
    }
    assert!(!report.status.is_accepted());
    assert!(report.parsers.is_empty() && report.writers.is_empty());
    assert_eq!(store.total_writes(), 0);
    Ok(())
}

#[test]
fn garbage_after_a_valid_member_is_incomplete() -> Result<()> {
    let dir = InputDir::new()?;
    let path = dir.file("tail.tsv.gz");
    let lines: Vec<String> = (0..2000)
        .map(|i| line(DEVICE_TYPES[i % 4], &format!("dev{i}"), 1.0, 2.0, &[i as u32]))
        .collect();
    write_lines(&path, &lines)?;
    let mut bytes = std::fs::read(&path)?;
    bytes.extend_from_slice(b"not another gzip member");
    std::fs::write(&path, bytes)?;
    let store = MemoryConnector::new();

    let report = FileOrchestrator::new(&path, &config(&dir), &store).run();

    match &report.status {
        FileStatus::Incomplete { outcome, reason } => {
            assert_eq!(outcome.processed_count, 2000);
            assert!(reason.contains("read failed"), "{reason}");
        }
        other => panic!("unexpected status: {other:?}"),
    }
    assert_eq!(store.total_writes(), 2000);
    Ok(())
}

#[test]
fn empty_file_is_accepted_with_nothing_written() -> Result<()> {
    let dir = InputDir::new()?;
    let path = dir.file("empty.tsv.gz");
    write_lines(&path, &[] as &[&str])?;
    let store = MemoryConnector::new();

    let report = FileOrchestrator::new(&path, &config(&dir), &store).run();

    let outcome = report.status.outcome().copied().unwrap();
    assert_eq!(outcome.processed_count, 0);
    assert!(outcome.accepted);
    assert_eq!(store.total_writes(), 0);
    Ok(())
}

#[test]
fn plain_text_with_crlf_is_read_as_is() -> Result<()> {
    let dir = InputDir::new()?;
    let path = dir.file("plain.tsv");
    let body = sample_lines().join("\r\n");
    std::fs::write(&path, body)?;
    let store = MemoryConnector::new();

    let report = FileOrchestrator::new(&path, &config(&dir), &store).run();

    assert!(matches!(report.status, FileStatus::Completed { outcome } if outcome.accepted));
    assert_eq!(store.total_writes(), 4);
    Ok(())
}

#[test]
fn blank_lines_are_counted_as_errors() -> Result<()> {
    let dir = InputDir::new()?;
    let path = dir.file("blanks.tsv.gz");
    write_lines(&path, &[line("idfa", "A", 1.0, 2.0, &[1]), String::new()])?;
    let store = MemoryConnector::new();

    let report = FileOrchestrator::new(&path, &config(&dir), &store).run();

    let outcome = report.status.outcome().copied().unwrap();
    assert_eq!((outcome.processed_count, outcome.error_count), (2, 1));
    Ok(())
}
