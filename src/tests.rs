use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use crate::{
    config::LogConfig,
    logger::FileLogger,
    reader::scan_directory,
    segment::{current_path, find_rotated_indices},
    types::{
        CallSite, ExceptionInfo, LogCommon, LogLevel, LogReader, LogWriter, PendingEntry,
        PersistedEntry, WriteStatus,
    },
};

fn entry(msg: impl Into<String>) -> PendingEntry {
    PendingEntry::new(LogLevel::Info, "e2e", msg.into())
}

fn files_on_disk(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

fn assert_sorted_and_unique(entries: &[PersistedEntry]) {
    assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    let ids: HashSet<_> = entries.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), entries.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_each_get_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let logger = Arc::new(FileLogger::start(LogConfig::new(dir.path())).unwrap());

    let tasks: Vec<_> = (0..8)
        .map(|task| {
            let logger = logger.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                for i in 0..50 {
                    let status = logger
                        .write_async(entry(format!("task {task} entry {i}")), &cancel)
                        .await
                        .unwrap();
                    assert_eq!(status, WriteStatus::Written);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let raw = std::fs::read_to_string(current_path(dir.path())).unwrap();
    let lines: Vec<_> = raw.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 400);
    for line in lines {
        PersistedEntry::from_json_line(line.as_bytes()).unwrap();
    }

    let cancel = CancellationToken::new();
    let found = logger.query(usize::MAX, |_| true, &cancel).await.unwrap();
    assert_eq!(found.len(), 400);
    assert_sorted_and_unique(&found);
}

#[tokio::test]
async fn test_rotation_keeps_newest_files() {
    let dir = tempfile::tempdir().unwrap();
    // Every line is larger than the threshold, so each entry gets its own file.
    let config = LogConfig::new(dir.path())
        .with_rotation_threshold(200)
        .with_max_files(3);
    let logger = FileLogger::start(config).unwrap();
    let cancel = CancellationToken::new();

    for i in 0..50 {
        logger.write(entry(format!("entry {i}")));
    }
    logger.flush(&cancel).await.unwrap();

    assert_eq!(find_rotated_indices(dir.path()), vec![48, 49]);
    assert_eq!(files_on_disk(dir.path()), 3);

    let messages: Vec<_> = logger
        .query(usize::MAX, |_| true, &cancel)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(messages, vec!["entry 47", "entry 48", "entry 49"]);
}

#[tokio::test]
async fn test_tiny_threshold_with_two_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = LogConfig::new(dir.path())
        .with_rotation_threshold(10)
        .with_max_files(2);
    let logger = FileLogger::start(config).unwrap();
    let cancel = CancellationToken::new();

    for i in 0..100 {
        logger.write(entry(format!("entry {i}")));
    }
    logger.flush(&cancel).await.unwrap();

    assert_eq!(files_on_disk(dir.path()), 2);
    let found = logger.query(1000, |_| true, &cancel).await.unwrap();
    let messages: Vec<_> = found.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["entry 98", "entry 99"]);
}

#[tokio::test]
async fn test_query_limits_keep_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let config = LogConfig::new(dir.path())
        .with_rotation_threshold(1024)
        .with_max_files(0);
    let logger = FileLogger::start(config).unwrap();
    let cancel = CancellationToken::new();

    for i in 0..30 {
        logger
            .write_async(entry(format!("entry {i:02}")), &cancel)
            .await
            .unwrap();
    }
    assert!(!find_rotated_indices(dir.path()).is_empty());

    let all = logger.query(usize::MAX, |_| true, &cancel).await.unwrap();
    assert_eq!(all.len(), 30);
    assert_sorted_and_unique(&all);

    assert!(logger.query(0, |_| true, &cancel).await.unwrap().is_empty());

    let first: Vec<_> = logger
        .query(5, |_| true, &cancel)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(
        first,
        vec!["entry 00", "entry 01", "entry 02", "entry 03", "entry 04"]
    );

    let tens = logger
        .query(usize::MAX, |e| e.message.starts_with("entry 1"), &cancel)
        .await
        .unwrap();
    assert_eq!(tens.len(), 10);
}

#[tokio::test]
async fn test_zero_limit_never_reads_current_file() {
    let dir = tempfile::tempdir().unwrap();
    let logger = FileLogger::start(LogConfig::new(dir.path())).unwrap();
    let cancel = CancellationToken::new();

    for i in 0..5 {
        logger.write(entry(format!("entry {i}")));
    }
    logger.flush(&cancel).await.unwrap();
    assert!(find_rotated_indices(dir.path()).is_empty());

    let calls = Arc::new(AtomicUsize::new(0));
    let counting = |calls: &Arc<AtomicUsize>| {
        let calls = calls.clone();
        move |_: &PersistedEntry| {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        }
    };

    let found = logger.query(0, counting(&calls), &cancel).await.unwrap();
    assert!(found.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let found = logger
        .query(usize::MAX, counting(&calls), &cancel)
        .await
        .unwrap();
    assert_eq!(found.len(), 5);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_suspend_drops_entries_until_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let logger = FileLogger::start(LogConfig::new(dir.path())).unwrap();
    let cancel = CancellationToken::new();

    logger
        .write_async(entry("before"), &cancel)
        .await
        .unwrap();

    logger.suspend();
    assert!(logger.is_suspended());
    for i in 0..10 {
        logger.write(entry(format!("suspended {i}")));
    }
    assert_eq!(logger.queued_count(), 0);
    let status = logger
        .write_async(entry("suspended async"), &cancel)
        .await
        .unwrap();
    assert_eq!(status, WriteStatus::Discarded);
    logger.flush(&cancel).await.unwrap();

    logger.resume();
    logger.write(entry("after"));
    logger.flush(&cancel).await.unwrap();

    let messages: Vec<_> = logger
        .query(100, |_| true, &cancel)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(messages, vec!["before", "after"]);
}

#[tokio::test]
async fn test_subscribers_see_persisted_entries() {
    let dir = tempfile::tempdir().unwrap();
    let logger = FileLogger::start(LogConfig::new(dir.path())).unwrap();
    let cancel = CancellationToken::new();
    let mut arrivals = logger.subscribe();

    for msg in ["a", "b", "c"] {
        logger.write(entry(msg));
    }
    logger.flush(&cancel).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(arrivals.recv().await.unwrap());
    }
    let messages: Vec<_> = seen.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["a", "b", "c"]);

    let stored = logger.query(10, |_| true, &cancel).await.unwrap();
    assert_eq!(stored, seen);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queries_while_writing_and_rotating() {
    let dir = tempfile::tempdir().unwrap();
    let config = LogConfig::new(dir.path())
        .with_rotation_threshold(2048)
        .with_max_files(0);
    let logger = Arc::new(FileLogger::start(config).unwrap());

    let producer = {
        let logger = logger.clone();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            for i in 0..300 {
                logger
                    .write_async(entry(format!("entry {i}")), &cancel)
                    .await
                    .unwrap();
            }
        })
    };

    let cancel = CancellationToken::new();
    let mut last_len = 0;
    while !producer.is_finished() {
        let found = logger.query(usize::MAX, |_| true, &cancel).await.unwrap();
        assert_sorted_and_unique(&found);
        assert!(found.len() >= last_len);
        last_len = found.len();
    }
    producer.await.unwrap();

    let found = logger.query(usize::MAX, |_| true, &cancel).await.unwrap();
    assert_eq!(found.len(), 300);
    assert_sorted_and_unique(&found);
}

#[tokio::test]
async fn test_restart_continues_existing_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = LogConfig::new(dir.path())
        .with_rotation_threshold(200)
        .with_max_files(0);
    let cancel = CancellationToken::new();

    {
        let logger = FileLogger::start(config.clone()).unwrap();
        for i in 0..3 {
            logger
                .write_async(entry(format!("first run {i}")), &cancel)
                .await
                .unwrap();
        }
    }
    assert_eq!(find_rotated_indices(dir.path()), vec![1, 2]);

    let logger = FileLogger::start(config).unwrap();
    logger
        .write_async(entry("second run"), &cancel)
        .await
        .unwrap();
    assert_eq!(find_rotated_indices(dir.path()), vec![1, 2, 3]);

    let found = logger.query(usize::MAX, |_| true, &cancel).await.unwrap();
    assert_eq!(found.len(), 4);
    assert_eq!(found[3].message, "second run");
}

#[tokio::test]
async fn test_entry_details_survive_the_trip() {
    let dir = tempfile::tempdir().unwrap();
    let logger = FileLogger::start(LogConfig::new(dir.path())).unwrap();
    let cancel = CancellationToken::new();

    let outer = logger.begin_scope(None);
    let inner = logger.begin_scope(Some(&outer));
    let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no access");
    let pending = PendingEntry::new(LogLevel::Error, "storage", "save failed")
        .with_scope(&inner)
        .with_exception(ExceptionInfo::from_error(&err))
        .with_data(&serde_json::json!({ "attempt": 3 }))
        .unwrap()
        .with_call_site(CallSite::new("save", "storage.rs", 42))
        .with_thread_ids(7, 9);
    logger.write_async(pending, &cancel).await.unwrap();
    logger.stop();

    let found = scan_directory(dir.path(), |e| e.log_level == LogLevel::Error);
    assert_eq!(found.len(), 1);
    let stored = &found[0];
    assert_eq!(stored.facility, "storage");
    assert_eq!(stored.scope_id, inner.id);
    assert_eq!(stored.exception_message.as_deref(), Some("no access"));
    assert_eq!(stored.additional_data, Some(serde_json::json!({ "attempt": 3 })));
    assert_eq!(stored.member_name, "save");
    assert_eq!(stored.file_path, "storage.rs");
    assert_eq!(stored.line, 42);
    assert_eq!(stored.native_thread_id, 7);
    assert_eq!(stored.task_id, 9);
    assert_eq!(stored.process_id, std::process::id());
}
