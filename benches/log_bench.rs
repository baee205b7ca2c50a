use criterion::{Criterion, criterion_group, criterion_main};
use rotlog::{FileLogger, LogCommon, LogConfig, LogLevel, LogReader, LogWriter, PendingEntry};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn bench_write(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let dir = tempdir().unwrap();
    let logger = FileLogger::start(
        LogConfig::new(dir.path()).with_rotation_threshold(100 * 1024 * 1024),
    )
    .unwrap();
    let cancel = CancellationToken::new();

    c.bench_function("write_async", |b| {
        b.to_async(&rt).iter(|| async {
            let entry = PendingEntry::new(LogLevel::Info, "bench", "request handled");
            logger.write_async(entry, &cancel).await.unwrap();
        });
    });

    c.bench_function("write_100_then_flush", |b| {
        b.to_async(&rt).iter(|| async {
            for i in 0..100 {
                logger.write(PendingEntry::new(
                    LogLevel::Info,
                    "bench",
                    format!("request {i} handled"),
                ));
            }
            logger.flush(&cancel).await.unwrap();
        });
    });
}

fn bench_query(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let dir = tempdir().unwrap();
    // Small files so the query fans out over several rotated files.
    let logger = FileLogger::start(
        LogConfig::new(dir.path())
            .with_rotation_threshold(64 * 1024)
            .with_max_files(0),
    )
    .unwrap();
    let cancel = CancellationToken::new();

    // Pre-fill with 1000 entries
    for i in 0..1000 {
        let level = if i % 10 == 0 {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        logger.write(PendingEntry::new(level, "bench", format!("entry {i}")));
    }
    rt.block_on(logger.flush(&cancel)).unwrap();

    c.bench_function("query_1000_all", |b| {
        b.to_async(&rt).iter(|| async {
            let found = logger.query(usize::MAX, |_| true, &cancel).await.unwrap();
            assert_eq!(found.len(), 1000);
        });
    });

    c.bench_function("query_errors_first_10", |b| {
        b.to_async(&rt).iter(|| async {
            let found = logger
                .query(10, |e| e.log_level >= LogLevel::Error, &cancel)
                .await
                .unwrap();
            assert_eq!(found.len(), 10);
        });
    });
}

criterion_group!(benches, bench_write, bench_query);
criterion_main!(benches);
