//! A file-backed, rotating structured log.
//!
//! [`FileLogger`] accepts log entries from any number of threads and hands
//! them to a single background writer thread, which appends them to
//! `log.jsonl` as newline-delimited JSON. Entries can be read back with a
//! predicate while writing and rotation carry on.
//!
//! # Features
//!
//! - **Non-blocking producers** – `write` only takes a short queue lock.
//! - **Awaitable writes** – `write_async` resolves once the line has been
//!   flushed, and can be cancelled without affecting the write itself.
//! - **Rotated** – when `log.jsonl` reaches `rotation_threshold` bytes it is
//!   renamed to `log<N>.jsonl` (N increases with every rotation) and the
//!   oldest files beyond `max_files` are deleted.
//! - **Crash tolerant** – a half-written last line from a previous run is
//!   fenced off with a blank line; readers skip blank and corrupt lines.
//! - **Consistent queries** – `query` reads rotated files without blocking the
//!   writer and only holds the writer off for the current file.
//! - **Live tail** – `subscribe` yields every entry as it is persisted.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use rotlog::{FileLogger, LogConfig, LogLevel, PendingEntry};
//! use rotlog::{LogCommon, LogReader, LogWriter};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. Start the logger.
//!     //    • `rotation_threshold` → bytes before log.jsonl is rotated.
//!     //    • `max_files`          → files kept, current file included.
//!     let config = LogConfig::new("./logs")
//!         .with_min_level(LogLevel::Debug)
//!         .with_rotation_threshold(1024 * 1024)
//!         .with_max_files(5);
//!     let logger = FileLogger::start(config)?;
//!     let cancel = CancellationToken::new();
//!
//!     // 2. Fire and forget.
//!     logger.write(PendingEntry::new(LogLevel::Info, "app", "started"));
//!
//!     // 3. Or wait until the line is flushed.
//!     let scope = logger.begin_scope(None);
//!     let entry = PendingEntry::new(LogLevel::Warn, "app", "disk almost full")
//!         .with_scope(&scope)
//!         .with_data(&serde_json::json!({ "free_mb": 120 }))?;
//!     logger.write_async(entry, &cancel).await?;
//!
//!     // 4. Query every retained file, oldest first.
//!     let warnings = logger
//!         .query(100, |e| e.log_level >= LogLevel::Warn, &cancel)
//!         .await?;
//!     println!("{} warnings", warnings.len());
//!
//!     // 5. Drain the queue before shutting down.
//!     logger.flush(&cancel).await?;
//!     logger.stop();
//!
//!     Ok(())
//! }
//! ```
//!
//! # Suspending
//!
//! [`LogCommon::suspend`] guarantees no logging I/O until
//! [`LogCommon::resume`]: queued entries are dropped and new ones are
//! discarded on arrival rather than held back.

#[cfg(test)]
mod tests;

pub mod config;
pub mod fair_lock;
pub mod logger;
mod queue;
mod reader;
pub mod segment;
mod types;
mod writer;

pub use config::LogConfig;
pub use fair_lock::{AsyncFairLock, FairLockGuard};
pub use logger::FileLogger;
pub use reader::scan_directory;
pub use types::*;
