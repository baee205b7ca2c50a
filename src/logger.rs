use crate::{
    config::LogConfig,
    fair_lock::AsyncFairLock,
    queue::IngestQueue,
    types::{
        LogCommon, LogError, LogLevel, LogScope, LogWriter, PendingEntry, PersistedEntry,
        WriteStatus,
    },
    writer::BackgroundWriter,
};
use log::{error, info};
use parking_lot::Mutex;
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::JoinHandle,
};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

/// Buffered arrivals per subscriber before it starts lagging.
const ARRIVAL_CAPACITY: usize = 1024;

/// State shared between the facade, the writer thread and queries.
pub(crate) struct Shared {
    pub(crate) config: LogConfig,
    pub(crate) queue: IngestQueue,
    /// Held while the set of files on disk is listed or changed.
    pub(crate) rotation_lock: AsyncFairLock,
    /// Held while the writer appends to the current file.
    pub(crate) write_lock: AsyncFairLock,
    pub(crate) arrivals: broadcast::Sender<PersistedEntry>,
}

/// File-backed structured logger.
///
/// Producers enqueue from any thread; a dedicated writer thread appends the
/// entries to `log.jsonl` and rotates it; queries read every retained file.
/// Dropping the logger stops the writer.
pub struct FileLogger {
    pub(crate) shared: Arc<Shared>,
    writer: Mutex<Option<JoinHandle<()>>>,
    next_scope_id: AtomicU64,
}

impl FileLogger {
    pub fn start(config: LogConfig) -> Result<Self, LogError> {
        std::fs::create_dir_all(&config.base_dir).map_err(|e| {
            LogError::GeneralError(format!(
                "Failed to create log dir '{:?}': {e}",
                config.base_dir
            ))
        })?;
        info!("using log dir '{:?}'", config.base_dir);

        let (arrivals, _) = broadcast::channel(ARRIVAL_CAPACITY);
        let shared = Arc::new(Shared {
            config,
            queue: IngestQueue::new(),
            rotation_lock: AsyncFairLock::new(),
            write_lock: AsyncFairLock::new(),
            arrivals,
        });
        let handle = BackgroundWriter::spawn(shared.clone())?;

        Ok(Self {
            shared,
            writer: Mutex::new(Some(handle)),
            next_scope_id: AtomicU64::new(1),
        })
    }

    /// Stop the writer thread. Entries still queued are discarded, so call
    /// [`LogCommon::flush`] first if they matter. Idempotent.
    pub fn stop(&self) {
        let dropped = self.shared.queue.shutdown();
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                error!("log writer thread panicked");
            }
            info!(
                "logger for '{:?}' stopped, {} queued entries discarded",
                self.shared.config.base_dir,
                dropped.len()
            );
        }
        for entry in dropped {
            entry.discard();
        }
    }

    pub fn config(&self) -> &LogConfig {
        &self.shared.config
    }

    pub fn base_dir(&self) -> &Path {
        &self.shared.config.base_dir
    }

    pub fn min_level(&self) -> LogLevel {
        self.shared.config.min_level
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.shared.config.is_enabled(level)
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.queue.is_suspended()
    }

    /// Issue the id for a nested scope.
    pub fn begin_scope(&self, parent: Option<&LogScope>) -> LogScope {
        LogScope {
            id: self.next_scope_id.fetch_add(1, Ordering::Relaxed),
            parent_id: parent.map(|p| p.id),
        }
    }

    fn admit(&self, entry: PendingEntry) -> Result<(), PendingEntry> {
        if !self.shared.config.is_enabled(entry.level) {
            return Err(entry);
        }
        self.shared.queue.enqueue(entry)
    }
}

impl Drop for FileLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn await_completion(
    rx: oneshot::Receiver<WriteStatus>,
    cancel: &CancellationToken,
) -> Result<WriteStatus, LogError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(LogError::Cancelled),
        // A dropped sender means the entry was thrown away unresolved.
        status = rx => Ok(status.unwrap_or(WriteStatus::Discarded)),
    }
}

#[async_trait::async_trait]
impl LogCommon for FileLogger {
    async fn flush(&self, cancel: &CancellationToken) -> Result<(), LogError> {
        let mut marker = PendingEntry::new(LogLevel::Ignore, "rotlog", "");
        let rx = marker.attach_completion();
        if let Err(marker) = self.shared.queue.enqueue(marker) {
            marker.discard();
            // Suspended: the queue is empty by definition.
            return if self.shared.queue.is_shutdown() {
                Err(LogError::Stopped)
            } else {
                Ok(())
            };
        }
        await_completion(rx, cancel).await.map(|_| ())
    }

    fn queued_count(&self) -> usize {
        self.shared.queue.len()
    }

    fn subscribe(&self) -> broadcast::Receiver<PersistedEntry> {
        self.shared.arrivals.subscribe()
    }

    fn suspend(&self) {
        let dropped = self.shared.queue.suspend();
        info!(
            "logging to '{:?}' suspended, {} queued entries discarded",
            self.shared.config.base_dir,
            dropped.len()
        );
        for entry in dropped {
            entry.discard();
        }
    }

    fn resume(&self) {
        self.shared.queue.resume();
        info!("logging to '{:?}' resumed", self.shared.config.base_dir);
    }
}

#[async_trait::async_trait]
impl LogWriter for FileLogger {
    fn write(&self, entry: PendingEntry) {
        if let Err(entry) = self.admit(entry) {
            entry.discard();
        }
    }

    async fn write_async(
        &self,
        mut entry: PendingEntry,
        cancel: &CancellationToken,
    ) -> Result<WriteStatus, LogError> {
        if self.shared.queue.is_shutdown() {
            return Err(LogError::Stopped);
        }
        let rx = entry.attach_completion();
        if let Err(entry) = self.admit(entry) {
            entry.discard();
        }
        await_completion(rx, cancel).await
    }
}
