use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::{
    logger::Shared,
    queue::Wake,
    segment::{compute_rotation, current_path, find_rotated_indices},
    types::{LogError, LogLevel, PendingEntry, PersistedEntry, WriteStatus},
};

/// Pause after a failed batch (directory, rotation or open failure) before
/// the queue is retried.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

const LINE_FEED: &[u8] = b"\n";

/// The single consumer of the ingest queue. Owns the current file while a
/// batch is open and is the only code that renames or deletes log files.
pub(crate) struct BackgroundWriter {
    shared: Arc<Shared>,
    /// The last line of the current file may be incomplete (previous crash,
    /// failed write, or a file we have not looked at yet).
    recovery_needed: bool,
}

impl BackgroundWriter {
    pub(crate) fn spawn(shared: Arc<Shared>) -> Result<JoinHandle<()>, LogError> {
        let mut writer = BackgroundWriter {
            shared,
            recovery_needed: true,
        };
        let handle = std::thread::Builder::new()
            .name("rotlog-writer".to_string())
            .spawn(move || writer.run())?;
        Ok(handle)
    }

    fn run(&mut self) {
        info!("log writer started for '{:?}'", self.shared.config.base_dir);

        loop {
            if self.shared.queue.wait() == Wake::Shutdown {
                break;
            }

            if let Err(e) = self.write_batch() {
                let failed = self.fail_pending();
                error!(
                    "log writer batch failed in '{:?}', {failed} queued entries dropped: {e}",
                    self.shared.config.base_dir
                );
                self.recovery_needed = true;
                if self.shared.queue.wait_for_shutdown(RETRY_BACKOFF) {
                    break;
                }
            }
        }

        info!("log writer stopped for '{:?}'", self.shared.config.base_dir);
    }

    /// Drain as much of the queue as fits into the current file.
    ///
    /// Returns early, leaving entries queued, when the file reaches the
    /// rotation threshold; the next call rotates first.
    fn write_batch(&mut self) -> Result<(), LogError> {
        let shared = Arc::clone(&self.shared);

        // Flush markers at the head need no file at all.
        while let Some(marker) = shared.queue.pop_ignored() {
            marker.discard();
        }
        if shared.queue.len() == 0 {
            return Ok(());
        }

        let base_dir = shared.config.base_dir.as_path();
        let threshold = shared.config.rotation_threshold;
        let path = current_path(base_dir);

        self.ensure_dir(base_dir)?;

        if let Some(threshold) = threshold
            && file_len(&path)? >= threshold
        {
            // Keep appending to the oversized file rather than stall logging;
            // rotation is retried on the next batch.
            if let Err(e) = self.rotate(base_dir, &path) {
                error!("failed to rotate '{path:?}': {e}");
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut size = file.metadata()?.len();
        let mut out = BufWriter::new(file);

        let _write_guard = shared.write_lock.acquire_blocking()?;
        self.recover(&mut out, &mut size)?;

        let mut written = 0usize;
        loop {
            if written > 0 && threshold.is_some_and(|t| size >= t) {
                debug!("'{path:?}' reached {size} bytes, deferring rest of batch to rotation");
                break;
            }
            let Some(entry) = shared.queue.dequeue() else {
                break;
            };
            if self.write_entry(&mut out, &mut size, entry) {
                written += 1;
            }
        }

        Ok(())
    }

    /// Resolve everything still queued as failed, so no waiter outlives a
    /// broken sink. Returns the number of real entries dropped.
    fn fail_pending(&self) -> usize {
        let pending = self.shared.queue.drain();
        let failed = pending
            .iter()
            .filter(|entry| entry.level != LogLevel::Ignore)
            .count();
        for entry in pending {
            entry.fail();
        }
        failed
    }

    fn ensure_dir(&self, base_dir: &Path) -> Result<(), LogError> {
        if base_dir.is_dir() {
            return Ok(());
        }
        // create_dir_all tolerates another process creating it concurrently.
        std::fs::create_dir_all(base_dir).map_err(|e| {
            LogError::GeneralError(format!("Failed to create log dir '{base_dir:?}': {e}"))
        })?;
        info!("created log dir '{base_dir:?}'");
        Ok(())
    }

    fn rotate(&mut self, base_dir: &Path, current: &Path) -> Result<(), LogError> {
        let _rotation_guard = self.shared.rotation_lock.acquire_blocking()?;

        let max_files = self.shared.config.max_files;
        let existing = find_rotated_indices(base_dir);
        let plan = compute_rotation(base_dir, &existing, max_files);

        if max_files.is_some_and(|cap| cap < 2) {
            std::fs::remove_file(current)?;
            info!("log rotation: removed '{current:?}', retention keeps no history");
        } else {
            std::fs::rename(current, &plan.backup_path)?;
            info!("log rotation: '{current:?}' -> '{:?}'", plan.backup_path);
        }

        for stale in &plan.delete {
            match std::fs::remove_file(stale) {
                Ok(()) => info!("log retention: deleted '{stale:?}'"),
                Err(e) => warn!("log retention: failed to delete '{stale:?}': {e}"),
            }
        }

        self.recovery_needed = true;
        Ok(())
    }

    /// Terminate a possibly half-written last line so the next record starts
    /// on a line of its own.
    fn recover(&mut self, out: &mut BufWriter<File>, size: &mut u64) -> Result<(), LogError> {
        if !self.recovery_needed {
            return Ok(());
        }
        if *size > 0 {
            out.write_all(LINE_FEED)?;
            out.flush()?;
            *size += LINE_FEED.len() as u64;
        }
        self.recovery_needed = false;
        Ok(())
    }

    /// Write one entry and resolve its waiter. Never fails the batch.
    fn write_entry(
        &mut self,
        out: &mut BufWriter<File>,
        size: &mut u64,
        mut entry: PendingEntry,
    ) -> bool {
        let completion = entry.take_completion();

        let status = if entry.level == LogLevel::Ignore {
            WriteStatus::Discarded
        } else {
            match self.append(out, size, &entry) {
                Ok(persisted) => {
                    self.notify(persisted);
                    WriteStatus::Written
                }
                Err(e) => {
                    error!(
                        "failed to write {} entry from '{}': {e}",
                        entry.level, entry.facility
                    );
                    self.recovery_needed = true;
                    WriteStatus::Failed
                }
            }
        };

        if let Some(completion) = completion {
            completion.resolve(status);
        }
        status == WriteStatus::Written
    }

    fn append(
        &mut self,
        out: &mut BufWriter<File>,
        size: &mut u64,
        entry: &PendingEntry,
    ) -> Result<PersistedEntry, LogError> {
        let persisted = render(entry)?;
        let mut line = persisted.to_json_line()?;
        line.extend_from_slice(LINE_FEED);

        self.recover(out, size)?;
        out.write_all(&line)?;
        out.flush()?;
        *size += line.len() as u64;

        Ok(persisted)
    }

    fn notify(&self, persisted: PersistedEntry) {
        if self.shared.arrivals.receiver_count() > 0 {
            // Lagging or departed subscribers are their own problem.
            let _ = self.shared.arrivals.send(persisted);
        }
    }
}

/// Messages are rendered here, on the writer thread; a panicking `Display`
/// impl must not take the writer down with it.
fn render(entry: &PendingEntry) -> Result<PersistedEntry, LogError> {
    std::panic::catch_unwind(AssertUnwindSafe(|| entry.render())).unwrap_or_else(|_| {
        Err(LogError::GeneralError(
            "log message formatting panicked".to_string(),
        ))
    })
}

fn file_len(path: &Path) -> Result<u64, LogError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}
