use crate::{
    logger::FileLogger,
    segment::{current_path, find_rotated_indices, rotated_path},
    types::{LogError, LogReader, PersistedEntry},
};
use log::{debug, error, warn};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;

type Predicate = Arc<dyn Fn(&PersistedEntry) -> bool + Send + Sync>;

/// Read every record of `file`, keeping those that match.
///
/// Blank lines are recovery markers left by the writer and are skipped
/// silently; lines that do not parse are logged and skipped.
fn scan_file(file: File, path: &Path, predicate: &Predicate) -> Vec<PersistedEntry> {
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut line_no = 0usize;
    let mut matches = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => line_no += 1,
            Err(e) => {
                warn!("Failed to read log file '{path:?}' after line {line_no}: {e}");
                break;
            }
        }

        let record = line.trim_ascii();
        if record.is_empty() {
            continue;
        }
        match PersistedEntry::from_json_line(record) {
            Ok(entry) => {
                if predicate(&entry) {
                    matches.push(entry);
                }
            }
            Err(e) => warn!("Skipping corrupt record at '{path:?}' line {line_no}: {e}"),
        }
    }

    matches
}

/// Open `paths` for reading. Files that vanished in the meantime are skipped.
fn open_files(paths: impl IntoIterator<Item = PathBuf>) -> Vec<(PathBuf, File)> {
    paths
        .into_iter()
        .filter_map(|path| match File::open(&path) {
            Ok(file) => Some((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Log file '{path:?}' is gone, skipping");
                None
            }
            Err(e) => {
                warn!("Failed to open log file '{path:?}': {e}");
                None
            }
        })
        .collect()
}

/// Parse `files` in parallel on the blocking pool. Results keep the order of
/// `files`, oldest first.
async fn scan_all(files: Vec<(PathBuf, File)>, predicate: &Predicate) -> Vec<PersistedEntry> {
    let handles: Vec<_> = files
        .into_iter()
        .map(|(path, file)| {
            let predicate = predicate.clone();
            tokio::task::spawn_blocking(move || scan_file(file, &path, &predicate))
        })
        .collect();

    let mut entries = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(found) => entries.extend(found),
            Err(e) => error!("Log file scan task failed: {e}"),
        }
    }
    entries
}

/// Oldest first, at most `max_entries`. Ties keep file order.
fn finish(mut entries: Vec<PersistedEntry>, max_entries: usize) -> Vec<PersistedEntry> {
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    entries.truncate(max_entries);
    entries
}

/// Read a log directory that no running logger is attached to, e.g. from a
/// diagnostics tool. No locking takes place.
pub fn scan_directory<F>(base_dir: &Path, predicate: F) -> Vec<PersistedEntry>
where
    F: Fn(&PersistedEntry) -> bool + Send + Sync + 'static,
{
    let predicate: Predicate = Arc::new(predicate);
    let mut paths: Vec<PathBuf> = find_rotated_indices(base_dir)
        .into_iter()
        .map(|idx| rotated_path(base_dir, idx))
        .collect();
    paths.push(current_path(base_dir));

    let entries = open_files(paths)
        .into_iter()
        .flat_map(|(path, file)| scan_file(file, &path, &predicate))
        .collect();
    finish(entries, usize::MAX)
}

#[async_trait::async_trait]
impl LogReader for FileLogger {
    async fn query<F>(
        &self,
        max_entries: usize,
        predicate: F,
        cancel: &CancellationToken,
    ) -> Result<Vec<PersistedEntry>, LogError>
    where
        F: Fn(&PersistedEntry) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate = Arc::new(predicate);
        let base_dir = self.shared.config.base_dir.as_path();

        // Snapshot the rotated files. Handles are opened under the lock so a
        // rotation cannot pull a listed file away before it is read.
        let (seen, files) = {
            let _rotation = self.shared.rotation_lock.acquire(Some(cancel)).await?;
            let seen = find_rotated_indices(base_dir);
            let files = open_files(seen.iter().map(|idx| rotated_path(base_dir, *idx)));
            (seen, files)
        };

        let mut entries = scan_all(files, &predicate).await;
        if entries.len() >= max_entries {
            return Ok(finish(entries, max_entries));
        }

        // Not enough yet. With the writer held off, pick up the current file
        // and anything rotated since the snapshot.
        let late = {
            let _write = self.shared.write_lock.acquire(Some(cancel)).await?;
            let files = {
                let _rotation = self.shared.rotation_lock.acquire(Some(cancel)).await?;
                let mut paths: Vec<PathBuf> = find_rotated_indices(base_dir)
                    .into_iter()
                    .filter(|idx| seen.binary_search(idx).is_err())
                    .map(|idx| rotated_path(base_dir, idx))
                    .collect();
                paths.push(current_path(base_dir));
                open_files(paths)
            };
            scan_all(files, &predicate).await
        };

        entries.extend(late);
        Ok(finish(entries, max_entries))
    }
}
