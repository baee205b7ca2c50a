use std::path::{Path, PathBuf};

pub const FILE_PREFIX: &str = "log";
pub const FILE_EXTENSION: &str = ".jsonl";

/// Name of the file currently being appended to.
pub const CURRENT_FILE: &str = "log.jsonl";

/// Generate a rotated file name, e.g. `log7.jsonl`
pub fn rotated_filename(index: u64) -> String {
    format!("{FILE_PREFIX}{index}{FILE_EXTENSION}")
}

pub fn current_path(base_dir: &Path) -> PathBuf {
    base_dir.join(CURRENT_FILE)
}

pub fn rotated_path(base_dir: &Path, index: u64) -> PathBuf {
    base_dir.join(rotated_filename(index))
}

/// Index of a rotated file name, `None` for the current file and anything
/// that is not ours.
fn parse_rotated_index(name: &str) -> Option<u64> {
    let digits = name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_EXTENSION)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: u64 = digits.parse().ok()?;
    (index > 0).then_some(index)
}

/// Return the indices of every rotated file inside `base_dir`, ascending
/// (oldest first). A missing directory has no rotated files; only regular
/// files count.
pub fn find_rotated_indices(base_dir: &Path) -> Vec<u64> {
    let mut indices: Vec<u64> = std::fs::read_dir(base_dir)
        .ok()
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let entry = entry.ok()?;
            if !entry.file_type().ok()?.is_file() {
                return None;
            }
            let name = entry.file_name().into_string().ok()?;
            parse_rotated_index(&name)
        })
        .collect();

    indices.sort_unstable();
    indices
}

/// What the writer has to do to rotate the current file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPlan {
    pub backup_index: u64,
    pub backup_path: PathBuf,
    /// Oldest first.
    pub delete: Vec<PathBuf>,
}

/// Compute the next backup path and the rotated files that fall out of
/// retention.
///
/// `existing` must be the sorted output of [`find_rotated_indices`]. One
/// retention slot is reserved for the fresh current file, so once
/// `existing.len() >= max_files - 1` the oldest files are dropped until the
/// new backup fits. `max_files = None` keeps everything.
pub fn compute_rotation(
    base_dir: &Path,
    existing: &[u64],
    max_files: Option<usize>,
) -> RotationPlan {
    let backup_index = existing.last().map_or(1, |max| max + 1);

    let delete_count = match max_files {
        Some(cap) => {
            let keep = cap.saturating_sub(1);
            if existing.len() >= keep {
                (existing.len() - keep + 1).min(existing.len())
            } else {
                0
            }
        }
        None => 0,
    };

    RotationPlan {
        backup_index,
        backup_path: rotated_path(base_dir, backup_index),
        delete: existing[..delete_count]
            .iter()
            .map(|idx| rotated_path(base_dir, *idx))
            .collect(),
    }
}
