//! Settings consumed by [`FileLogger`](crate::logger::FileLogger).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::types::LogLevel;

pub const DEFAULT_ROTATION_THRESHOLD: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 10;

/// `None` for `rotation_threshold` / `max_files` means unbounded. Non-positive
/// values, from code or from a config file, are normalised to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    pub base_dir: PathBuf,
    pub min_level: LogLevel,
    #[serde(deserialize_with = "non_positive_as_unbounded")]
    pub rotation_threshold: Option<u64>,
    #[serde(deserialize_with = "non_positive_as_unbounded")]
    pub max_files: Option<usize>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("logs"),
            min_level: LogLevel::Info,
            rotation_threshold: Some(DEFAULT_ROTATION_THRESHOLD),
            max_files: Some(DEFAULT_MAX_FILES),
        }
    }
}

impl LogConfig {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_rotation_threshold(mut self, bytes: i64) -> Self {
        self.rotation_threshold = positive(bytes);
        self
    }

    pub fn with_max_files(mut self, count: i64) -> Self {
        self.max_files = positive(count);
        self
    }

    /// Entries below the minimum level never reach the queue.
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }
}

fn positive<T: TryFrom<i64>>(value: i64) -> Option<T> {
    if value > 0 {
        T::try_from(value).ok()
    } else {
        None
    }
}

fn non_positive_as_unbounded<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.and_then(positive::<T>))
}
