use std::borrow::Cow;
use std::fmt::{self, Write as _};
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("General log error: {0}")]
    GeneralError(String),
    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode log record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to format log message")]
    Format(#[from] fmt::Error),
    #[error("Operation was cancelled")]
    Cancelled,
    #[error("Logger has been stopped")]
    Stopped,
}

/// Severity of an entry. Ordering follows severity, so a minimum level
/// filter is a plain comparison.
///
/// `Ignore` sorts above everything: it always passes the level filter and is
/// then dropped by the writer without being persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    Ignore,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
            LogLevel::Ignore => "ignore",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message of a pending entry.
///
/// Deferred messages are rendered on the writer thread, so producers only pay
/// for boxing the value.
pub struct Message(MessageRepr);

enum MessageRepr {
    Text(Cow<'static, str>),
    Deferred(Box<dyn fmt::Display + Send + Sync>),
}

impl Message {
    pub fn text(text: impl Into<Cow<'static, str>>) -> Self {
        Message(MessageRepr::Text(text.into()))
    }

    pub fn deferred<D>(value: D) -> Self
    where
        D: fmt::Display + Send + Sync + 'static,
    {
        Message(MessageRepr::Deferred(Box::new(value)))
    }

    pub fn render(&self) -> Result<String, fmt::Error> {
        match &self.0 {
            MessageRepr::Text(text) => Ok(text.to_string()),
            MessageRepr::Deferred(value) => {
                let mut out = String::new();
                write!(out, "{value}")?;
                Ok(out)
            }
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            MessageRepr::Text(text) => f.debug_tuple("Text").field(text).finish(),
            MessageRepr::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<&'static str> for Message {
    fn from(value: &'static str) -> Self {
        Message::text(value)
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self::new(std::any::type_name::<E>(), err.to_string())
    }
}

/// Where a log call was made.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSite {
    pub member_name: String,
    pub file_path: String,
    pub line: u32,
}

impl CallSite {
    pub fn new(member_name: impl Into<String>, file_path: impl Into<String>, line: u32) -> Self {
        Self {
            member_name: member_name.into(),
            file_path: file_path.into(),
            line,
        }
    }

    /// Capture the caller's file and line. The member name is left empty.
    #[track_caller]
    pub fn here() -> Self {
        let location = Location::caller();
        Self::new("", location.file(), location.line())
    }
}

static NEXT_THREAD_NUMBER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_NUMBER: u64 = NEXT_THREAD_NUMBER.fetch_add(1, Ordering::Relaxed);
}

/// Small sequential number identifying the calling thread for the lifetime
/// of the process.
pub fn current_thread_number() -> u64 {
    THREAD_NUMBER.with(|n| *n)
}

/// Outcome reported to a caller awaiting its own write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The line was appended and flushed.
    Written,
    /// The entry could not be rendered or written; see the diagnostics.
    Failed,
    /// The entry was dropped without touching the files (filtered, ignored,
    /// suspended or shut down).
    Discarded,
}

pub(crate) struct Completion(oneshot::Sender<WriteStatus>);

impl Completion {
    pub(crate) fn resolve(self, status: WriteStatus) {
        // The waiter may have given up already.
        let _ = self.0.send(status);
    }
}

/// An entry handed to the logger, not yet serialized.
#[derive(Debug)]
pub struct PendingEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<FixedOffset>,
    pub scope_id: u64,
    pub facility: String,
    pub message: Message,
    pub exception: Option<ExceptionInfo>,
    pub additional_data: Option<serde_json::Value>,
    pub call_site: CallSite,
    pub managed_thread_id: u64,
    pub native_thread_id: u64,
    pub task_id: u64,
    pub(crate) completion: Option<Completion>,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

impl PendingEntry {
    #[track_caller]
    pub fn new(level: LogLevel, facility: impl Into<String>, message: impl Into<Message>) -> Self {
        Self {
            level,
            timestamp: Local::now().fixed_offset(),
            scope_id: 0,
            facility: facility.into(),
            message: message.into(),
            exception: None,
            additional_data: None,
            call_site: CallSite::here(),
            managed_thread_id: current_thread_number(),
            native_thread_id: 0,
            task_id: 0,
            completion: None,
        }
    }

    pub fn with_scope(mut self, scope: &LogScope) -> Self {
        self.scope_id = scope.id;
        self
    }

    pub fn with_scope_id(mut self, scope_id: u64) -> Self {
        self.scope_id = scope_id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn with_data_value(mut self, data: serde_json::Value) -> Self {
        self.additional_data = Some(data);
        self
    }

    pub fn with_data<T: Serialize>(self, data: &T) -> Result<Self, LogError> {
        Ok(self.with_data_value(serde_json::to_value(data)?))
    }

    pub fn with_call_site(mut self, call_site: CallSite) -> Self {
        self.call_site = call_site;
        self
    }

    pub fn with_thread_ids(mut self, native_thread_id: u64, task_id: u64) -> Self {
        self.native_thread_id = native_thread_id;
        self.task_id = task_id;
        self
    }

    pub(crate) fn attach_completion(&mut self) -> oneshot::Receiver<WriteStatus> {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(Completion(tx));
        rx
    }

    pub(crate) fn take_completion(&mut self) -> Option<Completion> {
        self.completion.take()
    }

    /// Drop the entry, telling any waiter it was never written.
    pub(crate) fn discard(mut self) {
        if let Some(completion) = self.take_completion() {
            completion.resolve(WriteStatus::Discarded);
        }
    }

    /// Drop the entry after the writer gave up on it. Flush markers still
    /// report `Discarded`.
    pub(crate) fn fail(mut self) {
        let status = if self.level == LogLevel::Ignore {
            WriteStatus::Discarded
        } else {
            WriteStatus::Failed
        };
        if let Some(completion) = self.take_completion() {
            completion.resolve(status);
        }
    }

    /// Render the message and stamp the entry with a fresh id.
    pub fn render(&self) -> Result<PersistedEntry, LogError> {
        let message = self.message.render()?;
        let (exception_type, exception_message) = match &self.exception {
            Some(ex) => (Some(ex.type_name.clone()), Some(ex.message.clone())),
            None => (None, None),
        };

        Ok(PersistedEntry {
            id: Uuid::new_v4(),
            facility: self.facility.clone(),
            log_level: self.level,
            timestamp: self.timestamp,
            scope_id: self.scope_id,
            message,
            exception_type,
            exception_message,
            additional_data: self.additional_data.clone(),
            member_name: self.call_site.member_name.clone(),
            file_path: self.call_site.file_path.clone(),
            line: self.call_site.line,
            managed_thread_id: self.managed_thread_id,
            native_thread_id: self.native_thread_id,
            task_id: self.task_id,
            process_id: std::process::id(),
        })
    }
}

/// One line of a log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
    pub id: Uuid,
    pub facility: String,
    pub log_level: LogLevel,
    pub timestamp: DateTime<FixedOffset>,
    pub scope_id: u64,
    pub message: String,
    pub exception_type: Option<String>,
    pub exception_message: Option<String>,
    pub additional_data: Option<serde_json::Value>,
    pub member_name: String,
    pub file_path: String,
    pub line: u32,
    pub managed_thread_id: u64,
    pub native_thread_id: u64,
    pub task_id: u64,
    pub process_id: u32,
}

impl PersistedEntry {
    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<Vec<u8>, LogError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_line(line: &[u8]) -> Result<Self, LogError> {
        Ok(serde_json::from_slice(line)?)
    }
}

/// A nested logging context. Ids are unique per logger and increase
/// monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogScope {
    pub id: u64,
    pub parent_id: Option<u64>,
}

/// Anything that can both write and query.
pub trait LogStore: LogReader + LogWriter + Send + Sync {}
impl<L> LogStore for L where L: LogReader + LogWriter + Send + Sync {}

#[async_trait::async_trait]
pub trait LogCommon: Send + Sync {
    /// Wait until everything enqueued before this call has been processed.
    async fn flush(&self, cancel: &CancellationToken) -> Result<(), LogError>;
    fn queued_count(&self) -> usize;
    fn subscribe(&self) -> broadcast::Receiver<PersistedEntry>;
    fn suspend(&self);
    fn resume(&self);
}

#[async_trait::async_trait]
pub trait LogWriter: LogCommon + Send + Sync {
    /// Fire-and-forget.
    fn write(&self, entry: PendingEntry);

    /// Enqueue and wait until the line has been flushed (or the writer gave
    /// up on it). Cancelling only abandons the wait; the entry is still
    /// written.
    async fn write_async(
        &self,
        entry: PendingEntry,
        cancel: &CancellationToken,
    ) -> Result<WriteStatus, LogError>;
}

#[async_trait::async_trait]
pub trait LogReader: LogCommon + Send + Sync {
    /// Entries matching `predicate` across rotated and current files, oldest
    /// first, at most `max_entries` of them.
    async fn query<F>(
        &self,
        max_entries: usize,
        predicate: F,
        cancel: &CancellationToken,
    ) -> Result<Vec<PersistedEntry>, LogError>
    where
        F: Fn(&PersistedEntry) -> bool + Send + Sync + 'static;
}
