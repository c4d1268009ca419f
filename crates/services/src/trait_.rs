//! Service abstractions the execution context talks to.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use worker_core::{RecordId, TimelineId, TimelineRecord, Variables};

/// Error type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors that can occur in service implementations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid redaction pattern
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Logger used before `setup` or after `end`
    #[error("logger is not set up")]
    NotSetUp,

    /// Queue consumer has gone away
    #[error("queue is closed")]
    Closed,
}

/// Callback invoked with the delay of each throttling notification.
pub type ThrottlingHandler = Box<dyn Fn(Duration) + Send + Sync>;

/// A file handed to the server for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpload {
    /// Timeline the attachment belongs to
    pub timeline_id: TimelineId,

    /// Record the attachment belongs to
    pub record_id: RecordId,

    /// Attachment type
    #[serde(rename = "type")]
    pub attachment_type: String,

    /// Attachment name
    pub name: String,

    /// Local file to upload
    pub path: PathBuf,

    /// Delete the local file once uploaded
    pub delete_source: bool,
}

/// Asynchronous queue of updates bound for the remote service.
///
/// Implementations own batching, delivery and retry; every call returns
/// immediately.
pub trait JobServerQueue: Send + Sync {
    /// Queue a timeline record update.
    fn queue_timeline_record_update(&self, timeline_id: TimelineId, record: &TimelineRecord);

    /// Queue a line for the live web console.
    fn queue_web_console_line(&self, line: &str);

    /// Queue a file upload.
    fn queue_file_upload(&self, upload: FileUpload);

    /// Register a handler for server throttling notifications.
    fn on_throttling(&self, handler: ThrottlingHandler);
}

/// Per-node log writer.
pub trait PagingLogger: Send {
    /// Scope the log to one record.
    fn setup(&mut self, timeline_id: TimelineId, record_id: RecordId) -> Result<()>;

    /// Append a line.
    fn write(&mut self, line: &str) -> Result<()>;

    /// Finalize the log.
    fn end(&mut self) -> Result<()>;
}

/// Creates a fresh logger for each node.
pub trait LoggerFactory: Send + Sync {
    /// Create a logger; the caller sets it up.
    fn create_logger(&self) -> Box<dyn PagingLogger>;
}

/// Redacts secrets from outgoing text.
pub trait SecretMasker: Send + Sync {
    /// Register a literal secret value.
    fn add_value(&self, value: &str);

    /// Register a pattern matching secret text.
    fn add_regex(&self, pattern: &str) -> Result<()>;

    /// Return `input` with every known secret replaced.
    fn mask_secrets(&self, input: &str) -> String;
}

/// Result of expanding a raw variable bag.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    /// Expanded variables
    pub variables: Variables,

    /// Problems found while expanding, reported later as job warnings
    pub warnings: Vec<String>,
}

/// Expands macro references between variables.
pub trait VariableExpander: Send + Sync {
    /// Expand a raw variable bag.
    fn expand(&self, raw: &HashMap<String, String>) -> Expansion;
}
