//! Per-node log writers.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use worker_core::{RecordId, TimelineId};

use super::{LoggerFactory, PagingLogger, Result, ServiceError};

/// Writes each node's log to `<dir>/<timeline>_<record>.log`.
///
/// Every line is prefixed with a UTC timestamp.
pub struct FileLogger {
    directory: PathBuf,
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl FileLogger {
    /// Create a logger writing into `directory`.
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            path: None,
            writer: None,
        }
    }

    /// Path of the current log file, once set up.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl PagingLogger for FileLogger {
    fn setup(&mut self, timeline_id: TimelineId, record_id: RecordId) -> Result<()> {
        fs::create_dir_all(&self.directory)?;
        let path = self
            .directory
            .join(format!("{}_{}.log", timeline_id, record_id));
        let file = File::create(&path)?;
        self.writer = Some(BufWriter::new(file));
        self.path = Some(path);
        Ok(())
    }

    fn write(&mut self, line: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(ServiceError::NotSetUp)?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        writeln!(writer, "{} {}", timestamp, line)?;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Creates [`FileLogger`]s sharing one directory.
pub struct FileLoggerFactory {
    directory: PathBuf,
}

impl FileLoggerFactory {
    /// Create a factory for `directory`.
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }
}

impl LoggerFactory for FileLoggerFactory {
    fn create_logger(&self) -> Box<dyn PagingLogger> {
        Box::new(FileLogger::new(&self.directory))
    }
}

#[derive(Default)]
struct MemoryLogs {
    lines: HashMap<RecordId, Vec<String>>,
    ended: HashSet<RecordId>,
}

/// Keeps every node's log in memory, keyed by record id.
#[derive(Clone, Default)]
pub struct MemoryLoggerFactory {
    logs: Arc<Mutex<MemoryLogs>>,
}

impl MemoryLoggerFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written to a record's log so far.
    pub fn lines(&self, record_id: RecordId) -> Vec<String> {
        let logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.lines.get(&record_id).cloned().unwrap_or_default()
    }

    /// Whether a record's log was ended.
    pub fn is_ended(&self, record_id: RecordId) -> bool {
        let logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.ended.contains(&record_id)
    }
}

impl LoggerFactory for MemoryLoggerFactory {
    fn create_logger(&self) -> Box<dyn PagingLogger> {
        Box::new(MemoryLogger {
            record_id: None,
            logs: self.logs.clone(),
        })
    }
}

struct MemoryLogger {
    record_id: Option<RecordId>,
    logs: Arc<Mutex<MemoryLogs>>,
}

impl PagingLogger for MemoryLogger {
    fn setup(&mut self, _timeline_id: TimelineId, record_id: RecordId) -> Result<()> {
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.lines.entry(record_id).or_default();
        self.record_id = Some(record_id);
        Ok(())
    }

    fn write(&mut self, line: &str) -> Result<()> {
        let record_id = self.record_id.ok_or(ServiceError::NotSetUp)?;
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        if logs.ended.contains(&record_id) {
            return Err(ServiceError::NotSetUp);
        }
        logs.lines.entry(record_id).or_default().push(line.to_string());
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if let Some(record_id) = self.record_id {
            let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
            logs.ended.insert(record_id);
        }
        Ok(())
    }
}
