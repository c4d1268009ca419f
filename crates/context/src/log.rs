//! Per-node job logs and the line tag protocol.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::warn;
use worker_core::RecordId;
use worker_services::PagingLogger;

/// Line prefixes understood by downstream log renderers.
///
/// These are part of the wire contract and must not change.
pub mod tags {
    /// Section header
    pub const SECTION: &str = "##[section]";
    /// Command about to run
    pub const COMMAND: &str = "##[command]";
    /// Error
    pub const ERROR: &str = "##[error]";
    /// Warning
    pub const WARNING: &str = "##[warning]";
    /// Debug output
    pub const DEBUG: &str = "##[debug]";
}

/// One node's log, serialized by its own lock.
pub struct NodeLog {
    record_id: RecordId,
    logger: Mutex<Option<Box<dyn PagingLogger>>>,
}

impl NodeLog {
    /// Wrap a logger that is already set up.
    pub fn new(record_id: RecordId, logger: Box<dyn PagingLogger>) -> Self {
        Self {
            record_id,
            logger: Mutex::new(Some(logger)),
        }
    }

    /// Append a line. Lines written after [`NodeLog::end`] are dropped.
    pub fn write(&self, line: &str) {
        let mut logger = self.logger.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(logger) = logger.as_mut() {
            if let Err(e) = logger.write(line) {
                warn!("Failed to write log for record {}: {}", self.record_id, e);
            }
        }
    }

    /// Finalize the log.
    pub fn end(&self) {
        let logger = self
            .logger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut logger) = logger {
            if let Err(e) = logger.end() {
                warn!("Failed to finalize log for record {}: {}", self.record_id, e);
            }
        }
    }

    /// Whether the log is still open.
    pub fn is_open(&self) -> bool {
        self.logger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

/// Open logs of a job's nodes, keyed by record id.
///
/// Children reach their parent's log through this arena instead of holding
/// the parent itself.
#[derive(Default)]
pub struct LogArena {
    logs: RwLock<HashMap<RecordId, Arc<NodeLog>>>,
}

impl LogArena {
    /// Register a node's log.
    pub fn register(&self, record_id: RecordId, log: Arc<NodeLog>) {
        self.logs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record_id, log);
    }

    /// Look up a node's log.
    pub fn get(&self, record_id: RecordId) -> Option<Arc<NodeLog>> {
        self.logs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&record_id)
            .cloned()
    }

    /// Forget a node's log.
    pub fn remove(&self, record_id: RecordId) -> Option<Arc<NodeLog>> {
        self.logs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&record_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worker_core::TimelineId;
    use worker_services::{LoggerFactory, MemoryLoggerFactory};

    fn open(factory: &MemoryLoggerFactory, record_id: RecordId) -> NodeLog {
        let mut logger = factory.create_logger();
        logger.setup(TimelineId::new(), record_id).unwrap();
        NodeLog::new(record_id, logger)
    }

    #[test]
    fn test_write_after_end_is_dropped() {
        let factory = MemoryLoggerFactory::new();
        let record = RecordId::new();
        let log = open(&factory, record);

        log.write("before");
        log.end();
        log.write("after");

        assert!(!log.is_open());
        assert_eq!(factory.lines(record), vec!["before"]);
        assert!(factory.is_ended(record));
    }

    #[test]
    fn test_arena_lookup() {
        let factory = MemoryLoggerFactory::new();
        let arena = LogArena::default();
        let record = RecordId::new();

        arena.register(record, Arc::new(open(&factory, record)));
        assert!(arena.get(record).is_some());
        assert!(arena.remove(record).is_some());
        assert!(arena.get(record).is_none());
    }
}
