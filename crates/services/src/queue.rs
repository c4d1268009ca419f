//! Channel-backed job server queue.
//!
//! Every queued item is sent over an unbounded tokio channel; the
//! receiving half belongs to whatever delivers updates to the server.

use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use worker_core::{TimelineId, TimelineRecord};

use super::{FileUpload, JobServerQueue, ServiceError, ThrottlingHandler};

/// An update bound for the remote service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueItem {
    /// A record snapshot for a timeline
    TimelineRecordUpdate {
        /// Target timeline
        timeline_id: TimelineId,
        /// Record as it was when queued
        record: TimelineRecord,
    },
    /// A live console line
    WebConsoleLine {
        /// Redacted line
        line: String,
    },
    /// A file to upload
    FileUpload {
        /// Upload request
        upload: FileUpload,
    },
}

/// [`JobServerQueue`] that forwards items over an mpsc channel.
pub struct ChannelQueue {
    sender: mpsc::UnboundedSender<QueueItem>,
    throttling: RwLock<Vec<ThrottlingHandler>>,
}

impl ChannelQueue {
    /// Create a queue and the receiver its items arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueueItem>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Self {
            sender,
            throttling: RwLock::new(Vec::new()),
        };
        (queue, receiver)
    }

    /// Deliver a throttling notification to every registered handler.
    ///
    /// Called by the delivery side when the server reports a delay.
    pub fn report_throttling(&self, delay: Duration) {
        debug!("Server throttling reported: {:?}", delay);
        let handlers = self.throttling.read().unwrap_or_else(|e| e.into_inner());
        for handler in handlers.iter() {
            handler(delay);
        }
    }

    fn send(&self, item: QueueItem) {
        if self.sender.send(item).is_err() {
            warn!("Dropping queued update: {}", ServiceError::Closed);
        }
    }
}

impl JobServerQueue for ChannelQueue {
    fn queue_timeline_record_update(&self, timeline_id: TimelineId, record: &TimelineRecord) {
        self.send(QueueItem::TimelineRecordUpdate {
            timeline_id,
            record: record.clone(),
        });
    }

    fn queue_web_console_line(&self, line: &str) {
        self.send(QueueItem::WebConsoleLine {
            line: line.to_string(),
        });
    }

    fn queue_file_upload(&self, upload: FileUpload) {
        self.send(QueueItem::FileUpload { upload });
    }

    fn on_throttling(&self, handler: ThrottlingHandler) {
        self.throttling
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }
}
