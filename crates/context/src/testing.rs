//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use worker_core::{
    JobEnvironment, JobMessage, MaskHint, MaskType, RecordId, ServiceEndpoint, TimelineId,
    TimelineRecord, SYSTEM_CONNECTION_NAME,
};
use worker_services::{ChannelQueue, MemoryLoggerFactory, QueueItem};

use crate::JobServices;

pub(crate) struct Harness {
    pub services: JobServices,
    pub queue: Arc<ChannelQueue>,
    pub rx: UnboundedReceiver<QueueItem>,
    pub logs: MemoryLoggerFactory,
    pub job_token: CancellationToken,
}

pub(crate) fn harness() -> Harness {
    let (queue, rx) = ChannelQueue::new();
    let queue = Arc::new(queue);
    let logs = MemoryLoggerFactory::new();
    let services = JobServices::new(queue.clone(), Arc::new(logs.clone()));

    Harness {
        services,
        queue,
        rx,
        logs,
        job_token: CancellationToken::new(),
    }
}

pub(crate) fn job_message() -> JobMessage {
    let mut variables = HashMap::new();
    variables.insert("Build.Repository.Name".to_string(), "widgets".to_string());
    variables.insert("token".to_string(), "s3cr3t-value".to_string());

    JobMessage {
        job_id: RecordId::new(),
        job_name: "Build job".to_string(),
        timeline: TimelineId::new(),
        environment: Some(JobEnvironment {
            system_connection: Some(ServiceEndpoint::new(
                SYSTEM_CONNECTION_NAME,
                "https://ci.example/collection",
            )),
            endpoints: Some(vec![ServiceEndpoint::new("github", "https://github.example")]),
            variables: Some(variables),
            mask_hints: vec![MaskHint {
                mask_type: MaskType::Variable,
                value: "token".to_string(),
            }],
        }),
    }
}

pub(crate) fn drain(rx: &mut UnboundedReceiver<QueueItem>) -> Vec<QueueItem> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

pub(crate) fn record_updates(items: &[QueueItem]) -> Vec<(TimelineId, TimelineRecord)> {
    items
        .iter()
        .filter_map(|item| match item {
            QueueItem::TimelineRecordUpdate {
                timeline_id,
                record,
            } => Some((*timeline_id, record.clone())),
            _ => None,
        })
        .collect()
}
