//! Execution context tree.
//!
//! A job is tracked as a tree of [`ExecutionContext`] nodes: one job root
//! created from the job message and one child per task. Each node owns its
//! timeline record, its log and its cancellation scope; job-wide
//! collaborators are shared through a [`JobScope`].

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use worker_core::{
    Issue, IssueType, RecordId, RecordType, ServiceEndpoint, TaskResult, TimelineId,
    TimelineRecord, TimelineRecordState, TimelineReference, Variables,
};
use worker_services::{
    FileUpload, JobServerQueue, LoggerFactory, MacroExpander, RegexSecretMasker, SecretMasker,
    VariableExpander,
};

use crate::cancellation::CancellationScope;
use crate::detail::DetailTimeline;
use crate::log::{tags, LogArena, NodeLog};
use crate::throttling::{ThrottlingMonitor, THROTTLING_WARNING};
use crate::{ContextError, Result};

/// Collaborators a job writes through.
#[derive(Clone)]
pub struct JobServices {
    /// Remote update queue
    pub queue: Arc<dyn JobServerQueue>,

    /// Creates one log per node
    pub loggers: Arc<dyn LoggerFactory>,

    /// Redacts every outgoing line and issue
    pub masker: Arc<dyn SecretMasker>,

    /// Expands the job's raw variables
    pub expander: Arc<dyn VariableExpander>,
}

impl JobServices {
    /// Create services with the built-in masker and expander.
    pub fn new(queue: Arc<dyn JobServerQueue>, loggers: Arc<dyn LoggerFactory>) -> Self {
        Self {
            queue,
            loggers,
            masker: Arc::new(RegexSecretMasker::new()),
            expander: Arc::new(MacroExpander::new()),
        }
    }

    /// Use a different secret masker.
    pub fn with_masker(mut self, masker: Arc<dyn SecretMasker>) -> Self {
        self.masker = masker;
        self
    }

    /// Use a different variable expander.
    pub fn with_expander(mut self, expander: Arc<dyn VariableExpander>) -> Self {
        self.expander = expander;
        self
    }
}

/// State shared by every node of one job.
pub struct JobScope {
    pub(crate) services: JobServices,
    pub(crate) main_timeline_id: TimelineId,
    pub(crate) worker_name: String,
    pub(crate) logs: LogArena,
}

impl JobScope {
    pub(crate) fn new(services: JobServices, main_timeline_id: TimelineId, worker_name: String) -> Self {
        Self {
            services,
            main_timeline_id,
            worker_name,
            logs: LogArena::default(),
        }
    }

    /// Open and register the log of a node.
    pub(crate) fn open_log(&self, record_id: RecordId) -> Result<Arc<NodeLog>> {
        let mut logger = self.services.loggers.create_logger();
        logger.setup(self.main_timeline_id, record_id)?;
        let log = Arc::new(NodeLog::new(record_id, logger));
        self.logs.register(record_id, log.clone());
        Ok(log)
    }
}

/// One node of a job's execution context tree.
pub struct ExecutionContext {
    pub(crate) scope: Arc<JobScope>,
    pub(crate) record_id: RecordId,
    pub(crate) parent_id: Option<RecordId>,
    pub(crate) record: Mutex<TimelineRecord>,
    pub(crate) log: Arc<NodeLog>,
    pub(crate) cancellation: CancellationScope,
    pub(crate) child_count: AtomicU32,
    pub(crate) variables: Arc<Variables>,
    pub(crate) endpoints: Arc<Vec<ServiceEndpoint>>,
    pub(crate) debug: bool,
    pub(crate) detail: Mutex<DetailTimeline>,
    pub(crate) throttling: Option<ThrottlingMonitor>,
}

impl ExecutionContext {
    /// Build a node and push its initial record.
    pub(crate) fn create_node(
        scope: Arc<JobScope>,
        record: TimelineRecord,
        cancellation: CancellationScope,
        variables: Arc<Variables>,
        endpoints: Arc<Vec<ServiceEndpoint>>,
        debug: bool,
        throttling: Option<ThrottlingMonitor>,
    ) -> Result<Arc<Self>> {
        let log = scope.open_log(record.id)?;
        scope
            .services
            .queue
            .queue_timeline_record_update(scope.main_timeline_id, &record);

        Ok(Arc::new(Self {
            record_id: record.id,
            parent_id: record.parent_id,
            record: Mutex::new(record),
            scope,
            log,
            cancellation,
            child_count: AtomicU32::new(0),
            variables,
            endpoints,
            debug,
            detail: Mutex::new(DetailTimeline::new()),
            throttling,
        }))
    }

    /// Create a child node for a task.
    ///
    /// The child shares this node's variables, endpoints and debug flag,
    /// gets a cancellation scope derived from this node's, and is ordered
    /// after every child created before it (the job record is order 1).
    pub fn create_child(&self, record_id: RecordId, name: &str) -> Result<Arc<ExecutionContext>> {
        let order = self.child_count.fetch_add(1, Ordering::SeqCst) + 2;
        let record = TimelineRecord::pending(record_id, RecordType::Task, name, order)
            .with_parent(Some(self.record_id))
            .with_worker_name(self.scope.worker_name.as_str());

        debug!("Creating child {} ({}) of {} at order {}", record_id, name, self.record_id, order);

        Self::create_node(
            self.scope.clone(),
            record,
            self.cancellation.child(),
            self.variables.clone(),
            self.endpoints.clone(),
            self.debug,
            None,
        )
    }

    // === Timeline record lifecycle ===

    /// Move the node to InProgress.
    ///
    /// When `timeout` is given the node (and its descendants) is cancelled
    /// once it elapses; this requires a tokio runtime.
    pub fn start(&self, current_operation: Option<&str>, timeout: Option<Duration>) -> Result<()> {
        let name = {
            let mut record = self.lock_record();
            let state = record.state.unwrap_or(TimelineRecordState::Pending);
            if state != TimelineRecordState::Pending {
                return Err(ContextError::InvalidTransition {
                    from: state,
                    to: TimelineRecordState::InProgress,
                });
            }
            if let Some(timeout) = timeout {
                self.cancellation.arm_timeout(timeout)?;
            }

            if let Some(operation) = current_operation {
                record.current_operation = Some(operation.to_string());
            }
            record.start_time = Some(Utc::now());
            record.state = Some(TimelineRecordState::InProgress);
            self.push(&record);
            record.name.clone().unwrap_or_default()
        };

        debug!("Started {} ({})", self.record_id, name);
        self.section(&format!("Starting: {}", name));
        Ok(())
    }

    /// Report progress. Percent-complete never decreases.
    pub fn progress(&self, percentage: i32, current_operation: Option<&str>) -> Result<()> {
        if !(0..=100).contains(&percentage) {
            return Err(ContextError::OutOfRange {
                name: "percentage",
                value: i64::from(percentage),
                min: 0,
                max: 100,
            });
        }

        let mut record = self.lock_record();
        if let Some(operation) = current_operation {
            record.current_operation = Some(operation.to_string());
        }
        record.advance_progress(percentage as u8);
        self.push(&record);
        Ok(())
    }

    /// Complete the node and return its resolved result.
    ///
    /// The result is `result`, else the result already set, else
    /// `Succeeded`. Open detail records are completed too; child nodes are
    /// not. The node's log is closed and its deadline released.
    pub fn complete(&self, result: Option<TaskResult>, current_operation: Option<&str>) -> TaskResult {
        if let Some(summary) = self.throttling.as_ref().and_then(|t| t.summary()) {
            self.warning(&summary);
        }

        let resolved = {
            let mut record = self.lock_record();
            let now = Utc::now();
            if let Some(operation) = current_operation {
                record.current_operation = Some(operation.to_string());
            }
            record.finish_time = Some(now);
            let resolved = record.complete(result, now);
            self.push(&record);
            resolved
        };

        {
            let mut detail = self.lock_detail();
            if let Some(detail_id) = detail.id() {
                for record in detail.complete_open(Utc::now()) {
                    self.scope
                        .services
                        .queue
                        .queue_timeline_record_update(detail_id, &record);
                }
            }
        }

        self.cancellation.release();
        self.log.end();
        self.scope.logs.remove(self.record_id);

        if self.parent_id.is_none() {
            info!("Job {} completed: {}", self.record_id, resolved);
        } else {
            debug!("Completed {}: {}", self.record_id, resolved);
        }
        resolved
    }

    /// Current result, if set.
    pub fn result(&self) -> Option<TaskResult> {
        self.lock_record().result
    }

    /// Set the result without completing.
    pub fn set_result(&self, result: TaskResult) {
        let mut record = self.lock_record();
        record.result = Some(result);
        self.push(&record);
    }

    /// Current result code, if set.
    pub fn result_code(&self) -> Option<String> {
        self.lock_record().result_code.clone()
    }

    /// Set the opaque result code.
    pub fn set_result_code(&self, result_code: impl Into<String>) {
        let mut record = self.lock_record();
        record.result_code = Some(result_code.into());
        self.push(&record);
    }

    // === Issues ===

    /// Record an issue on this node. The message is redacted first.
    pub fn add_issue(&self, issue: Issue) {
        let issue = Issue {
            message: self.scope.services.masker.mask_secrets(&issue.message),
            ..issue
        };

        let mut record = self.lock_record();
        record.add_issue(issue);
        self.push(&record);
    }

    // === Log sink ===

    /// Write a tagged line to this node's log, its parent's log and the
    /// web console. The line is redacted once, before fan-out.
    pub fn write(&self, tag: &str, message: &str) {
        let line = self
            .scope
            .services
            .masker
            .mask_secrets(&format!("{}{}", tag, message));

        self.log.write(&line);
        if let Some(parent) = self.parent_id.and_then(|id| self.scope.logs.get(id)) {
            parent.write(&line);
        }
        self.scope.services.queue.queue_web_console_line(&line);
    }

    /// Write an error line and record an error issue.
    pub fn error(&self, message: &str) {
        self.write(tags::ERROR, message);
        self.add_issue(Issue::new(IssueType::Error, message));
    }

    /// Write a warning line and record a warning issue.
    pub fn warning(&self, message: &str) {
        self.write(tags::WARNING, message);
        self.add_issue(Issue::new(IssueType::Warning, message));
    }

    /// Write an untagged line.
    pub fn output(&self, message: &str) {
        self.write("", message);
    }

    /// Write a command line.
    pub fn command(&self, message: &str) {
        self.write(tags::COMMAND, message);
    }

    /// Write a section header.
    pub fn section(&self, message: &str) {
        self.write(tags::SECTION, message);
    }

    /// Write a debug line when debug output is enabled for the job.
    pub fn debug(&self, message: &str) {
        if self.debug {
            self.write(tags::DEBUG, message);
        }
    }

    /// Hand a file to the upload queue, attached to this node's record.
    ///
    /// The source file is kept.
    pub fn queue_attach_file(&self, attachment_type: &str, name: &str, path: impl AsRef<Path>) -> Result<()> {
        if attachment_type.is_empty() {
            return Err(ContextError::InvalidArgument("attachment type is empty".to_string()));
        }
        if name.is_empty() {
            return Err(ContextError::InvalidArgument("attachment name is empty".to_string()));
        }
        let path = path.as_ref();
        if !path.exists() {
            return Err(ContextError::NotFound(path.to_path_buf()));
        }

        self.scope.services.queue.queue_file_upload(FileUpload {
            timeline_id: self.scope.main_timeline_id,
            record_id: self.record_id,
            attachment_type: attachment_type.to_string(),
            name: name.to_string(),
            path: path.to_path_buf(),
            delete_source: false,
        });
        Ok(())
    }

    // === Detail timeline ===

    /// Add or merge-update a record of this node's detail timeline.
    ///
    /// The detail timeline is allocated on first use and referenced from
    /// this node's record. Job records are rejected.
    pub fn update_detail_timeline_record(&self, record: TimelineRecord) -> Result<()> {
        if record.record_type == Some(RecordType::Job) {
            return Err(ContextError::InvalidArgument(
                "detail timeline cannot hold a job record".to_string(),
            ));
        }

        let mut detail = self.lock_detail();
        let (detail_id, created) = detail.ensure_created();
        if created {
            debug!("Created detail timeline {} for {}", detail_id, self.record_id);
            let mut own = self.lock_record();
            own.details = Some(TimelineReference { id: detail_id });
            self.push(&own);
        }

        let stored = detail.upsert(record);
        self.scope
            .services
            .queue
            .queue_timeline_record_update(detail_id, stored);
        Ok(())
    }

    /// Detail timeline id, once allocated.
    pub fn detail_timeline_id(&self) -> Option<TimelineId> {
        self.lock_detail().id()
    }

    /// A record of the detail timeline.
    pub fn detail_record(&self, id: RecordId) -> Option<TimelineRecord> {
        self.lock_detail().get(id).cloned()
    }

    // === Cancellation ===

    /// Cancel this node and its descendants. Idempotent.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether this node was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Token to await or poll for cancellation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.token().clone()
    }

    // === Throttling ===

    /// Handle a throttling notification from the job server queue.
    ///
    /// Only the job node accounts for throttling; the first notification
    /// is surfaced as a warning, the total is reported at completion.
    /// Notifications after completion leave the record untouched.
    pub fn report_throttling(&self, delay: Duration) {
        let Some(monitor) = self.throttling.as_ref() else {
            return;
        };
        warn!("Job {} throttled by server for {:?}", self.record_id, delay);
        let first = monitor.record(delay);
        let completed = self.lock_record().is_completed();
        if first && !completed {
            self.warning(THROTTLING_WARNING);
        }
    }

    /// Total throttling delay recorded for the job.
    pub fn throttling_delay(&self) -> Duration {
        self.throttling
            .as_ref()
            .map(|t| t.total_delay())
            .unwrap_or_default()
    }

    // === Accessors ===

    /// Snapshot of this node's record.
    pub fn record(&self) -> TimelineRecord {
        self.lock_record().clone()
    }

    /// This node's record id.
    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    /// Parent record id (none for the job node).
    pub fn parent_id(&self) -> Option<RecordId> {
        self.parent_id
    }

    /// Main timeline of the job.
    pub fn main_timeline_id(&self) -> TimelineId {
        self.scope.main_timeline_id
    }

    /// Job variables, shared across the tree.
    pub fn variables(&self) -> &Arc<Variables> {
        &self.variables
    }

    /// Job endpoints, shared across the tree.
    pub fn endpoints(&self) -> &Arc<Vec<ServiceEndpoint>> {
        &self.endpoints
    }

    /// Whether debug output is enabled.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    fn push(&self, record: &TimelineRecord) {
        self.scope
            .services
            .queue
            .queue_timeline_record_update(self.scope.main_timeline_id, record);
    }

    fn lock_record(&self) -> MutexGuard<'_, TimelineRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_detail(&self) -> MutexGuard<'_, DetailTimeline> {
        self.detail.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drain, harness, job_message, record_updates, Harness};
    use crate::WorkerConfig;
    use worker_core::MAX_ISSUE_COUNT;
    use worker_services::QueueItem;

    fn start_job(h: &Harness) -> Arc<ExecutionContext> {
        ExecutionContext::initialize_job(
            &job_message(),
            &h.job_token,
            h.services.clone(),
            &WorkerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_children_ordered_by_creation() {
        let mut h = harness();
        let job = start_job(&h);

        let first = job.create_child(RecordId::new(), "first").unwrap();
        let second = job.create_child(RecordId::new(), "second").unwrap();
        let third = job.create_child(RecordId::new(), "third").unwrap();

        assert_eq!(job.record().order, Some(1));
        assert_eq!(first.record().order, Some(2));
        assert_eq!(second.record().order, Some(3));
        assert_eq!(third.record().order, Some(4));
        assert_eq!(first.parent_id(), Some(job.record_id()));
        assert_eq!(first.record().record_type, Some(RecordType::Task));
        assert_eq!(first.record().worker_name.as_deref(), Some("worker"));

        let pushed = record_updates(&drain(&mut h.rx));
        assert!(pushed.iter().any(|(_, r)| r.id == third.record_id()));
    }

    #[test]
    fn test_child_shares_job_state() {
        let h = harness();
        let job = start_job(&h);
        let child = job.create_child(RecordId::new(), "task").unwrap();
        let grandchild = child.create_child(RecordId::new(), "sub").unwrap();

        assert!(Arc::ptr_eq(job.variables(), child.variables()));
        assert!(Arc::ptr_eq(job.endpoints(), grandchild.endpoints()));
        assert_eq!(child.main_timeline_id(), job.main_timeline_id());
        assert_eq!(child.is_debug(), job.is_debug());
        assert_eq!(grandchild.record().order, Some(2));
        assert_eq!(grandchild.parent_id(), Some(child.record_id()));
    }

    #[test]
    fn test_progress_never_regresses() {
        let h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();
        task.start(None, None).unwrap();

        let mut last = 0;
        for pct in [5, 50, 20, 50, 75, 10, 100, 0] {
            task.progress(pct, Some("working")).unwrap();
            let now = task.record().percent_complete.unwrap();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 100);
        assert_eq!(task.record().current_operation.as_deref(), Some("working"));
    }

    #[test]
    fn test_progress_out_of_range() {
        let h = harness();
        let job = start_job(&h);

        assert!(matches!(job.progress(-1, None), Err(ContextError::OutOfRange { .. })));
        assert!(matches!(job.progress(101, None), Err(ContextError::OutOfRange { .. })));
        assert_eq!(job.record().percent_complete, Some(0));
    }

    #[test]
    fn test_start_writes_section_and_rejects_restart() {
        let h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "Compile").unwrap();

        task.start(Some("warming up"), None).unwrap();
        let record = task.record();
        assert_eq!(record.state, Some(TimelineRecordState::InProgress));
        assert!(record.start_time.is_some());
        assert_eq!(record.current_operation.as_deref(), Some("warming up"));
        assert_eq!(h.logs.lines(task.record_id()), vec!["##[section]Starting: Compile"]);

        assert!(matches!(
            task.start(None, None),
            Err(ContextError::InvalidTransition { .. })
        ));
        task.complete(None, None);
        assert!(matches!(
            task.start(None, None),
            Err(ContextError::InvalidTransition {
                from: TimelineRecordState::Completed,
                ..
            })
        ));
    }

    #[test]
    fn test_complete_defaults_and_closes_log() {
        let h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();
        task.start(None, None).unwrap();
        task.progress(30, None).unwrap();

        let result = task.complete(None, Some("done"));

        let record = task.record();
        assert_eq!(result, TaskResult::Succeeded);
        assert_eq!(record.state, Some(TimelineRecordState::Completed));
        assert_eq!(record.percent_complete, Some(100));
        assert_eq!(record.result, Some(TaskResult::Succeeded));
        assert!(record.finish_time.is_some());
        assert_eq!(record.current_operation.as_deref(), Some("done"));
        assert!(h.logs.is_ended(task.record_id()));
        assert!(!h.logs.is_ended(job.record_id()));
    }

    #[test]
    fn test_complete_keeps_result_already_set() {
        let h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();

        task.set_result(TaskResult::Failed);
        task.set_result_code("exit 2");

        assert_eq!(task.complete(None, None), TaskResult::Failed);
        assert_eq!(task.result_code().as_deref(), Some("exit 2"));
        assert_eq!(
            task.complete(Some(TaskResult::Cancelled), None),
            TaskResult::Cancelled
        );
    }

    #[test]
    fn test_errors_counted_past_cap() {
        let h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();

        for i in 0..15 {
            task.error(&format!("failure {}", i));
        }

        let record = task.record();
        assert_eq!(record.error_count, 15);
        assert!(record.stored_issue_count(IssueType::Error) <= MAX_ISSUE_COUNT);
        assert_eq!(h.logs.lines(task.record_id()).len(), 15);
    }

    #[test]
    fn test_secrets_redacted_in_issues_and_lines() {
        let mut h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();
        drain(&mut h.rx);

        task.add_issue(Issue::warning("token is s3cr3t-value"));
        task.output("echo s3cr3t-value");

        let record = task.record();
        assert_eq!(record.issues[0].message, "token is ***");
        assert_eq!(h.logs.lines(task.record_id()), vec!["echo ***"]);
        assert!(h.logs.lines(job.record_id()).contains(&"echo ***".to_string()));

        let console: Vec<String> = drain(&mut h.rx)
            .into_iter()
            .filter_map(|item| match item {
                QueueItem::WebConsoleLine { line } => Some(line),
                _ => None,
            })
            .collect();
        assert_eq!(console, vec!["echo ***"]);
    }

    #[test]
    fn test_log_fan_out_one_hop() {
        let h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();
        let sub = task.create_child(RecordId::new(), "sub").unwrap();

        job.output("from job");
        task.command("git fetch");
        sub.output("from sub");

        let job_lines = h.logs.lines(job.record_id());
        assert!(job_lines.contains(&"from job".to_string()));
        assert!(job_lines.contains(&"##[command]git fetch".to_string()));
        assert!(!job_lines.contains(&"from sub".to_string()));
        assert_eq!(
            h.logs.lines(task.record_id()),
            vec!["##[command]git fetch", "from sub"]
        );
        assert_eq!(h.logs.lines(sub.record_id()), vec!["from sub"]);
    }

    #[test]
    fn test_write_after_parent_completed() {
        let h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();
        let sub = task.create_child(RecordId::new(), "sub").unwrap();

        task.complete(None, None);
        sub.output("late line");

        assert_eq!(h.logs.lines(sub.record_id()), vec!["late line"]);
        assert!(!h.logs.lines(task.record_id()).contains(&"late line".to_string()));
    }

    #[test]
    fn test_debug_lines_follow_flag() {
        let h = harness();
        let job = start_job(&h);

        job.debug("hidden");
        assert!(!job.is_debug());
        assert!(!h.logs.lines(job.record_id()).contains(&"##[debug]hidden".to_string()));

        let mut message = job_message();
        if let Some(env) = message.environment.as_mut() {
            if let Some(vars) = env.variables.as_mut() {
                vars.insert("system.debug".to_string(), "TRUE".to_string());
            }
        }
        let h = harness();
        let job = ExecutionContext::initialize_job(&message, &h.job_token, h.services.clone(), &WorkerConfig::default()).unwrap();
        let task = job.create_child(RecordId::new(), "task").unwrap();
        task.debug("shown");

        assert!(task.is_debug());
        assert_eq!(h.logs.lines(task.record_id()), vec!["##[debug]shown"]);
    }

    #[test]
    fn test_cancellation_flows_down() {
        let h = harness();
        let job = start_job(&h);
        let left = job.create_child(RecordId::new(), "left").unwrap();
        let right = job.create_child(RecordId::new(), "right").unwrap();
        let leaf = left.create_child(RecordId::new(), "leaf").unwrap();

        leaf.cancel();
        assert!(leaf.is_cancelled());
        assert!(!left.is_cancelled());
        assert!(!job.is_cancelled());

        job.cancel();
        assert!(left.is_cancelled());
        assert!(right.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_job_token_cancels_tree() {
        let h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();

        h.job_token.cancel();
        assert!(job.is_cancelled());
        assert!(task.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timeout_cancels_node() {
        let h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();
        let sub = task.create_child(RecordId::new(), "sub").unwrap();

        task.start(None, Some(Duration::from_secs(30))).unwrap();
        let token = sub.cancellation_token();
        let fired = tokio::time::timeout(Duration::from_secs(60), token.cancelled()).await;

        assert!(fired.is_ok());
        assert!(task.is_cancelled());
        assert!(!job.is_cancelled());
    }

    #[test]
    fn test_start_timeout_without_runtime_leaves_pending() {
        let h = harness();
        let job = start_job(&h);

        assert!(matches!(
            job.start(None, Some(Duration::from_secs(1))),
            Err(ContextError::NoRuntime)
        ));
        assert_eq!(job.record().state, Some(TimelineRecordState::Pending));
    }

    #[test]
    fn test_detail_timeline_rejects_job_record() {
        let h = harness();
        let job = start_job(&h);
        let mut record = TimelineRecord::new(RecordId::new());
        record.record_type = Some(RecordType::Job);

        assert!(matches!(
            job.update_detail_timeline_record(record),
            Err(ContextError::InvalidArgument(_))
        ));
        assert!(job.detail_timeline_id().is_none());
    }

    #[test]
    fn test_detail_timeline_created_once_and_merged() {
        let mut h = harness();
        let job = start_job(&h);
        drain(&mut h.rx);
        let sub_id = RecordId::new();

        let mut first = TimelineRecord::new(sub_id);
        first.name = Some("Restore packages".to_string());
        first.percent_complete = Some(40);
        job.update_detail_timeline_record(first).unwrap();

        let mut second = TimelineRecord::new(sub_id);
        second.state = Some(TimelineRecordState::InProgress);
        second.current_operation = Some("nuget".to_string());
        job.update_detail_timeline_record(second).unwrap();

        let detail_id = job.detail_timeline_id().unwrap();
        assert_eq!(job.record().details, Some(TimelineReference { id: detail_id }));

        let merged = job.detail_record(sub_id).unwrap();
        assert_eq!(merged.name.as_deref(), Some("Restore packages"));
        assert_eq!(merged.percent_complete, Some(40));
        assert_eq!(merged.state, Some(TimelineRecordState::InProgress));
        assert_eq!(merged.current_operation.as_deref(), Some("nuget"));

        let updates = record_updates(&drain(&mut h.rx));
        let main_pushes = updates
            .iter()
            .filter(|(t, r)| *t == job.main_timeline_id() && r.details.is_some())
            .count();
        let detail_pushes = updates.iter().filter(|(t, _)| *t == detail_id).count();
        assert_eq!(main_pushes, 1);
        assert_eq!(detail_pushes, 2);
        assert_eq!(updates.last().unwrap().1, merged);
    }

    #[test]
    fn test_complete_closes_open_detail_records() {
        let mut h = harness();
        let job = start_job(&h);
        let (open, done) = (RecordId::new(), RecordId::new());

        let mut running = TimelineRecord::new(open);
        running.state = Some(TimelineRecordState::InProgress);
        job.update_detail_timeline_record(running).unwrap();

        let mut finished = TimelineRecord::new(done);
        finished.state = Some(TimelineRecordState::Completed);
        finished.result = Some(TaskResult::Skipped);
        job.update_detail_timeline_record(finished).unwrap();
        drain(&mut h.rx);

        let task = job.create_child(RecordId::new(), "task").unwrap();
        job.complete(None, None);

        let detail_id = job.detail_timeline_id().unwrap();
        let completed = job.detail_record(open).unwrap();
        assert_eq!(completed.state, Some(TimelineRecordState::Completed));
        assert_eq!(completed.result, Some(TaskResult::Succeeded));
        assert_eq!(completed.percent_complete, Some(100));
        assert_eq!(job.detail_record(done).unwrap().result, Some(TaskResult::Skipped));

        let updates = record_updates(&drain(&mut h.rx));
        let detail_pushes: Vec<_> = updates.iter().filter(|(t, _)| *t == detail_id).collect();
        assert_eq!(detail_pushes.len(), 1);
        assert_eq!(detail_pushes[0].1.id, open);

        // Child nodes are not completed along with their parent.
        assert_eq!(task.record().state, Some(TimelineRecordState::Pending));
    }

    #[test]
    fn test_attach_missing_file() {
        let mut h = harness();
        let job = start_job(&h);
        drain(&mut h.rx);

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");

        assert!(matches!(
            job.queue_attach_file("DistributedTask.Core.Summary", "summary", &missing),
            Err(ContextError::NotFound(_))
        ));
        assert!(drain(&mut h.rx).is_empty());
    }

    #[test]
    fn test_attach_existing_file() {
        let mut h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();
        drain(&mut h.rx);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.md");
        std::fs::write(&path, "# Summary").unwrap();

        task.queue_attach_file("DistributedTask.Core.Summary", "summary", &path).unwrap();

        match drain(&mut h.rx).as_slice() {
            [QueueItem::FileUpload { upload }] => {
                assert_eq!(upload.record_id, task.record_id());
                assert_eq!(upload.timeline_id, job.main_timeline_id());
                assert_eq!(upload.path, path);
                assert!(!upload.delete_source);
            }
            other => panic!("unexpected items: {:?}", other),
        }
        assert!(path.exists());
        assert!(matches!(
            task.queue_attach_file("", "summary", &path),
            Err(ContextError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_throttling_warns_once_and_summarizes() {
        let h = harness();
        let job = start_job(&h);

        h.queue.report_throttling(Duration::from_millis(250));
        h.queue.report_throttling(Duration::from_millis(500));

        let record = job.record();
        assert_eq!(record.warning_count, 1);
        assert_eq!(record.issues[0].message, THROTTLING_WARNING);
        assert_eq!(job.throttling_delay(), Duration::from_millis(750));

        job.complete(None, None);

        let record = job.record();
        assert_eq!(record.warning_count, 2);
        assert!(record.issues[1].message.contains("0.75 seconds"));
        assert!(h
            .logs
            .lines(job.record_id())
            .iter()
            .any(|l| l.starts_with("##[warning]The job has experienced 0.75 seconds")));
    }

    #[test]
    fn test_throttling_after_complete_leaves_record() {
        let mut h = harness();
        let job = start_job(&h);
        job.complete(None, None);
        drain(&mut h.rx);

        h.queue.report_throttling(Duration::from_millis(500));

        let record = job.record();
        assert_eq!(record.state, Some(TimelineRecordState::Completed));
        assert_eq!(record.warning_count, 0);
        assert!(record.issues.is_empty());
        assert!(drain(&mut h.rx).is_empty());
        assert_eq!(job.throttling_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_concurrent_writes_from_children() {
        const CHILDREN: usize = 8;
        const LINES: usize = 100;
        const ERRORS: usize = 25;

        let h = harness();
        let job = start_job(&h);
        let children: Vec<_> = (0..CHILDREN)
            .map(|i| job.create_child(RecordId::new(), &format!("task {}", i)).unwrap())
            .collect();

        std::thread::scope(|s| {
            for child in &children {
                s.spawn(move || {
                    for i in 0..LINES {
                        child.output(&format!("line {}", i));
                    }
                    for i in 0..ERRORS {
                        child.error(&format!("failure {}", i));
                    }
                });
            }
        });

        let per_child = LINES + ERRORS;
        assert_eq!(h.logs.lines(job.record_id()).len(), CHILDREN * per_child);
        for child in &children {
            assert_eq!(h.logs.lines(child.record_id()).len(), per_child);
            let record = child.record();
            assert_eq!(record.error_count as usize, ERRORS);
            assert!(record.stored_issue_count(IssueType::Error) <= MAX_ISSUE_COUNT);
        }
    }

    #[test]
    fn test_children_ignore_throttling() {
        let h = harness();
        let job = start_job(&h);
        let task = job.create_child(RecordId::new(), "task").unwrap();

        task.report_throttling(Duration::from_secs(1));
        assert_eq!(task.record().warning_count, 0);
        assert_eq!(task.throttling_delay(), Duration::ZERO);
        assert_eq!(job.throttling_delay(), Duration::ZERO);
    }

    #[test]
    fn test_end_to_end_job_result_not_aggregated() {
        let mut h = harness();
        let job = start_job(&h);
        job.start(None, None).unwrap();

        let build = job.create_child(RecordId::new(), "Build").unwrap();
        let test = job.create_child(RecordId::new(), "Test").unwrap();

        build.start(None, None).unwrap();
        build.output("compiling");
        assert_eq!(build.complete(Some(TaskResult::Succeeded), None), TaskResult::Succeeded);

        test.start(None, None).unwrap();
        test.error("3 tests failed");
        assert_eq!(test.complete(Some(TaskResult::Failed), None), TaskResult::Failed);

        assert_eq!(job.complete(None, None), TaskResult::Succeeded);
        assert_eq!(job.record().error_count, 0);
        assert_eq!(test.record().error_count, 1);

        let job_log = h.logs.lines(job.record_id());
        assert_eq!(
            job_log,
            vec![
                "##[section]Starting: Build job",
                "##[section]Starting: Build",
                "compiling",
                "##[section]Starting: Test",
                "##[error]3 tests failed",
            ]
        );

        let updates = record_updates(&drain(&mut h.rx));
        let job_states: Vec<_> = updates
            .iter()
            .filter(|(_, r)| r.id == job.record_id())
            .filter_map(|(_, r)| r.state)
            .collect();
        assert_eq!(job_states.first(), Some(&TimelineRecordState::Pending));
        assert_eq!(job_states.last(), Some(&TimelineRecordState::Completed));
        assert!(job_states.windows(2).all(|w| w[0] <= w[1]));
    }
}
