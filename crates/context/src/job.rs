//! Job initialization - building the root of the context tree.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use worker_core::{
    JobMessage, MaskHint, MaskType, RecordType, TimelineRecord, Variables, AGENT_PROXY_PASSWORD,
    AGENT_PROXY_URL, AGENT_PROXY_USERNAME, SYSTEM_DEBUG,
};
use worker_services::{Expansion, SecretMasker};

use crate::cancellation::CancellationScope;
use crate::config::{ProxyConfig, PROXY_ENV_PASSWORD, PROXY_ENV_URL, PROXY_ENV_USERNAME};
use crate::context::JobScope;
use crate::throttling::ThrottlingMonitor;
use crate::{ContextError, ExecutionContext, JobServices, Result, WorkerConfig};

/// Order of the job record on the main timeline.
pub const JOB_RECORD_ORDER: u32 = 1;

impl ExecutionContext {
    /// Create the job node from a job message.
    ///
    /// The job's cancellation is linked to `cancellation`. The message must
    /// carry an environment with a system connection, endpoints and
    /// variables. Warnings produced while expanding variables are reported
    /// on the job node; throttling notifications from the queue are
    /// accounted on it until the job completes.
    pub fn initialize_job(
        message: &JobMessage,
        cancellation: &CancellationToken,
        services: JobServices,
        config: &WorkerConfig,
    ) -> Result<Arc<ExecutionContext>> {
        let environment = message
            .environment
            .as_ref()
            .ok_or_else(|| missing("environment"))?;
        let system_connection = environment
            .system_connection
            .as_ref()
            .ok_or_else(|| missing("system connection"))?;
        let endpoints = environment
            .endpoints
            .as_ref()
            .ok_or_else(|| missing("endpoints"))?;
        let raw_variables = environment
            .variables
            .as_ref()
            .ok_or_else(|| missing("variables"))?;

        let cancellation = CancellationScope::linked_to(cancellation);

        let mut endpoints = endpoints.clone();
        endpoints.push(system_connection.clone());

        let Expansion {
            mut variables,
            warnings,
        } = services.expander.expand(raw_variables);
        apply_mask_hints(&environment.mask_hints, &mut variables, services.masker.as_ref())?;
        if let Some(proxy) = config.proxy.as_ref() {
            apply_proxy(proxy, &mut variables);
        }
        for secret in variables.secret_values() {
            services.masker.add_value(secret);
        }

        let debug = variables.get_bool(SYSTEM_DEBUG).unwrap_or(false);
        let record = TimelineRecord::pending(
            message.job_id,
            RecordType::Job,
            message.job_name.as_str(),
            JOB_RECORD_ORDER,
        )
        .with_worker_name(config.worker_name.as_str());

        let scope = Arc::new(JobScope::new(
            services,
            message.timeline,
            config.worker_name.clone(),
        ));
        let job = ExecutionContext::create_node(
            scope,
            record,
            cancellation,
            Arc::new(variables),
            Arc::new(endpoints),
            debug,
            Some(ThrottlingMonitor::new()),
        )?;

        for warning in &warnings {
            job.warning(warning);
        }

        let weak = Arc::downgrade(&job);
        job.scope.services.queue.on_throttling(Box::new(move |delay| {
            if let Some(job) = weak.upgrade() {
                job.report_throttling(delay);
            }
        }));

        info!(
            "Initialized job {} ({}) on timeline {}",
            message.job_name, message.job_id, message.timeline
        );
        Ok(job)
    }
}

fn missing(part: &str) -> ContextError {
    ContextError::InvalidArgument(format!("job message has no {}", part))
}

fn apply_mask_hints(
    hints: &[MaskHint],
    variables: &mut Variables,
    masker: &dyn SecretMasker,
) -> Result<()> {
    for hint in hints {
        match hint.mask_type {
            MaskType::Variable => {
                if !variables.mark_secret(&hint.value) {
                    debug!("Mask hint names unknown variable {}", hint.value);
                }
            }
            MaskType::Regex => masker.add_regex(&hint.value)?,
        }
    }
    Ok(())
}

/// Copy the proxy into job variables and clear the raw process environment
/// entries, so child processes only see it through variables.
fn apply_proxy(proxy: &ProxyConfig, variables: &mut Variables) {
    if proxy.url.is_empty() {
        return;
    }

    variables.set(AGENT_PROXY_URL, proxy.url.as_str(), false);
    std::env::remove_var(PROXY_ENV_URL);

    if let Some(username) = proxy.username.as_deref().filter(|u| !u.is_empty()) {
        variables.set(AGENT_PROXY_USERNAME, username, false);
        std::env::remove_var(PROXY_ENV_USERNAME);
    }

    if let Some(password) = proxy.password.as_deref().filter(|p| !p.is_empty()) {
        variables.set(AGENT_PROXY_PASSWORD, password, true);
        std::env::remove_var(PROXY_ENV_PASSWORD);
    }
}
