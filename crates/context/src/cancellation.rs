//! Linked cancellation with optional deadlines.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{ContextError, Result};

/// A node's cancellation signal.
///
/// Cancelling a scope cancels every scope derived from it, never the other
/// way round.
pub struct CancellationScope {
    token: CancellationToken,
    deadline: Mutex<Option<JoinHandle<()>>>,
}

impl CancellationScope {
    /// Create a scope linked to an externally owned token.
    pub fn linked_to(parent: &CancellationToken) -> Self {
        Self::from_token(parent.child_token())
    }

    /// Derive a scope for a child node.
    pub fn child(&self) -> Self {
        Self::from_token(self.token.child_token())
    }

    fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: Mutex::new(None),
        }
    }

    /// The underlying token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this scope and its descendants. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether this scope was cancelled, directly or through an ancestor.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel this scope once `timeout` elapses.
    ///
    /// Replaces any deadline armed earlier. Requires a tokio runtime.
    pub fn arm_timeout(&self, timeout: Duration) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ContextError::NoRuntime)?;
        let token = self.token.clone();
        let task = runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    debug!("Timeout of {:?} elapsed, cancelling", timeout);
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });

        let mut deadline = self.deadline.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = deadline.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Drop any pending deadline.
    pub fn release(&self) {
        let task = self
            .deadline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for CancellationScope {
    fn drop(&mut self) {
        self.release();
    }
}
