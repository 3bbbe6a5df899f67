//! The Runnable: a thin task object bridging one FVR to the worker pool.

use std::sync::{Arc, Weak};

use tracing::trace;

use crate::execution::ExecutionData;
use crate::request::{FrameViewRequest, RequestKey, RequestStatus};
use crate::status::RenderStatus;

/// Invokes one effect's render entry point and reports completion back to
/// its execution.
///
/// Holds a weak reference to the execution (it must not extend the tree
/// render's lifetime) and a strong reference to the one request it renders.
pub struct Runnable {
    execution: Weak<ExecutionData>,
    request: Arc<FrameViewRequest>,
    key: RequestKey,
}

impl Runnable {
    pub(crate) fn new(execution: Weak<ExecutionData>, request: Arc<FrameViewRequest>, key: RequestKey) -> Self {
        Self {
            execution,
            request,
            key,
        }
    }

    pub fn request(&self) -> &Arc<FrameViewRequest> {
        &self.request
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Runs the task. `in_worker_thread` tells the queue manager's
    /// completion hook whether this call happened on a pool thread (true)
    /// or inline on the releasing thread (false), so it can avoid
    /// re-entrant dispatch.
    pub fn run(&self, in_worker_thread: bool) -> RenderStatus {
        let Some(execution) = self.execution.upgrade() else {
            // The execution (and with it the tree render) is gone; nothing
            // to report to and nothing useful to compute.
            return RenderStatus::Aborted;
        };

        let outcome = if self.request.status().is_terminal() {
            // Fast path: already resolved (e.g. a cache hit surfaced by a
            // sibling execution). No pixels to produce.
            match self.request.status() {
                RequestStatus::Rendered => RenderStatus::Ok,
                RequestStatus::Aborted => RenderStatus::Aborted,
                RequestStatus::Failed | RequestStatus::NotRendered => RenderStatus::Failed,
            }
        } else {
            let execution_status = execution.status();
            if execution_status.is_failure() {
                trace!(key = ?self.key, "execution already failed, skipping launch_node_render");
                execution_status
            } else {
                match execution.tree_render().upgrade() {
                    Some(tree_render) => match tree_render.resolve_effect(&self.key.effect_clone) {
                        Some(effect) => effect.launch_node_render(&execution, &self.key),
                        None => RenderStatus::Failed,
                    },
                    None => RenderStatus::Aborted,
                }
            }
        };

        execution.task_finished(&self.key, outcome, in_worker_thread);
        outcome
    }
}
