//! The Tree Render: the outer handle for one user-visible render request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::args::{CtorArgs, RenderFlags, StatsSink};
use crate::clone_registry::RenderCloneRegistry;
use crate::context::{fetch_contexts, ContextSlot};
use crate::effect::Effect;
use crate::error::InitError;
use crate::execution::ExecutionData;
use crate::ids::{EffectId, ExecutionId, TreeRenderId};
use crate::queue::QueueManager;
use crate::request::{CanonicalRoI, EffectCloneId, FrameViewRequest, Plane, Time, ViewIndex};
use crate::settings::Settings;
use crate::status::RenderStatus;

/// The default timeout used to wait for worker threads to drain during
/// teardown. Governs reporting, not forced termination: threads that
/// overshoot are logged and counted as leaked, never interrupted.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_millis(5000);

/// Result of [`TreeRender::await_teardown`]: which executions still had
/// live runnables when the timeout elapsed.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub leaked: Vec<ExecutionId>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty()
    }
}

/// The extra-results map and the active-stroke update rectangle share one
/// lock: both answer the same "what has this tree render produced beyond
/// its main output" question and are guarded together rather than split
/// across two separate mutexes.
struct ExtraResultsState {
    results: IndexMap<EffectId, Option<Arc<FrameViewRequest>>>,
    active_stroke_update_rect: Option<CanonicalRoI>,
}

/// The outer handle for one user-visible render request.
///
/// Constructed in two phases: allocation and `init` are fused into
/// [`TreeRender::create`], which is the only sanctioned constructor and
/// never hands back a half-initialized instance — failure returns `Err`
/// directly, so there's nothing left to short-circuit on later.
pub struct TreeRender {
    id: TreeRenderId,
    args: CtorArgs,
    root: Arc<dyn Effect>,
    gpu_context: Mutex<ContextSlot>,
    cpu_context: Mutex<ContextSlot>,
    aborted: AtomicBool,
    clones: Mutex<RenderCloneRegistry>,
    status: Mutex<RenderStatus>,
    output_request: Mutex<Option<Arc<FrameViewRequest>>>,
    extra_requested_results: Mutex<ExtraResultsState>,
    main_execution: Mutex<Option<Arc<ExecutionData>>>,
    sub_executions: Mutex<Vec<Arc<ExecutionData>>>,
}

impl std::fmt::Debug for TreeRender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeRender")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("aborted", &self.is_render_aborted())
            .finish()
    }
}

impl TreeRender {
    /// Allocates and initializes a tree render. Rewrites a group-input root
    /// to its bound real input before returning; a root that is itself a
    /// render clone is rejected.
    pub fn create(args: CtorArgs) -> Result<Arc<TreeRender>, InitError> {
        if args.root.is_render_clone() {
            return Err(InitError::RootIsRenderClone);
        }

        let root = if args.root.is_group_input() {
            args.root.group_input_source().ok_or(InitError::MissingGroupInput)?
        } else {
            args.root.clone()
        };

        let (gpu_context, cpu_context) = fetch_contexts(args.context_pool.as_ref(), args.active_drawable_item.as_deref());

        let mut extra_results = IndexMap::new();
        for node in &args.extra_nodes {
            extra_results.insert(node.node_id(), None);
        }

        let tree_render = Arc::new(TreeRender {
            id: TreeRenderId::default(),
            args,
            root,
            gpu_context: Mutex::new(gpu_context),
            cpu_context: Mutex::new(cpu_context),
            aborted: AtomicBool::new(false),
            clones: Mutex::new(RenderCloneRegistry::new()),
            status: Mutex::new(RenderStatus::Ok),
            output_request: Mutex::new(None),
            extra_requested_results: Mutex::new(ExtraResultsState {
                results: extra_results,
                active_stroke_update_rect: None,
            }),
            main_execution: Mutex::new(None),
            sub_executions: Mutex::new(Vec::new()),
        });

        debug!(tree_render = ?tree_render.id, "tree render created");
        Ok(tree_render)
    }

    pub fn id(&self) -> TreeRenderId {
        self.id
    }

    pub fn time(&self) -> Time {
        self.args.time
    }

    pub fn view(&self) -> ViewIndex {
        self.args.view
    }

    pub fn proxy_scale(&self) -> f64 {
        self.args.proxy_scale
    }

    pub fn mipmap_level(&self) -> u32 {
        self.args.mipmap_level
    }

    pub fn flags(&self) -> RenderFlags {
        self.args.flags
    }

    pub fn canonical_roi(&self) -> Option<CanonicalRoI> {
        self.args.canonical_roi
    }

    pub fn plane(&self) -> Option<Plane> {
        self.args.plane.clone()
    }

    pub fn stats(&self) -> Option<Arc<dyn StatsSink>> {
        self.args.stats.clone()
    }

    pub fn settings(&self) -> Option<Arc<dyn Settings>> {
        self.args.settings.clone()
    }

    pub fn queue_manager(&self) -> Arc<dyn QueueManager> {
        self.args.queue_manager.clone()
    }

    pub fn gpu_context(&self) -> ContextSlot {
        self.gpu_context.lock().unwrap().clone()
    }

    pub fn cpu_context(&self) -> ContextSlot {
        self.cpu_context.lock().unwrap().clone()
    }

    /// The aggregate status mirrored up from every execution this tree
    /// render has run. Sticky: the first failure observed wins.
    pub fn status(&self) -> RenderStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_render_aborted(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        warn!(tree_render = ?self.id, "render aborted");
    }

    pub fn is_render_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn get_or_create_render_clone(&self, original: Arc<dyn Effect>, key: EffectCloneId) -> Arc<dyn Effect> {
        self.clones.lock().unwrap().create_render_clone(original, key)
    }

    /// Looks up a previously registered render clone by its key. Used by
    /// [`crate::runnable::Runnable::run`] to turn a request's effect-clone
    /// identity back into a callable effect.
    pub fn resolve_effect(&self, clone_id: &EffectCloneId) -> Option<Arc<dyn Effect>> {
        self.clones.lock().unwrap().get(clone_id)
    }

    pub fn cleanup_render_clones(&self) {
        self.clones.lock().unwrap().cleanup(self.id);
    }

    /// Plans the root request into a fresh main execution. Exactly one per
    /// tree render: a second call is rejected rather than silently
    /// re-planning.
    pub fn create_main_execution_data(self: &Arc<Self>) -> Result<Arc<ExecutionData>, InitError> {
        if self.main_execution.lock().unwrap().is_some() {
            return Err(InitError::MainExecutionAlreadyCreated);
        }
        if self.status().is_failure() {
            return Err(InitError::TreeRenderFailed);
        }

        let execution = self.plan_execution(true, self.root.clone(), self.args.time, self.args.view, self.args.proxy_scale, self.args.mipmap_level, self.args.plane.clone(), self.args.canonical_roi)?;

        *self.main_execution.lock().unwrap() = Some(execution.clone());
        debug!(tree_render = ?self.id, execution = ?execution.id(), "main execution planned");
        Ok(execution)
    }

    /// Plans an auxiliary request sharing this tree render's identity and
    /// clones. Clones are never cleaned up per sub-execution; only the
    /// tree render's own [`TreeRender::cleanup_render_clones`] removes them.
    pub fn create_sub_execution_data(
        self: &Arc<Self>,
        root_override: Option<Arc<dyn Effect>>,
        time: Time,
        view: ViewIndex,
        proxy_scale: f64,
        mipmap_level: u32,
        plane: Option<Plane>,
        roi: Option<CanonicalRoI>,
    ) -> Result<Arc<ExecutionData>, InitError> {
        if self.status().is_failure() {
            return Err(InitError::TreeRenderFailed);
        }
        let root = root_override.unwrap_or_else(|| self.root.clone());
        let execution = self.plan_execution(false, root, time, view, proxy_scale, mipmap_level, plane, roi)?;
        self.sub_executions.lock().unwrap().push(execution.clone());
        Ok(execution)
    }

    fn plan_execution(
        self: &Arc<Self>,
        is_main: bool,
        root: Arc<dyn Effect>,
        time: Time,
        view: ViewIndex,
        proxy_scale: f64,
        mipmap_level: u32,
        plane: Option<Plane>,
        roi: Option<CanonicalRoI>,
    ) -> Result<Arc<ExecutionData>, InitError> {
        let clone_id = EffectCloneId {
            node: root.node_id(),
            time,
            view,
            tree_render: self.id,
        };
        let root_clone = self.get_or_create_render_clone(root, clone_id);

        let plane = plane.unwrap_or_else(|| root_clone.produced_plane(time, view));
        let roi = roi.unwrap_or_else(|| root_clone.region_of_definition(time, view));

        let execution = ExecutionData::new(is_main, Arc::downgrade(self), self.args.queue_manager.clone(), roi, plane.clone());

        let key = root_clone
            .request_render(self, &execution, time, view, proxy_scale, mipmap_level, &plane, &roi)
            .map_err(InitError::Planning)?;
        execution.set_output_request(key);

        if !execution.has_ready_tasks() {
            return Err(InitError::EmptyReadySet);
        }

        if self.args.active_drawable_item.is_some() {
            self.record_active_stroke_update_rect(roi);
        }

        Ok(execution)
    }

    /// Folds `rect` into the running active-stroke update rectangle, the
    /// union of every region planned while a drawable item is attached.
    fn record_active_stroke_update_rect(&self, rect: CanonicalRoI) {
        let mut extras = self.extra_requested_results.lock().unwrap();
        extras.active_stroke_update_rect = Some(match extras.active_stroke_update_rect {
            Some(existing) => existing.union(&rect),
            None => rect,
        });
    }

    /// The union of every region touched while the active paint stroke's
    /// executions were planned, or `None` if no stroke is attached or
    /// nothing has been planned yet.
    pub fn active_stroke_update_rect(&self) -> Option<CanonicalRoI> {
        self.extra_requested_results.lock().unwrap().active_stroke_update_rect
    }

    /// Returns one sub-execution per extra-requested node whose result
    /// wasn't already filled opportunistically during the main execution's
    /// planning/run pass.
    pub fn get_extra_requested_results_execution_data(self: &Arc<Self>) -> Result<Vec<Arc<ExecutionData>>, InitError> {
        let pending: Vec<Arc<dyn Effect>> = {
            let extras = self.extra_requested_results.lock().unwrap();
            self.args
                .extra_nodes
                .iter()
                .filter(|node| !matches!(extras.results.get(&node.node_id()), Some(Some(_))))
                .cloned()
                .collect()
        };

        let mut executions = Vec::with_capacity(pending.len());
        for node in pending {
            let execution = self.create_sub_execution_data(
                Some(node),
                self.args.time,
                self.args.view,
                self.args.proxy_scale,
                self.args.mipmap_level,
                None,
                None,
            )?;
            executions.push(execution);
        }
        Ok(executions)
    }

    /// Funnels a finished request's result into the tree render: sticky
    /// failure aggregation, then routing into `outputRequest` if the
    /// request's effect is the root, or into the matching extra-results
    /// slot otherwise. Extra-results slots are written at most once.
    pub fn set_results(&self, fvr: &Arc<FrameViewRequest>, status: RenderStatus) {
        fvr.set_status(status.into());

        if status.is_failure() {
            let mut current = self.status.lock().unwrap();
            if !current.is_failure() {
                *current = status;
            }
        }

        let node = fvr.key().effect_clone.node;
        if node == self.root.node_id() {
            let mut output = self.output_request.lock().unwrap();
            if output.is_none() {
                *output = Some(fvr.clone());
            }
        } else {
            let mut extras = self.extra_requested_results.lock().unwrap();
            if let Some(slot) = extras.results.get_mut(&node) {
                if slot.is_none() {
                    *slot = Some(fvr.clone());
                }
            }
        }

        trace!(tree_render = ?self.id, key = ?fvr.key(), ?status, "result recorded");
    }

    pub fn output_request(&self) -> Option<Arc<FrameViewRequest>> {
        self.output_request.lock().unwrap().clone()
    }

    pub fn extra_requested_result(&self, node: EffectId) -> Option<Arc<FrameViewRequest>> {
        self.extra_requested_results.lock().unwrap().results.get(&node).cloned().flatten()
    }

    /// Polls every owned execution for live runnables until none remain or
    /// `timeout` elapses. Does not preempt anything still running; threads
    /// that overshoot are reported as leaked, not interrupted.
    pub fn await_teardown(&self, timeout: Duration) -> TeardownReport {
        let deadline = Instant::now() + timeout;
        loop {
            let leaked = self.live_runnable_executions();
            if leaked.is_empty() || Instant::now() >= deadline {
                if !leaked.is_empty() {
                    warn!(tree_render = ?self.id, count = leaked.len(), "teardown timeout: runnables still live");
                }
                return TeardownReport { leaked };
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn live_runnable_executions(&self) -> Vec<ExecutionId> {
        let mut leaked = Vec::new();
        if let Some(main) = self.main_execution.lock().unwrap().as_ref() {
            if main.has_live_runnables() {
                leaked.push(main.id());
            }
        }
        for sub in self.sub_executions.lock().unwrap().iter() {
            if sub.has_live_runnables() {
                leaked.push(sub.id());
            }
        }
        leaked
    }
}
