//! Execution Data: one scheduling frontier.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace, warn};

use crate::ids::ExecutionId;
use crate::queue::QueueManager;
use crate::request::{CanonicalRoI, FrameViewRequest, Plane, ProducedImage, RequestKey, RequestStatus};
use crate::runnable::Runnable;
use crate::status::RenderStatus;
use crate::tree_render::TreeRender;

/// Per-request scheduling bookkeeping, private to one execution. Holding
/// this out of [`FrameViewRequest`] is what lets the same request
/// participate in several executions with independent dependency sets.
struct TaskNode {
    fvr: Arc<FrameViewRequest>,
    deps: IndexSet<RequestKey>,
    listeners: IndexSet<RequestKey>,
    remaining: usize,
    cached_inputs: Vec<Arc<ProducedImage>>,
    seq: u64,
    /// Set while a [`ReadyEntry`] for this node sits in `ready`. Without
    /// this, a node whose listener count changes between two promotion
    /// attempts (e.g. a diamond's shared dependency, promoted once via each
    /// parent) could be inserted twice: `ReadyEntry`'s `Ord` factors in
    /// `listener_count`, so the two attempts sort as distinct elements even
    /// though they're the same key.
    in_ready: bool,
}

/// An entry in the ready set. Ordered by descending listener count (frees
/// more downstream work sooner) with insertion order as a stable tie-break
/// rather than pointer identity, which isn't deterministic across runs.
#[derive(Clone)]
struct ReadyEntry {
    key: RequestKey,
    listener_count: usize,
    seq: u64,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (Reverse(self.listener_count), self.seq).cmp(&(Reverse(other.listener_count), other.seq))
    }
}

struct ExecutionInner {
    nodes: IndexMap<RequestKey, TaskNode>,
    ready: BTreeSet<ReadyEntry>,
    status: RenderStatus,
    live_runnables: IndexMap<RequestKey, Arc<Runnable>>,
    next_seq: u64,
}

/// One scheduling frontier: the full task set, the ready set, aggregate
/// status, the output request, and live worker handles.
///
/// The task set, ready set, status, and live runnables are guarded as one
/// unit — that's `inner` here — so a task can never be observed ready and
/// failed at the same time.
pub struct ExecutionData {
    id: ExecutionId,
    is_main: bool,
    tree_render: Weak<TreeRender>,
    queue_manager: Arc<dyn QueueManager>,
    /// The root request this execution was planned to satisfy. Unknown at
    /// construction time — the root effect's `request_render` call needs a
    /// live `Arc<ExecutionData>` to wire dependencies into before it can
    /// report back its own key — so this is filled in once planning
    /// completes via [`Self::set_output_request`].
    output_request: Mutex<Option<RequestKey>>,
    canonical_roi: CanonicalRoI,
    plane: Plane,
    inner: Mutex<ExecutionInner>,
}

impl ExecutionData {
    pub(crate) fn new(
        is_main: bool,
        tree_render: Weak<TreeRender>,
        queue_manager: Arc<dyn QueueManager>,
        canonical_roi: CanonicalRoI,
        plane: Plane,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ExecutionId::next(),
            is_main,
            tree_render,
            queue_manager,
            output_request: Mutex::new(None),
            canonical_roi,
            plane,
            inner: Mutex::new(ExecutionInner {
                nodes: IndexMap::new(),
                ready: BTreeSet::new(),
                status: RenderStatus::Ok,
                live_runnables: IndexMap::new(),
                next_seq: 0,
            }),
        })
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn is_main_execution(&self) -> bool {
        self.is_main
    }

    pub fn output_request(&self) -> Option<RequestKey> {
        self.output_request.lock().unwrap().clone()
    }

    pub(crate) fn set_output_request(&self, key: RequestKey) {
        *self.output_request.lock().unwrap() = Some(key);
    }

    /// `true` once planning has produced at least one dependency-free
    /// request. An execution with none is a planning failure.
    pub fn has_ready_tasks(&self) -> bool {
        !self.inner.lock().unwrap().ready.is_empty()
    }

    pub fn canonical_roi(&self) -> &CanonicalRoI {
        &self.canonical_roi
    }

    pub fn plane(&self) -> &Plane {
        &self.plane
    }

    pub fn tree_render(&self) -> Weak<TreeRender> {
        self.tree_render.clone()
    }

    pub fn status(&self) -> RenderStatus {
        self.inner.lock().unwrap().status
    }

    pub fn has_tasks_to_execute(&self) -> bool {
        !self.inner.lock().unwrap().nodes.is_empty()
    }

    pub fn has_live_runnables(&self) -> bool {
        !self.inner.lock().unwrap().live_runnables.is_empty()
    }

    fn ensure_node<'a>(inner: &'a mut ExecutionInner, fvr: &Arc<FrameViewRequest>) -> &'a mut TaskNode {
        let key = fvr.key().clone();
        if !inner.nodes.contains_key(&key) {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.nodes.insert(
                key.clone(),
                TaskNode {
                    fvr: fvr.clone(),
                    deps: IndexSet::new(),
                    listeners: IndexSet::new(),
                    remaining: 0,
                    cached_inputs: Vec::new(),
                    seq,
                    in_ready: false,
                },
            );
        }
        inner.nodes.get_mut(&key).unwrap()
    }

    /// Wires `of` as depending on `on` within this execution. Must be
    /// called before `on`'s listener set is read
    /// for ready-set ordering, i.e. during planning, before either side has
    /// been submitted for execution.
    pub fn add_dependency(&self, of: &Arc<FrameViewRequest>, on: &Arc<FrameViewRequest>) {
        let mut inner = self.inner.lock().unwrap();
        {
            let of_node = Self::ensure_node(&mut inner, of);
            if of_node.deps.insert(on.key().clone()) {
                of_node.remaining += 1;
            }
        }
        let on_node = Self::ensure_node(&mut inner, on);
        on_node.listeners.insert(of.key().clone());
    }

    /// Decrements `of`'s remaining-dependency count because `other`, one of
    /// its dependencies, has just rendered. Promotes `of` into the ready set
    /// if this was its last pending dependency and the execution hasn't
    /// already failed. Returns the new remaining count.
    pub fn mark_dependency_as_rendered(&self, of: &RequestKey, other: &RequestKey) -> usize {
        let _ = other;
        let mut inner = self.inner.lock().unwrap();
        Self::decrement_and_maybe_promote(&mut inner, of)
    }

    /// Shared by [`Self::mark_dependency_as_rendered`] and
    /// [`Self::task_finished`]'s listener sweep so there is exactly one
    /// place that decides whether a dependency count reaching zero actually
    /// promotes a node to ready.
    fn decrement_and_maybe_promote(inner: &mut ExecutionInner, of: &RequestKey) -> usize {
        let status_is_failure = inner.status.is_failure();
        let promotion = {
            let Some(node) = inner.nodes.get_mut(of) else {
                return 0;
            };
            if node.remaining > 0 {
                node.remaining -= 1;
            }
            let remaining = node.remaining;
            let should_promote = remaining == 0 && !status_is_failure && !node.in_ready && node.fvr.status() == RequestStatus::NotRendered;
            if should_promote {
                node.in_ready = true;
            }
            let entry = should_promote.then(|| ReadyEntry {
                key: of.clone(),
                listener_count: node.listeners.len(),
                seq: node.seq,
            });
            (remaining, entry)
        };
        if let Some(entry) = promotion.1 {
            debug!(key = ?of, "dependency satisfied, listener promoted to ready");
            inner.ready.insert(entry);
        }
        promotion.0
    }

    pub fn get_listeners(&self, of: &RequestKey) -> Vec<RequestKey> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .get(of)
            .map(|n| n.listeners.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_num_dependencies(&self, of: &RequestKey) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.nodes.get(of).map(|n| n.deps.len()).unwrap_or(0)
    }

    /// Inserts `fvr` into the task set; if it has no pending dependencies it
    /// is also promoted to the ready set. Safe to call concurrently: all
    /// mutation is behind `inner`.
    pub fn add_task_to_render(&self, fvr: Arc<FrameViewRequest>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.status.is_failure() {
            // No new tasks are promoted once an execution has failed, but
            // the task itself is still tracked so in-flight listeners can
            // resolve its key without panicking on lookup.
            Self::ensure_node(&mut inner, &fvr);
            return;
        }
        let (key, remaining, listener_count, seq, status_not_rendered, already_ready) = {
            let node = Self::ensure_node(&mut inner, &fvr);
            (
                fvr.key().clone(),
                node.remaining,
                node.listeners.len(),
                node.seq,
                fvr.status() == RequestStatus::NotRendered,
                node.in_ready,
            )
        };
        if remaining == 0 && status_not_rendered && !already_ready {
            Self::ensure_node(&mut inner, &fvr).in_ready = true;
            inner.ready.insert(ReadyEntry {
                key: key.clone(),
                listener_count,
                seq,
            });
            trace!(?key, "task promoted to ready set");
        }
    }

    /// Releases up to `n` ready tasks into the worker pool (`None` = all).
    /// Returns the number of tasks released. The fast path short-circuits
    /// requests that have nothing left to compute.
    pub fn execute_available_tasks(self: &Arc<Self>, n: Option<usize>) -> usize {
        let mut dispatched = 0;
        loop {
            if let Some(limit) = n {
                if dispatched >= limit {
                    break;
                }
            }
            let entry = {
                let mut inner = self.inner.lock().unwrap();
                inner.ready.pop_first()
            };
            let Some(entry) = entry else { break };
            let Some(fvr) = self.lookup_fvr(&entry.key) else {
                continue;
            };

            let exec_status = self.status();
            let needs_real_work = fvr.status() == RequestStatus::NotRendered && !exec_status.is_failure();

            let runnable = Arc::new(Runnable::new(Arc::downgrade(self), fvr.clone(), entry.key.clone()));

            if cfg!(feature = "inline-only") || !needs_real_work {
                // Fast path: either disable-MT mode, or there are no pixels
                // left to produce for this request.
                runnable.run(false);
            } else {
                self.inner
                    .lock()
                    .unwrap()
                    .live_runnables
                    .insert(entry.key.clone(), runnable.clone());
                self.queue_manager.dispatch(self.clone(), runnable);
            }
            dispatched += 1;
        }
        dispatched
    }

    fn lookup_fvr(&self, key: &RequestKey) -> Option<Arc<FrameViewRequest>> {
        self.inner.lock().unwrap().nodes.get(key).map(|n| n.fvr.clone())
    }

    /// Stashes `image` as a retained input for `of`, to be released when
    /// `of` itself completes.
    pub fn retain_input_result(&self, of: &RequestKey, image: Arc<ProducedImage>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(node) = inner.nodes.get_mut(of) {
            node.cached_inputs.push(image);
        }
    }

    /// Invoked by a [`Runnable`] on completion. Implements the five-step
    /// task-completion protocol: release inputs, apply sticky failure,
    /// retire the node, promote newly-ready listeners, then notify outside
    /// the lock.
    pub(crate) fn task_finished(self: &Arc<Self>, key: &RequestKey, outcome: RenderStatus, in_worker_thread: bool) {
        // Step 1: release retained inputs, unconditionally.
        let removed_fvr = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(node) = inner.nodes.get_mut(key) {
                node.cached_inputs.clear();
            }

            // Step 2: sticky failure, first failure wins.
            if outcome.is_failure() && !inner.status.is_failure() {
                warn!(?key, ?outcome, "execution status promoted to failure");
                inner.status = outcome;
            }

            // Step 3: remove the task from the task set.
            let removed = inner.nodes.shift_remove(key);

            // Step 4: promote listeners whose remaining count reaches zero.
            if !inner.status.is_failure() {
                if let Some(node) = &removed {
                    for listener_key in node.listeners.iter().cloned().collect::<Vec<_>>() {
                        Self::decrement_and_maybe_promote(&mut inner, &listener_key);
                    }
                }
            }

            inner.live_runnables.shift_remove(key);
            removed.map(|n| n.fvr)
        };

        // Step 5: forward to the tree render and notify the queue manager,
        // outside the execution lock.
        if let Some(fvr) = removed_fvr {
            match self.tree_render.upgrade() {
                Some(tree_render) => tree_render.set_results(&fvr, outcome),
                None => fvr.set_status(outcome.into()),
            }
        }
        self.queue_manager.notify_task_in_render_finished(self, in_worker_thread);
    }
}


impl std::fmt::Debug for ExecutionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("ExecutionData")
            .field("id", &self.id)
            .field("is_main", &self.is_main)
            .field("status", &inner.status)
            .field("tasks_remaining", &inner.nodes.len())
            .field("ready", &inner.ready.len())
            .finish()
    }
}
