//! End-to-end scheduling scenarios driven entirely through the public API:
//! a linear chain, a diamond (with and without a failing shared
//! dependency), abort mid-flight, group-input redirection, and the
//! extra-requested-results opportunistic fill.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tree_render_engine::{
    CanonicalRoI, ContextPool, CtorArgs, Effect, ExecutionData, FrameViewRequest, InlineQueueManager, Plane,
    QueueManager, RenderContext, RenderStatus, RequestKey, RequestStatus, ThreadPoolQueueManager, Time, TreeRender,
    TreeRenderId, ViewIndex,
};
use tree_render_engine::{EffectCloneId, EffectId};

struct NoopPool;
impl ContextPool for NoopPool {
    fn get_or_create_opengl_context(&self, _reuse_last: bool) -> Option<Arc<dyn RenderContext>> {
        None
    }
    fn get_or_create_cpu_context(&self, _reuse_last: bool) -> Option<Arc<dyn RenderContext>> {
        None
    }
}

fn args_with_root(root: Arc<dyn Effect>, queue_manager: Arc<dyn QueueManager>) -> CtorArgs {
    CtorArgs::new(Time::new(1, 1), ViewIndex(0), root, Arc::new(NoopPool), queue_manager)
}

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) {
    let start = Instant::now();
    while !predicate() {
        assert!(start.elapsed() < timeout, "condition not met within timeout");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// A node with a fixed, test-declared dependency set. `request_render`
/// recursively plans each dependency before wiring itself up, matching the
/// ordering every real effect is expected to follow.
struct GraphEffect {
    id: EffectId,
    deps: Vec<Arc<GraphEffect>>,
    launches: AtomicU32,
    outcome: Mutex<RenderStatus>,
    block_until_abort: bool,
}

impl GraphEffect {
    fn leaf(id: u64) -> Arc<Self> {
        Self::new(id, Vec::new(), false)
    }

    fn blocking_leaf(id: u64) -> Arc<Self> {
        Self::new(id, Vec::new(), true)
    }

    fn with_deps(id: u64, deps: Vec<Arc<GraphEffect>>) -> Arc<Self> {
        Self::new(id, deps, false)
    }

    fn new(id: u64, deps: Vec<Arc<GraphEffect>>, block_until_abort: bool) -> Arc<Self> {
        Arc::new(Self {
            id: EffectId(id),
            deps,
            launches: AtomicU32::new(0),
            outcome: Mutex::new(RenderStatus::Ok),
            block_until_abort,
        })
    }

    fn launch_count(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    fn fail(&self) {
        *self.outcome.lock().unwrap() = RenderStatus::Failed;
    }

    fn key_for(&self, tree_render: &Arc<TreeRender>, time: Time, view: ViewIndex, plane: &Plane, roi: &CanonicalRoI) -> RequestKey {
        RequestKey {
            effect_clone: EffectCloneId {
                node: self.id,
                time,
                view,
                tree_render: tree_render.id(),
            },
            time,
            view,
            plane: plane.clone(),
            roi: *roi,
        }
    }
}

impl Effect for GraphEffect {
    fn node_id(&self) -> EffectId {
        self.id
    }

    fn request_render(
        &self,
        tree_render: &Arc<TreeRender>,
        execution: &Arc<ExecutionData>,
        time: Time,
        view: ViewIndex,
        proxy_scale: f64,
        mipmap_level: u32,
        plane: &Plane,
        roi: &CanonicalRoI,
    ) -> Result<RequestKey, String> {
        let key = self.key_for(tree_render, time, view, plane, roi);
        let fvr = Arc::new(FrameViewRequest::new(key.clone()));

        for dep in &self.deps {
            let dep_key = dep.request_render(tree_render, execution, time, view, proxy_scale, mipmap_level, plane, roi)?;
            let dep_fvr = Arc::new(FrameViewRequest::new(dep_key));
            execution.add_dependency(&fvr, &dep_fvr);
        }

        execution.add_task_to_render(fvr);
        Ok(key)
    }

    fn launch_node_render(&self, execution: &Arc<ExecutionData>, _request: &RequestKey) -> RenderStatus {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.block_until_abort {
            loop {
                if let Some(tree_render) = execution.tree_render().upgrade() {
                    if tree_render.is_render_aborted() {
                        return RenderStatus::Aborted;
                    }
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        *self.outcome.lock().unwrap()
    }

    fn region_of_definition(&self, _time: Time, _view: ViewIndex) -> CanonicalRoI {
        CanonicalRoI::new(0.0, 0.0, 1.0, 1.0)
    }

    fn produced_plane(&self, _time: Time, _view: ViewIndex) -> Plane {
        Plane::Color
    }

    fn create_render_clone(self: Arc<Self>, _tree_render_id: TreeRenderId) -> Arc<dyn Effect> {
        self
    }
}

/// A group-input proxy standing in for a real node in an enclosing group.
struct GroupInputEffect {
    id: EffectId,
    source: Arc<dyn Effect>,
}

impl Effect for GroupInputEffect {
    fn node_id(&self) -> EffectId {
        self.id
    }

    fn request_render(
        &self,
        _tree_render: &Arc<TreeRender>,
        _execution: &Arc<ExecutionData>,
        _time: Time,
        _view: ViewIndex,
        _proxy_scale: f64,
        _mipmap_level: u32,
        _plane: &Plane,
        _roi: &CanonicalRoI,
    ) -> Result<RequestKey, String> {
        unreachable!("a group-input root is rewritten to its source before planning starts")
    }

    fn launch_node_render(&self, _execution: &Arc<ExecutionData>, _request: &RequestKey) -> RenderStatus {
        unreachable!("a group-input root is rewritten to its source before planning starts")
    }

    fn region_of_definition(&self, _time: Time, _view: ViewIndex) -> CanonicalRoI {
        CanonicalRoI::new(0.0, 0.0, 1.0, 1.0)
    }

    fn produced_plane(&self, _time: Time, _view: ViewIndex) -> Plane {
        Plane::Color
    }

    fn create_render_clone(self: Arc<Self>, _tree_render_id: TreeRenderId) -> Arc<dyn Effect> {
        self
    }

    fn is_group_input(&self) -> bool {
        true
    }

    fn group_input_source(&self) -> Option<Arc<dyn Effect>> {
        Some(self.source.clone())
    }
}

#[test]
fn linear_chain_executes_in_dependency_order() {
    let b = GraphEffect::leaf(3);
    let a = GraphEffect::with_deps(2, vec![b.clone()]);
    let r = GraphEffect::with_deps(1, vec![a.clone()]);
    let root: Arc<dyn Effect> = r.clone();

    let tree_render = TreeRender::create(args_with_root(root, Arc::new(InlineQueueManager::default()))).unwrap();
    let execution = tree_render.create_main_execution_data().unwrap();
    execution.execute_available_tasks(None);

    assert_eq!(b.launch_count(), 1);
    assert_eq!(a.launch_count(), 1);
    assert_eq!(r.launch_count(), 1);
    assert!(!execution.has_tasks_to_execute());

    let output = tree_render.output_request().unwrap();
    assert_eq!(output.key().effect_clone.node, EffectId(1));
    assert_eq!(output.status(), RequestStatus::Rendered);
    assert_eq!(tree_render.status(), RenderStatus::Ok);
}

#[test]
fn diamond_shares_a_single_runnable_for_the_common_dependency() {
    let b = GraphEffect::leaf(10);
    let a = GraphEffect::with_deps(11, vec![b.clone()]);
    let c = GraphEffect::with_deps(12, vec![b.clone()]);
    let r = GraphEffect::with_deps(13, vec![a.clone(), c.clone()]);
    let root: Arc<dyn Effect> = r.clone();

    let tree_render = TreeRender::create(args_with_root(root, Arc::new(InlineQueueManager::default()))).unwrap();
    let execution = tree_render.create_main_execution_data().unwrap();
    execution.execute_available_tasks(None);

    assert_eq!(b.launch_count(), 1, "B has two listeners but must run exactly once");
    assert_eq!(a.launch_count(), 1);
    assert_eq!(c.launch_count(), 1);
    assert_eq!(r.launch_count(), 1);
    assert_eq!(tree_render.status(), RenderStatus::Ok);
}

#[test]
fn diamond_also_shares_a_single_runnable_under_a_real_worker_pool() {
    // Same shape as above, but with an async dispatcher: each ready task
    // is handed to a worker thread rather than run inline on the releasing
    // thread, which is the path where a stale ready-set entry could have
    // caused a second dispatch for the same key.
    let pool = ThreadPoolQueueManager::new(4);

    let b = GraphEffect::leaf(14);
    let a = GraphEffect::with_deps(15, vec![b.clone()]);
    let c = GraphEffect::with_deps(16, vec![b.clone()]);
    let r = GraphEffect::with_deps(17, vec![a.clone(), c.clone()]);
    let root: Arc<dyn Effect> = r.clone();

    let tree_render = TreeRender::create(args_with_root(root, pool.clone())).unwrap();
    let execution = tree_render.create_main_execution_data().unwrap();
    execution.execute_available_tasks(None);

    wait_until(|| tree_render.output_request().is_some(), Duration::from_secs(2));
    // Give any erroneous second dispatch a chance to land before asserting.
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(b.launch_count(), 1, "B has two listeners but must run exactly once, even dispatched across threads");
    assert_eq!(a.launch_count(), 1);
    assert_eq!(c.launch_count(), 1);
    assert_eq!(r.launch_count(), 1);

    pool.shutdown();
}

#[test]
fn diamond_failure_in_shared_dependency_short_circuits_listeners() {
    let b = GraphEffect::leaf(20);
    b.fail();
    let a = GraphEffect::with_deps(21, vec![b.clone()]);
    let c = GraphEffect::with_deps(22, vec![b.clone()]);
    let r = GraphEffect::with_deps(23, vec![a.clone(), c.clone()]);
    let root: Arc<dyn Effect> = r.clone();

    let tree_render = TreeRender::create(args_with_root(root, Arc::new(InlineQueueManager::default()))).unwrap();
    let execution = tree_render.create_main_execution_data().unwrap();
    execution.execute_available_tasks(None);

    assert_eq!(b.launch_count(), 1);
    assert_eq!(a.launch_count(), 0, "A must never be promoted once B has failed");
    assert_eq!(c.launch_count(), 0, "C must never be promoted once B has failed");
    assert_eq!(r.launch_count(), 0, "R must never execute once a dependency has failed");
    assert_eq!(tree_render.status(), RenderStatus::Failed);
    assert!(tree_render.output_request().is_none());
}

#[test]
fn abort_mid_flight_stops_promotion_without_affecting_other_renders() {
    let pool = ThreadPoolQueueManager::new(4);

    let b = GraphEffect::blocking_leaf(30);
    let a = GraphEffect::with_deps(31, vec![b.clone()]);
    let c = GraphEffect::with_deps(32, vec![b.clone()]);
    let r = GraphEffect::with_deps(33, vec![a.clone(), c.clone()]);
    let root: Arc<dyn Effect> = r.clone();

    let tree_render = TreeRender::create(args_with_root(root, pool.clone())).unwrap();
    let execution = tree_render.create_main_execution_data().unwrap();
    execution.execute_available_tasks(None);

    wait_until(|| b.launch_count() >= 1, Duration::from_secs(2));
    tree_render.set_render_aborted();

    let report = tree_render.await_teardown(Duration::from_secs(2));
    assert!(report.is_clean(), "B must observe the abort flag and return promptly");
    assert_eq!(a.launch_count(), 0, "A must never be promoted after abort");
    assert_eq!(c.launch_count(), 0, "C must never be promoted after abort");
    assert_eq!(r.launch_count(), 0, "R must never execute after abort");
    assert_eq!(tree_render.status(), RenderStatus::Aborted);

    // An unrelated, concurrent tree render sharing the same worker pool
    // still completes normally.
    let other_leaf = GraphEffect::leaf(99);
    let other_root: Arc<dyn Effect> = other_leaf.clone();
    let other_tree_render = TreeRender::create(args_with_root(other_root, pool.clone())).unwrap();
    let other_execution = other_tree_render.create_main_execution_data().unwrap();
    other_execution.execute_available_tasks(None);
    wait_until(|| other_tree_render.output_request().is_some(), Duration::from_secs(2));
    assert_eq!(other_tree_render.status(), RenderStatus::Ok);
    assert_eq!(other_leaf.launch_count(), 1);

    pool.shutdown();
}

#[test]
fn group_input_root_is_rewritten_to_its_bound_source() {
    let real = GraphEffect::leaf(40);
    let group_input: Arc<dyn Effect> = Arc::new(GroupInputEffect {
        id: EffectId(41),
        source: real.clone(),
    });

    let tree_render = TreeRender::create(args_with_root(group_input, Arc::new(InlineQueueManager::default()))).unwrap();
    let execution = tree_render.create_main_execution_data().unwrap();
    execution.execute_available_tasks(None);

    assert_eq!(real.launch_count(), 1);
    let output = tree_render.output_request().unwrap();
    assert_eq!(
        output.key().effect_clone.node,
        EffectId(40),
        "planning must reference the bound source, not the group-input proxy"
    );
}

#[test]
fn extra_requested_result_on_main_path_needs_no_sub_execution() {
    let x = GraphEffect::leaf(50);
    let r = GraphEffect::with_deps(51, vec![x.clone()]);
    let root: Arc<dyn Effect> = r.clone();
    let extra: Arc<dyn Effect> = x.clone();

    let args = args_with_root(root, Arc::new(InlineQueueManager::default())).with_extra_nodes(vec![extra]);
    let tree_render = TreeRender::create(args).unwrap();
    let execution = tree_render.create_main_execution_data().unwrap();
    execution.execute_available_tasks(None);

    assert_eq!(x.launch_count(), 1);
    assert!(tree_render.extra_requested_result(EffectId(50)).is_some());

    let pending = tree_render.get_extra_requested_results_execution_data().unwrap();
    assert!(pending.is_empty(), "X was already computed on the main path");
}

#[test]
fn extra_requested_result_off_main_path_gets_its_own_sub_execution() {
    let y = GraphEffect::leaf(60);
    let r = GraphEffect::leaf(61);
    let root: Arc<dyn Effect> = r.clone();
    let extra: Arc<dyn Effect> = y.clone();

    let args = args_with_root(root, Arc::new(InlineQueueManager::default())).with_extra_nodes(vec![extra]);
    let tree_render = TreeRender::create(args).unwrap();
    let execution = tree_render.create_main_execution_data().unwrap();
    execution.execute_available_tasks(None);

    assert_eq!(y.launch_count(), 0, "Y is unreachable from the main path");
    assert!(tree_render.extra_requested_result(EffectId(60)).is_none());

    let pending = tree_render.get_extra_requested_results_execution_data().unwrap();
    assert_eq!(pending.len(), 1);
    for sub_execution in &pending {
        sub_execution.execute_available_tasks(None);
    }

    assert_eq!(y.launch_count(), 1);
    assert!(tree_render.extra_requested_result(EffectId(60)).is_some());
}
