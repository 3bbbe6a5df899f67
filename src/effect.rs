//! The `Effect` trait: the engine's contract with the (out-of-scope) image
//! kernels that make up the nodes of the tree.

use std::sync::Arc;

use crate::execution::ExecutionData;
use crate::ids::{EffectId, TreeRenderId};
use crate::request::{CanonicalRoI, Plane, RequestKey, Time, ViewIndex};
use crate::status::RenderStatus;
use crate::tree_render::TreeRender;

/// A node in the host's processing graph.
///
/// Implementations live entirely outside this crate; the engine only calls
/// through this trait during planning and dispatch.
pub trait Effect: Send + Sync {
    /// Stable identity of the underlying node, shared by every render clone.
    fn node_id(&self) -> EffectId;

    /// Recursively plans the work needed to satisfy one request against
    /// this effect, registering FVRs and dependency edges into `execution`
    /// as they're discovered during planning.
    ///
    /// Implementations are expected to call
    /// [`ExecutionData::add_task_to_render`] for every FVR they allocate,
    /// including their own, and to wire up dependencies with
    /// [`ExecutionData::add_dependency`] *before* calling
    /// `add_task_to_render` on the dependent, so the dependent isn't
    /// briefly visible as ready with an undercount.
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
    ) -> Result<RequestKey, String>;

    /// Runs the actual render for one previously-planned request. Expected
    /// to poll `execution.tree_render().is_render_aborted()` at natural
    /// checkpoints so cancellation can take effect promptly.
    fn launch_node_render(&self, execution: &Arc<ExecutionData>, request: &RequestKey) -> RenderStatus;

    /// The effect's natural output region, used when a tree render doesn't
    /// specify one explicitly.
    fn region_of_definition(&self, time: Time, view: ViewIndex) -> CanonicalRoI;

    /// The plane this effect produces by default.
    fn produced_plane(&self, time: Time, view: ViewIndex) -> Plane;

    /// Creates (or returns the existing) per-tree-render clone of this
    /// effect. Idempotent per `tree_render_id`.
    fn create_render_clone(self: Arc<Self>, tree_render_id: TreeRenderId) -> Arc<dyn Effect>;

    /// Drops the clone bound to `tree_render_id`, if any. Called at most
    /// once per tree render by [`crate::tree_render::TreeRender::cleanup_render_clones`].
    fn drop_render_clone(&self, tree_render_id: TreeRenderId) {
        let _ = tree_render_id;
    }

    /// `true` if this effect is a group-input proxy.
    fn is_group_input(&self) -> bool {
        false
    }

    /// For a group-input proxy, the real node in the enclosing group it
    /// stands in for. `None` means the group has no such input bound.
    fn group_input_source(&self) -> Option<Arc<dyn Effect>> {
        None
    }

    /// `true` if `self` is itself a render clone rather than an original
    /// node. A tree render's root effect must not itself be a render clone.
    fn is_render_clone(&self) -> bool {
        false
    }
}
