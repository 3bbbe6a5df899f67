//! The Frame-View Request (FVR): the unit of scheduling work.

use std::sync::Mutex;

use crate::ids::{EffectId, TreeRenderId};

/// A rational time value, e.g. frame 24 at 24fps is `Time::new(24, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    pub num: i64,
    pub den: i64,
}

impl Time {
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "Time denominator must be non-zero");
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

/// Which of the (usually stereo) views to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewIndex(pub u32);

/// An image component layout selected for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Plane {
    Color,
    Alpha,
    Depth,
    MotionForward,
    MotionBackward,
    Custom(std::sync::Arc<str>),
}

/// A rectangle in the effect's canonical coordinate system.
///
/// Equality and hashing compare the raw bit patterns of the four
/// coordinates rather than reducing with an epsilon: canonical RoIs are
/// produced deterministically by upstream `region_of_definition` /
/// `request_render` calls, so two requests for "the same" region are
/// expected to be bit-identical, not merely numerically close.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalRoI {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl CanonicalRoI {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn union(&self, other: &CanonicalRoI) -> CanonicalRoI {
        CanonicalRoI {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }
}

impl PartialEq for CanonicalRoI {
    fn eq(&self, other: &Self) -> bool {
        self.x1.to_bits() == other.x1.to_bits()
            && self.y1.to_bits() == other.y1.to_bits()
            && self.x2.to_bits() == other.x2.to_bits()
            && self.y2.to_bits() == other.y2.to_bits()
    }
}
impl Eq for CanonicalRoI {}

impl std::hash::Hash for CanonicalRoI {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.x1.to_bits().hash(state);
        self.y1.to_bits().hash(state);
        self.x2.to_bits().hash(state);
        self.y2.to_bits().hash(state);
    }
}

/// Identifies one per-tree-render clone of an effect, keyed by `(effect,
/// time, view, tree render)`: the same node may have several live clones
/// in one tree render if it's asked to produce at more than one time/view
/// (e.g. a retiming node feeding two different frames).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectCloneId {
    pub node: EffectId,
    pub time: Time,
    pub view: ViewIndex,
    pub tree_render: TreeRenderId,
}

/// Identity of one Frame-View Request: `(effect-clone, time, view, plane, region)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub effect_clone: EffectCloneId,
    pub time: Time,
    pub view: ViewIndex,
    pub plane: Plane,
    pub roi: CanonicalRoI,
}

/// The lifecycle status of one Frame-View Request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    NotRendered,
    Rendered,
    Failed,
    Aborted,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::NotRendered)
    }
}

/// An opaque rendered image handle. The engine never inspects pixels; it
/// only threads this reference from a producer to its listeners.
pub type ProducedImage = dyn std::any::Any + Send + Sync;

/// One scheduling unit: render `key` to an image.
///
/// Dependency/listener bookkeeping is deliberately *not* stored here: the
/// same request can appear in several executions with different dependency
/// sets, so that bookkeeping lives in the owning
/// [`crate::execution::ExecutionData`], keyed by [`RequestKey`]. Operations
/// below that are per-execution take the execution as a parameter and
/// delegate to it, borrowing its owning execution rather than holding a
/// private copy of the dependency graph.
pub struct FrameViewRequest {
    key: RequestKey,
    status: Mutex<RequestStatus>,
    produced_image: Mutex<Option<std::sync::Arc<ProducedImage>>>,
}

impl std::fmt::Debug for FrameViewRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameViewRequest")
            .field("key", &self.key)
            .field("status", &self.status())
            .finish()
    }
}

impl FrameViewRequest {
    pub fn new(key: RequestKey) -> Self {
        Self {
            key,
            status: Mutex::new(RequestStatus::NotRendered),
            produced_image: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn status(&self) -> RequestStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: RequestStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Makes `image` available to listeners. Stays available until each
    /// listener has completed, enforced by [`crate::execution::ExecutionData`]
    /// dropping its reference once every listener has consumed it.
    pub fn set_produced_image(&self, image: std::sync::Arc<ProducedImage>) {
        *self.produced_image.lock().unwrap() = Some(image);
    }

    pub fn produced_image(&self) -> Option<std::sync::Arc<ProducedImage>> {
        self.produced_image.lock().unwrap().clone()
    }

    /// Records that `self` depends on `other`, delegating to the owning
    /// execution rather than duplicating dependency state locally.
    pub fn add_dependency(self: &std::sync::Arc<Self>, execution: &crate::execution::ExecutionData, other: &std::sync::Arc<Self>) {
        execution.add_dependency(self, other);
    }

    /// Records that `other`, a dependency of `self`, has finished rendering,
    /// promoting `self` to the owning execution's ready set if that was its
    /// last pending dependency.
    pub fn mark_dependency_as_rendered(&self, execution: &crate::execution::ExecutionData, other: &RequestKey) -> usize {
        execution.mark_dependency_as_rendered(&self.key, other)
    }

    /// A stable snapshot of this request's dependents.
    pub fn listeners(&self, execution: &crate::execution::ExecutionData) -> Vec<RequestKey> {
        execution.get_listeners(&self.key)
    }

    /// The number of unresolved dependencies this request still has.
    pub fn num_dependencies(&self, execution: &crate::execution::ExecutionData) -> usize {
        execution.get_num_dependencies(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_equality_is_bitwise() {
        let a = CanonicalRoI::new(0.0, 0.0, 1920.0, 1080.0);
        let b = CanonicalRoI::new(0.0, 0.0, 1920.0, 1080.0);
        assert_eq!(a, b);
        let c = CanonicalRoI::new(0.0, 0.0, 1920.0, 1080.000001);
        assert_ne!(a, c);
    }

    #[test]
    fn fresh_request_is_not_rendered() {
        let key = RequestKey {
            effect_clone: EffectCloneId {
                node: EffectId(1),
                time: Time::new(1, 1),
                view: ViewIndex(0),
                tree_render: TreeRenderId::default(),
            },
            time: Time::new(1, 1),
            view: ViewIndex(0),
            plane: Plane::Color,
            roi: CanonicalRoI::new(0.0, 0.0, 1.0, 1.0),
        };
        let fvr = FrameViewRequest::new(key);
        assert_eq!(fvr.status(), RequestStatus::NotRendered);
        assert!(fvr.produced_image().is_none());
    }
}
