//! Identity types shared across the scheduler: small `Copy` newtypes handed
//! out by an atomic counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one node in the host's effect graph. Assigned by the host
/// application; the engine never constructs one itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(pub u64);

/// Identifies one [`crate::tree_render::TreeRender`] instance.
///
/// A monotonically increasing counter is enough here because tree renders,
/// unlike tracing span ids, are never recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeRenderId(u64);

impl TreeRenderId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TreeRenderId {
    fn default() -> Self {
        Self::next()
    }
}

/// Identifies one [`crate::execution::ExecutionData`] within a tree render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(u64);

impl ExecutionId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}
