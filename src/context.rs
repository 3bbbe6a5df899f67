//! External collaborators: the GPU/CPU rendering-context pool and the
//! paint-mode stroke memo.
//!
//! The engine does not manage texture memory or attach contexts to
//! threads; these traits are interfaces only.

use std::sync::{Arc, Weak};

/// A handle to one GPU or CPU rendering context. Opaque to the engine —
/// effects attach to it as needed when their runnable executes.
pub trait RenderContext: Send + Sync {}

/// The external context pool. One pool is shared across all tree renders.
pub trait ContextPool: Send + Sync {
    /// A fresh (or pool-reused) OpenGL context. `reuse_last` requests the
    /// "last-context" variant used in paint mode.
    fn get_or_create_opengl_context(&self, reuse_last: bool) -> Option<Arc<dyn RenderContext>>;

    /// A fresh (or pool-reused) CPU rendering context.
    fn get_or_create_cpu_context(&self, reuse_last: bool) -> Option<Arc<dyn RenderContext>>;
}

/// An active paint stroke. In paint mode, successive strokes reuse the same
/// GPU/CPU context pair via this memo rather than fetching a fresh one each
/// time.
pub trait StrokeItem: Send + Sync {
    fn context_memo(&self) -> Option<(Option<Weak<dyn RenderContext>>, Option<Weak<dyn RenderContext>>)>;
    fn set_context_memo(&self, gpu: Option<Weak<dyn RenderContext>>, cpu: Option<Weak<dyn RenderContext>>);
}

/// `None` means the context was never obtained (e.g. pool exhaustion);
/// `Some` wraps a weak handle that may itself have since expired.
pub type ContextSlot = Option<Weak<dyn RenderContext>>;

fn slot_is_live(slot: &ContextSlot) -> bool {
    slot.as_ref().is_some_and(|weak| weak.upgrade().is_some())
}

/// Fetches the (gpu, cpu) context pair for a tree render's init, applying
/// the paint-mode memo-reuse policy above. Failure to obtain either context
/// is non-fatal here — effects that need it fail individually.
pub fn fetch_contexts(pool: &dyn ContextPool, stroke: Option<&dyn StrokeItem>) -> (ContextSlot, ContextSlot) {
    if let Some(stroke) = stroke {
        if let Some(memo) = stroke.context_memo() {
            if slot_is_live(&memo.0) || slot_is_live(&memo.1) {
                return memo;
            }
        }
        let gpu_weak = pool.get_or_create_opengl_context(true).as_ref().map(Arc::downgrade);
        let cpu_weak = pool.get_or_create_cpu_context(true).as_ref().map(Arc::downgrade);
        stroke.set_context_memo(gpu_weak.clone(), cpu_weak.clone());
        return (gpu_weak, cpu_weak);
    }

    let gpu_weak = pool.get_or_create_opengl_context(false).as_ref().map(Arc::downgrade);
    let cpu_weak = pool.get_or_create_cpu_context(false).as_ref().map(Arc::downgrade);
    (gpu_weak, cpu_weak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeContext;
    impl RenderContext for FakeContext {}

    struct FakePool {
        gpu_calls: Mutex<u32>,
    }
    impl ContextPool for FakePool {
        fn get_or_create_opengl_context(&self, _reuse_last: bool) -> Option<Arc<dyn RenderContext>> {
            *self.gpu_calls.lock().unwrap() += 1;
            Some(Arc::new(FakeContext))
        }
        fn get_or_create_cpu_context(&self, _reuse_last: bool) -> Option<Arc<dyn RenderContext>> {
            Some(Arc::new(FakeContext))
        }
    }

    #[derive(Default)]
    struct FakeStroke {
        memo: Mutex<Option<(ContextSlot, ContextSlot)>>,
    }
    impl StrokeItem for FakeStroke {
        fn context_memo(&self) -> Option<(ContextSlot, ContextSlot)> {
            self.memo.lock().unwrap().clone()
        }
        fn set_context_memo(&self, gpu: ContextSlot, cpu: ContextSlot) {
            *self.memo.lock().unwrap() = Some((gpu, cpu));
        }
    }

    #[test]
    fn fresh_fetch_without_stroke_does_not_touch_memo() {
        let pool = FakePool {
            gpu_calls: Mutex::new(0),
        };
        let (gpu, _cpu) = fetch_contexts(&pool, None);
        assert!(gpu.is_some_and(|w| w.upgrade().is_some()));
        assert_eq!(*pool.gpu_calls.lock().unwrap(), 1);
    }

    #[test]
    fn paint_mode_reuses_memoized_contexts_across_strokes() {
        let pool = FakePool {
            gpu_calls: Mutex::new(0),
        };
        let stroke = FakeStroke::default();
        // First stroke: memo empty, so contexts are fetched and stashed.
        let (gpu1, _) = fetch_contexts(&pool, Some(&stroke));
        assert_eq!(*pool.gpu_calls.lock().unwrap(), 1);
        // Second stroke: memo has live contexts, pool is not asked again.
        let (gpu2, _) = fetch_contexts(&pool, Some(&stroke));
        assert_eq!(*pool.gpu_calls.lock().unwrap(), 1);
        assert!(gpu1.is_some_and(|w| w.upgrade().is_some()) && gpu2.is_some_and(|w| w.upgrade().is_some()));
    }
}
