//! The Render Clone Registry: per-tree-render isolated effect state.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::effect::Effect;
use crate::ids::TreeRenderId;
use crate::request::EffectCloneId;

/// Per-tree-render isolated copies of effect parameter state.
///
/// Creating a render clone is idempotent per key within one tree render;
/// `cleanup` removes every clone registered here by asking each owning
/// effect to drop the clone bound to `tree_render_id`. The registry does
/// not itself own the original `Arc<dyn Effect>` beyond what's needed to
/// issue that `drop_render_clone` call.
#[derive(Default)]
pub struct RenderCloneRegistry {
    clones: IndexMap<EffectCloneId, Arc<dyn Effect>>,
    originals: IndexMap<EffectCloneId, Arc<dyn Effect>>,
    cleaned_up: bool,
}

impl RenderCloneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing clone for `key` if one was already created,
    /// without touching the original effect.
    pub fn get(&self, key: &EffectCloneId) -> Option<Arc<dyn Effect>> {
        self.clones.get(key).cloned()
    }

    /// Creates (or returns the existing) clone of `original` for `key`.
    pub fn create_render_clone(&mut self, original: Arc<dyn Effect>, key: EffectCloneId) -> Arc<dyn Effect> {
        if let Some(existing) = self.clones.get(&key) {
            return existing.clone();
        }
        let clone = original.clone().create_render_clone(key.tree_render);
        self.clones.insert(key, clone.clone());
        self.originals.insert(key, original);
        clone
    }

    pub fn len(&self) -> usize {
        self.clones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clones.is_empty()
    }

    /// Asks every registered original to drop the clone bound to
    /// `tree_render_id`. No-op on a second call; expected to run at most
    /// once per tree render.
    pub fn cleanup(&mut self, tree_render_id: TreeRenderId) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        for original in self.originals.values() {
            original.drop_render_clone(tree_render_id);
        }
        self.clones.clear();
        self.originals.clear();
    }
}
