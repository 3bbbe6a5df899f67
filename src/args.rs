//! Construction arguments for a tree render.

use std::sync::Arc;

use crate::context::{ContextPool, StrokeItem};
use crate::effect::Effect;
use crate::ids::EffectId;
use crate::queue::QueueManager;
use crate::request::{CanonicalRoI, Plane, Time, ViewIndex};
use crate::settings::Settings;

/// A sink for rendering statistics. Opaque to the engine; implemented
/// entirely by the host.
pub trait StatsSink: Send + Sync {
    fn record_task_started(&self, node: EffectId) {
        let _ = node;
    }
    fn record_task_finished(&self, node: EffectId) {
        let _ = node;
    }
}

/// Flags controlling one tree render.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderFlags {
    pub draft: bool,
    pub playback: bool,
    pub bypass_cache: bool,
    pub prevent_concurrent_tree_renders: bool,
}

/// Construction arguments for [`crate::tree_render::TreeRender::create`].
///
/// A plain constructor for the required fields, then `with_*` setters for
/// the optional ones.
pub struct CtorArgs {
    pub(crate) time: Time,
    pub(crate) view: ViewIndex,
    pub(crate) root: Arc<dyn Effect>,
    pub(crate) extra_nodes: Vec<Arc<dyn Effect>>,
    pub(crate) active_drawable_item: Option<Arc<dyn StrokeItem>>,
    pub(crate) stats: Option<Arc<dyn StatsSink>>,
    pub(crate) settings: Option<Arc<dyn Settings>>,
    pub(crate) canonical_roi: Option<CanonicalRoI>,
    pub(crate) plane: Option<Plane>,
    pub(crate) proxy_scale: f64,
    pub(crate) mipmap_level: u32,
    pub(crate) flags: RenderFlags,
    pub(crate) context_pool: Arc<dyn ContextPool>,
    pub(crate) queue_manager: Arc<dyn QueueManager>,
}

impl CtorArgs {
    pub fn new(
        time: Time,
        view: ViewIndex,
        root: Arc<dyn Effect>,
        context_pool: Arc<dyn ContextPool>,
        queue_manager: Arc<dyn QueueManager>,
    ) -> Self {
        Self {
            time,
            view,
            root,
            extra_nodes: Vec::new(),
            active_drawable_item: None,
            stats: None,
            settings: None,
            canonical_roi: None,
            plane: None,
            proxy_scale: 1.0,
            mipmap_level: 0,
            flags: RenderFlags::default(),
            context_pool,
            queue_manager,
        }
    }

    pub fn with_extra_nodes(mut self, nodes: Vec<Arc<dyn Effect>>) -> Self {
        self.extra_nodes = nodes;
        self
    }

    pub fn with_active_drawable_item(mut self, item: Arc<dyn StrokeItem>) -> Self {
        self.active_drawable_item = Some(item);
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn Settings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_canonical_roi(mut self, roi: CanonicalRoI) -> Self {
        self.canonical_roi = Some(roi);
        self
    }

    pub fn with_plane(mut self, plane: Plane) -> Self {
        self.plane = Some(plane);
        self
    }

    pub fn proxy_scale(mut self, scale: f64) -> Self {
        assert!(scale >= 0.0, "proxy scale must be non-negative");
        self.proxy_scale = scale;
        self
    }

    pub fn mipmap_level(mut self, level: u32) -> Self {
        self.mipmap_level = level;
        self
    }

    pub fn draft(mut self, draft: bool) -> Self {
        self.flags.draft = draft;
        self
    }

    pub fn playback(mut self, playback: bool) -> Self {
        self.flags.playback = playback;
        self
    }

    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.flags.bypass_cache = bypass;
        self
    }

    pub fn prevent_concurrent_tree_renders(mut self, prevent: bool) -> Self {
        self.flags.prevent_concurrent_tree_renders = prevent;
        self
    }
}
