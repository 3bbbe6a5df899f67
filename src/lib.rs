//! Concurrency and dependency-scheduling core for a node-based
//! image-compositing tree.
//!
//! Given a directed acyclic graph of image-processing [`effect::Effect`]
//! nodes rooted at an output node, this crate discovers the exact set of
//! per-(effect, time, view, plane, region) work units needed to satisfy a
//! request, tracks their dependency graph, and releases ready work to an
//! external worker pool as dependencies complete — honoring abort signals,
//! sticky failure propagation, and bounded concurrency across concurrent
//! tree renders.
//!
//! The individual effect implementations, the image cache, the GPU context
//! pool, the global worker-pool scheduler, and render policy settings are
//! all external collaborators reached only through the traits in
//! [`effect`], [`context`], [`queue`], and [`settings`]. This crate
//! produces no pixels itself.

pub mod args;
pub mod clone_registry;
pub mod context;
pub mod effect;
pub mod error;
pub mod execution;
pub mod ids;
pub mod queue;
pub mod request;
pub mod runnable;
pub mod settings;
pub mod status;
pub mod tree_render;

pub use args::{CtorArgs, RenderFlags, StatsSink};
pub use clone_registry::RenderCloneRegistry;
pub use context::{ContextPool, ContextSlot, RenderContext, StrokeItem};
pub use effect::Effect;
pub use error::InitError;
pub use execution::ExecutionData;
pub use ids::{EffectId, ExecutionId, TreeRenderId};
pub use queue::{InlineQueueManager, QueueManager, ThreadPoolQueueManager};
pub use request::{CanonicalRoI, EffectCloneId, FrameViewRequest, Plane, ProducedImage, RequestKey, RequestStatus, Time, ViewIndex};
pub use runnable::Runnable;
pub use settings::Settings;
pub use status::RenderStatus;
pub use tree_render::{TeardownReport, TreeRender, DEFAULT_TEARDOWN_TIMEOUT};
