//! Error types. Status *codes* are domain data, not Rust errors, and live
//! in [`crate::status`]; this module is for genuine construction failures.

use thiserror::Error;

/// Why [`crate::tree_render::TreeRender::create`] failed.
///
/// A failed tree render is never handed back as a half-built value: `create`
/// returns `Err` directly, and nothing downstream observes a `TreeRender` in
/// a partially-initialized state.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("root effect is a group-input proxy with no bound source")]
    MissingGroupInput,

    #[error("root effect must be an original node, not a render clone")]
    RootIsRenderClone,

    #[error("planning failed: {0}")]
    Planning(String),

    #[error("planning pass produced zero dependency-free tasks")]
    EmptyReadySet,

    #[error("main execution data was already created for this tree render")]
    MainExecutionAlreadyCreated,

    #[error("tree render is in a failed state and cannot perform this operation")]
    TreeRenderFailed,
}
