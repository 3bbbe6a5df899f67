//! Status codes threaded through runnables, executions and tree renders.

use crate::request::RequestStatus;

/// The outcome of launching one node's render, or the aggregate outcome of
/// an execution / tree render.
///
/// `Custom` passes an effect-specific domain code through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Ok,
    Failed,
    Aborted,
    Custom(u32),
}

impl RenderStatus {
    /// The sticky-failure predicate: any non-`Ok` code, including
    /// `Aborted`, counts as a failure for the purposes of
    /// execution/tree-render stickiness.
    pub fn is_failure(&self) -> bool {
        !matches!(self, RenderStatus::Ok)
    }
}

impl From<RenderStatus> for RequestStatus {
    fn from(status: RenderStatus) -> Self {
        match status {
            RenderStatus::Ok => RequestStatus::Rendered,
            RenderStatus::Aborted => RequestStatus::Aborted,
            RenderStatus::Failed | RenderStatus::Custom(_) => RequestStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_a_failure() {
        assert!(RenderStatus::Aborted.is_failure());
        assert!(RenderStatus::Failed.is_failure());
        assert!(RenderStatus::Custom(7).is_failure());
        assert!(!RenderStatus::Ok.is_failure());
    }

    #[test]
    fn status_conversion_matches_domain_mapping() {
        let rendered: RequestStatus = RenderStatus::Ok.into();
        let aborted: RequestStatus = RenderStatus::Aborted.into();
        let failed: RequestStatus = RenderStatus::Failed.into();
        assert_eq!(rendered, RequestStatus::Rendered);
        assert_eq!(aborted, RequestStatus::Aborted);
        assert_eq!(failed, RequestStatus::Failed);
    }
}
