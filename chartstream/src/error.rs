use crate::surface::{SeriesHandle, ViewportId};
use thiserror::Error;

/// Errors raised by a [`RenderingSurface`](crate::surface::RenderingSurface)
/// implementation.
///
/// The pipeline absorbs all of these: a failed append or window update is
/// logged and skipped without aborting the enclosing chunk or its
/// suspend/resume bracket.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SurfaceError {
    #[error("series handle {0} is unknown or destroyed")]
    UnknownHandle(SeriesHandle),

    #[error("viewport {0} does not exist on the surface")]
    UnknownViewport(ViewportId),

    #[error("batch shape does not match the kind of series handle {0}")]
    KindMismatch(SeriesHandle),

    #[error("surface backend failure: {0}")]
    Backend(String),
}

/// Errors surfaced to the embedding host.
///
/// Only construction-time problems propagate; once running, every failure
/// category is absorbed locally and reflected in the
/// [`Stats`](crate::clock::Stats) counters instead.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_error_display() {
        let error = SurfaceError::UnknownHandle(SeriesHandle(7));
        assert!(error.to_string().contains('7'));
    }
}
