//! Chartstream - Real-Time Chart Data Pipeline
//!
//! Ingestion, buffering, routing and view synchronization for multi-pane
//! time-series chart views. The pipeline sits between high-frequency data
//! producers and a rendering surface:
//! - samples are absorbed by a bounded ingestion buffer and routed in
//!   cooperative chunks so producers never block on rendering
//! - series buffers are owned here and survive pane teardown; display
//!   bindings are recreated and replayed when layout changes settle
//! - all detail viewports share one visible time window, synchronized with
//!   a summary viewport without update feedback loops
//!
//! The rendering backend is abstracted behind [`RenderingSurface`];
//! [`RecordingSurface`] is an in-memory implementation used by the replay
//! harness and the test suite.

pub mod clock;
pub mod config;
pub mod error;
pub mod ingest;
pub mod layout;
pub mod marker;
pub mod pipeline;
pub mod processor;
pub mod registry;
pub mod sample;
pub mod series;
pub mod stage;
pub mod surface;
pub mod view;

// Re-export commonly used types for convenience
pub use clock::{DataClock, Stats};
pub use config::Config;
pub use error::{PipelineError, SurfaceError};
pub use layout::{Layout, LayoutEvent, PaneId};
pub use pipeline::{ChartPipeline, FeedHandle};
pub use processor::TickOutcome;
pub use sample::{Batch, FieldValue, Payload, Sample, SeriesId, SeriesKind};
pub use stage::FeedStage;
pub use surface::{
    RecordingSurface, RenderingSurface, SeriesHandle, SuspendGuard, ViewportId,
};
pub use view::{ViewMode, VisibleWindow};
