//! Per-frame tracking: frames, results, the marker registry, smoothing and
//! the pipeline that ties them to a backend.

pub mod frame;
pub mod pipeline;
pub mod registry;
pub mod result;
pub mod smoother;

pub use pipeline::{FailurePolicy, FrameProcessingPipeline, PipelineConfig, PipelineStats, PoseSink};
pub use registry::{MarkerRegistry, RegisteredMarker};
pub use result::{TrackingMetrics, TrackingResult};
pub use smoother::{Smoother, SmootherConfig, SmootherState};
