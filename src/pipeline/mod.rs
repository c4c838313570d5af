// src/pipeline/mod.rs

pub mod event_bus;
pub mod frame_context;
pub mod metrics;

pub use event_bus::{EventBus, PipelineEvent};
pub use frame_context::{FrameContext, VehicleView};
pub use metrics::{MetricsSummary, SessionMetrics};
