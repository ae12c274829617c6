mod enhancement_pipeline;
mod instrumented_service;
mod pipeline_state;

pub use enhancement_pipeline::EnhancementPipeline;
pub use instrumented_service::{InstrumentedLayer, InstrumentedService};
pub use pipeline_state::{PipelineRun, PipelineState, StageTimings};
