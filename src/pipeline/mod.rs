pub mod orchestration;
pub mod pipeline_factory;
pub mod services;
pub mod types;

pub use orchestration::{EnhancementPipeline, PipelineState, StageTimings};
pub use pipeline_factory::{create_enhancement_service, EnhancementBoxService, EnhancementRuntime};
pub use services::{ArtifactManager, EsrganEngine, ImageCodec, Upscaler};
pub use types::{CallerIdentity, EnhanceRequest, EnhancedImage, PixelTensor, UploadedImage};
