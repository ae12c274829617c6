pub mod artifacts;
pub mod codec;
pub mod enhancement_service;
pub mod inference;

pub use artifacts::{ArtifactHandle, ArtifactManager, ArtifactRole, ArtifactStream};
pub use codec::ImageCodec;
pub use enhancement_service::EnhancementService;
pub use inference::{EsrganEngine, Upscaler};
