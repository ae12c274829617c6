pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;

pub use config::Settings;
pub use error::{EnhancementError, ErrorKind, StartupError};
pub use pipeline::{
    create_enhancement_service, CallerIdentity, EnhanceRequest, EnhancedImage,
    EnhancementBoxService, EnhancementPipeline, EnhancementRuntime, UploadedImage,
};
