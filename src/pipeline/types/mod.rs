mod enhance_request;
mod enhanced_image;
mod pixel_tensor;
mod uploaded_image;

pub use enhance_request::{CallerIdentity, EnhanceRequest};
pub use enhanced_image::EnhancedImage;
pub use pixel_tensor::PixelTensor;
pub use uploaded_image::UploadedImage;
