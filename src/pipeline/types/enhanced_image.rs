use crate::error::EnhancementError;
use crate::pipeline::orchestration::{PipelineState, StageTimings};
use crate::pipeline::services::artifacts::{ArtifactHandle, ArtifactStream};
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

/// A staged PNG waiting to be delivered. The scratch file lives exactly as long
/// as this value, or the stream made from it.
#[derive(Debug)]
pub struct EnhancedImage {
    request_id: Uuid,
    width: u32,
    height: u32,
    artifact: ArtifactHandle,
    timings: StageTimings,
}

impl EnhancedImage {
    pub const CONTENT_TYPE: &'static str = "image/png";

    pub(crate) fn new(
        request_id: Uuid,
        (width, height): (u32, u32),
        artifact: ArtifactHandle,
        timings: StageTimings,
    ) -> Self {
        Self {
            request_id,
            width,
            height,
            artifact,
            timings,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn timings(&self) -> &StageTimings {
        &self.timings
    }

    pub fn content_type(&self) -> &'static str {
        Self::CONTENT_TYPE
    }

    /// Hands the body over as a byte stream; the output file is removed when
    /// the stream finishes or the receiver disconnects.
    pub async fn into_stream(self) -> Result<ArtifactStream, EnhancementError> {
        Ok(self.artifact.into_stream().await?)
    }

    /// Reads the whole body into memory and releases the output file.
    pub async fn into_bytes(self) -> Result<Bytes, EnhancementError> {
        let body = self.artifact.read().await;
        self.artifact.release().await;
        let body = Bytes::from(body?);
        debug!(
            request_id = %self.request_id,
            state = PipelineState::Delivered.as_str(),
            bytes = body.len(),
            "Output delivered"
        );
        Ok(body)
    }
}
