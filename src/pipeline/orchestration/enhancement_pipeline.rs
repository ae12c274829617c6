use super::pipeline_state::{PipelineRun, PipelineState};
use crate::config::PipelineSettings;
use crate::error::{DecodeError, EnhancementError, InferenceError};
use crate::pipeline::services::artifacts::{ArtifactManager, ArtifactRole};
use crate::pipeline::services::codec::ImageCodec;
use crate::pipeline::services::inference::Upscaler;
use crate::pipeline::types::{EnhancedImage, PixelTensor, UploadedImage};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, instrument};
use uuid::Uuid;

/// Upload in, staged PNG out.
///
/// Each call owns its artifacts. The input file is gone as soon as the upload
/// has been decoded, and the output file belongs to the returned
/// [`EnhancedImage`]. Any failure or cancellation before that point releases
/// whatever was staged.
///
/// Forward passes hold an inference slot until they actually finish, including
/// passes whose request already timed out, so abandoned work cannot pile up on
/// the blocking pool.
pub struct EnhancementPipeline {
    engine: Arc<dyn Upscaler>,
    codec: ImageCodec,
    artifacts: ArtifactManager,
    inference_timeout: Duration,
    inference_slots: Arc<Semaphore>,
}

impl EnhancementPipeline {
    pub fn new(
        engine: Arc<dyn Upscaler>,
        codec: ImageCodec,
        artifacts: ArtifactManager,
        inference_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            codec,
            artifacts,
            inference_timeout,
            inference_slots: Arc::new(Semaphore::new(1)),
        }
    }

    /// Number of forward passes allowed on the blocking pool at once.
    pub fn with_inference_slots(mut self, slots: usize) -> Self {
        self.inference_slots = Arc::new(Semaphore::new(slots.max(1)));
        self
    }

    pub fn from_settings(engine: Arc<dyn Upscaler>, settings: &PipelineSettings) -> Self {
        Self::new(
            engine,
            ImageCodec::new(settings.max_input_dimension()),
            ArtifactManager::new(&settings.scratch_dir),
            settings.inference_timeout(),
        )
        .with_inference_slots(settings.inference_slots)
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    pub fn engine(&self) -> &Arc<dyn Upscaler> {
        &self.engine
    }

    /// Convenience for callers that want the PNG body in memory.
    pub async fn enhance_upload(
        &self,
        bytes: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<Bytes, EnhancementError> {
        let upload = UploadedImage::new(bytes, content_type);
        self.run(Uuid::new_v4(), upload).await?.into_bytes().await
    }

    #[instrument(name = "enhance", skip_all, fields(upload_bytes = upload.len()))]
    pub async fn run(
        &self,
        request_id: Uuid,
        upload: UploadedImage,
    ) -> Result<EnhancedImage, EnhancementError> {
        let mut run = PipelineRun::new(request_id);
        match self.drive(&mut run, request_id, upload).await {
            Ok(image) => Ok(image),
            Err(failure) => {
                run.fail(&failure);
                Err(failure)
            }
        }
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        request_id: Uuid,
        upload: UploadedImage,
    ) -> Result<EnhancedImage, EnhancementError> {
        if upload.is_empty() {
            return Err(DecodeError::Empty.into());
        }
        if !upload.has_accepted_content_type() {
            return Err(DecodeError::UnsupportedContentType(upload.media_type()).into());
        }

        let input = self.artifacts.acquire(ArtifactRole::Input).await?;
        input.write(upload.into_bytes()).await?;
        run.advance(PipelineState::Staged);

        let staged = input.read().await?;
        let codec = self.codec;
        let tensor = run_blocking(move || codec.decode(&staged)).await??;
        input.release().await;
        run.advance(PipelineState::Decoded);

        let enhanced = self.infer(tensor).await?;
        let dimensions = (enhanced.width() as u32, enhanced.height() as u32);
        run.advance(PipelineState::Inferred);

        let png = run_blocking(move || codec.encode(&enhanced)).await??;
        run.advance(PipelineState::Encoded);

        let output = self.artifacts.acquire(ArtifactRole::Output).await?;
        output.write(Bytes::from(png)).await?;
        run.advance(PipelineState::StagedOutput);

        Ok(EnhancedImage::new(request_id, dimensions, output, run.hand_off()))
    }

    async fn infer(&self, tensor: PixelTensor) -> Result<PixelTensor, EnhancementError> {
        let scale = self.engine.scale_factor() as usize;
        let expected = (tensor.height() * scale, tensor.width() * scale);

        let engine = Arc::clone(&self.engine);
        let slots = Arc::clone(&self.inference_slots);
        // Waiting for a slot counts against the inference deadline.
        let bounded = async move {
            let slot = slots
                .acquire_owned()
                .await
                .map_err(|e| EnhancementError::internal(format!("Inference slots closed: {e}")))?;
            tokio::task::spawn_blocking(move || {
                let _slot = slot;
                engine.enhance(&tensor)
            })
            .await
            .map_err(|e| EnhancementError::internal(format!("Inference task failed: {e}")))
        };
        let result = match tokio::time::timeout(self.inference_timeout, bounded).await {
            Ok(outcome) => outcome?,
            Err(_) => Err(InferenceError::TimedOut(self.inference_timeout)),
        };

        let checked = result.and_then(|output| {
            if (output.height(), output.width()) == expected {
                Ok(output)
            } else {
                Err(InferenceError::UnexpectedOutput {
                    expected,
                    actual: output.shape(),
                })
            }
        });

        checked.map_err(|e| {
            error!(device = %self.engine.device_label(), "Inference failed: {}", e);
            EnhancementError::from(e)
        })
    }
}

async fn run_blocking<F, T>(work: F) -> Result<T, EnhancementError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EnhancementError::internal(format!("Blocking task failed: {e}")))
}
