use crate::config::Settings;
use crate::error::{EnhancementError, StartupError};
use crate::pipeline::orchestration::{EnhancementPipeline, InstrumentedLayer};
use crate::pipeline::services::inference::{EsrganEngine, Upscaler};
use crate::pipeline::services::EnhancementService;
use crate::pipeline::types::{EnhanceRequest, EnhancedImage};
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::error::Elapsed;
use tower::util::BoxCloneService;
use tower::{BoxError, ServiceBuilder};
use tracing::info;

pub type EnhancementBoxService = BoxCloneService<EnhanceRequest, EnhancedImage, EnhancementError>;

/// Builds the per-request stack around a shared pipeline:
/// instrumentation, error normalization, request deadline, then admission.
pub fn create_enhancement_service(
    pipeline: Arc<EnhancementPipeline>,
    max_concurrent: usize,
    request_timeout: Duration,
) -> EnhancementBoxService {
    let service = ServiceBuilder::new()
        .layer(InstrumentedLayer)
        .map_err(move |error: BoxError| normalize_error(error, request_timeout))
        .timeout(request_timeout)
        .concurrency_limit(max_concurrent)
        .service(EnhancementService::new(pipeline));

    BoxCloneService::new(service)
}

fn normalize_error(error: BoxError, request_timeout: Duration) -> EnhancementError {
    if error.is::<Elapsed>() {
        return EnhancementError::timed_out(request_timeout);
    }
    match error.downcast::<EnhancementError>() {
        Ok(error) => *error,
        Err(other) => EnhancementError::internal(other.to_string()),
    }
}

/// Everything a host process needs to serve enhancement requests. Built once;
/// any failure here should stop the process.
pub struct EnhancementRuntime {
    pipeline: Arc<EnhancementPipeline>,
    service: EnhancementBoxService,
}

impl EnhancementRuntime {
    pub async fn start(settings: &Settings) -> Result<Self, StartupError> {
        settings.validate()?;

        let engine_settings = settings.engine.clone();
        let engine = tokio::task::spawn_blocking(move || {
            EsrganEngine::initialize(&engine_settings.weights_path, engine_settings.device)
        })
        .await
        .map_err(|e| StartupError::Task(e.to_string()))??;
        info!(device = %engine.device_label(), "Inference engine initialized");

        Self::with_engine(settings, Arc::new(engine)).await
    }

    pub async fn with_engine(
        settings: &Settings,
        engine: Arc<dyn Upscaler>,
    ) -> Result<Self, StartupError> {
        let pipeline = Arc::new(EnhancementPipeline::from_settings(engine, &settings.pipeline));

        let purged = pipeline.artifacts().purge_stale().await?;
        if purged > 0 {
            info!(purged, "Removed artifacts left by a previous run");
        }

        let service = create_enhancement_service(
            Arc::clone(&pipeline),
            settings.service.max_concurrent_requests,
            settings.service.request_timeout(),
        );
        info!(
            scratch_dir = ?settings.pipeline.scratch_dir,
            max_concurrent = settings.service.max_concurrent_requests,
            "Enhancement service ready"
        );

        Ok(Self { pipeline, service })
    }

    pub fn pipeline(&self) -> &Arc<EnhancementPipeline> {
        &self.pipeline
    }

    /// A handle to the shared stack; clones share the concurrency limit.
    pub fn service(&self) -> EnhancementBoxService {
        self.service.clone()
    }
}
