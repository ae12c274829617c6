use crate::error::EnhancementError;
use crate::pipeline::orchestration::EnhancementPipeline;
use crate::pipeline::types::{EnhanceRequest, EnhancedImage};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Innermost service of the request stack. Always ready; admission control is
/// left to the concurrency limit layered on top.
#[derive(Clone)]
pub struct EnhancementService {
    pipeline: Arc<EnhancementPipeline>,
}

impl EnhancementService {
    pub fn new(pipeline: Arc<EnhancementPipeline>) -> Self {
        Self { pipeline }
    }
}

impl Service<EnhanceRequest> for EnhancementService {
    type Response = EnhancedImage;
    type Error = EnhancementError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: EnhanceRequest) -> Self::Future {
        let pipeline = Arc::clone(&self.pipeline);
        Box::pin(async move { pipeline.run(request.id, request.upload).await })
    }
}
