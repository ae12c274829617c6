use crate::pipeline::types::EnhanceRequest;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::Service;
use tower_layer::Layer;
use tracing::{info, info_span, warn, Instrument};

/// Wraps a service so every request runs inside a span carrying its id and
/// caller, with its outcome and latency logged on completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstrumentedLayer;

impl<S> Layer<S> for InstrumentedLayer {
    type Service = InstrumentedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentedService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct InstrumentedService<S> {
    inner: S,
}

impl<S> Service<EnhanceRequest> for InstrumentedService<S>
where
    S: Service<EnhanceRequest>,
    S::Future: Send + 'static,
    S::Error: fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: EnhanceRequest) -> Self::Future {
        let span = info_span!(
            "request",
            request_id = %request.id,
            caller = %request.caller,
            content_type = request.upload.content_type(),
        );
        let upload_bytes = request.upload.len();
        let future = {
            let _entered = span.enter();
            self.inner.call(request)
        };

        Box::pin(
            async move {
                let start = Instant::now();
                info!(upload_bytes, "Enhancement request received");

                let result = future.await;

                let duration_ms = start.elapsed().as_millis() as u64;
                match &result {
                    Ok(_) => info!(duration_ms, "Enhancement request completed"),
                    Err(e) => warn!(duration_ms, "Enhancement request failed: {}", e),
                }
                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{CallerIdentity, UploadedImage};
    use tower::{service_fn, ServiceExt};

    #[tokio::test]
    async fn inner_result_passes_through() {
        let inner = service_fn(|request: EnhanceRequest| async move {
            Ok::<_, String>(request.caller.as_str().to_string())
        });
        let service = InstrumentedLayer.layer(inner);

        let request = EnhanceRequest::new(
            CallerIdentity::new("alice"),
            UploadedImage::new(vec![1u8, 2, 3], "image/png"),
        );
        assert_eq!(service.oneshot(request).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn inner_error_passes_through() {
        let inner = service_fn(|_: EnhanceRequest| async { Err::<(), _>("boom".to_string()) });
        let service = InstrumentedLayer.layer(inner);

        let request = EnhanceRequest::new(
            CallerIdentity::new("bob"),
            UploadedImage::new(Vec::new(), "image/png"),
        );
        assert_eq!(service.oneshot(request).await.unwrap_err(), "boom");
    }
}
