pub mod engine;
pub mod rrdb;

pub use engine::EsrganEngine;
pub use rrdb::{RrdbConfig, RrdbNet};

use crate::error::InferenceError;
use crate::pipeline::types::PixelTensor;

/// A fixed super-resolution function, shared by every request.
///
/// Implementations must be safe to call concurrently; any serialization the
/// underlying device needs is the implementation's own business.
pub trait Upscaler: Send + Sync + 'static {
    /// Integer factor applied to both spatial dimensions.
    fn scale_factor(&self) -> u32;

    /// Human-readable device description for diagnostics.
    fn device_label(&self) -> String;

    /// `(3, H, W)` in, `(3, scale * H, scale * W)` out. Blocking.
    fn enhance(&self, input: &PixelTensor) -> Result<PixelTensor, InferenceError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use ndarray::Array3;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub(crate) fn tiny_config() -> RrdbConfig {
        RrdbConfig {
            in_channels: 3,
            out_channels: 3,
            features: 8,
            blocks: 2,
            growth: 4,
        }
    }

    fn nearest(input: &PixelTensor, channels: usize, scale: usize) -> PixelTensor {
        let samples = input.samples();
        PixelTensor::from_array(Array3::from_shape_fn(
            (channels, input.height() * scale, input.width() * scale),
            |(c, y, x)| samples[[c % input.channels(), y / scale, x / scale]],
        ))
    }

    /// Nearest-neighbour x4. Each request's colours survive unchanged, which
    /// lets tests tell outputs apart.
    pub(crate) struct NearestUpscaler;

    impl Upscaler for NearestUpscaler {
        fn scale_factor(&self) -> u32 {
            4
        }

        fn device_label(&self) -> String {
            "stub".to_string()
        }

        fn enhance(&self, input: &PixelTensor) -> Result<PixelTensor, InferenceError> {
            Ok(nearest(input, input.channels(), 4))
        }
    }

    /// Fails exactly on the `fail_on`-th call (1-based).
    pub(crate) struct FailingUpscaler {
        pub(crate) fail_on: usize,
        pub(crate) calls: AtomicUsize,
    }

    impl FailingUpscaler {
        pub(crate) fn new(fail_on: usize) -> Self {
            Self {
                fail_on,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Upscaler for FailingUpscaler {
        fn scale_factor(&self) -> u32 {
            4
        }

        fn device_label(&self) -> String {
            "stub:failing".to_string()
        }

        fn enhance(&self, input: &PixelTensor) -> Result<PixelTensor, InferenceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on {
                return Err(InferenceError::InvalidInput("simulated device failure".to_string()));
            }
            Ok(nearest(input, input.channels(), 4))
        }
    }

    pub(crate) struct SlowUpscaler {
        delay: Duration,
        pub(crate) calls: AtomicUsize,
    }

    impl SlowUpscaler {
        pub(crate) fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Upscaler for SlowUpscaler {
        fn scale_factor(&self) -> u32 {
            4
        }

        fn device_label(&self) -> String {
            "stub:slow".to_string()
        }

        fn enhance(&self, input: &PixelTensor) -> Result<PixelTensor, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(nearest(input, input.channels(), 4))
        }
    }

    /// Correct spatial size, wrong channel count.
    pub(crate) struct FourChannelUpscaler;

    impl Upscaler for FourChannelUpscaler {
        fn scale_factor(&self) -> u32 {
            4
        }

        fn device_label(&self) -> String {
            "stub:4ch".to_string()
        }

        fn enhance(&self, input: &PixelTensor) -> Result<PixelTensor, InferenceError> {
            Ok(nearest(input, 4, 4))
        }
    }

    /// Ignores the scale it advertises.
    pub(crate) struct IdentityUpscaler;

    impl Upscaler for IdentityUpscaler {
        fn scale_factor(&self) -> u32 {
            4
        }

        fn device_label(&self) -> String {
            "stub:identity".to_string()
        }

        fn enhance(&self, input: &PixelTensor) -> Result<PixelTensor, InferenceError> {
            Ok(input.clone())
        }
    }
}
