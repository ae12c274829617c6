use super::rrdb::{RrdbConfig, RrdbNet};
use super::Upscaler;
use crate::config::DevicePreference;
use crate::error::{InferenceError, StartupError};
use crate::pipeline::types::PixelTensor;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// The production upscaler: one RRDB network bound to one device.
///
/// Forward passes are serialized internally, so the engine can be shared
/// behind an `Arc` and called from any number of requests.
pub struct EsrganEngine {
    network: RrdbNet,
    device: Device,
    device_label: String,
    forward_gate: Mutex<()>,
}

impl EsrganEngine {
    /// Loads the published x4 generator. Any failure here is fatal.
    pub fn initialize(weights_path: &Path, preference: DevicePreference) -> Result<Self, StartupError> {
        Self::load(weights_path, RrdbConfig::esrgan_x4(), preference)
    }

    pub fn load(
        weights_path: &Path,
        config: RrdbConfig,
        preference: DevicePreference,
    ) -> Result<Self, StartupError> {
        if !weights_path.is_file() {
            return Err(StartupError::MissingWeights(weights_path.to_path_buf()));
        }

        let device = select_device(preference)?;
        info!(
            weights = ?weights_path,
            device = ?device.location(),
            "Loading RRDB generator"
        );

        let incompatible = |source| StartupError::IncompatibleWeights {
            path: weights_path.to_path_buf(),
            source,
        };
        let vb = weights(weights_path, &device).map_err(incompatible)?;
        let network = RrdbNet::load(vb, config).map_err(incompatible)?;

        info!(blocks = config.blocks, features = config.features, "RRDB generator ready");
        Ok(Self::from_network(network, device))
    }

    pub fn from_network(network: RrdbNet, device: Device) -> Self {
        Self {
            device_label: format!("{:?}", device.location()),
            network,
            device,
            forward_gate: Mutex::new(()),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&self, input: &PixelTensor) -> Result<PixelTensor, InferenceError> {
        let [channels, height, width] = input.shape();
        let batch = Tensor::from_vec(input.to_vec(), (1, channels, height, width), &self.device)?;

        let output = {
            let _guard = self.forward_gate.lock().map_err(|_| InferenceError::Poisoned)?;
            self.network.forward(&batch)?
        };

        let output = output.squeeze(0)?.to_device(&Device::Cpu)?.to_dtype(DType::F32)?;
        let (channels, height, width) = output.dims3()?;
        let data = output.flatten_all()?.to_vec1::<f32>()?;
        PixelTensor::from_shape_vec((channels, height, width), data)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))
    }
}

impl Upscaler for EsrganEngine {
    fn scale_factor(&self) -> u32 {
        RrdbConfig::SCALE
    }

    fn device_label(&self) -> String {
        self.device_label.clone()
    }

    fn enhance(&self, input: &PixelTensor) -> Result<PixelTensor, InferenceError> {
        let expected = self.network.config().in_channels;
        let [channels, height, width] = input.shape();
        if channels != expected || height == 0 || width == 0 {
            return Err(InferenceError::InvalidInput(format!(
                "expected ({expected}, H, W) with non-zero H and W, got {:?}",
                input.shape()
            )));
        }

        debug!(height, width, device = %self.device_label, "Running forward pass");
        self.forward(input)
    }
}

fn select_device(preference: DevicePreference) -> Result<Device, StartupError> {
    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Auto => Device::cuda_if_available(0).map_err(StartupError::Device),
        DevicePreference::Cuda => Device::new_cuda(0).map_err(StartupError::Device),
    }
}

fn weights(path: &Path, device: &Device) -> candle_core::Result<VarBuilder<'static>> {
    let is_safetensors = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("safetensors"));

    if is_safetensors {
        let tensors = candle_core::safetensors::load(path, device)?;
        Ok(VarBuilder::from_tensors(tensors, DType::F32, device))
    } else {
        VarBuilder::from_pth(path, DType::F32, device)
    }
}
