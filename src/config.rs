use crate::error::StartupError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "ESRGAN";
const DEFAULT_CONFIG_NAME: &str = "esrgan";

/// Where the network runs. Resolved once when the engine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA when the build and the host support it, otherwise CPU.
    #[default]
    Auto,
    Cpu,
    /// CUDA device 0, failing startup if it cannot be opened.
    Cuda,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub weights_path: PathBuf,
    pub device: DevicePreference,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::from("models/RRDB_ESRGAN_x4.pth"),
            device: DevicePreference::Auto,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub scratch_dir: PathBuf,
    /// Largest accepted width or height of an upload; 0 disables the check.
    pub max_input_dimension: u32,
    pub inference_timeout_secs: u64,
    /// Forward passes allowed on the blocking pool at once, counting passes
    /// whose request has already timed out.
    pub inference_slots: usize,
}

impl PipelineSettings {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn max_input_dimension(&self) -> Option<u32> {
        (self.max_input_dimension > 0).then_some(self.max_input_dimension)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("esrgan-scratch"),
            max_input_dimension: 1024,
            inference_timeout_secs: 120,
            inference_slots: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub max_concurrent_requests: usize,
    pub request_timeout_secs: u64,
}

impl ServiceSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 8,
            request_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub engine: EngineSettings,
    pub pipeline: PipelineSettings,
    pub service: ServiceSettings,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            pipeline: PipelineSettings::default(),
            service: ServiceSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then an optional `esrgan.*` file in the working directory,
    /// then `ESRGAN__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self, StartupError> {
        Self::build(File::with_name(DEFAULT_CONFIG_NAME).required(false))
    }

    /// Same layering as [`Settings::load`] with an explicit, required file.
    pub fn load_from(path: &Path) -> Result<Self, StartupError> {
        Self::build(File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self, StartupError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings: Settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), StartupError> {
        if self.engine.weights_path.as_os_str().is_empty() {
            return Err(StartupError::InvalidSetting(
                "engine.weights_path",
                "must not be empty".to_string(),
            ));
        }

        if self.pipeline.inference_timeout_secs == 0 {
            return Err(StartupError::InvalidSetting(
                "pipeline.inference_timeout_secs",
                "must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.inference_slots == 0 {
            return Err(StartupError::InvalidSetting(
                "pipeline.inference_slots",
                "must be greater than 0".to_string(),
            ));
        }

        if self.service.request_timeout_secs == 0 {
            return Err(StartupError::InvalidSetting(
                "service.request_timeout_secs",
                "must be greater than 0".to_string(),
            ));
        }

        if self.service.max_concurrent_requests == 0 {
            return Err(StartupError::InvalidSetting(
                "service.max_concurrent_requests",
                "must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
