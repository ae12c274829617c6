use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// Request boundary error

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller sent something we cannot work with.
    ClientInput,
    /// Scratch staging failed (disk, permissions).
    Resource,
    /// The forward pass failed or produced an unusable result.
    Inference,
    /// Encoding or a blocking task failed for reasons unrelated to the input.
    Internal,
    /// The request deadline set by the service layer expired.
    Timeout,
    /// The engine could not be brought up.
    Startup,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ClientInput => "ClientInputError",
            ErrorKind::Resource => "ResourceError",
            ErrorKind::Inference => "InferenceError",
            ErrorKind::Internal => "InternalError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Startup => "StartupError",
        }
    }

    /// Status code the routing layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::ClientInput => 400,
            ErrorKind::Resource | ErrorKind::Inference | ErrorKind::Internal => 500,
            ErrorKind::Startup => 503,
            ErrorKind::Timeout => 504,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, ErrorKind::ClientInput)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct EnhancementError {
    kind: ErrorKind,
    message: String,
}

impl EnhancementError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn client_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ClientInput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Request did not complete within {}ms", after.as_millis()),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<DecodeError> for EnhancementError {
    fn from(error: DecodeError) -> Self {
        Self::new(ErrorKind::ClientInput, error.to_string())
    }
}

impl From<EncodeError> for EnhancementError {
    fn from(error: EncodeError) -> Self {
        Self::new(ErrorKind::Internal, error.to_string())
    }
}

impl From<InferenceError> for EnhancementError {
    fn from(error: InferenceError) -> Self {
        Self::new(ErrorKind::Inference, error.to_string())
    }
}

impl From<ArtifactError> for EnhancementError {
    fn from(error: ArtifactError) -> Self {
        Self::new(ErrorKind::Resource, error.to_string())
    }
}

// Codec errors

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Upload is empty")]
    Empty,
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("Failed to decode image: {0}")]
    Malformed(#[source] image::ImageError),
    #[error("Image has {0} channel(s), a 3-channel color image is required")]
    InsufficientChannels(u8),
    #[error("Image has zero width or height")]
    ZeroSized,
    #[error("Image is {width}x{height}, larger than the {limit}px limit")]
    TooLarge { width: u32, height: u32, limit: u32 },
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Cannot encode tensor of shape {0:?}, expected (3, height, width)")]
    Shape([usize; 3]),
    #[error("Failed to write PNG: {0}")]
    Png(#[source] image::ImageError),
}

// Inference errors

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Invalid input tensor: {0}")]
    InvalidInput(String),
    #[error("Inference backend failed: {0}")]
    Backend(#[from] candle_core::Error),
    #[error("Engine returned {actual:?}, expected spatial size {expected:?}")]
    UnexpectedOutput {
        expected: (usize, usize),
        actual: [usize; 3],
    },
    #[error("Inference did not finish within {}ms", .0.as_millis())]
    TimedOut(Duration),
    #[error("Inference device lock was poisoned by an earlier panic")]
    Poisoned,
}

// Artifact errors

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to prepare scratch directory {1:?}: {0}")]
    ScratchDir(#[source] std::io::Error, PathBuf),
    #[error("Failed to write artifact {1:?}: {0}")]
    Write(#[source] std::io::Error, PathBuf),
    #[error("Failed to read artifact {1:?}: {0}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("Artifact {0:?} was already released")]
    Released(PathBuf),
    #[error("Staging task failed: {0}")]
    Task(String),
}

// Startup errors, fatal

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid setting {0}: {1}")]
    InvalidSetting(&'static str, String),
    #[error("Weights file not found: {0:?}")]
    MissingWeights(PathBuf),
    #[error("Weights in {path:?} do not match the network: {source}")]
    IncompatibleWeights {
        path: PathBuf,
        #[source]
        source: candle_core::Error,
    },
    #[error("Compute device unavailable: {0}")]
    Device(#[source] candle_core::Error),
    #[error("Scratch directory unusable: {0}")]
    Scratch(#[from] ArtifactError),
    #[error("Engine loading task failed: {0}")]
    Task(String),
}

impl StartupError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Startup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failures_are_client_errors() {
        let error: EnhancementError = DecodeError::InsufficientChannels(1).into();
        assert_eq!(error.kind(), ErrorKind::ClientInput);
        assert_eq!(error.kind().http_status(), 400);
        assert!(error.message().contains("3-channel"));
    }

    #[test]
    fn server_side_failures_are_not_client_errors() {
        let inference: EnhancementError = InferenceError::Poisoned.into();
        let encode: EnhancementError = EncodeError::Shape([4, 2, 2]).into();
        let staging: EnhancementError = ArtifactError::Task("join".to_string()).into();

        assert_eq!(inference.kind(), ErrorKind::Inference);
        assert_eq!(encode.kind(), ErrorKind::Internal);
        assert_eq!(staging.kind(), ErrorKind::Resource);
        for error in [inference, encode, staging] {
            assert!(!error.kind().is_client_error());
            assert_eq!(error.kind().http_status(), 500);
        }
    }

    #[test]
    fn display_carries_kind_and_message() {
        let error = EnhancementError::timed_out(Duration::from_millis(250));
        assert_eq!(error.kind().http_status(), 504);
        assert_eq!(
            error.to_string(),
            "TimeoutError: Request did not complete within 250ms"
        );
    }
}
