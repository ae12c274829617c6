use crate::pipeline::types::UploadedImage;
use std::fmt;
use uuid::Uuid;

/// Identity of an already-authenticated caller. Opaque to the pipeline; it is
/// only carried for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct EnhanceRequest {
    pub id: Uuid,
    pub caller: CallerIdentity,
    pub upload: UploadedImage,
}

impl EnhanceRequest {
    pub fn new(caller: CallerIdentity, upload: UploadedImage) -> Self {
        Self {
            id: Uuid::new_v4(),
            caller,
            upload,
        }
    }
}
