use serde::{Deserialize, Serialize};

use crate::identity::JobIdentity;

/// Why a best-effort stage handed back its input instead of a new result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DegradeReason {
    #[error("no enhancement API key configured")]
    MissingCredential,
    #[error("enhancement API rejected the key (401)")]
    Unauthorized,
    #[error("enhancement credits exhausted (402)")]
    PaymentRequired,
    #[error("enhancement API returned status {0}")]
    HttpStatus(u16),
    #[error("enhancement response carried neither results nor a task id: {0}")]
    MalformedResponse(String),
    #[error("enhancement task completed without an image")]
    CompletedWithoutImage,
    #[error("enhancement task failed: {}", .0.as_deref().unwrap_or("no message"))]
    TaskFailed(Option<String>),
    #[error("enhancement task still pending after {0} polls")]
    TimedOut(u32),
    #[error("enhancement transport error: {0}")]
    Transport(String),
    #[error("enhanced image download failed: {0}")]
    DownloadFailed(String),
    #[error("enhancement input unreadable: {0}")]
    InputUnreadable(String),
    #[error("image normalization failed: {0}")]
    NormalizeFailed(String),
}

/// Result of a stage that never fails outright.
///
/// `Degraded` still carries a usable value (typically the stage's own input)
/// together with the reason the preferred path was not taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome<T> {
    Ok(T),
    Degraded { value: T, reason: DegradeReason },
}

impl<T> StageOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Ok(value) | Self::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Ok(value) | Self::Degraded { value, .. } => value,
        }
    }

    pub fn reason(&self) -> Option<&DegradeReason> {
        match self {
            Self::Ok(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VariantStatus {
    Uploaded {
        name: String,
        file_id: String,
        /// `None` when the upscaled image was uploaded.
        enhancement: Option<DegradeReason>,
    },
    FurnishFailed {
        reason: String,
    },
    UploadFailed {
        name: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantReport {
    pub index: u32,
    #[serde(flatten)]
    pub status: VariantStatus,
}

impl VariantReport {
    pub fn is_uploaded(&self) -> bool {
        matches!(self.status, VariantStatus::Uploaded { .. })
    }
}

/// Terminal state of one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// No style reference for the identity; source archived, nothing rendered.
    NoReference { identity: JobIdentity },
    /// Empty-room generation failed; source left in the inbox for a later pass.
    EmptyRoomFailed { identity: JobIdentity, reason: String },
    /// Every variant was attempted and the source archived.
    Completed {
        identity: JobIdentity,
        variants: Vec<VariantReport>,
    },
}

impl JobOutcome {
    pub fn identity(&self) -> &JobIdentity {
        match self {
            Self::NoReference { identity }
            | Self::EmptyRoomFailed { identity, .. }
            | Self::Completed { identity, .. } => identity,
        }
    }

    pub fn archived(&self) -> bool {
        !matches!(self, Self::EmptyRoomFailed { .. })
    }

    pub fn uploaded(&self) -> Vec<&str> {
        match self {
            Self::Completed { variants, .. } => variants
                .iter()
                .filter_map(|report| match &report.status {
                    VariantStatus::Uploaded { name, .. } => Some(name.as_str()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
