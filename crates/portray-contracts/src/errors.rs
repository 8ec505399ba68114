use thiserror::Error;

/// Everything that can stop a portrait from being produced, tagged so the
/// caller can decide which failures earn a retry affordance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("the selected image exceeds the {limit_bytes} byte upload limit")]
    ImageTooLarge { limit_bytes: usize },

    #[error("the selected file could not be decoded as an image")]
    UnsupportedFormat,

    #[error(
        "no API key configured; set PORTRAY_API_KEY (your own key) or \
         PORTRAY_SHARED_API_KEY and restart"
    )]
    CredentialMissing,

    #[error("the model declined to process the image: {0}")]
    GenerationRefused(String),

    #[error("generation quota exhausted: {0}")]
    QuotaExceeded(String),

    #[error("the provider rejected the credentials: {0}")]
    AuthError(String),

    #[error("the image was blocked by the provider's safety filters")]
    SafetyBlocked,

    #[error("generation failed: {0}")]
    Unknown(String),
}

impl GenerationError {
    /// Stable machine-readable tag, used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::ImageTooLarge { .. } => "image_too_large",
            GenerationError::UnsupportedFormat => "unsupported_format",
            GenerationError::CredentialMissing => "credential_missing",
            GenerationError::GenerationRefused(_) => "generation_refused",
            GenerationError::QuotaExceeded(_) => "quota_exceeded",
            GenerationError::AuthError(_) => "auth_error",
            GenerationError::SafetyBlocked => "safety_blocked",
            GenerationError::Unknown(_) => "unknown",
        }
    }

    /// Only quota failures are offered an automatic one-tap retry; every
    /// other kind needs the user to change something first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::QuotaExceeded(_))
    }
}
