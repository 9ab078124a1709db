//! Error taxonomy shared across the pipeline.
//!
//! Each stage has a narrow error type; the orchestrator decides which of
//! them are absorbed (fallback), converted (retry) or surfaced.

use crate::character::CharacterId;
use crate::store::FaultPoint;
use crate::validation::{Tier, ValidationResult};
use std::time::Duration;
use thiserror::Error;

/// A structured provider payload did not match the expected contract.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaValidationError {
    #[error("Payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// The generation provider could not produce a response.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationProviderError {
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Provider response envelope unreadable: {0}")]
    Envelope(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// A provider reply that never became a usable payload.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReplyError {
    #[error(transparent)]
    Provider(#[from] GenerationProviderError),

    #[error(transparent)]
    Schema(#[from] SchemaValidationError),
}

impl GenerationProviderError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationProviderError::Timeout(_)
            | GenerationProviderError::Network(_)
            | GenerationProviderError::Unavailable(_) => true,
            GenerationProviderError::Api { status, .. } => {
                *status == 429 || *status == 529 || *status >= 500
            }
            GenerationProviderError::Envelope(_) | GenerationProviderError::NotConfigured(_) => {
                false
            }
        }
    }
}

impl From<claude::Error> for GenerationProviderError {
    fn from(err: claude::Error) -> Self {
        match err {
            claude::Error::NoApiKey => {
                GenerationProviderError::NotConfigured("ANTHROPIC_API_KEY not set".to_string())
            }
            claude::Error::Config(msg) => GenerationProviderError::NotConfigured(msg),
            claude::Error::Network(msg) => GenerationProviderError::Network(msg),
            claude::Error::Timeout => GenerationProviderError::Unavailable("HTTP timeout".into()),
            claude::Error::Api { status, message } => {
                GenerationProviderError::Api { status, message }
            }
            claude::Error::Parse(msg) => GenerationProviderError::Envelope(msg),
        }
    }
}

/// Content failed a specific validation tier.
#[derive(Debug, Clone, Error)]
#[error("Validation failed at {}: {}", .result.tier, .result.issues.join("; "))]
pub struct ValidationFailure {
    pub result: ValidationResult,
}

impl ValidationFailure {
    pub fn new(result: ValidationResult) -> Self {
        Self { result }
    }

    pub fn tier(&self) -> Tier {
        self.result.tier
    }
}

/// A store transaction could not be completed; nothing was written.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Injected fault at {0:?}")]
    Fault(FaultPoint),

    #[error("Record not found: {0}")]
    Missing(String),

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Compressing one character's working memory failed.
#[derive(Debug, Error)]
pub enum MemoryCompressionError {
    #[error("Compression already running for character {0}")]
    AlreadyRunning(CharacterId),

    #[error("Failed to persist episode: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Configuration could not be read.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
