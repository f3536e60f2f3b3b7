//! Error types for Strata Core

use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player error types
#[derive(Error, Debug)]
pub enum Error {
    // Source configuration errors
    #[error("Unsupported mime type: {mime}")]
    UnsupportedMimeType { mime: String },

    #[error("No mime type given or inferable for source: {src}")]
    MissingMimeType { src: String },

    #[error("Source {src} needs bitrate, width and height for progressive playback")]
    IncompleteSource { src: String },

    #[error("No playable source")]
    NoPlayableSource,

    // Backend errors
    #[error("Backend error: {message}")]
    Backend { message: String, fatal: bool },

    #[error("Adapter construction cancelled")]
    ConstructionCancelled,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a backend error
    pub fn backend(message: impl Into<String>, fatal: bool) -> Self {
        Error::Backend {
            message: message.into(),
            fatal,
        }
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Backend { fatal: false, .. } | Error::ConstructionCancelled
        )
    }

    /// Returns the error code surfaced in error events
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::UnsupportedMimeType { .. } => "UNSUPPORTED_MIME",
            Error::MissingMimeType { .. } => "MISSING_MIME",
            Error::IncompleteSource { .. } => "INCOMPLETE_SOURCE",
            Error::NoPlayableSource => "NO_SOURCE",
            Error::Backend { .. } => "BACKEND",
            Error::ConstructionCancelled => "CANCELLED",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
        }
    }
}
