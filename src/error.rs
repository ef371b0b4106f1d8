//! Error types shared by the pipeline, the detector and the offline tools.

use thiserror::Error;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, RecallerError>;

#[derive(Error, Debug)]
pub enum RecallerError {
    /// The frame source cannot produce frames. Fatal to the producer.
    #[error("Frame source unavailable: {0}")]
    SourceUnavailable(String),

    /// A model or other stage resource could not be loaded at startup.
    #[error("Failed to load {resource}: {reason}")]
    ModelLoad { resource: String, reason: String },

    /// A single item could not be processed. The stage keeps running.
    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecallerError {
    pub fn model_load(resource: impl Into<String>, reason: impl ToString) -> Self {
        Self::ModelLoad {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    pub fn processing(msg: impl ToString) -> Self {
        Self::Processing(msg.to_string())
    }

    /// Whether this error should stop the whole system rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::ModelLoad { .. })
    }
}
