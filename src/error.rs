use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building, configuring or closing a pipeline.
///
/// Per-message failures never travel through this type; they are carried by
/// the [`Report`](crate::Report) attached to each message.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No stages in pipeline
    #[error("Cannot build pipeline with no stages")]
    NoStages,

    /// A factory declared a pool size of zero
    #[error("Stage '{stage}' declares an invalid pool size of 0")]
    InvalidPoolSize { stage: String },

    /// A factory failed to create one of its components
    #[error("Stage '{stage}' failed to create a component: {reason}")]
    ComponentCreation { stage: String, reason: String },

    /// An attribute was rejected by a factory
    #[error("Invalid attribute '{name}': {reason}")]
    Attribute { name: String, reason: String },

    /// A topology referenced a component name the registry does not know
    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed JSON configuration
    #[error("Invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error while reading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// One or more stages failed to shut down cleanly
    #[error("Pipeline shutdown error: {0}")]
    Shutdown(String),
}
