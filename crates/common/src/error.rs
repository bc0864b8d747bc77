//! Error types shared across rdtile crates.

/// Top-level error type for rdtile operations.
#[derive(Debug, thiserror::Error)]
pub enum RdtileError {
    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Process error: {message}")]
    Process { message: String },

    #[error("Masking error: {message}")]
    Masking { message: String },

    #[error("Workflow error: {message}")]
    Workflow { message: String },

    #[error("Platform error: {message}")]
    Platform { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias using RdtileError.
pub type RdtileResult<T> = Result<T, RdtileError>;

impl RdtileError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process {
            message: msg.into(),
        }
    }

    pub fn masking(msg: impl Into<String>) -> Self {
        Self::Masking {
            message: msg.into(),
        }
    }

    pub fn workflow(msg: impl Into<String>) -> Self {
        Self::Workflow {
            message: msg.into(),
        }
    }

    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform {
            message: msg.into(),
        }
    }
}
