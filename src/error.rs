use thiserror::Error;

/// Errors returned by Z-Image client and session operations.
#[derive(Error, Debug)]
pub enum StudioError {
    /// The API returned a non-success HTTP status.
    #[error("Z-Image API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response from the API was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The prompt was empty or whitespace only.
    #[error("Prompt must not be empty")]
    EmptyPrompt,

    /// Generation settings are outside the range the backend accepts.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// The requested batch would exceed the simultaneous task ceiling.
    #[error("Batch of {requested} exceeds the limit of {limit} active tasks")]
    TooManyActiveTasks { requested: u32, limit: u32 },

    /// Submitting one item of a batch failed; later items were not sent.
    #[error("Submitting image {index} failed: {message}")]
    Submission { index: u32, message: String },

    /// Another batch replaced this one before it finished submitting.
    #[error("Batch was superseded by a newer one")]
    Superseded,

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StudioError {
    /// Message suitable for showing to a user.
    ///
    /// HTTP errors carry whatever the server put in the body, which for the
    /// Z-Image API is the `detail` string, so it is shown as-is.
    pub fn user_message(&self) -> String {
        match self {
            StudioError::Http { body, .. } if !body.trim().is_empty() => body.clone(),
            StudioError::Http { .. } => crate::hints::GENERIC_FAILURE.to_string(),
            other => other.to_string(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, StudioError>;
