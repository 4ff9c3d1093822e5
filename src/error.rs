//! Error types for storage and completion failures.
//!
//! The two enums mirror the two recovery paths of a live conversation:
//! storage failures are logged and never interrupt the chat, while
//! completion failures become a visible (but unsaved) assistant message.

/// Failure of a transcript store operation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The remote store could not be reached.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The remote store answered with a non-success status.
    #[error("store returned {status}: {message}")]
    Status { status: u16, message: String },
    /// A persisted row carried a role outside the known set.
    #[error(transparent)]
    InvalidRole(#[from] crate::models::InvalidRole),
}

/// Failure to produce a reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// No usable credential was configured. Raised before any network call.
    #[error("API key is missing. Set {var} in the environment and try again.")]
    MissingCredential { var: String },
    /// The provider or the network failed, before or during streaming.
    #[error("{0}")]
    Provider(String),
}

impl CompletionError {
    pub fn provider(message: impl Into<String>) -> Self {
        CompletionError::Provider(message.into())
    }

    /// Stable machine-readable code used by the HTTP surface.
    pub fn code(&self) -> &'static str {
        match self {
            CompletionError::MissingCredential { .. } => "missing_credential",
            CompletionError::Provider(_) => "provider_error",
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        CompletionError::Provider(err.to_string())
    }
}
