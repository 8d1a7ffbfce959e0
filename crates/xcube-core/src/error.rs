//! Error types for xcube stores and progress observation.

use thiserror::Error;

/// Result type alias using XcubeError.
pub type XcubeResult<T> = Result<T, XcubeError>;

/// Primary error type for xcube operations.
#[derive(Debug, Error)]
pub enum XcubeError {
    // === Caller Errors ===
    /// Malformed construction or call arguments.
    #[error("{0}")]
    InvalidArgument(String),

    /// Open, write or store parameters rejected by their schema.
    #[error("invalid {schema}: {message}")]
    InvalidParams { schema: String, message: String },

    #[error("unknown data store \"{0}\"")]
    UnknownDataStore(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    // === Data Errors ===
    #[error("data resource \"{0}\" does not exist in store")]
    DataNotFound(String),

    /// Write without `replace` against a path that already holds data.
    #[error("data resource \"{data_id}\" already exists at \"{path}\"")]
    Conflict { data_id: String, path: String },

    // === Infrastructure Errors ===
    #[error("storage error: {0}")]
    StorageError(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl XcubeError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an InvalidParams error for the schema with the given title.
    pub fn invalid_params(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Create a StorageError.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageError(msg.into())
    }

    /// Create a Conflict error.
    pub fn conflict(data_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Conflict {
            data_id: data_id.into(),
            path: path.into(),
        }
    }

    /// Process exit code used when this error terminates a command.
    pub fn exit_code(&self) -> i32 {
        match self {
            XcubeError::InvalidArgument(_)
            | XcubeError::InvalidParams { .. }
            | XcubeError::UnknownDataStore(_)
            | XcubeError::ConfigError(_) => 2,

            XcubeError::DataNotFound(_) => 3,
            XcubeError::Conflict { .. } => 4,

            XcubeError::StorageError(_) | XcubeError::Transport(_) => 5,
            XcubeError::Internal(_) => 70,
        }
    }
}

impl From<std::io::Error> for XcubeError {
    fn from(err: std::io::Error) -> Self {
        XcubeError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for XcubeError {
    fn from(err: serde_json::Error) -> Self {
        XcubeError::StorageError(format!("JSON error: {}", err))
    }
}
