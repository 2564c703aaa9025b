use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    // State errors
    #[error("Failed to load state from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file '{path}': {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to save state to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid config: {message}")]
    ConfigValidation { message: String },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Failures of the token codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("JWT secret not configured")]
    MissingSecret,

    #[error("JWT token has expired")]
    Expired,

    #[error("Invalid JWT token: {reason}")]
    Invalid { reason: String },
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
