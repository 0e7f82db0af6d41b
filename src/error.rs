use crate::lifecycle::ServerStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MasterError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for {field}")]
    InvalidArgument { field: &'static str, value: String },

    #[error("Master is not running (current status: {status})")]
    NotRunning { status: ServerStatus },

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: ServerStatus, to: ServerStatus },

    #[error("Registry error: {message}")]
    Registry { message: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl MasterError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn registry<S: Into<String>>(message: S) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    pub fn invalid_argument<S: Into<String>>(field: &'static str, value: S) -> Self {
        Self::InvalidArgument {
            field,
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MasterError>;
