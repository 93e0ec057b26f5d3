//! Error handling for Reel-Fetch

use crate::types::DownloadStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported source: {0} (only magnet URIs can be added)")]
    UnsupportedSource(String),

    #[error("invalid magnet URI: {0}")]
    InvalidMagnet(String),

    #[error("download engine fault: {0}")]
    EngineFault(String),

    #[error("cannot {action} a download that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: DownloadStatus,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("engine is shutting down")]
    Shutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("channel error: {0}")]
    Channel(String),
}

impl From<gosh_dl::EngineError> for Error {
    fn from(err: gosh_dl::EngineError) -> Self {
        match err {
            gosh_dl::EngineError::NotFound(msg) => Error::NotFound(msg),
            gosh_dl::EngineError::InvalidInput { field, message } => {
                Error::InvalidInput(format!("{}: {}", field, message))
            }
            gosh_dl::EngineError::Network { message, .. } => Error::Network(message),
            gosh_dl::EngineError::Shutdown => Error::Shutdown,
            other => Error::EngineFault(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Network(format!("request timed out: {}", err))
        } else {
            Error::Network(err.to_string())
        }
    }
}

impl<T> From<async_channel::SendError<T>> for Error {
    fn from(err: async_channel::SendError<T>) -> Self {
        Error::Channel(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
