//! Error types for ftl2-runner.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Writing to the outbound stream failed. Always fatal for the job.
    #[error("transport write failed: {0}")]
    Transport(std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("automation failed: {0}")]
    Automation(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a failure of the outbound channel itself?
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
