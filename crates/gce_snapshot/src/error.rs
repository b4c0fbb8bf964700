use std::io;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("{0}")]
    Message(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{label} responded with {status}: {message}")]
    Api {
        label: String,
        status: StatusCode,
        message: String,
    },
    #[error("operation {name} failed: {message}")]
    Operation { name: String, message: String },
    #[error("no snapshot found for disk {disk} in project {project}")]
    NotFound { project: String, disk: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication error: {0}")]
    Auth(#[from] gcp_auth::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SnapshotError {
    pub fn config<T: Into<String>>(message: T) -> Self {
        SnapshotError::Config(message.into())
    }
}
