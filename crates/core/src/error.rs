use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    /// A provider credential or required capability is missing. Fatal to the
    /// whole run.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("pdf error: {0}")]
    Pdf(String),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("inference error: {0}")]
    Inference(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExtractError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, ExtractError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
