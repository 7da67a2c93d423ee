use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed library file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no search results at {0}, run a search first")]
    NoSearchResults(PathBuf),
    #[error("no downloaded papers in {0}, run `paperplumber download <path>` first")]
    NoDownloads(PathBuf),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("download failed: {0}")]
    Download(String),
}

pub type Result<T> = std::result::Result<T, LibraryError>;
