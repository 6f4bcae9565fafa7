use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BitsError {
    #[error("Application path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("No app files found in {0}")]
    Empty(PathBuf),

    #[error("Invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BitsError>;
