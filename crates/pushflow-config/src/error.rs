use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error("Manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error(
        "No target set: {0} is missing.\n\
        Set it in ~/.config/pushflow/target.json or with the matching PUSHFLOW_* environment variable"
    )]
    MissingTarget(&'static str),

    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid target file {path}: {source}")]
    TargetFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
