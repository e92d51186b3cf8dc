use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by catalog loading and lookup.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("model not found: {0}")]
    NotFound(String),

    #[error("malformed catalog entry in {path}: {reason}")]
    MalformedCatalog { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}
