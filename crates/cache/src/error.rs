use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the cache store.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cache directory {path} could not be read or written: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch failed for {model_id}: {reason}")]
    FetchFailed { model_id: String, reason: String },
}
