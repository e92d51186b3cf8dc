pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the process supervisor (§4.6, §7).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("an instance with identity {0} already exists")]
    AlreadyExists(String),

    #[error("failed to launch {identity}: {reason}")]
    LaunchError { identity: String, reason: String },

    #[error("no instance with identity {0}")]
    NotFound(String),
}
