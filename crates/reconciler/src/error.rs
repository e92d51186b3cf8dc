pub type Result<T> = std::result::Result<T, Error>;

/// Top-level reconciler error, wrapping each subsystem's typed error (§7).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no such endpoint spec: {0}")]
    NotFound(String),

    #[error("status write conflict for {0}, retry with fresh generation")]
    StatusConflict(String),

    #[error(transparent)]
    Resolver(#[from] aim_resolver::Error),

    #[error(transparent)]
    Cache(#[from] aim_cache::Error),

    #[error(transparent)]
    Supervisor(#[from] aim_supervisor::Error),
}
