pub type Result<T> = std::result::Result<T, Error>;

/// Top-level CLI error, also carrying the exit code mandated by §6.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no accelerator visible to the runtime")]
    NoAccelerator,

    #[error("no recipe matched: {0}")]
    NoRecipe(String),

    #[error("failed to populate model cache: {0}")]
    CacheFailed(#[from] aim_cache::Error),

    #[error(transparent)]
    Launch(#[from] aim_supervisor::Error),

    #[error("endpoint did not become ready in time")]
    ReadinessTimeout,

    #[error("failed to load catalog: {0}")]
    Catalog(#[from] aim_catalog::Error),

    #[error("failed to read config file {path}: {source}")]
    Config { path: std::path::PathBuf, source: std::io::Error },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse { path: std::path::PathBuf, source: toml::de::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps this error onto the one-shot exit-code contract (§6).
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NoAccelerator => 2,
            Error::NoRecipe(_) => 3,
            Error::CacheFailed(_) => 4,
            Error::Launch(_) => 5,
            Error::ReadinessTimeout => 6,
            Error::Catalog(_) | Error::Config { .. } | Error::ConfigParse { .. } | Error::Io(_) => 1,
        }
    }
}
