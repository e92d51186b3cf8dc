use aim_catalog::Precision;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by recipe resolution (§4.4, §7).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no accelerator visible to the runtime")]
    NoAccelerator,

    /// Covers both "model not found in catalog" and "fallback exhausted" — the
    /// error taxonomy (§7) surfaces a missing model as `NoRecipe` at the
    /// Resolver boundary.
    #[error("no recipe for {model_id}: exhausted {} candidate(s): {attempted:?}", attempted.len())]
    NoRecipe {
        model_id: String,
        attempted: Vec<(u32, Precision)>,
    },
}
