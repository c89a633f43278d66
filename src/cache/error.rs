//! Error types for the cache and for loaders feeding it.

use thiserror::Error;

use crate::cache::entry::EntityKind;

/// Failure reported by a loader for its own computation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("load cancelled")]
    Cancelled,

    #[error("loader dropped without resolving")]
    Dropped,

    #[error("load failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("{kind} {id:?} is already cached")]
    DuplicateId { kind: EntityKind, id: String },

    #[error("{kind} {id:?} is not cached")]
    NotFound { kind: EntityKind, id: String },

    #[error("invalid cache budget: {0} bytes")]
    InvalidBudget(u64),

    #[error("budget of {requested} bytes is below current usage of {in_use} bytes")]
    BudgetBelowCurrentUsage { requested: u64, in_use: u64 },

    #[error("cache exhausted: {kind} {id:?} needs {requested} bytes, at most {available} available")]
    CacheExhausted {
        kind: EntityKind,
        id: String,
        requested: u64,
        available: u64,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{kind} {id:?} was abandoned before it settled")]
    Abandoned { kind: EntityKind, id: String },

    #[error("no async runtime to drive the load of {kind} {id:?}")]
    NoRuntime { kind: EntityKind, id: String },
}

impl CacheError {
    /// Short name used as the `error_kind` field in logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CacheError::DuplicateId { .. } => "DuplicateId",
            CacheError::NotFound { .. } => "NotFound",
            CacheError::InvalidBudget(_) => "InvalidBudget",
            CacheError::BudgetBelowCurrentUsage { .. } => "BudgetBelowCurrentUsage",
            CacheError::CacheExhausted { .. } => "CacheExhausted",
            CacheError::Load(_) => "LoadFailed",
            CacheError::Abandoned { .. } => "Abandoned",
            CacheError::NoRuntime { .. } => "NoRuntime",
        }
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = CacheError::CacheExhausted {
            kind: EntityKind::Image,
            id: "im1".into(),
            requested: 20,
            available: 10,
        };
        assert_eq!(
            err.to_string(),
            "cache exhausted: image \"im1\" needs 20 bytes, at most 10 available"
        );
        assert_eq!(err.kind_name(), "CacheExhausted");
    }

    #[test]
    fn test_load_error_is_transparent() {
        let err: CacheError = LoadError::Failed("bad transfer syntax".into()).into();
        assert_eq!(err.to_string(), "load failed: bad transfer syntax");
        assert_eq!(err.kind_name(), "LoadFailed");
    }
}
