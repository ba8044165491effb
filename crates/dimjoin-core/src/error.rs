//! Crate-level error type.

use crate::lookup::{ConfigError, JoinError, KeyError, LoadError, ReleaseError};

/// Any error raised by `dimjoin-core`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Lookup key construction failed.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Side table load failed.
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// Releasing a loader resource failed.
    #[error(transparent)]
    Release(#[from] ReleaseError),

    /// Join engine construction failed.
    #[error("join error: {0}")]
    Join(#[from] JoinError),
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let err: Error = LoadError::Query("syntax".into()).into();
        assert_eq!(err.to_string(), "load error: query failed: syntax");

        let err: Error = KeyError::NullField("id".into()).into();
        assert_eq!(err.to_string(), "equality field is null: id");

        let err: Error = ConfigError::Missing("table".into()).into();
        assert!(matches!(err, Error::Config(_)));
    }
}
