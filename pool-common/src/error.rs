use thiserror::Error;

/// Errors raised while validating a [`crate::config::PoolConfig`].
///
/// Every variant here corresponds to a row of the "Config" section of the
/// error handling table: a bad config value aborts startup rather than being
/// silently substituted with a default.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("startdiff must be non-negative, got {0}")]
    NegativeStartDiff(f64),

    #[error("mindiff must be non-negative, got {0}")]
    NegativeMinDiff(f64),

    #[error("pool_mindiff must be non-negative, got {0}")]
    NegativePoolMinDiff(f64),

    #[error("maxdiff must be non-negative, got {0}")]
    NegativeMaxDiff(f64),

    #[error("maxdiff ({maxdiff}) is non-zero but below mindiff ({mindiff})")]
    MaxDiffBelowMinDiff { mindiff: f64, maxdiff: f64 },

    #[error("donation percent must be finite, got {0}")]
    NonFiniteDonation(f64),
}

/// Errors from difficulty <-> target conversions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DifficultyError {
    #[error("difficulty must be positive and finite, got {0}")]
    Invalid(f64),
}

/// Errors from hex/address decoding helpers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("invalid hex string")]
    InvalidHex,

    #[error("hex string has odd length")]
    OddLengthHex,

    #[error("expected {expected} bytes, got {got}")]
    WrongLength { expected: usize, got: usize },

    #[error("unrecognised address encoding")]
    UnknownAddress,

    #[error("invalid or empty worker name")]
    InvalidWorkerName,
}
