//! Closed error/reject taxonomies for the stratifier core (spec.md §4.3,
//! §7). Grounded in `tos_common::error`'s per-domain `thiserror` enum style
//! and in `tos_daemon::core::mining::stratum::StratumError`'s closed set of
//! named rejections, but matching spec.md §4.3's literal closed set and
//! stable wire strings instead of numeric JSON-RPC error codes, since
//! spec.md §4.3/§6 specify `[false, "<reason>"]` string responses, not
//! Stratum V2-style numeric codes.

use thiserror::Error;

/// The single closed set of share-rejection reasons spec.md §4.3 mandates.
/// `Display` renders the exact stable string sent back to the miner.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareReject {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not subscribed")]
    NotSubscribed,

    #[error("Stale")]
    Stale,

    #[error("Duplicate share")]
    DuplicateShare,

    #[error("High hash")]
    HighHash,

    #[error("Low difficulty")]
    LowDifficulty,

    #[error("Invalid parameters")]
    InvalidParameters,

    #[error("Bad username/worker")]
    BadUsernameWorker,
}

impl ShareReject {
    /// The exact wire string (spec.md §6: `[false, "<reason>"]`).
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ShareReject::Unauthorized => "Unauthorized",
            ShareReject::NotSubscribed => "Not subscribed",
            ShareReject::Stale => "Stale",
            ShareReject::DuplicateShare => "Duplicate share",
            ShareReject::HighHash => "High hash",
            ShareReject::LowDifficulty => "Low difficulty",
            ShareReject::InvalidParameters => "Invalid parameters",
            ShareReject::BadUsernameWorker => "Bad username/worker",
        }
    }
}

/// Workbase manager errors (spec.md §4.1).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbaseError {
    #[error("workbase not found or already freed")]
    NotFound,
}

/// Client registry errors (spec.md §4.2).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("client not found")]
    NotFound,

    #[error("client id already registered")]
    AlreadyRegistered,

    #[error("two clients were assigned the same extranonce1")]
    DuplicateExtranonce1,
}
