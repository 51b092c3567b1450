use std::num::ParseIntError;

use thiserror::Error;

/// Failures of a single reconcile pass. None are fatal to the process; the
/// whole pass can be retried later.
#[derive(Debug, Error)]
pub enum RetentionError {
    /// The listing collaborator failed. Nothing was grouped or deleted.
    #[error("failed to list {kind}")]
    Listing {
        kind: String,
        #[source]
        source: anyhow::Error,
    },
    /// A spares annotation was not a non-negative integer. The whole pass is aborted.
    #[error("invalid spares value {value:?} on {kind} object {identity:?}")]
    OverrideParse {
        kind: String,
        identity: String,
        value: String,
        #[source]
        source: ParseIntError,
    },
    /// A deletion failed. Deletions issued earlier in the pass stand.
    #[error("failed to delete {kind} object {identity:?}")]
    Deletion {
        kind: String,
        identity: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RetentionError {
    pub fn kind(&self) -> &str {
        match self {
            Self::Listing { kind, .. } | Self::OverrideParse { kind, .. } | Self::Deletion { kind, .. } => kind,
        }
    }

    /// Identity of the offending object, if the error concerns one.
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Listing { .. } => None,
            Self::OverrideParse { identity, .. } | Self::Deletion { identity, .. } => Some(identity),
        }
    }
}
