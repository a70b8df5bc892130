use {
    crate::{link::LinkingState, store::StoreError},
    cloudex_protocol::ContentHash,
    thiserror::Error,
};

pub type Result<T, E = ExchangeError> = std::result::Result<T, E>;

/// Failure of a link or manager operation.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("{operation} requires link state {expected}, but the link is {actual}")]
    InvalidState {
        operation: &'static str,
        expected: LinkingState,
        actual: LinkingState,
    },
    #[error("object store request failed: {0}")]
    Network(#[from] StoreError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("failed to parse {what}: {error:#}")]
    Deserialization {
        what: &'static str,
        error: anyhow::Error,
    },
    #[error("encryption failed: {0:#}")]
    Crypto(anyhow::Error),
    #[error("transfer of {hash} failed for parts {failed_parts:?}")]
    PartialTransfer {
        hash: ContentHash,
        failed_parts: Vec<usize>,
    },
    #[error("failed to extract archive: {0:#}")]
    Extraction(anyhow::Error),
    #[error("filesystem operation failed: {0:#}")]
    Filesystem(anyhow::Error),
    #[error("invalid index entry: {0}")]
    InvalidEntry(String),
    #[error("index write lost to concurrent writers {attempts} times in a row")]
    Conflict { attempts: usize },
    #[error("link `{0}` already exists")]
    DuplicateLink(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl ExchangeError {
    pub(crate) fn deserialization(what: &'static str, error: impl Into<anyhow::Error>) -> Self {
        Self::Deserialization {
            what,
            error: error.into(),
        }
    }

    pub(crate) fn filesystem(err: impl Into<anyhow::Error>) -> Self {
        Self::Filesystem(err.into())
    }
}
