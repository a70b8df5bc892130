//! Access to the remote blob store.
//!
//! The store is an opaque key-value service with three logical buckets
//! (see [`Bucket`]). Besides bytes, a read returns an opaque version token
//! that a later write can be made conditional on, which is how concurrent
//! index writers detect each other.

mod dir;
mod http;
mod memory;

pub use {dir::DirObjectStore, http::HttpObjectStore, memory::MemoryObjectStore};

use {
    crate::progress::ProgressCallback,
    async_trait::async_trait,
    bytes::Bytes,
    cloudex_protocol::{Bucket, ObjectKey},
    serde::{Deserialize, Serialize},
    std::fmt,
    thiserror::Error,
};

/// Physical bucket names of the three logical buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Buckets {
    pub key_exchange: String,
    pub index: String,
    pub file: String,
}

impl Default for Buckets {
    #[inline]
    fn default() -> Self {
        Self {
            key_exchange: "exchangekey".into(),
            index: "exchangeindex".into(),
            file: "exchangefile".into(),
        }
    }
}

impl Buckets {
    #[must_use]
    #[inline]
    pub fn name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::KeyExchange => &self.key_exchange,
            Bucket::Index => &self.index,
            Bucket::File => &self.file,
        }
    }
}

/// Opaque version token (HTTP ETag) of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectVersion(String);

impl ObjectVersion {
    #[must_use]
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectVersion {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Bytes,
    /// `None` if the store does not report versions.
    pub version: Option<ObjectVersion>,
}

/// Outcome of a read. A missing object is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Found(StoredObject),
    NotFound,
}

impl Fetched {
    #[must_use]
    #[inline]
    pub fn into_data(self) -> Option<Bytes> {
        match self {
            Self::Found(object) => Some(object.data),
            Self::NotFound => None,
        }
    }
}

/// Condition a write is applied under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The object must still have this version.
    IfMatch(ObjectVersion),
    /// The object must not exist yet.
    IfAbsent,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the transfer was interrupted.
    #[error("transport failed: {0:#}")]
    Transport(anyhow::Error),
    /// The store answered with an unexpected status.
    #[error("store responded with status {0}")]
    Status(u16),
    #[error("write precondition failed")]
    PreconditionFailed,
}

impl StoreError {
    pub(crate) fn transport(err: impl Into<anyhow::Error>) -> Self {
        Self::Transport(err.into())
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads an object. `progress` receives `(transferred, total)` byte counts.
    async fn get(
        &self,
        bucket: Bucket,
        key: &ObjectKey,
        progress: Option<ProgressCallback>,
    ) -> Result<Fetched, StoreError>;

    /// Creates or replaces an object.
    async fn put(
        &self,
        bucket: Bucket,
        key: &ObjectKey,
        data: Bytes,
        precondition: Option<Precondition>,
        progress: Option<ProgressCallback>,
    ) -> Result<(), StoreError>;
}
