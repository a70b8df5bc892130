//! Object keys used in the three logical buckets of the store:
//!
//! - `KEB/{code}` in the key exchange bucket holds a link key published for pairing;
//! - `IB/{base64(link key)}` in the index bucket holds a link's index file;
//! - `{hash}.{part}` in the file bucket holds one chunk of an exchanged object.

use {
    crate::{ContentHash, LinkCode, LinkKey},
    derive_more::Display,
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
pub enum Bucket {
    KeyExchange,
    Index,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct ObjectKey(String);

impl ObjectKey {
    #[must_use]
    #[inline]
    pub fn key_exchange(code: &LinkCode) -> Self {
        Self(format!("KEB/{code}"))
    }

    #[must_use]
    #[inline]
    pub fn index(key: &LinkKey) -> Self {
        Self(format!("IB/{}", key.to_base64()))
    }

    #[must_use]
    #[inline]
    pub fn part(hash: &ContentHash, index: usize) -> Self {
        Self(format!("{hash}.{index}"))
    }

    /// Key of an object that is stored in one piece.
    #[must_use]
    #[inline]
    pub fn raw(name: &str) -> Self {
        Self(name.to_owned())
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
