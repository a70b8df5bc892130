pub mod chunk;
mod code;
pub mod credentials;
pub mod encoding;
pub mod index;
pub mod keys;
pub mod util;

pub use crate::{
    code::LinkCode,
    credentials::{AccessToken, CloudLinkData, LinkKey},
    index::{Entry, FileInfo, FileType, IndexFile},
    keys::{Bucket, ObjectKey},
};

use {
    anyhow::{Error, ensure},
    chrono::Utc,
    serde::{Deserialize, Serialize},
    sha1::{Digest, Sha1},
    std::{fmt, str::FromStr},
};

pub type DateTimeUtc = chrono::DateTime<Utc>;

/// Length of a hex encoded SHA-1 digest.
const CONTENT_HASH_LENGTH: usize = 40;

/// Identity of an exchanged object: SHA-1 of the packaged (unencrypted) archive
/// as an uppercase hex string.
///
/// The hash names the object's chunks in the file bucket, keys its entry in the
/// index and seeds the IV used to encrypt it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    #[must_use]
    #[inline]
    pub fn of(data: &[u8]) -> Self {
        Self(hex::encode_upper(Sha1::digest(data)))
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ensure!(
            s.len() == CONTENT_HASH_LENGTH,
            "invalid content hash length; got {}, expected {CONTENT_HASH_LENGTH}",
            s.len(),
        );
        ensure!(
            s.chars().all(|c| c.is_ascii_hexdigit()),
            "content hash must be hex encoded: `{s}`",
        );
        Ok(Self(s.to_ascii_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_uppercase_sha1() {
        let hash = ContentHash::of(b"abc");
        assert_eq!(hash.as_str(), "A9993E364706816ABA3E25717850C26C9CD0D89D");
    }

    #[test]
    fn content_hash_from_str() {
        let hash: ContentHash = "a9993e364706816aba3e25717850c26c9cd0d89d".parse().unwrap();
        assert_eq!(hash, ContentHash::of(b"abc"));
        ContentHash::from_str("").unwrap_err();
        ContentHash::from_str("A9993E364706816ABA3E25717850C26C9CD0D89").unwrap_err();
        ContentHash::from_str("Z9993E364706816ABA3E25717850C26C9CD0D89D").unwrap_err();
    }
}
