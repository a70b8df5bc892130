//! Content encryption.
//!
//! Objects are encrypted with AES-256 in CBC mode with PKCS#7 padding, keyed with
//! the link key. The IV is derived from the content hash: the uppercase hex SHA-1
//! string is decoded as standard base64 (40 characters give 30 bytes) and the
//! first 16 bytes are used. The IV is therefore deterministic per content, which
//! keeps objects interoperable with existing peers. Encryption alone provides no
//! integrity protection; a wrong key is only detected through invalid padding.

use {
    anyhow::{Context, Result, format_err},
    base64::{Engine, prelude::BASE64_STANDARD},
    cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7},
    cloudex_protocol::{ContentHash, LinkKey},
};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const IV_LENGTH: usize = 16;

/// IV used to encrypt the content with this hash.
#[inline]
pub fn iv_for(hash: &ContentHash) -> Result<[u8; IV_LENGTH]> {
    let decoded = BASE64_STANDARD
        .decode(hash.as_str())
        .context("content hash is not valid base64")?;
    decoded
        .get(..IV_LENGTH)
        .and_then(|iv| <[u8; IV_LENGTH]>::try_from(iv).ok())
        .with_context(|| format!("content hash {hash} is too short for an IV"))
}

#[derive(Clone)]
pub struct Cipher {
    key: LinkKey,
}

impl Cipher {
    #[must_use]
    #[inline]
    pub fn new(key: &LinkKey) -> Self {
        Self { key: key.clone() }
    }

    #[inline]
    pub fn encrypt(&self, hash: &ContentHash, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = iv_for(hash)?;
        let encryptor = Aes256CbcEnc::new_from_slices(self.key.as_bytes(), &iv)
            .map_err(|err| format_err!("invalid cipher parameters: {err}"))?;
        Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    #[inline]
    pub fn decrypt(&self, hash: &ContentHash, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let iv = iv_for(hash)?;
        let decryptor = Aes256CbcDec::new_from_slices(self.key.as_bytes(), &iv)
            .map_err(|err| format_err!("invalid cipher parameters: {err}"))?;
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| format_err!("decryption failed for content {hash}: invalid padding"))
    }
}
