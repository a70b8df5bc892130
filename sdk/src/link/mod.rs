//! A link is one client's membership in a group of clients that share a key.
//!
//! Pairing publishes the key under a short code in the key exchange bucket;
//! other clients fetch it with the code. Once linked, a client can upload
//! packaged folders (encrypted, split into parts) and announce them in the
//! group's index, and download what other members announced.

mod download;
mod index;
mod upload;

pub use {download::Destination, index::INDEX_WRITE_ATTEMPTS, upload::ResourceInfo};

use {
    crate::{
        crypto::Cipher,
        error::{ExchangeError, Result},
        package::{Packager, ZipPackager},
        progress::ProgressCallback,
        store::{ObjectStore, Precondition, StoreError},
    },
    bytes::Bytes,
    cloudex_protocol::{Bucket, CloudLinkData, ContentHash, Entry, LinkCode, LinkKey, ObjectKey},
    derive_more::Display,
    std::{fmt, sync::Arc},
    tokio::task::spawn_blocking,
    tracing::{error, info, instrument, warn},
};

pub const DEFAULT_NR_OF_PARTS: usize = 10;

/// How many fresh codes are tried when a generated code is already taken.
const CODE_PUBLISH_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LinkingState {
    #[display("not linked")]
    NotLinked,
    #[display("linking")]
    Linking,
    #[display("linked")]
    Linked,
}

pub type EntryCallback = Arc<dyn Fn(&ContentHash, &Entry) + Send + Sync>;

/// Observers of a link's transfers.
///
/// Download lifecycle callbacks are the only signal about downloads a link
/// gives; anything that tracks running imports subscribes here.
#[derive(Clone, Default)]
pub struct LinkEvents {
    download_started: Vec<EntryCallback>,
    download_failed: Vec<EntryCallback>,
    download_finished: Vec<EntryCallback>,
    upload_progress: Option<ProgressCallback>,
    download_progress: Option<ProgressCallback>,
}

impl LinkEvents {
    #[inline]
    pub fn on_download_started(&mut self, f: impl Fn(&ContentHash, &Entry) + Send + Sync + 'static) {
        self.download_started.push(Arc::new(f));
    }

    #[inline]
    pub fn on_download_failed(&mut self, f: impl Fn(&ContentHash, &Entry) + Send + Sync + 'static) {
        self.download_failed.push(Arc::new(f));
    }

    #[inline]
    pub fn on_download_finished(
        &mut self,
        f: impl Fn(&ContentHash, &Entry) + Send + Sync + 'static,
    ) {
        self.download_finished.push(Arc::new(f));
    }

    /// Replaces the default progress logging of uploads.
    #[inline]
    pub fn set_upload_progress(&mut self, f: impl Fn(u64, u64) + Send + Sync + 'static) {
        self.upload_progress = Some(Arc::new(f));
    }

    /// Replaces the default progress logging of downloads.
    #[inline]
    pub fn set_download_progress(&mut self, f: impl Fn(u64, u64) + Send + Sync + 'static) {
        self.download_progress = Some(Arc::new(f));
    }

    fn fire(callbacks: &[EntryCallback], hash: &ContentHash, entry: &Entry) {
        for callback in callbacks {
            callback(hash, entry);
        }
    }
}

fn progress_or_log(callback: Option<&ProgressCallback>, direction: &'static str) -> ProgressCallback {
    if let Some(callback) = callback {
        return Arc::clone(callback);
    }
    Arc::new(move |done, total| {
        let percent = done
            .saturating_mul(100)
            .checked_div(total)
            .unwrap_or(100);
        info!("{direction} progressing {percent}%");
    })
}

pub struct CloudExchangeLink {
    store: Arc<dyn ObjectStore>,
    packager: Arc<dyn Packager>,
    encrypt: bool,
    state: LinkingState,
    key: Option<LinkKey>,
    events: LinkEvents,
}

impl fmt::Debug for CloudExchangeLink {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudExchangeLink")
            .field("state", &self.state)
            .field("encrypt", &self.encrypt)
            .finish_non_exhaustive()
    }
}

impl CloudExchangeLink {
    /// Creates an unlinked link. `encrypt = false` transfers plaintext and is
    /// only meant for testing.
    #[must_use]
    #[inline]
    pub fn new(store: Arc<dyn ObjectStore>, encrypt: bool) -> Self {
        Self {
            store,
            packager: Arc::new(ZipPackager),
            encrypt,
            state: LinkingState::NotLinked,
            key: None,
            events: LinkEvents::default(),
        }
    }

    #[must_use]
    #[inline]
    pub fn with_packager(mut self, packager: Arc<dyn Packager>) -> Self {
        self.packager = packager;
        self
    }

    /// Restores a link from persisted data.
    ///
    /// A corrupt key is logged and leaves the link unlinked.
    #[must_use]
    #[inline]
    pub fn from_cloud_link_data(
        data: &CloudLinkData,
        store: Arc<dyn ObjectStore>,
        encrypt: bool,
    ) -> Self {
        let mut link = Self::new(store, encrypt);
        match data.link_key.parse::<LinkKey>() {
            Ok(key) => link.activate_with_encryption_key(key),
            Err(err) => error!(name = %data.name, ?err, "invalid link key in stored link data"),
        }
        link
    }

    /// Data to persist this link under `name`.
    #[inline]
    pub fn data_to_store(&self, name: &str) -> Result<CloudLinkData> {
        let key = self.linked_key("data_to_store")?;
        Ok(CloudLinkData {
            link_key: key.to_base64(),
            name: name.to_owned(),
        })
    }

    #[must_use]
    #[inline]
    pub fn state(&self) -> LinkingState {
        self.state
    }

    #[must_use]
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.state == LinkingState::Linked
    }

    #[must_use]
    #[inline]
    pub fn link_key(&self) -> Option<&LinkKey> {
        self.key.as_ref()
    }

    #[must_use]
    #[inline]
    pub fn encrypts(&self) -> bool {
        self.encrypt
    }

    #[inline]
    pub fn events_mut(&mut self) -> &mut LinkEvents {
        &mut self.events
    }

    /// Links with a known key without touching the store.
    #[inline]
    pub fn activate_with_encryption_key(&mut self, key: LinkKey) {
        self.key = Some(key);
        self.state = LinkingState::Linked;
    }

    fn require(&self, expected: LinkingState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        let err = ExchangeError::InvalidState {
            operation,
            expected,
            actual: self.state,
        };
        error!("{err}");
        Err(err)
    }

    fn linked_key(&self, operation: &'static str) -> Result<&LinkKey> {
        self.require(LinkingState::Linked, operation)?;
        self.key.as_ref().ok_or(ExchangeError::InvalidState {
            operation,
            expected: LinkingState::Linked,
            actual: LinkingState::NotLinked,
        })
    }

    /// Starts a new group: generates a key and publishes it under a fresh code.
    #[instrument(skip_all)]
    pub async fn generate_code_and_link(&mut self) -> Result<LinkCode> {
        self.require(LinkingState::NotLinked, "generate_code_and_link")?;
        let key = LinkKey::generate();
        self.state = LinkingState::Linking;
        match self.publish_key(&key).await {
            Ok(code) => {
                self.key = Some(key);
                self.state = LinkingState::Linked;
                info!(%code, "linked as the first member of a new group");
                Ok(code)
            }
            Err(err) => {
                self.state = LinkingState::NotLinked;
                error!("linking failed: {err}");
                Err(err)
            }
        }
    }

    /// Publishes the current key under a new code for another device to join.
    #[instrument(skip_all)]
    pub async fn generate_invite_code(&self) -> Result<LinkCode> {
        let key = self.linked_key("generate_invite_code")?;
        let code = self.publish_key(key).await.inspect_err(|err| {
            error!("failed to publish invite code: {err}");
        })?;
        info!(%code, "published invite code");
        Ok(code)
    }

    async fn publish_key(&self, key: &LinkKey) -> Result<LinkCode> {
        let data = Bytes::copy_from_slice(key.as_bytes());
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let code = LinkCode::generate();
            let result = self
                .store
                .put(
                    Bucket::KeyExchange,
                    &ObjectKey::key_exchange(&code),
                    data.clone(),
                    Some(Precondition::IfAbsent),
                    None,
                )
                .await;
            match result {
                Ok(()) => return Ok(code),
                Err(StoreError::PreconditionFailed) if attempt < CODE_PUBLISH_ATTEMPTS => {
                    warn!(%code, "code already taken, generating another one");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Joins the group whose key was published under `code`.
    ///
    /// The code is accepted in any letter case.
    #[instrument(skip_all, fields(code = tracing::field::Empty))]
    pub async fn link_with_existing_code(&mut self, code: &str) -> Result<()> {
        self.require(LinkingState::NotLinked, "link_with_existing_code")?;
        let code: LinkCode = code
            .parse()
            .map_err(|err| ExchangeError::deserialization("link code", err))?;
        tracing::Span::current().record("code", code.as_str());

        self.state = LinkingState::Linking;
        match self.fetch_key(&code).await {
            Ok(key) => {
                self.key = Some(key);
                self.state = LinkingState::Linked;
                info!("linked with existing code");
                Ok(())
            }
            Err(err) => {
                self.state = LinkingState::NotLinked;
                warn!("linking with code failed: {err}");
                Err(err)
            }
        }
    }

    async fn fetch_key(&self, code: &LinkCode) -> Result<LinkKey> {
        let data = self
            .store
            .get(Bucket::KeyExchange, &ObjectKey::key_exchange(code), None)
            .await?
            .into_data()
            .ok_or_else(|| ExchangeError::NotFound(format!("link code {code}")))?;
        LinkKey::from_bytes(&data).map_err(|err| ExchangeError::deserialization("link key", err))
    }

    fn cipher(&self, operation: &'static str) -> Result<Option<Cipher>> {
        let key = self.linked_key(operation)?;
        Ok(self.encrypt.then(|| Cipher::new(key)))
    }

    /// Encrypts `data` if encryption is enabled.
    async fn seal(&self, hash: &ContentHash, data: Vec<u8>) -> Result<Vec<u8>> {
        let Some(cipher) = self.cipher("put_object")? else {
            return Ok(data);
        };
        let hash = hash.clone();
        spawn_blocking(move || cipher.encrypt(&hash, &data))
            .await
            .map_err(|err| ExchangeError::Crypto(err.into()))?
            .map_err(ExchangeError::Crypto)
    }

    /// Decrypts `data` if encryption is enabled.
    async fn open(&self, hash: &ContentHash, data: Vec<u8>) -> Result<Vec<u8>> {
        let Some(cipher) = self.cipher("get_object_in_multiple_parts")? else {
            return Ok(data);
        };
        let hash = hash.clone();
        spawn_blocking(move || cipher.decrypt(&hash, &data))
            .await
            .map_err(|err| ExchangeError::Crypto(err.into()))?
            .map_err(ExchangeError::Crypto)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::store::{Fetched, MemoryObjectStore},
    };

    fn link(store: &MemoryObjectStore) -> CloudExchangeLink {
        CloudExchangeLink::new(Arc::new(store.clone()), true)
    }

    #[tokio::test]
    async fn generate_code_and_join() {
        let store = MemoryObjectStore::new();
        let mut a = link(&store);
        let mut b = link(&store);

        let code = a.generate_code_and_link().await.unwrap();
        assert_eq!(a.state(), LinkingState::Linked);
        let published = store
            .object(Bucket::KeyExchange, &ObjectKey::key_exchange(&code))
            .unwrap();
        assert_eq!(&published[..], a.link_key().unwrap().as_bytes());

        b.link_with_existing_code(&code.as_str().to_lowercase())
            .await
            .unwrap();
        assert_eq!(b.state(), LinkingState::Linked);
        assert_eq!(a.link_key(), b.link_key());
    }

    #[tokio::test]
    async fn failed_publish_reverts_state() {
        let store = MemoryObjectStore::new();
        store.set_unavailable(true);
        let mut a = link(&store);
        let err = a.generate_code_and_link().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Network(_)));
        assert_eq!(a.state(), LinkingState::NotLinked);
        assert!(a.link_key().is_none());
    }

    #[tokio::test]
    async fn unknown_code_leaves_link_unlinked() {
        let store = MemoryObjectStore::new();
        let mut b = link(&store);
        let err = b.link_with_existing_code("ABCDEF").await.unwrap_err();
        assert!(matches!(err, ExchangeError::NotFound(_)));
        assert_eq!(b.state(), LinkingState::NotLinked);

        let err = b.link_with_existing_code("AB").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Deserialization { .. }));
        assert_eq!(b.state(), LinkingState::NotLinked);
    }

    #[tokio::test]
    async fn corrupt_published_key_is_rejected() {
        let store = MemoryObjectStore::new();
        let code: LinkCode = "ABCDEF".parse().unwrap();
        store
            .put(
                Bucket::KeyExchange,
                &ObjectKey::key_exchange(&code),
                Bytes::from_static(b"short"),
                None,
                None,
            )
            .await
            .unwrap();
        let mut b = link(&store);
        let err = b.link_with_existing_code("abcdef").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Deserialization { .. }));
        assert_eq!(b.state(), LinkingState::NotLinked);
    }

    #[tokio::test]
    async fn preconditions_are_enforced() {
        let store = MemoryObjectStore::new();
        let mut a = link(&store);
        let err = a.generate_invite_code().await.unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::InvalidState {
                expected: LinkingState::Linked,
                actual: LinkingState::NotLinked,
                ..
            }
        ));
        a.download_index().await.unwrap_err();
        a.data_to_store("defaultlink").unwrap_err();

        a.activate_with_encryption_key(LinkKey::generate());
        let err = a.generate_code_and_link().await.unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidState { .. }));
        let err = a.link_with_existing_code("ABCDEF").await.unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidState { .. }));
        assert_eq!(a.state(), LinkingState::Linked);
    }

    #[tokio::test]
    async fn invite_code_publishes_same_key() {
        let store = MemoryObjectStore::new();
        let mut a = link(&store);
        let first = a.generate_code_and_link().await.unwrap();
        let invite = a.generate_invite_code().await.unwrap();
        let invite_key = ObjectKey::key_exchange(&invite);
        let published = store.get(Bucket::KeyExchange, &invite_key, None);
        let Fetched::Found(object) = published.await.unwrap() else {
            panic!("invite code must be published");
        };
        assert_eq!(&object.data[..], a.link_key().unwrap().as_bytes());
        assert_eq!(a.state(), LinkingState::Linked);
        // Both codes stay valid.
        assert!(store
            .object(Bucket::KeyExchange, &ObjectKey::key_exchange(&first))
            .is_some());
    }

    #[test]
    fn link_data_round_trip() {
        let store = MemoryObjectStore::new();
        let mut a = link(&store);
        let key = LinkKey::generate();
        a.activate_with_encryption_key(key.clone());
        let data = a.data_to_store("office").unwrap();
        assert_eq!(data.name, "office");
        assert_eq!(data.link_key, key.to_base64());

        let restored = CloudExchangeLink::from_cloud_link_data(&data, Arc::new(store.clone()), true);
        assert!(restored.is_linked());
        assert_eq!(restored.link_key(), Some(&key));

        let corrupt = CloudLinkData {
            link_key: "not a key".into(),
            name: "broken".into(),
        };
        let restored = CloudExchangeLink::from_cloud_link_data(&corrupt, Arc::new(store), true);
        assert_eq!(restored.state(), LinkingState::NotLinked);
    }
}
