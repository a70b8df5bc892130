//! Named links of one client, their persistence and download bookkeeping.

use {
    crate::{
        error::{ExchangeError, Result},
        link::{CloudExchangeLink, LinkingState},
        storage::StorageProvider,
        store::ObjectStore,
    },
    cloudex_protocol::{CloudLinkData, ContentHash, DateTimeUtc, Entry, IndexFile},
    derive_more::Display,
    parking_lot::Mutex,
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        fmt,
        path::{Path, PathBuf},
        sync::Arc,
    },
    tracing::{info, instrument, warn},
};

/// Key the links are saved under in the storage provider.
pub const STORAGE_KEY: &str = "CloudexLinkManager";

pub const DEFAULT_LINK_NAME: &str = "defaultlink";

/// How a file in the index relates to what was imported locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CloudFileState {
    #[display("new version available")]
    NewVersionAvailable,
    #[display("importing")]
    Importing,
    #[display("up to date")]
    UpToDate,
    #[display("unavailable")]
    Unavailable,
}

#[derive(Debug, Default)]
struct DownloadTracking {
    /// `<icon>/<main file stem>` of resources currently downloading.
    files_downloading: HashSet<PathBuf>,
    /// Entries whose download started and that were not yet seen imported.
    entries_importing: HashSet<ContentHash>,
    download_attempts: HashMap<ContentHash, u32>,
}

impl DownloadTracking {
    fn started(&mut self, hash: &ContentHash, entry: &Entry) {
        let attempts = self.download_attempts.entry(hash.clone()).or_default();
        *attempts = attempts.saturating_add(1);
        self.entries_importing.insert(hash.clone());
        self.files_downloading.insert(entry_local_path(entry));
    }

    fn failed(&mut self, hash: &ContentHash, entry: &Entry) {
        self.entries_importing.remove(hash);
        self.files_downloading.remove(&entry_local_path(entry));
    }

    // The entry stays importing until an import at or after its creation is observed.
    fn finished(&mut self, entry: &Entry) {
        self.files_downloading.remove(&entry_local_path(entry));
    }
}

/// Folder of `entry` relative to the import dir: `<icon>/<stem>`.
#[must_use]
pub fn entry_local_path(entry: &Entry) -> PathBuf {
    let stem = entry
        .filename()
        .and_then(|name| Path::new(name).file_stem())
        .unwrap_or_default();
    Path::new(entry.icon()).join(stem)
}

/// Collection of named links sharing one object store.
pub struct LinkManager {
    store: Arc<dyn ObjectStore>,
    encrypt: bool,
    links: BTreeMap<String, CloudExchangeLink>,
    storage: Option<Arc<dyn StorageProvider>>,
    tracking: Arc<Mutex<DownloadTracking>>,
}

impl fmt::Debug for LinkManager {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkManager")
            .field("links", &self.links)
            .field("encrypt", &self.encrypt)
            .finish_non_exhaustive()
    }
}

impl LinkManager {
    #[must_use]
    #[inline]
    pub fn new(store: Arc<dyn ObjectStore>, encrypt: bool) -> Self {
        Self {
            store,
            encrypt,
            links: BTreeMap::new(),
            storage: None,
            tracking: Arc::default(),
        }
    }

    #[must_use]
    #[inline]
    pub fn with_storage(mut self, storage: Arc<dyn StorageProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Adds `link` under `name` and starts tracking its downloads.
    pub fn add_link(&mut self, mut link: CloudExchangeLink, name: &str) -> Result<()> {
        if self.links.contains_key(name) {
            return Err(ExchangeError::DuplicateLink(name.to_owned()));
        }
        let events = link.events_mut();
        let tracking = Arc::clone(&self.tracking);
        events.on_download_started(move |hash, entry| tracking.lock().started(hash, entry));
        let tracking = Arc::clone(&self.tracking);
        events.on_download_failed(move |hash, entry| tracking.lock().failed(hash, entry));
        let tracking = Arc::clone(&self.tracking);
        events.on_download_finished(move |_, entry| tracking.lock().finished(entry));
        self.links.insert(name.to_owned(), link);
        Ok(())
    }

    /// Adds or replaces a link without subscribing to its events.
    #[inline]
    pub fn set_link(&mut self, link: CloudExchangeLink, name: &str) {
        self.links.insert(name.to_owned(), link);
    }

    #[inline]
    pub fn get_or_create_default_link(&mut self) -> Result<&mut CloudExchangeLink> {
        if self.has_default_link() {
            return self
                .default_link_mut()
                .ok_or_else(|| ExchangeError::NotFound(DEFAULT_LINK_NAME.to_owned()));
        }
        self.create_default_link()
    }

    /// Creates an unlinked default link; fails if one exists.
    #[inline]
    pub fn create_default_link(&mut self) -> Result<&mut CloudExchangeLink> {
        let link = CloudExchangeLink::new(Arc::clone(&self.store), self.encrypt);
        self.add_link(link, DEFAULT_LINK_NAME)?;
        self.find_link_mut(DEFAULT_LINK_NAME)
            .ok_or_else(|| ExchangeError::NotFound(DEFAULT_LINK_NAME.to_owned()))
    }

    #[must_use]
    #[inline]
    pub fn default_link(&self) -> Option<&CloudExchangeLink> {
        self.find_link(DEFAULT_LINK_NAME)
    }

    #[inline]
    pub fn default_link_mut(&mut self) -> Option<&mut CloudExchangeLink> {
        self.find_link_mut(DEFAULT_LINK_NAME)
    }

    #[must_use]
    #[inline]
    pub fn has_default_link(&self) -> bool {
        self.has_link_with_name(DEFAULT_LINK_NAME)
    }

    #[must_use]
    #[inline]
    pub fn is_linked_with_default_link(&self) -> bool {
        self.default_link()
            .is_some_and(|link| link.state() == LinkingState::Linked)
    }

    #[must_use]
    #[inline]
    pub fn find_link(&self, name: &str) -> Option<&CloudExchangeLink> {
        self.links.get(name)
    }

    #[inline]
    pub fn find_link_mut(&mut self, name: &str) -> Option<&mut CloudExchangeLink> {
        self.links.get_mut(name)
    }

    #[must_use]
    #[inline]
    pub fn has_link_with_name(&self, name: &str) -> bool {
        self.links.contains_key(name)
    }

    #[inline]
    pub fn remove_link(&mut self, name: &str) -> Option<CloudExchangeLink> {
        self.links.remove(name)
    }

    #[inline]
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.links.clear();
    }

    /// JSON array of [`CloudLinkData`]. Links that are not linked have no
    /// key to save and are left out.
    pub fn serialize_to_json(&self) -> Result<String> {
        let data: Vec<CloudLinkData> = self
            .links
            .iter()
            .filter_map(|(name, link)| {
                link.data_to_store(name)
                    .inspect_err(|_| warn!(%name, "skipping link that is not linked"))
                    .ok()
            })
            .collect();
        serde_json::to_string(&data)
            .map_err(|err| ExchangeError::deserialization("link list", err))
    }

    #[inline]
    pub fn from_json(json: &str, store: Arc<dyn ObjectStore>, encrypt: bool) -> Result<Self> {
        let mut manager = Self::new(store, encrypt);
        manager.clear_links_and_create_from_json(json)?;
        Ok(manager)
    }

    /// Replaces all links with the ones in `json`. Of duplicate names, the
    /// first one wins.
    pub fn clear_links_and_create_from_json(&mut self, json: &str) -> Result<()> {
        let data: Vec<CloudLinkData> = serde_json::from_str(json)
            .map_err(|err| ExchangeError::deserialization("link list", err))?;
        self.clear();
        for item in data {
            if self.has_link_with_name(&item.name) {
                warn!(name = %item.name, "ignoring duplicate stored link");
                continue;
            }
            let link = CloudExchangeLink::from_cloud_link_data(
                &item,
                Arc::clone(&self.store),
                self.encrypt,
            );
            self.add_link(link, &item.name)?;
        }
        Ok(())
    }

    fn storage(&self) -> Result<&dyn StorageProvider> {
        self.storage
            .as_deref()
            .ok_or_else(|| ExchangeError::NotFound("storage provider".into()))
    }

    #[instrument(skip_all)]
    pub fn save_to_storage(&self) -> Result<()> {
        let json = self.serialize_to_json()?;
        self.storage()?
            .set_string(STORAGE_KEY, &json)
            .map_err(ExchangeError::Filesystem)?;
        info!(links = self.links.len(), "saved links");
        Ok(())
    }

    /// Replaces all links with the saved ones. Returns `false` if nothing
    /// was saved yet, leaving the manager empty.
    #[instrument(skip_all)]
    pub fn clear_links_and_load_from_storage(&mut self) -> Result<bool> {
        self.clear();
        let json = self
            .storage()?
            .get_string(STORAGE_KEY)
            .map_err(ExchangeError::Filesystem)?;
        let Some(json) = json else {
            info!("no saved links found");
            return Ok(false);
        };
        self.clear_links_and_create_from_json(&json)?;
        info!(links = self.links.len(), "loaded links");
        Ok(true)
    }

    #[must_use]
    #[inline]
    pub fn is_any_file_downloading(&self) -> bool {
        !self.tracking.lock().files_downloading.is_empty()
    }

    #[must_use]
    #[inline]
    pub fn download_attempts(&self, hash: &ContentHash) -> u32 {
        self.tracking
            .lock()
            .download_attempts
            .get(hash)
            .copied()
            .unwrap_or(0)
    }

    /// Whether a resource with the same main file is downloading right now.
    #[must_use]
    #[inline]
    pub fn is_entry_file_being_downloaded(&self, entry: &Entry) -> bool {
        self.tracking
            .lock()
            .files_downloading
            .contains(&entry_local_path(entry))
    }

    /// Whether `<import_dir>/<icon>/<stem>/<filename>` exists and is not
    /// older than the entry.
    ///
    /// A newer download of the same file counts as downloaded too.
    pub fn is_entry_already_downloaded(&self, entry: &Entry, import_dir: &Path) -> Result<bool> {
        let Some(filename) = entry.filename().filter(|name| !name.is_empty()) else {
            return Ok(false);
        };
        let path = import_dir.join(entry_local_path(entry)).join(filename);
        if !path.try_exists().map_err(ExchangeError::filesystem)? {
            return Ok(false);
        }
        let modified = fs_err::metadata(&path)
            .and_then(|metadata| metadata.modified())
            .map_err(ExchangeError::filesystem)?;
        let modified: DateTimeUtc = modified.into();
        Ok(entry.created <= modified)
    }

    /// State of `filename` relative to its newest entry in `index`.
    ///
    /// `last_import_time` looks up when `<cloud_dir><filename>/<filename>.glb`
    /// was last imported. Observing an import at or after the creation of the
    /// newest entry ends its importing state. Downloaded files carry the
    /// entry's creation time as their modification time.
    pub fn file_state(
        &self,
        filename: &str,
        cloud_dir: &str,
        index: &IndexFile,
        last_import_time: impl FnOnce(&str) -> Option<DateTimeUtc>,
    ) -> CloudFileState {
        let mut tracking = self.tracking.lock();
        let currently_importing = index.entries.iter().any(|(hash, entry)| {
            entry.filename() == Some(filename) && tracking.entries_importing.contains(hash)
        });
        let Some((newest_hash, newest)) = index.latest_entry_for(filename) else {
            return CloudFileState::Unavailable;
        };

        let uri = format!("{cloud_dir}{filename}/{filename}.glb");
        if last_import_time(&uri).is_some_and(|imported| imported >= newest.created) {
            tracking.entries_importing.remove(newest_hash);
            CloudFileState::UpToDate
        } else if currently_importing {
            CloudFileState::Importing
        } else {
            CloudFileState::NewVersionAvailable
        }
    }
}
