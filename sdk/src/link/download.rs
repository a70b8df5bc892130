use {
    super::{CloudExchangeLink, LinkEvents, progress_or_log},
    crate::{
        error::{ExchangeError, Result},
        package::Packager,
        progress::MultiPartProgressTracker,
        store::Fetched,
    },
    bytes::Bytes,
    cloudex_protocol::{Bucket, ContentHash, DateTimeUtc, Entry, ObjectKey, chunk},
    fs_err::{OpenOptions, create_dir_all, remove_dir_all, remove_file, rename},
    futures::future::{AbortRegistration, Abortable, join_all},
    std::{
        ffi::{OsStr, OsString},
        fmt,
        path::{Path, PathBuf},
        sync::Arc,
        time::SystemTime,
    },
    tokio::task::spawn_blocking,
    tracing::{error, info, instrument, warn},
    walkdir::WalkDir,
};

/// Where a downloaded resource is extracted to.
pub enum Destination {
    /// Base directory; the resource gets its own subfolder in it.
    Directory(PathBuf),
    /// Picks the base directory from the entry's icon.
    Resolver(Box<dyn FnOnce(&str) -> PathBuf + Send>),
}

impl Destination {
    /// `<import_dir>/<icon>`, the layout the link manager expects.
    #[must_use]
    #[inline]
    pub fn by_icon(import_dir: PathBuf) -> Self {
        Self::Resolver(Box::new(move |icon| import_dir.join(icon)))
    }

    fn resolve(self, icon: &str) -> PathBuf {
        match self {
            Self::Directory(dir) => dir,
            Self::Resolver(resolve) => resolve(icon),
        }
    }
}

impl fmt::Debug for Destination {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(dir) => f.debug_tuple("Directory").field(dir).finish(),
            Self::Resolver(_) => f.debug_tuple("Resolver").finish_non_exhaustive(),
        }
    }
}

impl CloudExchangeLink {
    /// Fetches a single object from the file bucket.
    #[instrument(skip_all, fields(%key))]
    pub async fn get_object_raw(&self, key: &ObjectKey) -> Result<Option<Bytes>> {
        let fetched = self
            .store
            .get(
                Bucket::File,
                key,
                Some(progress_or_log(
                    self.events.download_progress.as_ref(),
                    "Download",
                )),
            )
            .await
            .inspect_err(|err| error!("failed to fetch object: {err}"))?;
        Ok(fetched.into_data())
    }

    /// Fetches all parts of an object concurrently, joins and decrypts them.
    ///
    /// Fails if any part is missing. When `abort` fires, every in-flight part
    /// transfer is dropped.
    #[instrument(skip_all, fields(%hash))]
    pub async fn get_object_in_multiple_parts(
        &self,
        hash: &ContentHash,
        entry: &Entry,
        abort: Option<AbortRegistration>,
    ) -> Result<Vec<u8>> {
        self.linked_key("get_object_in_multiple_parts")?;
        let file = entry
            .file
            .as_ref()
            .ok_or_else(|| ExchangeError::InvalidEntry(format!("entry {hash} is not a file")))?;
        let tracker = Arc::new(MultiPartProgressTracker::new(
            file.total_nr_of_bytes,
            progress_or_log(self.events.download_progress.as_ref(), "Download"),
        ));

        let fetch = self.fetch_parts(hash, entry.nr_of_parts(), &tracker);
        let parts = match abort {
            Some(registration) => Abortable::new(fetch, registration).await.map_err(|_| {
                warn!("download cancelled");
                ExchangeError::Cancelled
            })?,
            None => fetch.await,
        };

        let failed_parts: Vec<usize> = parts
            .iter()
            .enumerate()
            .filter(|(_, part)| part.is_none())
            .map(|(index, _)| index)
            .collect();
        let data = chunk::join(&parts)
            .filter(|_| failed_parts.is_empty())
            .ok_or_else(|| ExchangeError::PartialTransfer {
                hash: hash.clone(),
                failed_parts,
            })?;
        tracker.finish();
        self.open(hash, data).await
    }

    async fn fetch_parts(
        &self,
        hash: &ContentHash,
        nr_of_parts: usize,
        tracker: &Arc<MultiPartProgressTracker>,
    ) -> Vec<Option<Bytes>> {
        join_all((0..nr_of_parts).map(|index| {
            let key = ObjectKey::part(hash, index);
            let progress = tracker.part_callback(index);
            async move {
                match self.store.get(Bucket::File, &key, Some(progress)).await {
                    Ok(Fetched::Found(object)) => Some(object.data),
                    Ok(Fetched::NotFound) => {
                        warn!(%key, "part not found");
                        None
                    }
                    Err(err) => {
                        error!(%key, "failed to download part: {err}");
                        None
                    }
                }
            }
        }))
        .await
    }

    /// Downloads a resource and extracts it to `<base dir>/<main file stem>`.
    ///
    /// An existing folder of the same name is replaced, but only once the new
    /// content is completely extracted. Extracted files get the entry's
    /// creation time as their modification time. Returns the resource folder.
    #[instrument(skip_all, fields(%hash))]
    pub async fn download_cloud_resource(
        &self,
        hash: &ContentHash,
        entry: &Entry,
        destination: Destination,
        abort: Option<AbortRegistration>,
    ) -> Result<PathBuf> {
        LinkEvents::fire(&self.events.download_started, hash, entry);
        let result = self.try_download(hash, entry, destination, abort).await;
        match &result {
            Ok(folder) => {
                info!(folder = %folder.display(), "extracted archive contents");
                LinkEvents::fire(&self.events.download_finished, hash, entry);
            }
            Err(err) => {
                error!("download failed: {err}");
                LinkEvents::fire(&self.events.download_failed, hash, entry);
            }
        }
        result
    }

    async fn try_download(
        &self,
        hash: &ContentHash,
        entry: &Entry,
        destination: Destination,
        abort: Option<AbortRegistration>,
    ) -> Result<PathBuf> {
        let basename = resource_folder_name(entry)
            .ok_or_else(|| ExchangeError::InvalidEntry(format!("entry {hash} has no filename")))?;
        let data = self.get_object_in_multiple_parts(hash, entry, abort).await?;
        info!(len = data.len(), "download of object complete");

        let base_dir = destination.resolve(entry.icon());
        let packager = Arc::clone(&self.packager);
        let created = entry.created;
        spawn_blocking(move || install(packager.as_ref(), &data, &base_dir, &basename, created))
            .await
            .map_err(ExchangeError::filesystem)?
    }
}

/// Folder name for a downloaded resource: the main file name without extension.
fn resource_folder_name(entry: &Entry) -> Option<OsString> {
    let filename = entry.filename().filter(|name| !name.is_empty())?;
    Path::new(filename).file_stem().map(OsStr::to_os_string)
}

fn install(
    packager: &dyn Packager,
    archive: &[u8],
    base_dir: &Path,
    basename: &OsStr,
    created: DateTimeUtc,
) -> Result<PathBuf> {
    create_dir_all(base_dir).map_err(ExchangeError::filesystem)?;
    let staging = tempfile::Builder::new()
        .prefix(".download-")
        .tempdir_in(base_dir)
        .map_err(ExchangeError::filesystem)?;
    packager
        .unpack_archive(archive, staging.path())
        .map_err(ExchangeError::Extraction)?;
    set_modified_recursive(staging.path(), created.into()).map_err(ExchangeError::Filesystem)?;

    let folder = base_dir.join(basename);
    let removed = match fs_err::symlink_metadata(&folder) {
        Ok(metadata) if metadata.is_dir() => remove_dir_all(&folder),
        Ok(_) => remove_file(&folder),
        Err(_) => Ok(()),
    };
    removed.map_err(ExchangeError::filesystem)?;
    rename(staging.path(), &folder).map_err(ExchangeError::filesystem)?;
    Ok(folder)
}

fn set_modified_recursive(dir: &Path, time: SystemTime) -> anyhow::Result<()> {
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            OpenOptions::new()
                .write(true)
                .open(entry.path())?
                .file()
                .set_modified(time)?;
        }
    }
    Ok(())
}
