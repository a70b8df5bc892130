use {
    super::{CloudExchangeLink, progress_or_log},
    crate::{
        error::{ExchangeError, Result},
        len_u64,
        progress::MultiPartProgressTracker,
    },
    bytes::Bytes,
    cloudex_protocol::{
        Bucket, ContentHash, DateTimeUtc, Entry, FileInfo, FileType, ObjectKey, chunk,
    },
    futures::future::join_all,
    std::{collections::BTreeMap, path::Path, sync::Arc},
    tokio::task::spawn_blocking,
    tracing::{error, info, instrument},
};

/// Metadata of a resource that goes into its index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Name of the main file of the resource.
    pub filename: String,
    pub created: DateTimeUtc,
    pub file_type: FileType,
    pub icon: String,
}

impl CloudExchangeLink {
    /// Packages `folder`, uploads it and announces it in the index.
    ///
    /// Returns the content hash the resource is known under.
    #[instrument(skip_all, fields(folder = %folder.display(), %filename, nr_of_parts = nr_of_parts))]
    pub async fn upload_resource_to_cloud(
        &self,
        folder: &Path,
        filename: &str,
        file_type: FileType,
        icon: &str,
        nr_of_parts: usize,
    ) -> Result<ContentHash> {
        self.linked_key("upload_resource_to_cloud")?;
        let packager = Arc::clone(&self.packager);
        let folder = folder.to_path_buf();
        let package = spawn_blocking(move || packager.package_folder(&folder))
            .await
            .map_err(ExchangeError::filesystem)?
            .map_err(ExchangeError::Filesystem)?;

        let hash = ContentHash::of(&package.data);
        info!(%hash, len = package.data.len(), "packaged resource");
        let info = ResourceInfo {
            filename: filename.to_owned(),
            created: package.modified,
            file_type,
            icon: icon.to_owned(),
        };
        self.put_object(&hash, package.data, nr_of_parts, info)
            .await?;
        Ok(hash)
    }

    /// Encrypts `data`, uploads it in `nr_of_parts` concurrent parts and adds
    /// an entry for it to the index.
    ///
    /// Nothing is added to the index unless every part was stored.
    #[instrument(skip_all, fields(%hash, nr_of_parts = nr_of_parts))]
    pub async fn put_object(
        &self,
        hash: &ContentHash,
        data: Vec<u8>,
        nr_of_parts: usize,
        info: ResourceInfo,
    ) -> Result<()> {
        self.linked_key("put_object")?;
        let nr_of_parts = nr_of_parts.max(1);
        let stored_parts = i32::try_from(nr_of_parts)
            .map_err(|_| ExchangeError::InvalidEntry(format!("too many parts: {nr_of_parts}")))?;

        let data = Bytes::from(self.seal(hash, data).await?);
        let total = len_u64(data.len());
        let tracker = Arc::new(MultiPartProgressTracker::new(
            total,
            progress_or_log(self.events.upload_progress.as_ref(), "Upload"),
        ));

        let uploads = chunk::split(&data, nr_of_parts)
            .into_iter()
            .enumerate()
            .map(|(index, part)| {
                let part = data.slice_ref(part);
                let key = ObjectKey::part(hash, index);
                let progress = tracker.part_callback(index);
                async move {
                    let result = self
                        .store
                        .put(Bucket::File, &key, part, None, Some(progress))
                        .await;
                    if let Err(err) = &result {
                        error!(%key, "failed to upload part: {err}");
                    }
                    (index, result)
                }
            });
        let failed_parts: Vec<usize> = join_all(uploads)
            .await
            .into_iter()
            .filter(|(_, result)| result.is_err())
            .map(|(index, _)| index)
            .collect();
        if !failed_parts.is_empty() {
            return Err(ExchangeError::PartialTransfer {
                hash: hash.clone(),
                failed_parts,
            });
        }
        tracker.finish();
        info!("all parts uploaded");

        let entry = Entry::new(
            info.created,
            Some(FileInfo::new(
                info.file_type,
                stored_parts,
                total,
                info.filename,
                info.icon,
            )),
        );
        self.add_to_index(BTreeMap::from([(hash.clone(), entry)]))
            .await
    }
}
