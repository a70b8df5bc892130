use {
    super::CloudExchangeLink,
    crate::{
        error::{ExchangeError, Result},
        store::{Fetched, Precondition, StoreError},
    },
    bytes::Bytes,
    cloudex_protocol::{Bucket, ContentHash, Entry, IndexFile, ObjectKey},
    std::collections::BTreeMap,
    tracing::{error, info, instrument, warn},
};

/// Attempts of an index update before giving up on concurrent writers.
pub const INDEX_WRITE_ATTEMPTS: usize = 5;

impl CloudExchangeLink {
    fn index_key(&self, operation: &'static str) -> Result<ObjectKey> {
        Ok(ObjectKey::index(self.linked_key(operation)?))
    }

    /// Fetches the group's index. `None` means nobody has uploaded anything yet.
    ///
    /// A failed read or an unparsable index is an `Err`, never `None`, so callers
    /// can tell an empty group from an unreachable one.
    #[instrument(skip_all)]
    pub async fn download_index(&self) -> Result<Option<IndexFile>> {
        let key = self.index_key("download_index")?;
        let fetched = self
            .store
            .get(Bucket::Index, &key, None)
            .await
            .inspect_err(|err| error!("failed to download index: {err}"))?;
        match fetched {
            Fetched::Found(object) => Ok(Some(parse_index(&object.data)?)),
            Fetched::NotFound => {
                info!("index does not exist yet");
                Ok(None)
            }
        }
    }

    #[inline]
    pub async fn group_name_from_cloud(&self) -> Result<Option<String>> {
        Ok(self.download_index().await?.map(|index| index.group_name))
    }

    /// Index together with the condition a write-back must satisfy so it does
    /// not overwrite changes made since this read.
    async fn fetch_index_for_update(
        &self,
        key: &ObjectKey,
    ) -> Result<(IndexFile, Option<Precondition>)> {
        match self.store.get(Bucket::Index, key, None).await? {
            Fetched::Found(object) => {
                let index = parse_index(&object.data)?;
                Ok((index, object.version.map(Precondition::IfMatch)))
            }
            Fetched::NotFound => Ok((IndexFile::default(), Some(Precondition::IfAbsent))),
        }
    }

    /// Merges `entries` into the index, dropping expired entries on the way.
    ///
    /// The write is conditional on the version that was read. If another
    /// writer got in between, the whole read-purge-merge is repeated, up to
    /// [`INDEX_WRITE_ATTEMPTS`] times.
    #[instrument(skip_all, fields(entries = entries.len()))]
    pub(crate) async fn add_to_index(&self, entries: BTreeMap<ContentHash, Entry>) -> Result<()> {
        let key = self.index_key("add_to_index")?;
        for attempt in 1..=INDEX_WRITE_ATTEMPTS {
            let (mut index, precondition) = self
                .fetch_index_for_update(&key)
                .await
                .inspect_err(|err| error!("failed to read index for update: {err}"))?;
            index.remove_expired_entries();
            index.add(entries.clone());
            let data = index
                .to_json()
                .map_err(|err| ExchangeError::deserialization("index", err))?;

            match self
                .store
                .put(Bucket::Index, &key, Bytes::from(data), precondition, None)
                .await
            {
                Ok(()) => {
                    info!(total = index.entries.len(), "index updated");
                    return Ok(());
                }
                Err(StoreError::PreconditionFailed) => {
                    warn!(attempt, "index changed concurrently, merging again");
                }
                Err(err) => {
                    error!("failed to write index: {err}");
                    return Err(err.into());
                }
            }
        }
        Err(ExchangeError::Conflict {
            attempts: INDEX_WRITE_ATTEMPTS,
        })
    }
}

fn parse_index(data: &[u8]) -> Result<IndexFile> {
    IndexFile::from_json(data).map_err(|err| {
        error!("index is corrupt: {err:#}");
        ExchangeError::deserialization("index", err)
    })
}
