use {
    super::{Buckets, Fetched, ObjectStore, ObjectVersion, Precondition, StoreError, StoredObject},
    crate::{len_u64, progress::ProgressCallback},
    anyhow::Result,
    async_trait::async_trait,
    base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD},
    bytes::Bytes,
    cloudex_protocol::{Bucket, ObjectKey},
    fs_err::{File, create_dir_all},
    fs2::FileExt,
    sha2::{Digest, Sha256},
    std::{
        io::{self, Write},
        path::{Path, PathBuf},
    },
    tempfile::NamedTempFile,
    tokio::task::spawn_blocking,
    tracing::instrument,
};

const TMP_DIR: &str = ".tmp";
const LOCK_FILE: &str = ".lock";

/// Object store kept in a local (possibly network mounted) directory.
///
/// Objects live under `<root>/<bucket>/<shard>/<base64url(key)>`. Writes go
/// through a temporary file that is renamed into place, and are serialized
/// with an exclusive lock on `<root>/.lock` so conditional writes are atomic
/// across processes. The version of an object is the SHA-256 of its content.
#[derive(Debug, Clone)]
pub struct DirObjectStore {
    root: PathBuf,
    tmp: PathBuf,
    buckets: Buckets,
}

fn version_of(data: &[u8]) -> ObjectVersion {
    ObjectVersion::new(hex::encode(Sha256::digest(data)))
}

impl DirObjectStore {
    #[inline]
    pub fn new(root: PathBuf, buckets: Buckets) -> Result<Self> {
        let tmp = root.join(TMP_DIR);
        create_dir_all(&tmp)?;
        Ok(Self { root, tmp, buckets })
    }

    fn object_path(&self, bucket: Bucket, key: &ObjectKey) -> PathBuf {
        let name = BASE64_URL_SAFE_NO_PAD.encode(key.as_str());
        let shard = name.get(..2).unwrap_or(&name).to_owned();
        self.root
            .join(self.buckets.name(bucket))
            .join(shard)
            .join(name)
    }

    fn read(path: &Path) -> Result<Fetched, StoreError> {
        match fs_err::read(path) {
            Ok(data) => Ok(Fetched::Found(StoredObject {
                version: Some(version_of(&data)),
                data: data.into(),
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Fetched::NotFound),
            Err(err) => Err(StoreError::transport(err)),
        }
    }

    fn current_version(path: &Path) -> Result<Option<ObjectVersion>, StoreError> {
        Ok(match Self::read(path)? {
            Fetched::Found(object) => object.version,
            Fetched::NotFound => None,
        })
    }

    fn write(
        &self,
        path: &Path,
        data: &[u8],
        precondition: Option<&Precondition>,
    ) -> Result<(), StoreError> {
        let lock = File::create(self.root.join(LOCK_FILE)).map_err(StoreError::transport)?;
        FileExt::lock_exclusive(lock.file()).map_err(StoreError::transport)?;

        if let Some(precondition) = precondition {
            let current = Self::current_version(path)?;
            let satisfied = match precondition {
                Precondition::IfAbsent => current.is_none(),
                Precondition::IfMatch(version) => current.as_ref() == Some(version),
            };
            if !satisfied {
                return Err(StoreError::PreconditionFailed);
            }
        }

        if let Some(dir) = path.parent() {
            create_dir_all(dir).map_err(StoreError::transport)?;
        }
        let mut file = NamedTempFile::new_in(&self.tmp).map_err(StoreError::transport)?;
        file.write_all(data).map_err(StoreError::transport)?;
        file.flush().map_err(StoreError::transport)?;
        file.persist(path)
            .map_err(|err| StoreError::transport(err.error))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    #[instrument(skip_all, fields(%bucket, %key))]
    async fn get(
        &self,
        bucket: Bucket,
        key: &ObjectKey,
        progress: Option<ProgressCallback>,
    ) -> Result<Fetched, StoreError> {
        let path = self.object_path(bucket, key);
        let fetched = spawn_blocking(move || Self::read(&path))
            .await
            .map_err(StoreError::transport)??;
        if let (Some(progress), Fetched::Found(object)) = (progress, &fetched) {
            let len = len_u64(object.data.len());
            progress(len, len);
        }
        Ok(fetched)
    }

    #[instrument(skip_all, fields(%bucket, %key, len = data.len()))]
    async fn put(
        &self,
        bucket: Bucket,
        key: &ObjectKey,
        data: Bytes,
        precondition: Option<Precondition>,
        progress: Option<ProgressCallback>,
    ) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key);
        let len = len_u64(data.len());
        let this = self.clone();
        spawn_blocking(move || this.write(&path, &data, precondition.as_ref()))
            .await
            .map_err(StoreError::transport)??;
        if let Some(progress) = progress {
            progress(len, len);
        }
        Ok(())
    }
}
