use {
    anyhow::{Context, Result},
    fs_err::create_dir_all,
    parking_lot::Mutex,
    std::{collections::BTreeMap, io::Write, path::PathBuf},
    tempfile::NamedTempFile,
};

/// Local key/value persistence for client state.
pub trait StorageProvider: Send + Sync {
    fn get_string(&self, key: &str) -> Result<Option<String>>;
    fn set_string(&self, key: &str, value: &str) -> Result<()>;

    #[inline]
    fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key)?.is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageProvider for MemoryStorage {
    #[inline]
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    #[inline]
    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// All values in one JSON object file, replaced atomically on every write.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStorage {
    #[must_use]
    #[inline]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.try_exists()? {
            return Ok(BTreeMap::new());
        }
        let data = fs_err::read(&self.path)?;
        serde_json::from_slice(&data)
            .with_context(|| format!("invalid storage file {}", self.path.display()))
    }
}

impl StorageProvider for JsonFileStorage {
    #[inline]
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    #[inline]
    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut values = self.load()?;
        values.insert(key.to_owned(), value.to_owned());

        let dir = self
            .path
            .parent()
            .context("storage path has no parent directory")?;
        create_dir_all(dir)?;
        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, &values)?;
        file.flush()?;
        file.persist(&self.path)?;
        Ok(())
    }
}
