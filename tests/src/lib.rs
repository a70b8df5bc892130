//! Fixtures for exercising several devices against one shared store.

mod diff;
mod tree;
#[cfg(test)]
mod scenarios;

pub use crate::{diff::diff, tree::random_tree};

use {
    anyhow::{Context as _, Result},
    cloudex_protocol::{ContentHash, Entry},
    cloudex_sdk::{
        CloudExchangeLink, Destination, LinkManager,
        manager::DEFAULT_LINK_NAME,
        storage::MemoryStorage,
        store::MemoryObjectStore,
    },
    std::{
        path::{Path, PathBuf},
        sync::Arc,
    },
    tempfile::TempDir,
    tracing_subscriber::EnvFilter,
};

/// Sends log output to the test harness. Safe to call from every test.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// One client: its own links, local state and import directory.
pub struct Device {
    pub manager: LinkManager,
    pub store: MemoryObjectStore,
    dir: TempDir,
}

impl Device {
    pub fn new(store: &MemoryObjectStore) -> Result<Self> {
        let manager = LinkManager::new(Arc::new(store.clone()), true)
            .with_storage(Arc::new(MemoryStorage::new()));
        Ok(Self {
            manager,
            store: store.clone(),
            dir: TempDir::new()?,
        })
    }

    pub fn import_dir(&self) -> PathBuf {
        self.dir.path().join("import")
    }

    /// Scratch directory for content this device shares.
    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join("work").join(name)
    }

    pub fn link(&self) -> Result<&CloudExchangeLink> {
        self.manager
            .default_link()
            .context("device has no default link")
    }

    pub fn link_mut(&mut self) -> Result<&mut CloudExchangeLink> {
        Ok(self.manager.get_or_create_default_link()?)
    }

    /// Finds the newest entry for `filename` in the group's index.
    pub async fn latest(&self, filename: &str) -> Result<(ContentHash, Entry)> {
        let index = self
            .link()?
            .download_index()
            .await?
            .context("group has no index")?;
        let (hash, entry) = index
            .latest_entry_for(filename)
            .with_context(|| format!("no entry for {filename}"))?;
        Ok((hash.clone(), entry.clone()))
    }

    pub async fn download(&self, hash: &ContentHash, entry: &Entry) -> Result<PathBuf> {
        Ok(self
            .link()?
            .download_cloud_resource(hash, entry, Destination::by_icon(self.import_dir()), None)
            .await?)
    }

    pub fn has_default_link(&self) -> bool {
        self.manager.has_link_with_name(DEFAULT_LINK_NAME)
    }
}

/// `<import dir>/<icon>/<stem>` where a downloaded resource ends up.
pub fn resource_folder(import_dir: &Path, icon: &str, filename: &str) -> PathBuf {
    let stem = Path::new(filename).file_stem().unwrap_or_default();
    import_dir.join(icon).join(stem)
}
