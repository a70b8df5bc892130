pub mod cli;
pub mod config;
mod info;

use {
    crate::{
        cli::{Cli, Command, DownloadTarget},
        config::{Config, StoreConfig, resolve_access_token},
        info::{list_entries, list_links, modified_time, pretty_size},
    },
    anyhow::{Context as _, Result, bail, format_err},
    cloudex_protocol::util::log_writer,
    cloudex_sdk::{
        CloudExchangeLink, CloudFileState, Destination, LinkManager,
        manager::entry_local_path,
        storage::JsonFileStorage,
        store::{DirObjectStore, HttpObjectStore, ObjectStore},
    },
    derivative::Derivative,
    futures::future::AbortHandle,
    std::{
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
    },
    tokio::signal::ctrl_c,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt},
};

/// Everything a command needs, built once from the config.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Ctx {
    pub config: Config,
    #[derivative(Debug = "ignore")]
    pub store: Arc<dyn ObjectStore>,
    pub manager: LinkManager,
    pub import_dir: PathBuf,
}

impl Ctx {
    pub fn new(config: Config) -> Result<Self> {
        let store = open_store(&config)?;
        let storage = Arc::new(JsonFileStorage::new(config.links_file()?));
        let mut manager =
            LinkManager::new(Arc::clone(&store), config.encrypt).with_storage(storage);
        manager.clear_links_and_load_from_storage()?;
        Ok(Self {
            import_dir: config.import_dir()?,
            config,
            store,
            manager,
        })
    }

    fn link(&self, name: &str) -> Result<&CloudExchangeLink> {
        self.manager
            .find_link(name)
            .with_context(|| format!("no link named {name:?}; use `cloudex link` or `cloudex join`"))
    }

    /// A fresh link to pair under `name`. Fails if `name` is already linked.
    fn unlinked(&mut self, name: &str) -> Result<&mut CloudExchangeLink> {
        if self.manager.find_link(name).is_some_and(CloudExchangeLink::is_linked) {
            bail!("link {name:?} already exists; run `cloudex --link {name} unlink` first");
        }
        self.manager.remove_link(name);
        let link = CloudExchangeLink::new(Arc::clone(&self.store), self.config.encrypt);
        self.manager.add_link(link, name)?;
        self.manager
            .find_link_mut(name)
            .ok_or_else(|| format_err!("link {name:?} vanished"))
    }
}

pub fn open_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    let buckets = config.buckets.clone();
    let store: Arc<dyn ObjectStore> = match &config.store {
        StoreConfig::Http {
            endpoint,
            access_token,
        } => {
            let token = resolve_access_token(access_token.as_ref())?;
            if token.is_none() {
                warn!("no access token configured, store requests are unauthenticated");
            }
            Arc::new(HttpObjectStore::new(endpoint.clone(), token, buckets)?)
        }
        StoreConfig::Directory { path } => Arc::new(DirObjectStore::new(path.clone(), buckets)?),
    };
    Ok(store)
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let mut ctx = Ctx::new(config)?;
    handle_command(cli, &mut ctx).await
}

async fn handle_command(cli: Cli, ctx: &mut Ctx) -> Result<()> {
    let name = cli.link;
    match cli.command {
        Command::Link => {
            let code = ctx.unlinked(&name)?.generate_code_and_link().await;
            let code = match code {
                Ok(code) => code,
                Err(err) => {
                    ctx.manager.remove_link(&name);
                    return Err(err.into());
                }
            };
            ctx.manager.save_to_storage()?;
            info!("linked; join other devices with code {code}");
        }
        Command::Join { code } => {
            let joined = ctx.unlinked(&name)?.link_with_existing_code(&code).await;
            if let Err(err) = joined {
                ctx.manager.remove_link(&name);
                return Err(err.into());
            }
            ctx.manager.save_to_storage()?;
            info!("joined group as link {name:?}");
        }
        Command::Invite => {
            let code = ctx.link(&name)?.generate_invite_code().await?;
            info!("join other devices with code {code}");
        }
        Command::Upload {
            folder,
            filename,
            file_type,
            icon,
            parts,
        } => {
            if !folder.join(&filename).is_file() {
                bail!("{filename:?} is not a file in {}", folder.display());
            }
            let parts = parts.unwrap_or(ctx.config.nr_of_parts);
            let hash = ctx
                .link(&name)?
                .upload_resource_to_cloud(&folder, &filename, file_type.into(), &icon, parts)
                .await?;
            info!("uploaded {filename} as {hash}");
        }
        Command::List { all } => {
            match ctx.link(&name)?.download_index().await? {
                Some(index) => list_entries(&index, all),
                None => info!("nothing has been shared yet"),
            }
        }
        Command::Download { target, force } => download(ctx, &name, &target, force).await?,
        Command::Status { filename: None } => list_links(&ctx.manager),
        Command::Status {
            filename: Some(filename),
        } => {
            let state = file_status(ctx, &name, &filename).await?;
            info!("{filename}: {state}");
            if state == CloudFileState::NewVersionAvailable {
                info!("run `cloudex download {filename}` to get it");
            }
        }
        Command::Unlink => {
            if ctx.manager.remove_link(&name).is_none() {
                bail!("no link named {name:?}");
            }
            ctx.manager.save_to_storage()?;
            info!("removed link {name:?}");
        }
    }
    Ok(())
}

async fn download(ctx: &Ctx, name: &str, target: &str, force: bool) -> Result<()> {
    let link = ctx.link(name)?;
    let index = link
        .download_index()
        .await?
        .context("nothing has been shared yet")?;
    let (hash, entry) = match DownloadTarget::parse(target) {
        DownloadTarget::Hash(hash) => index
            .find_entry(&hash)
            .map(|entry| (hash.clone(), entry))
            .with_context(|| format!("no entry {hash}"))?,
        DownloadTarget::Filename(filename) => index
            .latest_entry_for(&filename)
            .map(|(hash, entry)| (hash.clone(), entry))
            .with_context(|| format!("no entry for {filename:?}"))?,
    };
    if entry.is_expired() {
        bail!("entry {hash} has expired");
    }
    if !force && ctx.manager.is_entry_already_downloaded(entry, &ctx.import_dir)? {
        info!("{hash} is already downloaded; use --force to download again");
        return Ok(());
    }
    if let Some(file) = &entry.file {
        info!("downloading {} ({})", file.filename, pretty_size(file.total_nr_of_bytes));
    }

    let (abort, registration) = AbortHandle::new_pair();
    let interrupt = tokio::spawn(async move {
        if ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling download");
            abort.abort();
        }
    });
    let result = link
        .download_cloud_resource(
            &hash,
            entry,
            Destination::by_icon(ctx.import_dir.clone()),
            Some(registration),
        )
        .await;
    interrupt.abort();
    let folder = result?;
    info!("extracted to {}", folder.display());
    Ok(())
}

async fn file_status(ctx: &Ctx, name: &str, filename: &str) -> Result<CloudFileState> {
    let index = ctx
        .link(name)?
        .download_index()
        .await?
        .unwrap_or_default();
    let local_file = index
        .latest_entry_for(filename)
        .map(|(_, entry)| ctx.import_dir.join(entry_local_path(entry)).join(filename));
    let mut lookup_error = None;
    let state = ctx.manager.file_state(filename, "", &index, |_| {
        let path = local_file.as_deref()?;
        modified_time(path).unwrap_or_else(|err| {
            lookup_error = Some(err);
            None
        })
    });
    if let Some(err) = lookup_error {
        warn!("failed to check local copy of {filename}: {err:#}");
    }
    Ok(state)
}

pub fn setup_logger(log_file: Option<&Path>, log_filter: &str) -> Result<()> {
    let fmt_layer =
        tracing_subscriber::fmt::layer().with_writer(Mutex::new(log_writer(log_file)?));
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::try_new(log_filter)?)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        clap::Parser,
        cloudex_sdk::{manager::DEFAULT_LINK_NAME, store::Buckets},
        tempfile::TempDir,
    };

    fn config(root: &Path) -> Config {
        Config {
            store: StoreConfig::Directory {
                path: root.join("store"),
            },
            buckets: Buckets::default(),
            encrypt: true,
            nr_of_parts: 3,
            links_file: Some(root.join("links.json")),
            import_dir: Some(root.join("import")),
            log_file: None,
            log_filter: "info".into(),
        }
    }

    async fn command(root: &Path, args: &[&str]) -> Result<()> {
        let cli = Cli::try_parse_from(std::iter::once("cloudex").chain(args.iter().copied()))?;
        run(cli, config(root)).await
    }

    #[tokio::test]
    async fn share_and_download_through_directory_store() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("house");
        fs_err::create_dir_all(source.join("textures")).unwrap();
        fs_err::write(source.join("house.glb"), b"model").unwrap();
        fs_err::write(source.join("textures/wall.png"), b"png").unwrap();

        command(root.path(), &["list"]).await.unwrap_err();
        command(root.path(), &["link"]).await.unwrap();
        command(root.path(), &["link"]).await.unwrap_err();
        let source_arg = source.to_str().unwrap();
        command(root.path(), &["upload", source_arg, "missing.glb"])
            .await
            .unwrap_err();
        command(root.path(), &["upload", source_arg, "house.glb"])
            .await
            .unwrap();
        command(root.path(), &["list"]).await.unwrap();
        command(root.path(), &["status", "house.glb"]).await.unwrap();
        let ctx = Ctx::new(config(root.path())).unwrap();
        assert_eq!(
            file_status(&ctx, DEFAULT_LINK_NAME, "house.glb").await.unwrap(),
            CloudFileState::NewVersionAvailable
        );
        drop(ctx);

        command(root.path(), &["download", "house.glb"]).await.unwrap();
        let ctx = Ctx::new(config(root.path())).unwrap();
        assert_eq!(
            file_status(&ctx, DEFAULT_LINK_NAME, "house.glb").await.unwrap(),
            CloudFileState::UpToDate
        );
        assert_eq!(
            file_status(&ctx, DEFAULT_LINK_NAME, "other.glb").await.unwrap(),
            CloudFileState::Unavailable
        );
        drop(ctx);
        let folder = root.path().join("import/Models/house");
        assert_eq!(fs_err::read(folder.join("house.glb")).unwrap(), b"model");
        assert_eq!(fs_err::read(folder.join("textures/wall.png")).unwrap(), b"png");
        command(root.path(), &["download", "house.glb"]).await.unwrap();
        command(root.path(), &["download", "other.glb"]).await.unwrap_err();

        let ctx = Ctx::new(config(root.path())).unwrap();
        assert!(ctx.manager.is_linked_with_default_link());
        drop(ctx);

        command(root.path(), &["unlink"]).await.unwrap();
        let ctx = Ctx::new(config(root.path())).unwrap();
        assert!(!ctx.manager.has_link_with_name(DEFAULT_LINK_NAME));
        command(root.path(), &["unlink"]).await.unwrap_err();
    }

    #[tokio::test]
    async fn join_with_unknown_code_keeps_no_link() {
        let root = TempDir::new().unwrap();
        command(root.path(), &["join", "abcdef"]).await.unwrap_err();
        let ctx = Ctx::new(config(root.path())).unwrap();
        assert!(!ctx.manager.has_default_link());
    }
}
