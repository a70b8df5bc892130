use {
    anyhow::{Result, format_err},
    clap::{Parser, Subcommand, ValueEnum},
    cloudex_protocol::{ContentHash, FileInfo, FileType},
    cloudex_sdk::manager::DEFAULT_LINK_NAME,
    std::path::PathBuf,
};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Config file. Defaults to `cloudex.json5` in the user's config directory.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Name of the link to operate on.
    #[arg(long, default_value = DEFAULT_LINK_NAME)]
    pub link: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Start a new group and print the code other devices join with.
    Link,
    /// Join the group that published `code`.
    Join { code: String },
    /// Publish another code for the current group.
    Invite,
    /// Package a folder and share it with the group.
    Upload {
        folder: PathBuf,
        /// Name of the main file in the folder.
        filename: String,
        #[arg(long, value_enum, default_value_t = FileTypeArg::Export)]
        file_type: FileTypeArg,
        #[arg(long, default_value = FileInfo::ICON_MODELS)]
        icon: String,
        /// Number of parts; defaults to `nr_of_parts` from the config.
        #[arg(long)]
        parts: Option<usize>,
    },
    /// List the resources shared in the group.
    List {
        /// Include expired entries.
        #[arg(short, long)]
        all: bool,
    },
    /// Download a resource into the import directory.
    Download {
        /// Content hash of the entry, or the name of its main file to get the
        /// newest entry with that name.
        target: String,
        /// Download even if the local copy is up to date.
        #[arg(short, long)]
        force: bool,
    },
    /// Show links, or the state of one file relative to the group's index.
    Status { filename: Option<String> },
    /// Forget the link on this device.
    Unlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FileTypeArg {
    Export,
    Import,
    PhotoExport,
}

impl From<FileTypeArg> for FileType {
    #[inline]
    fn from(value: FileTypeArg) -> Self {
        match value {
            FileTypeArg::Export => Self::ArkioExport,
            FileTypeArg::Import => Self::ArkioImport,
            FileTypeArg::PhotoExport => Self::ArkioPhotoExport,
        }
    }
}

/// What `download` refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    Hash(ContentHash),
    Filename(String),
}

impl DownloadTarget {
    #[must_use]
    #[inline]
    pub fn parse(input: &str) -> Self {
        input
            .parse()
            .map_or_else(|_| Self::Filename(input.to_owned()), Self::Hash)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| format_err!("failed to get config dir"))?
        .join("cloudex.json5"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upload() {
        let cli = Cli::try_parse_from([
            "cloudex", "--link", "office", "upload", "out/house", "house.glb", "--parts", "3",
        ])
        .unwrap();
        assert_eq!(cli.link, "office");
        assert_eq!(
            cli.command,
            Command::Upload {
                folder: "out/house".into(),
                filename: "house.glb".into(),
                file_type: FileTypeArg::Export,
                icon: "Models".into(),
                parts: Some(3),
            }
        );
    }

    #[test]
    fn default_link_name() {
        let cli = Cli::try_parse_from(["cloudex", "join", "abc123"]).unwrap();
        assert_eq!(cli.link, "defaultlink");
        assert_eq!(cli.command, Command::Join { code: "abc123".into() });
    }

    #[test]
    fn download_target() {
        let hash = ContentHash::of(b"x");
        assert_eq!(DownloadTarget::parse(hash.as_str()), DownloadTarget::Hash(hash));
        assert_eq!(
            DownloadTarget::parse("house.glb"),
            DownloadTarget::Filename("house.glb".into())
        );
    }
}
