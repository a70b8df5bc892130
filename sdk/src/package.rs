//! Packaging of a folder into a single archive and back.

use {
    anyhow::{Context, Result, bail},
    chrono::Utc,
    cloudex_protocol::DateTimeUtc,
    fs_err::{File, create_dir_all},
    std::{
        io::{self, Cursor},
        path::{Component, Path, PathBuf},
    },
    tracing::{debug, warn},
    walkdir::WalkDir,
    zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions},
};

/// A packaged folder.
#[derive(Debug, Clone)]
pub struct Package {
    pub data: Vec<u8>,
    /// When the package was produced; becomes the `created` time of the index entry.
    pub modified: DateTimeUtc,
}

pub trait Packager: Send + Sync {
    fn package_folder(&self, folder: &Path) -> Result<Package>;

    /// Extracts `archive` into the existing directory `destination`.
    fn unpack_archive(&self, archive: &[u8], destination: &Path) -> Result<()>;
}

/// Deflate-compressed zip archives.
///
/// Entry names are relative to the packaged folder and use `/` separators.
/// Entries get the fixed zip epoch as their timestamp, so packaging the same
/// content twice yields the same bytes and thus the same content hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipPackager;

fn entry_name(relative: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .with_context(|| format!("non-utf8 file name: {}", relative.display()))?,
            ),
            _ => bail!("unexpected path component in {}", relative.display()),
        }
    }
    Ok(parts.join("/"))
}

/// Relative path inside the destination for an archive entry name, dropping
/// anything that would leave the destination (`..`, roots, drive prefixes).
fn sanitized_entry_path(name: &str) -> Option<PathBuf> {
    let path: PathBuf = name
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != "." && *part != ".." && !part.contains(':'))
        .collect();
    (path.components().next().is_some()).then_some(path)
}

/// Extraction that re-roots unsafe entry names instead of rejecting the archive.
fn extract_leniently(archive: &mut ZipArchive<Cursor<&[u8]>>, destination: &Path) -> Result<()> {
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let Some(relative) = sanitized_entry_path(file.name()) else {
            debug!(name = file.name(), "skipping archive entry without a path");
            continue;
        };
        let target = destination.join(relative);
        if file.is_dir() {
            create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            create_dir_all(parent)?;
        }
        let mut output = File::create(&target)?;
        io::copy(&mut file, &mut output)?;
    }
    Ok(())
}

impl Packager for ZipPackager {
    fn package_folder(&self, folder: &Path) -> Result<Package> {
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for entry in WalkDir::new(folder).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            let name = entry_name(entry.path().strip_prefix(folder)?)?;
            if entry.file_type().is_dir() {
                writer.add_directory(name, options)?;
            } else if entry.file_type().is_file() {
                writer.start_file(name, options)?;
                io::copy(&mut File::open(entry.path())?, &mut writer)?;
            } else {
                warn!(path = %entry.path().display(), "skipping non-regular file");
            }
        }
        let data = writer.finish()?.into_inner();
        Ok(Package {
            data,
            modified: Utc::now(),
        })
    }

    fn unpack_archive(&self, archive: &[u8], destination: &Path) -> Result<()> {
        let mut zip = ZipArchive::new(Cursor::new(archive)).context("invalid zip archive")?;
        if let Err(err) = zip.extract(destination) {
            warn!(?err, "standard extraction failed, extracting entry by entry");
            extract_leniently(&mut zip, destination)?;
        }
        Ok(())
    }
}
