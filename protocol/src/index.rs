use {
    crate::{ContentHash, DateTimeUtc, encoding},
    anyhow::Result,
    chrono::{TimeDelta, Utc},
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, fmt},
};

/// How long an entry stays in the index after it was created.
pub const ENTRY_TTL: TimeDelta = TimeDelta::days(7);

/// Manifest of all objects exchanged through one link.
///
/// Stored as a single JSON object in the index bucket. It is always fetched,
/// modified and written back as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexFile {
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub entries: BTreeMap<ContentHash, Entry>,
}

impl IndexFile {
    #[must_use]
    #[inline]
    pub fn find_entry(&self, hash: &ContentHash) -> Option<&Entry> {
        self.entries.get(hash)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub fn remove_expired_entries(&mut self) {
        self.remove_expired_entries_at(Utc::now());
    }

    #[inline]
    pub fn remove_expired_entries_at(&mut self, now: DateTimeUtc) {
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
    }

    /// Merges `entries` into the index. An entry with an already present hash replaces the old one.
    #[inline]
    pub fn add(&mut self, entries: impl IntoIterator<Item = (ContentHash, Entry)>) {
        self.entries.extend(entries);
    }

    /// The most recently created entry whose main file is `filename`.
    #[must_use]
    #[inline]
    pub fn latest_entry_for(&self, filename: &str) -> Option<(&ContentHash, &Entry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.filename() == Some(filename))
            .max_by_key(|(_, entry)| entry.created)
    }

    /// Non-expired file entries, newest first.
    #[must_use]
    #[inline]
    pub fn active_file_entries(&self) -> Vec<(&ContentHash, &Entry)> {
        let now = Utc::now();
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.file.is_some() && !entry.is_expired_at(now))
            .collect();
        entries.sort_by(|(_, a), (_, b)| b.created.cmp(&a.created));
        entries
    }

    #[inline]
    pub fn from_json(data: &[u8]) -> Result<Self> {
        encoding::deserialize(data)
    }

    #[inline]
    pub fn to_json(&self) -> Result<Vec<u8>> {
        encoding::serialize(self)
    }
}

impl fmt::Display for IndexFile {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} entries :", self.entries.len())?;
        for (hash, entry) in &self.entries {
            writeln!(
                f,
                "- created={} nrOfParts={} hash={hash}",
                entry.created,
                entry.nr_of_parts()
            )?;
        }
        Ok(())
    }
}

/// Metadata of one exchanged object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entry {
    pub created: DateTimeUtc,
    pub expires: DateTimeUtc,
    /// Only present for file entries. Other entries are kept in the index but cannot be downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
}

impl Entry {
    #[must_use]
    #[inline]
    pub fn new(created: DateTimeUtc, file: Option<FileInfo>) -> Self {
        Self {
            created,
            expires: created + ENTRY_TTL,
            file,
        }
    }

    #[must_use]
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    #[must_use]
    #[inline]
    pub fn is_expired_at(&self, now: DateTimeUtc) -> bool {
        now > self.expires
    }

    /// Number of stored parts of the object that can hold data.
    ///
    /// At least 1 and at most `max(1, total_nr_of_bytes)`: parts are contiguous
    /// and only trailing ones can be empty, so a larger count from a corrupt
    /// index adds nothing but empty parts.
    #[must_use]
    #[inline]
    pub fn nr_of_parts(&self) -> usize {
        let Some(file) = &self.file else {
            return 1;
        };
        let max_parts = usize::try_from(file.total_nr_of_bytes)
            .unwrap_or(usize::MAX)
            .max(1);
        usize::try_from(file.nr_of_parts)
            .ok()
            .filter(|&n| n > 0)
            .map_or(1, |n| n.min(max_parts))
    }

    #[must_use]
    #[inline]
    pub fn filename(&self) -> Option<&str> {
        self.file.as_ref().map(|file| file.filename.as_str())
    }

    #[must_use]
    #[inline]
    pub fn has_filename(&self) -> bool {
        self.filename().is_some_and(|name| !name.is_empty())
    }

    /// Category tag of the object, or an empty string.
    #[must_use]
    #[inline]
    pub fn icon(&self) -> &str {
        self.file.as_ref().map_or("", |file| file.icon.as_str())
    }
}

/// Kind of a file entry, encoded on the wire by which sub-record of [`FileInfo`] is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    ArkioExport,
    ArkioImport,
    ArkioPhotoExport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArkioExportInfo {
    /// Name of the main model file, including extension.
    #[serde(default)]
    pub main_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArkioImportInfo {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArkioPhotoExportInfo {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileInfo {
    /// Number of chunk objects stored under `{hash}.0 .. {hash}.{n-1}`.
    #[serde(default = "default_nr_of_parts")]
    pub nr_of_parts: i32,
    /// Size of the stored (possibly encrypted) object.
    #[serde(default)]
    pub total_nr_of_bytes: u64,
    /// Name of the main file of the resource, e.g. the `.gltf` file and not its textures.
    #[serde(default)]
    pub filename: String,
    /// Category tag that selects the destination folder on download.
    #[serde(default)]
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arkio_export: Option<ArkioExportInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arkio_import: Option<ArkioImportInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arkio_photo_export: Option<ArkioPhotoExportInfo>,
}

fn default_nr_of_parts() -> i32 {
    1
}

impl FileInfo {
    pub const ICON_UNITY: &'static str = "Unity";
    pub const ICON_MODELS: &'static str = "Models";
    pub const ICON_IMAGES: &'static str = "Images";
    pub const ICON_REVIT: &'static str = "Revit";

    #[must_use]
    #[inline]
    pub fn new(
        file_type: FileType,
        nr_of_parts: i32,
        total_nr_of_bytes: u64,
        filename: String,
        icon: String,
    ) -> Self {
        let mut info = Self {
            nr_of_parts,
            total_nr_of_bytes,
            filename,
            icon,
            arkio_export: None,
            arkio_import: None,
            arkio_photo_export: None,
        };
        match file_type {
            FileType::ArkioExport => {
                info.arkio_export = Some(ArkioExportInfo {
                    main_file: Some(info.filename.clone()),
                });
            }
            FileType::ArkioImport => info.arkio_import = Some(ArkioImportInfo {}),
            FileType::ArkioPhotoExport => info.arkio_photo_export = Some(ArkioPhotoExportInfo {}),
        }
        info
    }

    /// Returns `None` if no sub-record is present.
    #[must_use]
    #[inline]
    pub fn file_type(&self) -> Option<FileType> {
        if self.arkio_export.is_some() {
            Some(FileType::ArkioExport)
        } else if self.arkio_import.is_some() {
            Some(FileType::ArkioImport)
        } else if self.arkio_photo_export.is_some() {
            Some(FileType::ArkioPhotoExport)
        } else {
            None
        }
    }
}
