use {
    anyhow::Result,
    byte_unit::{Byte, UnitType},
    chrono::{DateTime, Local, SubsecRound, Timelike, Utc},
    cloudex_protocol::{DateTimeUtc, Entry, FileType, IndexFile},
    cloudex_sdk::{LinkManager, LinkingState},
    itertools::Itertools,
    prettytable::{Table, format::FormatBuilder, row},
    std::{fmt::Display, io, path::Path, time::Duration},
    tracing::info,
};

pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

pub fn pretty_time(value: DateTimeUtc) -> impl Display {
    let mut local = DateTime::<Local>::from(value);
    if local.nanosecond() != 0 {
        local = local.trunc_subsecs(0) + chrono::Duration::seconds(1);
    }

    local.format(DATE_TIME_FORMAT)
}

pub fn pretty_size(size: u64) -> impl Display {
    format!(
        "{:.2}",
        Byte::from_u64(size).get_appropriate_unit(UnitType::Binary)
    )
}

fn pretty_expiry(entry: &Entry, now: DateTimeUtc) -> String {
    match (entry.expires - now).to_std() {
        Ok(left) => {
            let left = Duration::from_secs(left.as_secs());
            format!("in {}", humantime::format_duration(left))
        }
        Err(_) => "expired".into(),
    }
}

fn pretty_file_type(file_type: Option<FileType>) -> &'static str {
    match file_type {
        Some(FileType::ArkioExport) => "export",
        Some(FileType::ArkioImport) => "import",
        Some(FileType::ArkioPhotoExport) => "photo",
        None => "-",
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.set_format(FormatBuilder::new().column_separator(' ').build());
    table
}

pub fn list_entries(index: &IndexFile, show_expired: bool) {
    let now = Utc::now();
    let entries = index
        .entries
        .iter()
        .filter(|(_, entry)| show_expired || !entry.is_expired_at(now))
        .sorted_by(|(_, a), (_, b)| b.created.cmp(&a.created))
        .collect_vec();
    if entries.is_empty() {
        info!("no entries");
        return;
    }

    let mut table = new_table();
    table.add_row(row!["Created", "Expires", "Type", "Icon", "Size", "Parts", "File", "Hash"]);
    for (hash, entry) in entries {
        let file = entry.file.as_ref();
        table.add_row(row![
            pretty_time(entry.created),
            pretty_expiry(entry, now),
            pretty_file_type(file.and_then(|file| file.file_type())),
            entry.icon(),
            file.map_or_else(String::new, |file| pretty_size(file.total_nr_of_bytes).to_string()),
            entry.nr_of_parts(),
            entry.filename().unwrap_or("-"),
            hash,
        ]);
    }
    info!("group: {:?}", index.group_name);
    info!("\n{table}");
}

pub fn list_links(manager: &LinkManager) {
    let names = manager.names().collect_vec();
    if names.is_empty() {
        info!("no links; use `cloudex link` or `cloudex join <code>`");
        return;
    }
    let mut table = new_table();
    table.add_row(row!["Link", "State"]);
    for name in names {
        let state = manager
            .find_link(name)
            .map_or(LinkingState::NotLinked, |link| link.state());
        table.add_row(row![name, state]);
    }
    info!("\n{table}");
}

/// Modification time of a local file, if it exists.
pub fn modified_time(path: &Path) -> Result<Option<DateTimeUtc>> {
    match fs_err::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.modified()?.into())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
