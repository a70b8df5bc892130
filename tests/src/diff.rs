use {
    anyhow::{Result, bail},
    fs_err::{read, read_dir, symlink_metadata},
    std::{collections::BTreeSet, ffi::OsString, path::Path},
};

fn names(dir: &Path) -> Result<BTreeSet<OsString>> {
    let mut names = BTreeSet::new();
    for entry in read_dir(dir)? {
        names.insert(entry?.file_name());
    }
    Ok(names)
}

/// Fails unless both trees have the same names, kinds and file contents.
pub fn diff(path1: &Path, path2: &Path) -> Result<()> {
    let meta1 = symlink_metadata(path1)?;
    let meta2 = symlink_metadata(path2)?;
    if meta1.is_dir() != meta2.is_dir() {
        bail!(
            "is_dir mismatch for {} ({}) <-> {} ({})",
            path1.display(),
            meta1.is_dir(),
            path2.display(),
            meta2.is_dir(),
        );
    }
    if meta1.is_dir() {
        let names1 = names(path1)?;
        let names2 = names(path2)?;
        if names1 != names2 {
            bail!(
                "dir content mismatch for {} ({:?}) <-> {} ({:?})",
                path1.display(),
                names1,
                path2.display(),
                names2,
            );
        }
        for name in names1 {
            diff(&path1.join(&name), &path2.join(&name))?;
        }
    } else if read(path1)? != read(path2)? {
        bail!(
            "content mismatch for {} <-> {}",
            path1.display(),
            path2.display()
        );
    }
    Ok(())
}
