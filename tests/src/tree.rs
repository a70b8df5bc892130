use {
    anyhow::Result,
    fs_err::{create_dir_all, write},
    rand::{
        Rng,
        distr::{Alphanumeric, SampleString},
        rng,
    },
    std::path::Path,
    tracing::debug,
};

fn random_name() -> String {
    let name_len = rng().random_range(1..=10);
    Alphanumeric.sample_string(&mut rng(), name_len)
}

fn random_content() -> String {
    let content_len = rng().random_range(0..=30_000);
    Alphanumeric.sample_string(&mut rng(), content_len)
}

/// Fills `dir` with `main_file` and a few random files and subfolders.
pub fn random_tree(dir: &Path, main_file: &str) -> Result<()> {
    create_dir_all(dir)?;
    write(dir.join(main_file), random_content())?;
    for _ in 0..rng().random_range(1..=8) {
        let parent = if rng().random_bool(0.3) {
            dir.join(random_name())
        } else {
            dir.to_path_buf()
        };
        create_dir_all(&parent)?;
        let path = parent.join(format!("{}.bin", random_name()));
        write(&path, random_content())?;
        debug!("created file {}", path.display());
    }
    Ok(())
}
