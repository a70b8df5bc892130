use {
    anyhow::Result,
    fs_err::{OpenOptions, create_dir_all},
    std::{
        io::{self, Write},
        path::Path,
    },
};

/// Log output: appends to `path` if specified, or writes to stdout.
pub fn log_writer(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    if let Some(path) = path {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(file))
    } else {
        Ok(Box::new(io::stdout()))
    }
}
