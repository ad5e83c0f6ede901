//! Snapshot file I/O.
//!
//! The only place that touches the filesystem. Writes go to a sibling
//! `.tmp` file that is renamed over the target once fully written.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Default snapshot directory, relative to the working directory
pub const DEFAULT_DIR: &str = "data";

/// Snapshot file name inside the data directory
pub const FILE_NAME: &str = "data.rdb";

/// Returns the snapshot path inside `dir`.
pub fn snapshot_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(FILE_NAME)
}

/// Reads the whole snapshot file. A missing file is `Ok(None)`.
pub fn read(path: &Path) -> io::Result<Option<Vec<u8>>> {
    info!(path = %path.display(), "Loading snapshot from disk");

    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No snapshot file found");
            Ok(None)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read snapshot");
            Err(e)
        }
    }
}

/// Writes `data` to `path`, creating the parent directory when missing.
pub fn write(path: &Path, data: &[u8]) -> io::Result<()> {
    info!(path = %path.display(), bytes = data.len(), "Saving snapshot to disk");

    if let Err(e) = write_atomically(path, data) {
        error!(path = %path.display(), error = %e, "Failed to save snapshot");
        return Err(e);
    }
    Ok(())
}

fn write_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_dir(dir)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = open_for_write(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

#[cfg(unix)]
fn create_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o777).create(dir)
}

#[cfg(not(unix))]
fn create_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn open_for_write(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o666)
        .open(path)
}

#[cfg(not(unix))]
fn open_for_write(path: &Path) -> io::Result<fs::File> {
    fs::File::create(path)
}
