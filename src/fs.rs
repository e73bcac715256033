//! Filesystem helpers with restrictive permissions and atomic writes.
//!
//! Everything the configuration persists goes through [`save_file`]: the
//! content is first written to a temp file with a random name in the target
//! directory and then renamed over the destination, so a crash never leaves a
//! half-written authoritative file. On Unix, directories are created with
//! mode 0700 and files with mode 0600.

use crate::error::Error;
use rand::RngCore;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// The restrictive permission mode for stored files (owner read/write only)
#[cfg(unix)]
pub const SECURE_FILE_MODE: u32 = 0o600;

/// The permission mode for created directories (owner only)
#[cfg(unix)]
pub const SECURE_DIR_MODE: u32 = 0o700;

/// Check if the specified path exists.
pub fn path_exists(path: &Path) -> Result<bool, Error> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Create the directory (and any missing parents) if it does not exist yet.
#[cfg(unix)]
pub fn ensure_dir_exists(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::DirBuilderExt;

    if path_exists(path)? {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(SECURE_DIR_MODE)
        .create(path)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn ensure_dir_exists(path: &Path) -> Result<(), Error> {
    if path_exists(path)? {
        return Ok(());
    }
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(unix)]
fn create_secure_file(path: &Path) -> Result<fs::File, Error> {
    use std::os::unix::fs::OpenOptionsExt;

    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SECURE_FILE_MODE)
        .open(path)?)
}

#[cfg(not(unix))]
fn create_secure_file(path: &Path) -> Result<fs::File, Error> {
    log::warn!(
        "Creating file '{}' without restrictive permissions: not supported on this platform",
        path.display()
    );
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

/// Save the content at the specified path atomically: first into a temp file
/// with a random 16-byte hex name in the same directory, then rename over the
/// destination.
pub fn save_file(path: &Path, content: &[u8]) -> Result<(), Error> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("Path {} has no parent", path.display())))?;

    let mut rand_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut rand_bytes);
    let temp_path = dir.join(hex::encode(rand_bytes));

    let mut file = create_secure_file(&temp_path)?;
    if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Recursively copy a directory tree, creating directories with mode 0700 and
/// writing each file atomically with mode 0600.
pub fn copy_directory(src: &Path, dest: &Path) -> Result<(), Error> {
    ensure_dir_exists(dest)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_directory(&entry.path(), &target)?;
        } else {
            let content = fs::read(entry.path())?;
            save_file(&target, &content)?;
        }
    }
    Ok(())
}

/// A scheme modification time: seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Parse the content of a `timestamp` file: ASCII decimal seconds since
    /// the epoch, optional trailing newline.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| Error::Parsing(format!("Timestamp is not UTF-8: {}", e)))?;
        let secs: u64 = s
            .trim()
            .parse()
            .map_err(|e| Error::Parsing(format!("Invalid timestamp {:?}: {}", s.trim(), e)))?;
        Ok(Timestamp(secs))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read and parse a `timestamp` file. Returns `Ok(None)` if the file does not
/// exist.
pub fn read_timestamp(path: &Path) -> Result<Option<Timestamp>, Error> {
    if !path_exists(path)? {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(Timestamp::parse(&bytes)?))
}
