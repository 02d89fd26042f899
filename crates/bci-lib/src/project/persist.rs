use crate::error::{Error, Result};
use fs2::FileExt;
use log::warn;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Exclusive advisory lock on a bookkeeping file, released on drop.
pub(crate) struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Blocks until no other process holds the lock.
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|err| Error::storage(path, err))?;
        file.lock_exclusive()
            .map_err(|err| Error::storage(path, err))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!("failed to release lock {}: {}", self.path.display(), err);
        }
    }
}

/// Serialize `value` as 4-space indented JSON into a temp file next to `path`,
/// then rename it over `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| Error::storage(dir, err))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let mut serializer =
            Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
        value
            .serialize(&mut serializer)
            .map_err(|err| Error::storage(path, io::Error::from(err)))?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|err| Error::storage(path, err))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|err| Error::storage(path, err))?;
    tmp.persist(path)
        .map_err(|err| Error::storage(path, err.error))?;
    Ok(())
}
