use std::fs::File;
use std::fs::OpenOptions;
use std::io;

use fs2::FileExt;
use log::info;

/// Exclusive lock on the base directory, held for the lifetime of an
/// engine so that two processes never write the same WAL.
#[derive(Debug)]
pub(crate) struct DirLock {
    path: String,
    f: File,
}

impl DirLock {
    pub(crate) const LOCK_FILE_NAME: &'static str = "LOCK";

    pub(crate) fn acquire(dir: &str) -> Result<Self, io::Error> {
        let path = format!("{}/{}", dir, Self::LOCK_FILE_NAME);

        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        f.try_lock_exclusive().map_err(|e| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!(
                    "WAL directory '{}' is already locked by another engine; \
                    error:({})",
                    dir, e
                ),
            )
        })?;

        info!("WAL directory lock acquired: {}", path);

        Ok(Self { path, f })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = self.f.unlock();
        info!("WAL directory lock released: {}", self.path);
    }
}
