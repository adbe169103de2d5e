//! Path-addressed storage backends with atomic write sessions.
//!
//! Region and metadata persistence is expressed against [`StorageBackend`]
//! so the same container code runs over the real filesystem and over the
//! in-memory backend used by tests and headless tools.

use std::io::{self, Read, Write};

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;

/// Options for [`StorageBackend::open_write`].
#[derive(Copy, Clone, Debug)]
pub struct AtomicWriteOptions {
    /// Readers must observe either the pre-state or the fully committed
    /// post-state, never a partial write.
    pub atomic: bool,
    /// Whether an existing file at the path may be replaced.
    pub replace_existing: bool,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self {
        Self {
            atomic: true,
            replace_existing: true,
        }
    }
}

/// An in-progress write. Bytes become visible only on [`WriteSession::commit`];
/// dropping the session without committing discards them (for atomic sessions).
pub trait WriteSession: Write + Send {
    /// Publishes the written bytes.
    fn commit(self: Box<Self>) -> io::Result<()>;
    /// Discards the written bytes.
    fn abort(self: Box<Self>);
}

/// A path-addressed byte store. Paths are `/`-separated and relative to the
/// backend's own root.
pub trait StorageBackend: Send + Sync {
    /// Opens a file for reading.
    fn open_read(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;
    /// Opens a write session for the given path, creating parent directories.
    fn open_write(&self, path: &str, options: AtomicWriteOptions) -> io::Result<Box<dyn WriteSession>>;
    /// Whether a file or directory exists at the path.
    fn exists(&self, path: &str) -> io::Result<bool>;
    /// Names of the entries directly under the given directory. A missing
    /// directory lists as empty.
    fn list(&self, path: &str) -> io::Result<Vec<String>>;
    /// Creates the directory and any missing parents.
    fn mkdirs(&self, path: &str) -> io::Result<()>;
    /// Removes the file at the path. Removing a missing file is not an error.
    fn remove(&self, path: &str) -> io::Result<()>;

    /// Reads a whole file into memory.
    fn read_all(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut reader = self.open_read(path)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Convenience full-file atomic replacement.
    fn write_all_atomic(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        let mut session = self.open_write(path, AtomicWriteOptions::default())?;
        session.write_all(bytes)?;
        session.commit()
    }
}
