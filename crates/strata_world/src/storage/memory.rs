//! In-memory storage backend for tests and headless tooling.

use std::io::{self, Cursor, Read, Write};

use crate::prelude::*;

use super::{AtomicWriteOptions, StorageBackend, WriteSession};

/// A storage backend keeping every file in a shared in-process map.
/// Cloning the backend shares the underlying files.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Constructs an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files.
    pub fn file_count(&self) -> usize {
        self.files.lock().expect("memory backend poisoned").len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.files.lock().expect("memory backend poisoned")
    }
}

struct MemorySession {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    path: String,
    replace_existing: bool,
    buffer: Vec<u8>,
}

impl Write for MemorySession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteSession for MemorySession {
    fn commit(self: Box<Self>) -> io::Result<()> {
        let mut files = self.files.lock().expect("memory backend poisoned");
        if !self.replace_existing && files.contains_key(&self.path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", self.path),
            ));
        }
        files.insert(self.path, self.buffer);
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

impl StorageBackend for MemoryBackend {
    fn open_read(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        let files = self.lock();
        let Some(bytes) = files.get(path) else {
            return Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()));
        };
        Ok(Box::new(Cursor::new(bytes.clone())))
    }

    fn open_write(&self, path: &str, options: AtomicWriteOptions) -> io::Result<Box<dyn WriteSession>> {
        Ok(Box::new(MemorySession {
            files: Arc::clone(&self.files),
            path: path.to_string(),
            replace_existing: options.replace_existing,
            buffer: Vec::new(),
        }))
    }

    fn exists(&self, path: &str) -> io::Result<bool> {
        let files = self.lock();
        let dir_prefix = format!("{path}/");
        Ok(files.keys().any(|k| k == path || k.starts_with(&dir_prefix)))
    }

    fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let files = self.lock();
        let prefix = format!("{path}/");
        let mut names: Vec<String> = files
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('/') {
                Some((dir, _)) => dir.to_string(),
                None => rest.to_string(),
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn mkdirs(&self, _path: &str) -> io::Result<()> {
        Ok(())
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        self.lock().remove(path);
        Ok(())
    }
}
