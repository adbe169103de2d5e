//! Real-filesystem storage backend with write-to-temp-then-rename commits.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::{AtomicWriteOptions, StorageBackend, WriteSession};

/// Storage backend over the process's filesystem. Paths are used verbatim,
/// so callers root their worlds via the context's root path.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilesystemBackend;

struct AtomicFileSession {
    final_path: PathBuf,
    temp_path: PathBuf,
    replace_existing: bool,
    writer: BufWriter<File>,
}

impl Write for AtomicFileSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl WriteSession for AtomicFileSession {
    fn commit(mut self: Box<Self>) -> io::Result<()> {
        self.writer.flush()?;
        drop(self.writer);
        if !self.replace_existing && self.final_path.exists() {
            let _ = fs::remove_file(&self.temp_path);
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", self.final_path.display()),
            ));
        }
        fs::rename(&self.temp_path, &self.final_path)
    }

    fn abort(self: Box<Self>) {
        drop(self.writer);
        let _ = fs::remove_file(&self.temp_path);
    }
}

struct DirectFileSession {
    writer: BufWriter<File>,
}

impl Write for DirectFileSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl WriteSession for DirectFileSession {
    fn commit(mut self: Box<Self>) -> io::Result<()> {
        self.writer.flush()
    }

    fn abort(self: Box<Self>) {}
}

fn create_parent_dirs(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

impl StorageBackend for FilesystemBackend {
    fn open_read(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn open_write(&self, path: &str, options: AtomicWriteOptions) -> io::Result<Box<dyn WriteSession>> {
        let final_path = PathBuf::from(path);
        create_parent_dirs(&final_path)?;

        if !options.atomic {
            let file = File::create(&final_path)?;
            return Ok(Box::new(DirectFileSession {
                writer: BufWriter::new(file),
            }));
        }

        let temp_path = final_path.with_extension(match final_path.extension() {
            Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
            None => "tmp".to_string(),
        });
        let file = File::create(&temp_path)?;
        Ok(Box::new(AtomicFileSession {
            final_path,
            temp_path,
            replace_existing: options.replace_existing,
            writer: BufWriter::new(file),
        }))
    }

    fn exists(&self, path: &str) -> io::Result<bool> {
        Ok(Path::new(path).exists())
    }

    fn list(&self, path: &str) -> io::Result<Vec<String>> {
        if !Path::new(path).exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(path)? {
            out.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(out)
    }

    fn mkdirs(&self, path: &str) -> io::Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(path)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn atomic_write_is_invisible_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions/region_0_0_0.bin");
        let path = path.to_string_lossy().into_owned();
        let backend = FilesystemBackend;

        let mut session = backend.open_write(&path, AtomicWriteOptions::default()).unwrap();
        session.write_all(b"payload").unwrap();
        assert!(!backend.exists(&path).unwrap());
        session.commit().unwrap();
        assert_eq!(backend.read_all(&path).unwrap(), b"payload");
    }

    #[test]
    fn aborted_write_leaves_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin").to_string_lossy().into_owned();
        let backend = FilesystemBackend;
        backend.write_all_atomic(&path, b"old").unwrap();

        let mut session = backend.open_write(&path, AtomicWriteOptions::default()).unwrap();
        session.write_all(b"new").unwrap();
        session.abort();
        assert_eq!(backend.read_all(&path).unwrap(), b"old");
    }

    #[test]
    fn list_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let backend = FilesystemBackend;
        backend
            .write_all_atomic(&format!("{root}/a/one.bin"), b"1")
            .unwrap();
        backend
            .write_all_atomic(&format!("{root}/a/two.bin"), b"2")
            .unwrap();

        let mut names = backend.list(&format!("{root}/a")).unwrap();
        names.sort();
        assert_eq!(names, ["one.bin", "two.bin"]);
        assert!(backend.list(&format!("{root}/missing")).unwrap().is_empty());

        backend.remove(&format!("{root}/a/one.bin")).unwrap();
        backend.remove(&format!("{root}/a/one.bin")).unwrap();
        assert!(!backend.exists(&format!("{root}/a/one.bin")).unwrap());
    }
}
