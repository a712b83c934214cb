//! The file layer: the minimal read-only collaborator the core requires
//! from the host platform.
//!
//! The core never touches `std::fs` directly outside of [`StdFileLayer`];
//! every other module reaches files only through the [`FileLayer`] trait,
//! so an embedding application can substitute a virtual or sandboxed
//! implementation without touching the resource manager itself.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// An open file handle, opaque to everything above the file layer.
///
/// Cloning a `FileRef` is cheap (it shares the underlying descriptor); the
/// resource manager relies on this to let one PKG file handle be shared by
/// every file inside that package, per the "no implicit seek" sharing rule.
#[derive(Clone)]
pub struct FileRef(Arc<std::sync::Mutex<File>>);

impl FileRef {
    fn new(file: File) -> Self {
        FileRef(Arc::new(std::sync::Mutex::new(file)))
    }
}

impl std::fmt::Debug for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRef").finish_non_exhaustive()
    }
}

/// The read-only file layer contract the core requires from its host.
///
/// All reads are explicit-offset (`read_at`); there is no shared seek
/// cursor, so concurrent reads against one `FileRef` from multiple loads are
/// safe without external synchronization.
pub trait FileLayer: Send + Sync {
    /// Opens `path`, returning [`Error::NotFound`] if it does not exist.
    fn open(&self, path: &str) -> Result<FileRef>;

    /// Returns the size in bytes of an open file.
    fn size(&self, file: &FileRef) -> Result<u64>;

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually read (which may be less than `buf.len()` at
    /// end of file; the caller decides whether a short read is an error).
    fn read_at(&self, file: &FileRef, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Lists entries of a directory with case-folded matching semantics;
    /// used by the path resolver's filesystem fallback. Returns an empty
    /// list for a directory with no entries, and `NotFound` if `dir` does
    /// not exist.
    fn list_dir(&self, dir: &str) -> Result<Vec<String>>;
}

/// The default [`FileLayer`] implementation, backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileLayer;

impl FileLayer for StdFileLayer {
    fn open(&self, path: &str) -> Result<FileRef> {
        match File::open(path) {
            Ok(f) => Ok(FileRef::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.to_string()))
            }
            Err(e) => Err(Error::IoError(e)),
        }
    }

    fn size(&self, file: &FileRef) -> Result<u64> {
        let guard = file.0.lock().expect("file mutex poisoned");
        Ok(guard.metadata()?.len())
    }

    fn read_at(&self, file: &FileRef, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut guard = file.0.lock().expect("file mutex poisoned");
        guard.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match guard.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::IoError(e)),
            }
        }
        Ok(total)
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let path = Path::new(dir);
        let read_dir = std::fs::read_dir(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(dir.to_string())
            } else {
                Error::IoError(e)
            }
        })?;
        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_back_written_content() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello").unwrap();
        tmp.flush().unwrap();

        let layer = StdFileLayer;
        let file_ref = layer.open(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(layer.size(&file_ref).unwrap(), 5);

        let mut buf = [0u8; 5];
        let n = layer.read_at(&file_ref, 0, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn missing_file_is_not_found() {
        let layer = StdFileLayer;
        assert!(matches!(
            layer.open("/nonexistent/path/does/not/exist"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn read_past_end_is_short_not_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hi").unwrap();
        tmp.flush().unwrap();

        let layer = StdFileLayer;
        let file_ref = layer.open(tmp.path().to_str().unwrap()).unwrap();
        let mut buf = [0u8; 10];
        let n = layer.read_at(&file_ref, 0, &mut buf).unwrap();
        assert_eq!(n, 2);
    }
}
