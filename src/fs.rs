//! Filesystem capability used by descriptors.
//!
//! Descriptors never call `std::fs` directly; they go through
//! [`Filesystem`] so the same code runs against local disk, a virtual
//! store or a test double.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tempfile::Builder;

/// Minimal storage capability: existence checks, whole-file reads and
/// whole-file writes.
pub trait Filesystem: fmt::Debug {
    /// Whether `path` exists
    fn exists(&self, path: &Path) -> bool;

    /// Read the whole file
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the file contents, creating it if needed
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

impl<F: Filesystem + ?Sized> Filesystem for &F {
    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        (**self).read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        (**self).write(path, contents)
    }
}

impl<F: Filesystem + ?Sized> Filesystem for Arc<F> {
    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        (**self).read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        (**self).write(path, contents)
    }
}

/// Local disk.
///
/// Writes land in a temporary file next to the target and are renamed into
/// place, so readers never observe a half-written descriptor. An existing
/// file keeps its permissions. The parent directory must already exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl Filesystem for LocalFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let existing = fs::metadata(path).ok().map(|metadata| metadata.permissions());

        let mut builder = Builder::new();
        if let (None, Some(permissions)) = (&existing, new_file_permissions()) {
            builder.permissions(permissions);
        }
        let mut temp_file = builder.tempfile_in(parent)?;
        if let Some(permissions) = existing {
            temp_file.as_file().set_permissions(permissions)?;
        }

        temp_file.write_all(contents)?;
        temp_file.flush()?;
        temp_file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Mode for a descriptor that does not exist yet: `0666` minus the umask,
/// like a plain `File::create`.
#[cfg(unix)]
fn new_file_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o666))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<fs::Permissions> {
    None
}

/// In-memory store.
///
/// Clones share the same contents, so a test can hand one handle to a
/// descriptor and inspect or reopen through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilesystem {
    files: Arc<RwLock<HashMap<PathBuf, Vec<u8>>>>,
    read_only: Arc<AtomicBool>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty file at `path`.
    pub fn touch(&self, path: impl Into<PathBuf>) {
        self.files.write().entry(path.into()).or_default();
    }

    /// Stores `contents` at `path`, bypassing the read-only switch.
    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), contents.into());
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.files.write().remove(path).is_some()
    }

    /// Contents at `path` as UTF-8 text, if present.
    pub fn contents(&self, path: &Path) -> Option<String> {
        self.files
            .read()
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Makes every subsequent `write` fail with `PermissionDenied`.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }
}

impl Filesystem for MemoryFilesystem {
    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files.read().get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
        })
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is read-only", path.display()),
            ));
        }
        self.files
            .write()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }
}
