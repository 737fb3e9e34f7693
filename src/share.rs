//! Shared directory adapter used by the server side of every operation.
//!
//! Names coming off the wire are bare file names. They are resolved against
//! the shared root and anything that would address a different directory
//! (separators, `..`, absolute paths, NUL) is refused.

use crate::error::{ProtocolError, ProtocolResult};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tracing::warn;

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct SharedDir {
    root: PathBuf,
}

impl SharedDir {
    /// Use `root` as is; the caller guarantees it exists.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory if needed and canonicalize it.
    pub fn open(root: &Path) -> io::Result<Self> {
        if !root.exists() {
            std::fs::create_dir_all(root)?;
        }
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self::new(root.canonicalize()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a bare file name to a path directly under the root.
    pub fn resolve(&self, name: &str) -> ProtocolResult<PathBuf> {
        let invalid = |why: &str| {
            ProtocolError::fs(name, io::Error::new(io::ErrorKind::InvalidInput, why.to_string()))
        };
        if name.is_empty() {
            return Err(invalid("empty file name"));
        }
        if name.contains('\0') {
            return Err(invalid("file name contains NUL byte"));
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if part == name => {}
            _ => return Err(invalid("file name must not contain path components")),
        }
        #[cfg(windows)]
        if name.contains(':') {
            return Err(invalid("file name contains colon"));
        }

        let joined = self.root.join(name);
        // An existing entry may be a symlink; make sure it stays inside the root
        if let Ok(canonical) = joined.canonicalize() {
            let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
            if !canonical.starts_with(&root) {
                return Err(invalid("file resolves outside the shared directory"));
            }
        }
        Ok(joined)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.size(name).is_some()
    }

    /// Size of a regular file, `None` when absent or not a file
    pub fn size(&self, name: &str) -> Option<u64> {
        let path = self.resolve(name).ok()?;
        let md = std::fs::metadata(path).ok()?;
        md.is_file().then(|| md.len())
    }

    /// Create (or truncate) a file for writing.
    pub async fn create(&self, name: &str) -> ProtocolResult<File> {
        let path = self.resolve(name)?;
        File::create(&path)
            .await
            .map_err(|e| ProtocolError::fs(name, e))
    }

    /// Open an existing regular file for reading, returning its size.
    pub async fn open_file(&self, name: &str) -> ProtocolResult<(File, u64)> {
        let path = self.resolve(name)?;
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ProtocolError::NotFound(name.to_string()))
            }
            Err(e) => return Err(ProtocolError::fs(name, e)),
        };
        let md = file
            .metadata()
            .await
            .map_err(|e| ProtocolError::fs(name, e))?;
        if !md.is_file() {
            return Err(ProtocolError::NotFound(name.to_string()));
        }
        Ok((file, md.len()))
    }

    pub fn delete(&self, name: &str) -> ProtocolResult<()> {
        let path = self.resolve(name)?;
        std::fs::remove_file(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ProtocolError::NotFound(name.to_string()),
            _ => ProtocolError::fs(name, e),
        })
    }

    /// Regular files in the root, in the order the OS enumerates them.
    pub fn list(&self) -> ProtocolResult<Vec<ListingEntry>> {
        let root_name = self.root.display().to_string();
        let rd = std::fs::read_dir(&self.root).map_err(|e| ProtocolError::fs(&root_name, e))?;
        let mut out = Vec::new();
        for entry in rd {
            let entry = entry.map_err(|e| ProtocolError::fs(&root_name, e))?;
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(raw) => {
                    warn!(name = ?raw, "skipping non UTF-8 file name");
                    continue;
                }
            };
            // links pointing outside the root are not served, so not listed
            if self.resolve(&name).is_err() {
                continue;
            }
            // follow symlinks so a linked file reports its target size
            match std::fs::metadata(entry.path()) {
                Ok(md) if md.is_file() => out.push(ListingEntry {
                    name,
                    size: md.len(),
                }),
                Ok(_) => {}
                Err(e) => warn!(file = %name, error = %e, "skipping unreadable entry"),
            }
        }
        Ok(out)
    }
}
