//! On-disk backend: a private temp directory, removed on drop.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct DiskStore {
    dir: TempDir,
}

impl DiskStore {
    pub fn new() -> Result<Self> {
        Ok(DiskStore {
            dir: TempDir::with_prefix("epubscrub-")?,
        })
    }

    /// Map a container path onto the temp directory. Paths with `..`
    /// segments are rejected so a hostile archive cannot escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.split('/').any(|seg| seg == "..") {
            return Err(Error::Path(format!("unsafe path '{path}'")));
        }
        Ok(self.dir.path().join(path))
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.to_string()),
            _ => Error::Io(e),
        })
    }

    pub fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, content)?;
        Ok(())
    }

    pub fn delete(&self, path: &str) {
        if let Ok(full) = self.resolve(path) {
            let _ = fs::remove_file(full);
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn list(&self) -> Vec<String> {
        let mut out = Vec::new();
        walk(self.dir.path(), self.dir.path(), &mut out);
        out
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            // Container keys always use forward slashes
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(key);
        }
    }
}
