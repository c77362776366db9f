//! In-memory backend: a concurrent path -> bytes map.

use dashmap::DashMap;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct MemStore {
    files: DashMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    pub fn write(&self, path: &str, content: Vec<u8>) {
        self.files.insert(path.to_string(), content);
    }

    pub fn delete(&self, path: &str) {
        self.files.remove(path);
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn list(&self) -> Vec<String> {
        self.files.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Total payload size, reported after import so callers can warn about
    /// memory pressure on large publications.
    pub fn total_size(&self) -> usize {
        self.files.iter().map(|entry| entry.value().len()).sum()
    }
}
