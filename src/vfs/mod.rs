//! Virtual file system: a path-addressed byte store with a transparent
//! parsed-XML cache on top.
//!
//! The whole publication is materialized here between import and export.
//! Two interchangeable backends carry the bytes (an in-memory map and a
//! private temp directory), and neither knows anything about EPUB: manifest
//! semantics live entirely in the layers above.

mod disk;
mod mem;

use std::io::{Read, Seek, Write};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::xml::{Document, strip_bom};
use crate::{Logger, RepairHook};

pub use disk::DiskStore;
pub use mem::MemStore;

/// The zip entry every EPUB container must open with.
pub const MIMETYPE_PATH: &str = "mimetype";
pub const MIMETYPE_CONTENT: &str = "application/epub+zip";

/// Backend selection, decided once per sanitize operation.
#[derive(Debug)]
enum Store {
    Mem(MemStore),
    Disk(DiskStore),
}

#[derive(Debug, Clone)]
struct CachedDoc {
    doc: Document,
    dirty: bool,
}

/// One publication's file store plus its parsed-document cache.
///
/// All accessors take `&self`; the backing maps are concurrent, so distinct
/// files can be read and written from parallel filter workers. Dropping the
/// `Vfs` releases backend resources (the disk backend deletes its temp
/// directory).
pub struct Vfs {
    store: Store,
    cache: DashMap<String, CachedDoc>,
    cache_enabled: bool,
    repair_hook: Option<RepairHook>,
    logger: Logger,
}

impl Vfs {
    pub fn in_memory(cache_enabled: bool, logger: Logger) -> Self {
        Vfs {
            store: Store::Mem(MemStore::new()),
            cache: DashMap::new(),
            cache_enabled,
            repair_hook: None,
            logger,
        }
    }

    pub fn on_disk(cache_enabled: bool, logger: Logger) -> Result<Self> {
        Ok(Vfs {
            store: Store::Disk(DiskStore::new()?),
            cache: DashMap::new(),
            cache_enabled,
            repair_hook: None,
            logger,
        })
    }

    /// Install a best-effort repair hook invoked when a document fails to
    /// parse. The hook receives the raw text and returns a repaired
    /// candidate, which gets one more parse attempt.
    pub fn set_repair_hook(&mut self, hook: RepairHook) {
        self.repair_hook = Some(hook);
    }

    fn log(&self, msg: &str) {
        (self.logger)(msg);
    }

    // ------------------------------------------------------------------
    // Raw accessors
    // ------------------------------------------------------------------

    pub fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        match &self.store {
            Store::Mem(s) => s.read(path),
            Store::Disk(s) => s.read(path),
        }
    }

    pub fn write_bytes(&self, path: &str, content: Vec<u8>) -> Result<()> {
        match &self.store {
            Store::Mem(s) => {
                s.write(path, content);
                Ok(())
            }
            Store::Disk(s) => s.write(path, &content),
        }
    }

    pub fn read_string(&self, path: &str) -> Result<String> {
        let bytes = self.read_bytes(path)?;
        Ok(String::from_utf8(strip_bom(&bytes).to_vec())?)
    }

    pub fn write_string(&self, path: &str, content: &str) -> Result<()> {
        self.write_bytes(path, content.as_bytes().to_vec())
    }

    pub fn exists(&self, path: &str) -> bool {
        match &self.store {
            Store::Mem(s) => s.exists(path),
            Store::Disk(s) => s.exists(path),
        }
    }

    /// Remove a file and any cached parse of it.
    pub fn delete(&self, path: &str) {
        match &self.store {
            Store::Mem(s) => s.delete(path),
            Store::Disk(s) => s.delete(path),
        }
        self.cache.remove(path);
    }

    pub fn list_all(&self) -> Vec<String> {
        match &self.store {
            Store::Mem(s) => s.list(),
            Store::Disk(s) => s.list(),
        }
    }

    /// Lowercase hex SHA-256 of a file's content.
    pub fn hash(&self, path: &str) -> Result<String> {
        let bytes = self.read_bytes(path)?;
        let digest = Sha256::digest(&bytes);
        Ok(format!("{digest:x}"))
    }

    // ------------------------------------------------------------------
    // Cached XML accessors
    // ------------------------------------------------------------------

    /// Parse a document, via the cache when enabled. Returns `None` (after
    /// logging) for missing files and for markup that stays malformed even
    /// after the repair hook ran.
    pub fn read_xml(&self, path: &str) -> Option<Document> {
        if let Some(cached) = self.cache.get(path) {
            return Some(cached.doc.clone());
        }

        let content = match self.read_string(path) {
            Ok(content) => content,
            Err(_) => {
                self.log(&format!("XML file {path} not exist."));
                return None;
            }
        };

        let doc = match Document::parse(&content) {
            Ok(doc) => doc,
            Err(err) => match &self.repair_hook {
                Some(hook) => {
                    self.log(&format!("XML file {path} is malformed, trying to fix it..."));
                    match Document::parse(&hook(&content)) {
                        Ok(doc) => doc,
                        Err(fix_err) => {
                            self.log(&format!(
                                "Error loading XML file {path} after fix attempt: {fix_err}"
                            ));
                            return None;
                        }
                    }
                }
                None => {
                    self.log(&format!("Error loading XML file {path}: {err}"));
                    return None;
                }
            },
        };

        if self.cache_enabled {
            self.cache.insert(
                path.to_string(),
                CachedDoc {
                    doc: doc.clone(),
                    dirty: false,
                },
            );
        }
        Some(doc)
    }

    /// Store a (possibly modified) document. With caching enabled the
    /// serialization is deferred until export; otherwise it happens now and
    /// the cache entry is evicted.
    pub fn write_xml(&self, path: &str, doc: Document) -> Result<()> {
        if self.cache_enabled {
            self.cache
                .insert(path.to_string(), CachedDoc { doc, dirty: true });
            Ok(())
        } else {
            let bytes = doc.to_bytes();
            self.cache.remove(path);
            self.write_bytes(path, bytes)
        }
    }

    /// Drop one cache entry. Use after modifying a file through the raw
    /// accessors so a stale parse cannot shadow it.
    pub fn invalidate(&self, path: &str) {
        self.cache.remove(path);
    }

    // ------------------------------------------------------------------
    // Container import/export
    // ------------------------------------------------------------------

    /// Populate the store from a zip archive. Directory entries and paths
    /// trying to escape the container root are skipped.
    pub fn import<R: Read + Seek>(&self, mut archive: ZipArchive<R>) -> Result<()> {
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            if name.split('/').any(|seg| seg == "..") {
                self.log(&format!("Skipping unsafe archive entry '{name}'."));
                continue;
            }
            let mut content = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut content)?;
            self.write_bytes(&name, content)?;
        }
        if let Store::Mem(s) = &self.store {
            self.log(&format!(
                "Memory store uses about {} MB. Watch your memory pressure.",
                s.total_size() / 1024 / 1024
            ));
        }
        Ok(())
    }

    /// Write a new container: the mimetype marker first (stored,
    /// uncompressed), then every other file at the given deflate level.
    /// Dirty cached documents are flushed to the store before the walk.
    pub fn export<W: Write + Seek>(&self, writer: W, compression_level: i64) -> Result<()> {
        self.flush_cache()?;

        let mut zip = ZipWriter::new(writer);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression_level));

        zip.start_file(MIMETYPE_PATH, stored)?;
        zip.write_all(MIMETYPE_CONTENT.as_bytes())?;

        let mut files = self.list_all();
        files.sort(); // deterministic container layout
        for path in files {
            if path == MIMETYPE_PATH {
                continue;
            }
            let content = self.read_bytes(&path)?;
            zip.start_file(&path, deflated)?;
            zip.write_all(&content)?;
        }

        zip.finish()?;
        Ok(())
    }

    fn flush_cache(&self) -> Result<()> {
        let dirty: Vec<String> = self
            .cache
            .iter()
            .filter(|entry| entry.dirty)
            .map(|entry| entry.key().clone())
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }
        self.log(&format!(
            "Writing {} cached XML files to file system.",
            dirty.len()
        ));
        for path in dirty {
            if let Some(mut entry) = self.cache.get_mut(&path) {
                let bytes = entry.doc.to_bytes();
                entry.dirty = false;
                drop(entry);
                self.write_bytes(&path, bytes)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn test_vfs() -> Vfs {
        Vfs::in_memory(true, crate::default_logger())
    }

    fn zip_fixture(entries: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_import_export_round_trip() {
        let vfs = test_vfs();
        let input = zip_fixture(&[
            ("mimetype", b"application/epub+zip"),
            ("META-INF/container.xml", b"<container/>"),
            ("OEBPS/ch1.xhtml", b"<html/>"),
        ]);
        vfs.import(ZipArchive::new(input).unwrap()).unwrap();
        assert!(vfs.exists("OEBPS/ch1.xhtml"));

        let mut out = Cursor::new(Vec::new());
        vfs.export(&mut out, 6).unwrap();

        let mut archive = ZipArchive::new(out).unwrap();
        // Mimetype marker: first entry, stored, exact content
        let mut first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        let mut content = String::new();
        first.read_to_string(&mut content).unwrap();
        assert_eq!(content, "application/epub+zip");
    }

    #[test]
    fn test_import_reports_memory_use() {
        use std::sync::{Arc, Mutex};

        let lines: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = lines.clone();
        let vfs = Vfs::in_memory(
            true,
            Arc::new(move |msg: &str| sink.lock().unwrap().push(msg.to_string())),
        );
        let input = zip_fixture(&[("OEBPS/ch1.xhtml", b"<html/>".as_slice())]);
        vfs.import(ZipArchive::new(input).unwrap()).unwrap();
        assert!(
            lines
                .lock()
                .unwrap()
                .iter()
                .any(|l| l.starts_with("Memory store uses about"))
        );
    }

    #[test]
    fn test_read_missing_not_found() {
        let vfs = test_vfs();
        assert!(matches!(vfs.read_bytes("nope"), Err(Error::NotFound(_))));
        assert!(vfs.read_xml("nope").is_none());
    }

    #[test]
    fn test_xml_cache_deferred_write_back() {
        let vfs = test_vfs();
        vfs.write_bytes("a.xhtml", b"<html><body/></html>".to_vec())
            .unwrap();

        let mut doc = vfs.read_xml("a.xhtml").unwrap();
        doc.root.set_attr("lang", "en");
        vfs.write_xml("a.xhtml", doc).unwrap();

        // Raw bytes untouched until export flushes the cache
        assert_eq!(vfs.read_bytes("a.xhtml").unwrap(), b"<html><body/></html>");
        let mut out = Cursor::new(Vec::new());
        vfs.export(&mut out, 6).unwrap();
        let flushed = String::from_utf8(vfs.read_bytes("a.xhtml").unwrap()).unwrap();
        assert!(flushed.contains(r#"lang="en""#));
    }

    #[test]
    fn test_xml_write_immediate_without_cache() {
        let vfs = Vfs::in_memory(false, crate::default_logger());
        vfs.write_bytes("a.xhtml", b"<html/>".to_vec()).unwrap();
        let mut doc = vfs.read_xml("a.xhtml").unwrap();
        doc.root.set_attr("lang", "fr");
        vfs.write_xml("a.xhtml", doc).unwrap();
        let raw = String::from_utf8(vfs.read_bytes("a.xhtml").unwrap()).unwrap();
        assert!(raw.contains(r#"lang="fr""#));
    }

    #[test]
    fn test_repair_hook() {
        let mut vfs = test_vfs();
        vfs.write_bytes("bad.xhtml", b"<html><p>oops</div></html>".to_vec())
            .unwrap();
        assert!(vfs.read_xml("bad.xhtml").is_none());

        vfs.set_repair_hook(std::sync::Arc::new(|_raw: &str| {
            "<html><p>fixed</p></html>".to_string()
        }));
        let doc = vfs.read_xml("bad.xhtml").unwrap();
        assert_eq!(doc.root.find("p").unwrap().text(), "fixed");
    }

    #[test]
    fn test_hash() {
        let vfs = test_vfs();
        vfs.write_bytes("f", b"abc".to_vec()).unwrap();
        assert_eq!(
            vfs.hash("f").unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_delete_invalidates_cache() {
        let vfs = test_vfs();
        vfs.write_bytes("a.xhtml", b"<html/>".to_vec()).unwrap();
        let _ = vfs.read_xml("a.xhtml");
        vfs.delete("a.xhtml");
        assert!(!vfs.exists("a.xhtml"));
        assert!(vfs.read_xml("a.xhtml").is_none());
    }

    #[test]
    fn test_disk_backend() {
        let vfs = Vfs::on_disk(true, crate::default_logger()).unwrap();
        vfs.write_bytes("OEBPS/ch1.xhtml", b"<html/>".to_vec()).unwrap();
        assert!(vfs.exists("OEBPS/ch1.xhtml"));
        assert_eq!(vfs.list_all(), vec!["OEBPS/ch1.xhtml"]);
        assert_eq!(vfs.read_bytes("OEBPS/ch1.xhtml").unwrap(), b"<html/>");
    }
}
