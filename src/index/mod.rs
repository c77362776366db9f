//! Package discovery and manifest indexing.
//!
//! Walks container.xml to the package document, parses the manifest into
//! owned [`ManifestEntry`] records, repairs broken entries (missing ids,
//! absolute hrefs, unlisted files, wrong media types), and writes the
//! repaired manifest back at save time.

pub mod ncx;
pub mod opf;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::paths;
use crate::vfs::Vfs;
use crate::xml::{Document, Element};
use crate::Logger;
use std::collections::HashSet;

pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

/// One manifest item, with both spellings of its location.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub id: String,
    /// Href relative to the package document, as the manifest will write it.
    pub package_path: String,
    /// Canonical path from the container root, as the VFS stores it.
    pub container_path: String,
    pub media_type: String,
    pub properties: Vec<String>,
    /// The original manifest element, kept so unknown attributes survive a
    /// manifest rewrite. Entries added during repair have none.
    pub origin: Option<Element>,
}

impl ManifestEntry {
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    pub fn add_property(&mut self, property: &str) {
        if !self.has_property(property) {
            self.properties.push(property.to_string());
        }
    }
}

/// Parsed package state carried through the filter pipeline.
#[derive(Debug)]
pub struct PackageRegistry {
    pub opf_doc: Document,
    pub opf_path: String,
    pub ncx_doc: Option<Document>,
    pub ncx_path: Option<String>,
    pub entries: Vec<ManifestEntry>,
    /// Version the output will declare, after any upgrade decision.
    pub target_version: u8,
}

impl PackageRegistry {
    /// Locate and index the package document inside an imported container.
    pub fn index(vfs: &Vfs, config: &Config, logger: &Logger) -> Result<Self> {
        let container = vfs.read_string(CONTAINER_PATH).map_err(|_| {
            Error::InvalidEpub("META-INF/container.xml is missing".to_string())
        })?;
        let container_doc = Document::parse(&container)?;
        let rootfiles = container_doc.root.find_all("rootfile");
        if rootfiles.len() > 1 {
            logger("Multiple rootfiles declared; only the first is processed.");
        }
        let opf_path = rootfiles
            .first()
            .and_then(|rf| rf.attr("full-path"))
            .map(|p| paths::to_container_path("", &paths::decode_href(p)))
            .ok_or_else(|| {
                Error::InvalidEpub("container.xml declares no rootfile".to_string())
            })?;

        let opf_src = vfs.read_string(&opf_path).map_err(|_| {
            Error::InvalidEpub(format!("package document {opf_path} is missing"))
        })?;
        let mut opf_doc = Document::parse(&opf_src)?;
        opf_doc.normalize_namespace(opf::OPF_NS);

        let target_version = decide_version(&mut opf_doc, config, logger)?;

        let mut registry = PackageRegistry {
            opf_doc,
            opf_path,
            ncx_doc: None,
            ncx_path: None,
            entries: Vec::new(),
            target_version,
        };
        registry.index_manifest(vfs, logger)?;
        registry.register_unlisted(vfs, logger)?;
        registry.load_ncx(vfs, config, logger)?;
        Ok(registry)
    }

    pub fn entry_by_id(&self, id: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_by_path(&self, container_path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.container_path == container_path)
    }

    pub fn entry_by_path_mut(&mut self, container_path: &str) -> Option<&mut ManifestEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.container_path == container_path)
    }

    /// Container paths of all XHTML content documents.
    pub fn xhtml_paths(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.media_type == XHTML_MEDIA_TYPE)
            .map(|e| e.container_path.clone())
            .collect()
    }

    fn index_manifest(&mut self, vfs: &Vfs, logger: &Logger) -> Result<()> {
        let manifest = self
            .opf_doc
            .root
            .find("manifest")
            .ok_or_else(|| Error::InvalidEpub("package has no manifest".to_string()))?;
        let base = self.opf_path.clone();
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut entries = Vec::new();

        for item in manifest.child_elements() {
            if item.local_name() != "item" {
                continue;
            }
            let href = item.attr("href").unwrap_or("").to_string();
            let container_path = paths::to_container_path(&base, &paths::decode_href(&href));
            if href.is_empty() || !vfs.exists(&container_path) {
                logger(&format!(
                    "Manifest entry '{href}' points at no stored file, dropped."
                ));
                continue;
            }

            let package_path = if href.starts_with('/') {
                match paths::to_relative_path(&base, &container_path) {
                    Ok(relative) => {
                        logger(&format!(
                            "Normalized absolute manifest href '{href}' to '{relative}'."
                        ));
                        relative
                    }
                    Err(_) => {
                        logger(&format!(
                            "Manifest href '{href}' lies outside the package directory."
                        ));
                        href.clone()
                    }
                }
            } else {
                href.clone()
            };

            let mut id = item.attr("id").unwrap_or("").to_string();
            if id.is_empty() {
                id = generated_id(vfs, &container_path)?;
                logger(&format!("Manifest entry '{href}' had no id, assigned '{id}'."));
            }
            if !seen_ids.insert(id.clone()) {
                let mut n = 2;
                let base_id = id.clone();
                while !seen_ids.insert(format!("{base_id}_{n}")) {
                    n += 1;
                }
                id = format!("{base_id}_{n}");
                logger(&format!(
                    "Duplicate manifest id '{base_id}' renamed to '{id}'."
                ));
            }

            let mut media_type = item.attr("media-type").unwrap_or("").to_string();
            if media_type.is_empty() {
                media_type = media_type_for_path(&container_path).to_string();
                logger(&format!(
                    "Manifest entry '{href}' had no media-type, assigned '{media_type}'."
                ));
            }

            let properties = item
                .attr("properties")
                .map(|p| p.split_ascii_whitespace().map(str::to_string).collect())
                .unwrap_or_default();

            entries.push(ManifestEntry {
                id,
                package_path,
                container_path,
                media_type,
                properties,
                origin: Some(item.clone()),
            });
        }
        self.entries = entries;
        Ok(())
    }

    /// Add stored files the manifest never mentions. The container marker,
    /// META-INF tree, and the package document itself are exempt.
    fn register_unlisted(&mut self, vfs: &Vfs, logger: &Logger) -> Result<()> {
        let known: HashSet<&str> = self
            .entries
            .iter()
            .map(|e| e.container_path.as_str())
            .collect();
        let mut ids: HashSet<String> = self.entries.iter().map(|e| e.id.clone()).collect();

        let mut unlisted: Vec<String> = vfs
            .list_all()
            .into_iter()
            .filter(|path| {
                path != crate::vfs::MIMETYPE_PATH
                    && path != &self.opf_path
                    && !path.starts_with("META-INF/")
                    && !known.contains(path.as_str())
            })
            .collect();
        unlisted.sort();

        for path in unlisted {
            let package_path = match paths::to_relative_path(&self.opf_path, &path) {
                Ok(relative) => relative,
                Err(_) => format!("/{path}"),
            };
            let mut id = generated_id(vfs, &path)?;
            while !ids.insert(id.clone()) {
                id.push('x');
            }
            logger(&format!("Registered unlisted file '{path}' as '{id}'."));
            self.entries.push(ManifestEntry {
                id,
                package_path,
                container_path: path.clone(),
                media_type: media_type_for_path(&path).to_string(),
                properties: Vec::new(),
                origin: None,
            });
        }
        Ok(())
    }

    /// Resolve the legacy NCX via the spine toc reference, fixing its media
    /// type and optionally its uid and numbering.
    fn load_ncx(&mut self, vfs: &Vfs, config: &Config, logger: &Logger) -> Result<()> {
        let toc_id = self
            .opf_doc
            .root
            .find("spine")
            .and_then(|spine| spine.attr("toc"))
            .map(str::to_string);
        let entry = match toc_id {
            Some(id) => self.entry_by_id(&id),
            None => self
                .entries
                .iter()
                .find(|e| e.media_type == NCX_MEDIA_TYPE || e.container_path.ends_with(".ncx")),
        };
        let Some(entry) = entry else {
            return Ok(());
        };
        let ncx_path = entry.container_path.clone();
        let entry_id = entry.id.clone();

        if let Some(entry) = self.entry_by_path_mut(&ncx_path)
            && entry.media_type != NCX_MEDIA_TYPE
        {
            logger(&format!(
                "Corrected media type of NCX '{}' to '{NCX_MEDIA_TYPE}'.",
                entry.package_path
            ));
            entry.media_type = NCX_MEDIA_TYPE.to_string();
        }

        let Some(mut doc) = vfs.read_xml(&ncx_path) else {
            logger(&format!("NCX '{ncx_path}' could not be parsed, ignored."));
            return Ok(());
        };

        if config.get_bool("sanitizeNcx")? {
            if let Some(uid) = opf::unique_identifier(&self.opf_doc) {
                ncx::sync_uid(&mut doc, &uid, logger);
            }
            ncx::reorder(&mut doc, logger);
            vfs.write_xml(&ncx_path, doc.clone())?;
        }

        if self
            .opf_doc
            .root
            .find("spine")
            .is_some_and(|s| s.attr("toc").is_none())
            && let Some(spine) = self.opf_doc.root.find_mut("spine")
        {
            spine.set_attr("toc", &entry_id);
        }

        self.ncx_doc = Some(doc);
        self.ncx_path = Some(ncx_path);
        Ok(())
    }

    /// Rewrite the manifest from the entry list and write the package
    /// document (and any modified NCX) back to storage.
    pub fn update_manifest(&mut self, vfs: &Vfs) -> Result<()> {
        let manifest = self
            .opf_doc
            .root
            .find_mut("manifest")
            .ok_or_else(|| Error::InvalidEpub("package has no manifest".to_string()))?;
        manifest.children.clear();
        for entry in &self.entries {
            let mut item = entry.origin.clone().unwrap_or_else(|| Element::new("item"));
            item.set_attr("id", &entry.id);
            item.set_attr("href", &entry.package_path);
            item.set_attr("media-type", &entry.media_type);
            if entry.properties.is_empty() {
                item.remove_attr("properties");
            } else {
                item.set_attr("properties", &entry.properties.join(" "));
            }
            manifest.push_element(item);
        }
        vfs.write_xml(&self.opf_path, self.opf_doc.clone())?;

        if let (Some(doc), Some(path)) = (&self.ncx_doc, &self.ncx_path)
            && vfs.exists(path)
        {
            vfs.write_xml(path, doc.clone())?;
        }
        Ok(())
    }
}

fn decide_version(opf: &mut Document, config: &Config, logger: &Logger) -> Result<u8> {
    let declared = opf.root.attr("version").unwrap_or("").to_string();
    if declared.starts_with('3') {
        return Ok(3);
    }
    let requested = config.get_int("epubVer")?;
    let overwrite = config.get_bool("overwrite")?;
    let upgrade = match requested {
        3 => true,
        2 => false,
        _ => !overwrite,
    };
    if upgrade {
        logger("EPUB 2.x package found, upgrading to 3.x.");
        opf.root.set_attr("version", "3.0");
        Ok(3)
    } else {
        logger("EPUB 2.x package found, keeping declared version.");
        Ok(2)
    }
}

/// Deterministic id for entries that have none, derived from the stored
/// content so reruns agree.
fn generated_id(vfs: &Vfs, container_path: &str) -> Result<String> {
    let digest = vfs.hash(container_path)?;
    Ok(format!("id-{}", &digest[..16]))
}

/// Media type guessed from the file extension, for manifest repair.
pub fn media_type_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xhtml" | "html" | "htm" => XHTML_MEDIA_TYPE,
        "ncx" => NCX_MEDIA_TYPE,
        "opf" => "application/oebps-package+xml",
        "xml" => "application/xml",
        "css" => "text/css",
        "js" => "application/javascript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "otf" => "font/otf",
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
