//! Baseline repairs every run should get: broken image references,
//! duplicate element ids, dangling fragment links.

use super::{Context, ExecMode, Filter};
use crate::error::Result;
use crate::paths;
use crate::xml::{local_name, Document, Node};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

pub struct General {
    /// Element ids per processed file, collected during the per-file stage
    /// and consulted when pruning cross-file fragment references.
    anchors: DashMap<String, HashSet<String>>,
}

impl General {
    pub fn new() -> Self {
        General {
            anchors: DashMap::new(),
        }
    }
}

impl Default for General {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for General {
    fn name(&self) -> &'static str {
        "general"
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Parallel
    }

    fn targets(&self, ctx: &Context) -> Vec<String> {
        ctx.registry.xhtml_paths()
    }

    fn process(&self, ctx: &Context, path: &str) -> Result<()> {
        let Some(mut doc) = ctx.vfs.read_xml(path) else {
            ctx.log(&format!("Error loading XHTML file {path}, skipping."));
            return Ok(());
        };
        let publisher_mode = ctx.config.get_bool("publisherMode")?;

        let mut changed = false;
        if !publisher_mode {
            changed |= replace_missing_images(&mut doc, ctx, path);
        }
        changed |= fix_duplicate_ids(&mut doc, ctx, path);

        self.anchors.insert(path.to_string(), collect_ids(&doc));

        if changed {
            ctx.vfs.write_xml(path, doc)?;
        }
        Ok(())
    }

    fn post_process(&mut self, ctx: &mut Context) -> Result<()> {
        prune_dangling_fragments(ctx, &self.anchors)?;
        self.anchors.clear();
        Ok(())
    }
}

/// Replace `<img>` elements whose source does not exist in the container
/// with their alt text (or nothing when alt is empty). Remote and data
/// sources are left alone.
fn replace_missing_images(doc: &mut Document, ctx: &Context, path: &str) -> bool {
    let vfs = ctx.vfs;
    let logger = ctx.logger;
    let file = path.to_string();

    let changed = std::cell::Cell::new(false);
    doc.root.rewrite_elements(&|e| {
        if e.local_name() != "img" {
            return Some(Node::Element(e));
        }
        let src = e.attr("src").unwrap_or("");
        if src.is_empty() || is_external(src) {
            return Some(Node::Element(e));
        }
        let target = paths::to_container_path(&file, &paths::decode_href(src));
        if vfs.exists(&target) {
            return Some(Node::Element(e));
        }
        changed.set(true);
        match e.attr("alt") {
            Some(alt) if !alt.is_empty() => {
                logger(&format!(
                    "Missing image '{src}' in {file} replaced by its alt text."
                ));
                Some(Node::Text(alt.to_string()))
            }
            _ => {
                logger(&format!("Missing image '{src}' in {file} removed."));
                None
            }
        }
    });
    changed.get()
}

fn is_external(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://") || src.starts_with("data:")
}

/// Rename second and later occurrences of a duplicated element id to the
/// next free `_N` suffix and update fragment hrefs that named the old id.
/// Only hrefs whose fragment matches the id exactly are rewritten; an id
/// that is a prefix of another id must not be touched.
fn fix_duplicate_ids(doc: &mut Document, ctx: &Context, path: &str) -> bool {
    let mut counts: HashMap<String, usize> = HashMap::new();
    doc.root.walk(&mut |e| {
        if let Some(id) = e.attr("id") {
            *counts.entry(id.to_string()).or_default() += 1;
        }
    });
    if !counts.values().any(|&n| n > 1) {
        return false;
    }

    let mut taken: HashSet<String> = counts.keys().cloned().collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut renames: HashMap<String, String> = HashMap::new();

    doc.root.walk_mut(&mut |e| {
        let Some(id) = e.attr("id").map(str::to_string) else {
            return;
        };
        if seen.insert(id.clone()) {
            return;
        }
        let mut n = 1;
        let new_id = loop {
            let candidate = format!("{id}_{n}");
            if taken.insert(candidate.clone()) {
                break candidate;
            }
            n += 1;
        };
        ctx.log(&format!(
            "Duplicate id '{id}' in {path} renamed to '{new_id}'."
        ));
        e.set_attr("id", &new_id);
        // Later references resolve to the renamed (last) occurrence.
        renames.insert(id, new_id);
    });

    doc.root.walk_mut(&mut |e| {
        let Some(href) = e.attr("href").map(str::to_string) else {
            return;
        };
        let (target, Some(fragment)) = paths::split_fragment(&href) else {
            return;
        };
        if !target.is_empty() {
            return;
        }
        if let Some(new_id) = renames.get(fragment) {
            e.set_attr("href", &format!("#{new_id}"));
        }
    });
    true
}

fn collect_ids(doc: &Document) -> HashSet<String> {
    let mut ids = HashSet::new();
    doc.root.walk(&mut |e| {
        if let Some(id) = e.attr("id") {
            ids.insert(id.to_string());
        }
    });
    ids
}

/// Drop the fragment from hrefs pointing at an id that exists in no
/// processed target document. Only targets this run collected ids for are
/// judged; anything else is left alone.
fn prune_dangling_fragments(
    ctx: &Context,
    anchors: &DashMap<String, HashSet<String>>,
) -> Result<()> {
    for file in anchors.iter().map(|entry| entry.key().clone()).collect::<Vec<_>>() {
        let Some(mut doc) = ctx.vfs.read_xml(&file) else {
            continue;
        };
        let mut changed = false;
        doc.root.walk_mut(&mut |e| {
            if local_name(&e.name) != "a" {
                return;
            }
            let Some(href) = e.attr("href").map(str::to_string) else {
                return;
            };
            let (target, Some(fragment)) = paths::split_fragment(&href) else {
                return;
            };
            if fragment.is_empty() || is_external(&href) {
                return;
            }
            let target_path = if target.is_empty() {
                file.clone()
            } else {
                paths::to_container_path(&file, &paths::decode_href(target))
            };
            let Some(ids) = anchors.get(&target_path) else {
                return;
            };
            if !ids.contains(fragment) {
                ctx.log(&format!(
                    "Dangling fragment '#{fragment}' in {file} pruned."
                ));
                if target.is_empty() {
                    e.remove_attr("href");
                } else {
                    e.set_attr("href", target);
                }
                changed = true;
            }
        });
        if changed {
            ctx.vfs.write_xml(&file, doc)?;
        }
    }
    Ok(())
}
