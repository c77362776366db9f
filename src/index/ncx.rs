//! Legacy NCX navigation helpers.

use crate::Logger;
use crate::xml::Document;
use std::collections::HashSet;

/// Force the NCX `dtb:uid` meta to match the package's declared unique
/// identifier. Readers reject books where the two disagree.
pub fn sync_uid(ncx: &mut Document, uid: &str, logger: &Logger) {
    let mut updated = false;
    ncx.root.walk_mut(&mut |e| {
        if e.local_name() == "meta" && e.attr("name") == Some("dtb:uid") {
            if e.attr("content") != Some(uid) {
                e.set_attr("content", uid);
                updated = true;
            }
        }
    });
    if updated {
        logger("Corrected dtb:uid in NCX.");
    }
}

/// Repair navPoint ids and playOrder numbering in document order:
/// ids starting with a digit gain a `navPoint-` prefix, duplicate ids get
/// an ordinal spliced in, and playOrder is renumbered sequentially with
/// navPoints sharing a target document sharing a number.
pub fn reorder(ncx: &mut Document, logger: &Logger) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut order = 0usize;
    let mut last_src: Option<String> = None;
    let mut index = 0usize;
    let mut changed = false;

    ncx.root.walk_mut(&mut |e| {
        if e.local_name() != "navPoint" {
            return;
        }
        index += 1;

        let mut id = e.attr("id").unwrap_or("").to_string();
        if id.starts_with(|c: char| c.is_ascii_digit()) {
            id = format!("navPoint-{id}");
            changed = true;
        }
        if !seen.insert(id.clone()) {
            id = format!("navPoint-{index}-{id}");
            seen.insert(id.clone());
            changed = true;
        }
        e.set_attr("id", &id);

        let src = e
            .find("content")
            .and_then(|c| c.attr("src"))
            .map(|s| s.split('#').next().unwrap_or(s).to_string());
        if src.is_none() || src != last_src {
            order += 1;
            last_src = src;
        }
        let play_order = order.to_string();
        if e.attr("playOrder") != Some(play_order.as_str()) {
            e.set_attr("playOrder", &play_order);
            changed = true;
        }
    });
    if changed {
        logger("Renumbered NCX navPoints.");
    }
}
