//! Package-document (OPF) helpers shared by the indexer and filters.

use crate::Logger;
use crate::xml::{Document, Element};

pub const OPF_NS: &str = "http://www.idpf.org/2007/opf";

/// Resolve the package's declared unique identifier: the text of the
/// `dc:identifier` referenced by the `unique-identifier` attribute.
pub fn unique_identifier(opf: &Document) -> Option<String> {
    let id_ref = opf.root.attr("unique-identifier")?;
    for identifier in opf.root.find_all("identifier") {
        if identifier.attr("id") == Some(id_ref) {
            return Some(identifier.text());
        }
    }
    None
}

/// EPUB 3 forbids empty Dublin Core elements such as `<dc:format/>`;
/// remove every one of them.
pub fn remove_empty_dc_elements(opf: &mut Document, logger: &Logger) {
    let Some(metadata) = opf.root.find_mut("metadata") else {
        return;
    };
    let before = metadata.children.len();
    metadata.children.retain(|node| match node.as_element() {
        Some(e) => !(e.name.starts_with("dc:") && e.children.is_empty()),
        None => true,
    });
    let removed = before - metadata.children.len();
    if removed > 0 {
        logger(&format!("Removed {removed} empty metadata elements."));
    }
}

/// EPUB 3 requires a `dcterms:modified` meta; add one when missing.
pub fn add_dcterms_modified(opf: &mut Document) {
    let Some(metadata) = opf.root.find_mut("metadata") else {
        return;
    };
    let present = metadata.child_elements().any(|e| {
        e.local_name() == "meta" && e.attr("property") == Some("dcterms:modified")
    });
    if present {
        return;
    }
    let mut meta = Element::new("meta");
    meta.set_attr("property", "dcterms:modified");
    meta.set_text(utc_timestamp());
    metadata.push_element(meta);
}

/// Reorder the spine to match the legacy navigation's reading order.
/// Items the NCX never references stay as a stable leading block.
pub fn correct_spine_order(opf: &mut Document, ncx: &Document, logger: &Logger) {
    let mut ncx_order: Vec<String> = Vec::new();
    for nav_point in ncx.root.find_all("navPoint") {
        if let Some(content) = nav_point.find("content")
            && let Some(src) = content.attr("src")
        {
            let path = src.split('#').next().unwrap_or(src).to_string();
            if !path.is_empty() && !ncx_order.contains(&path) {
                ncx_order.push(path);
            }
        }
    }
    if ncx_order.is_empty() {
        return;
    }

    // Resolve each itemref's href before taking the spine apart.
    let href_of = |opf: &Document, idref: &str| -> Option<String> {
        opf.root
            .find_all("item")
            .iter()
            .find(|item| item.attr("id") == Some(idref))
            .and_then(|item| item.attr("href"))
            .map(str::to_string)
    };
    let Some(spine) = opf.root.find("spine") else {
        return;
    };
    let mut refs: Vec<(Element, Option<usize>)> = spine
        .child_elements()
        .filter(|e| e.local_name() == "itemref")
        .map(|itemref| {
            let position = itemref
                .attr("idref")
                .and_then(|idref| href_of(opf, idref))
                .and_then(|href| ncx_order.iter().position(|h| *h == href));
            (itemref.clone(), position)
        })
        .collect();

    // Stable: unreferenced items keep their relative order up front.
    refs.sort_by_key(|(_, position)| match position {
        Some(i) => (1, *i),
        None => (0, 0),
    });

    let Some(spine) = opf.root.find_mut("spine") else {
        return;
    };
    spine.children.clear();
    for (itemref, _) in refs {
        spine.push_element(itemref);
    }
    logger("Corrected spine order from NCX.");
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`, computed from the epoch
/// without a calendar dependency.
fn utc_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    // Civil-from-days (Howard Hinnant's algorithm), valid for the epoch era.
    let z = days as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };

    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::Document;

    fn opf(body: &str) -> Document {
        Document::parse(&format!(
            r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">{body}</package>"#
        ))
        .unwrap()
    }

    #[test]
    fn test_unique_identifier() {
        let doc = opf(
            r#"<metadata><dc:identifier id="uid">urn:uuid:42</dc:identifier><dc:identifier>other</dc:identifier></metadata>"#,
        );
        assert_eq!(unique_identifier(&doc).unwrap(), "urn:uuid:42");

        let doc = opf("<metadata/>");
        assert_eq!(unique_identifier(&doc), None);
    }

    #[test]
    fn test_remove_empty_dc() {
        let mut doc = opf(
            r#"<metadata><dc:title>T</dc:title><dc:format/><dc:source></dc:source><meta property="x"/></metadata>"#,
        );
        remove_empty_dc_elements(&mut doc, &crate::default_logger());
        let metadata = doc.root.find("metadata").unwrap();
        assert_eq!(metadata.child_elements().count(), 2);
        assert!(doc.root.find("title").is_some());
    }

    #[test]
    fn test_add_dcterms_modified_once() {
        let mut doc = opf("<metadata/>");
        add_dcterms_modified(&mut doc);
        add_dcterms_modified(&mut doc);
        let count = doc
            .root
            .find_all("meta")
            .iter()
            .filter(|m| m.attr("property") == Some("dcterms:modified"))
            .count();
        assert_eq!(count, 1);
        let stamp = doc.root.find("meta").unwrap().text();
        assert!(stamp.ends_with('Z') && stamp.contains('T'), "{stamp}");
    }

    #[test]
    fn test_correct_spine_order() {
        let mut doc = opf(
            r#"<manifest>
                 <item id="cover" href="cover.xhtml"/>
                 <item id="a" href="a.xhtml"/>
                 <item id="b" href="b.xhtml"/>
               </manifest>
               <spine toc="ncx"><itemref idref="b"/><itemref idref="cover"/><itemref idref="a"/></spine>"#,
        );
        let ncx = Document::parse(
            r#"<ncx><navMap>
                 <navPoint id="n1"><content src="a.xhtml"/></navPoint>
                 <navPoint id="n2"><content src="b.xhtml#frag"/></navPoint>
               </navMap></ncx>"#,
        )
        .unwrap();
        correct_spine_order(&mut doc, &ncx, &crate::default_logger());

        let spine = doc.root.find("spine").unwrap();
        let order: Vec<&str> = spine
            .child_elements()
            .filter_map(|e| e.attr("idref"))
            .collect();
        // cover is absent from the NCX: stable leading block
        assert_eq!(order, vec!["cover", "a", "b"]);
        // spine attributes survive
        assert_eq!(spine.attr("toc"), Some("ncx"));
    }
}
