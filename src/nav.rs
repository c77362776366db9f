//! EPUB 3 navigation document synthesis.
//!
//! Builds a nav.xhtml from the legacy NCX tree (sorted by play order,
//! nested by recorded depth) and converts legacy page-maps into a
//! `page-list` nav block.

use crate::paths;
use crate::xml::{Document, Element, Node};

pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";
pub const OPS_NS: &str = "http://www.idpf.org/2007/ops";

/// Flattened navPoint, carrying the depth it was found at.
struct NavItem {
    text: String,
    href: String,
    order: i64,
    level: usize,
}

fn nav_template() -> Document {
    let mut html = Element::new("html");
    html.set_attr("xmlns", XHTML_NS);
    html.set_attr("xmlns:epub", OPS_NS);

    let mut head = Element::new("head");
    let mut title = Element::new("title");
    title.set_text("Table of Contents");
    head.push_element(title);
    html.push_element(head);

    let mut nav = Element::new("nav");
    nav.set_attr("epub:type", "toc");
    nav.push_element(Element::new("ol"));
    let mut body = Element::new("body");
    body.push_element(nav);
    html.push_element(body);

    let mut doc = Document::new(html);
    doc.doctype = Some("html".to_string());
    doc
}

/// Generate a nav document from an NCX. Hrefs are carried over as written
/// (the generated document sits next to the package document, as does a
/// conventional NCX). Returns a minimal empty-list document when the NCX
/// has no navMap.
pub fn generate_from_ncx(ncx: Option<&Document>) -> Document {
    let mut doc = nav_template();
    let Some(nav_map) = ncx.and_then(|n| n.root.find("navMap")) else {
        return doc;
    };

    let mut items: Vec<NavItem> = Vec::new();
    collect_nav_points(nav_map, 0, &mut items);
    items.sort_by_key(|item| item.order);
    if items.is_empty() {
        return doc;
    }

    let max_level = items.iter().map(|i| i.level).max().unwrap_or(0);
    // Build nested <ol> lists: each level remembers the list currently
    // accepting its children.
    let mut lists: Vec<Element> = vec![Element::new("ol"); max_level + 2];
    let mut depth = 0usize;

    let close_levels =
        |lists: &mut Vec<Element>, from: usize, to: usize| {
            for level in (to + 1..=from).rev() {
                let finished = std::mem::replace(&mut lists[level], Element::new("ol"));
                if finished.children.is_empty() {
                    continue;
                }
                // Attach the finished sublist to the last item one level up.
                // Play order can put a child before any parent exists; those
                // items are hoisted a level rather than lost.
                if let Some(Node::Element(li)) = lists[level - 1].children.last_mut() {
                    li.push_element(finished);
                } else {
                    lists[level - 1].children.extend(finished.children);
                }
            }
        };

    for item in &items {
        if item.level < depth {
            close_levels(&mut lists, depth, item.level);
        }
        depth = item.level;

        let mut a = Element::new("a");
        a.set_attr("href", &item.href);
        a.set_text(item.text.clone());
        let mut li = Element::new("li");
        li.push_element(a);
        lists[item.level].push_element(li);
    }
    close_levels(&mut lists, depth, 0);

    let toc_list = std::mem::replace(&mut lists[0], Element::new("ol"));
    if let Some(ol) = doc.root.find_mut("ol") {
        *ol = toc_list;
    }
    doc
}

fn collect_nav_points(parent: &Element, level: usize, items: &mut Vec<NavItem>) {
    for child in parent.child_elements() {
        if child.local_name() != "navPoint" {
            continue;
        }
        let text = child
            .find("text")
            .map(|t| t.text())
            .unwrap_or_default();
        let href = child
            .find("content")
            .and_then(|c| c.attr("src"))
            .unwrap_or("")
            .to_string();
        let order = child
            .attr("playOrder")
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);
        items.push(NavItem {
            text,
            href,
            order,
            level,
        });
        collect_nav_points(child, level + 1, items);
    }
}

/// Whether the nav document already carries a `page-list` nav block.
pub fn has_page_list(nav: &Document) -> bool {
    nav.root.find_all("nav").iter().any(|n| {
        n.attr("epub:type") == Some("page-list") || n.attr("type") == Some("page-list")
    })
}

/// Append a `page-list` nav built from a legacy page-map document. Hrefs
/// are re-expressed relative to the nav document's directory; targets that
/// cannot be are kept container-root-absolute.
pub fn append_page_list(
    nav: &mut Document,
    page_map: &Document,
    page_map_path: &str,
    nav_path: &str,
) {
    nav.root.set_attr("xmlns:epub", OPS_NS);
    let mut list = Element::new("nav");
    list.set_attr("epub:type", "page-list");
    list.set_attr("hidden", "hidden");
    let mut ol = Element::new("ol");

    for page in page_map.root.find_all("page") {
        let Some(src) = page.attr("href") else {
            continue;
        };
        let container = paths::to_container_path(page_map_path, &paths::decode_href(src));
        let href = paths::to_relative_path(nav_path, &container)
            .unwrap_or_else(|_| format!("/{container}"));
        let mut a = Element::new("a");
        a.set_attr("href", &href);
        a.set_text(page.attr("name").unwrap_or("").to_string());
        let mut li = Element::new("li");
        li.push_element(a);
        ol.push_element(li);
    }

    list.push_element(ol);
    if let Some(body) = nav.root.find_mut("body") {
        body.push_element(list);
    }
}
