//! Event-stream parsing into the owned tree.

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{Document, Element, Node};
use crate::error::{Error, Result};

/// Strip UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

/// Parse a document from a string.
///
/// `&nbsp;` is substituted with U+00A0 before parsing: strict XML parsers
/// reject the entity without a DTD, and authoring tools emit it constantly.
/// Comments and processing instructions are dropped. CDATA folds into text.
pub fn parse_document(content: &str) -> Result<Document> {
    let content = content.replace("&nbsp;", "\u{a0}");
    let mut reader = Reader::from_str(&content);

    let mut doctype: Option<String> = None;
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(element_from_start(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let element = element_from_start(&e)?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(parent) = stack.last_mut() {
                    append_text(parent, &String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(parent) = stack.last_mut() {
                    append_text(parent, &String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(parent) = stack.last_mut() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        append_text(parent, &resolved);
                    }
                }
            }
            Ok(Event::DocType(e)) => {
                doctype = Some(String::from_utf8_lossy(e.as_ref()).into_owned());
            }
            // Comments are stripped; declarations regenerated on write.
            Ok(Event::Comment(_)) | Ok(Event::Decl(_)) | Ok(Event::PI(_)) => {}
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
        }
    }

    // Fold any elements the parser tolerated as unclosed.
    while let Some(element) = stack.pop() {
        attach(&mut stack, &mut root, element);
    }

    let root = root.ok_or_else(|| Error::InvalidEpub("empty XML document".into()))?;
    Ok(Document { doctype, root })
}

fn element_from_start(e: &quick_xml::events::BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8(e.name().as_ref().to_vec())?;
    let mut element = Element::new(name);
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.push_element(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Merge adjacent text (entity references arrive as separate events).
fn append_text(parent: &mut Element, text: &str) {
    if let Some(Node::Text(existing)) = parent.children.last_mut() {
        existing.push_str(text);
    } else {
        parent.children.push(Node::Text(text.to_string()));
    }
}

/// Resolve XML entity references.
fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    if let Some(hex) = entity.strip_prefix("#x") {
        if let Ok(code) = u32::from_str_radix(hex, 16)
            && let Some(c) = char::from_u32(code)
        {
            return Some(c.to_string());
        }
    } else if let Some(dec) = entity.strip_prefix('#')
        && let Ok(code) = dec.parse::<u32>()
        && let Some(c) = char::from_u32(code)
    {
        return Some(c.to_string());
    }

    None
}
