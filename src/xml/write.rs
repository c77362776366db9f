//! Serialization back to bytes.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::{Document, Element, Node};

/// Serialize a document with an XML declaration and its captured DOCTYPE.
/// Output is UTF-8; text and attribute values are re-escaped, so entity
/// references resolved at parse time round-trip as characters.
pub fn serialize_document(doc: &Document) -> Vec<u8> {
    let mut writer = Writer::new(Vec::new());

    // Failures writing to a Vec cannot happen; keep the call sites tidy.
    let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)));
    if let Some(ref doctype) = doc.doctype {
        let _ = writer.write_event(Event::DocType(BytesText::from_escaped(doctype.as_str())));
        let _ = writer.write_event(Event::Text(BytesText::from_escaped("\n")));
    }
    write_element(&mut writer, &doc.root);

    writer.into_inner()
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        let _ = writer.write_event(Event::Empty(start));
        return;
    }

    let _ = writer.write_event(Event::Start(start));
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(writer, e),
            Node::Text(t) => {
                let _ = writer.write_event(Event::Text(BytesText::new(t)));
            }
        }
    }
    let _ = writer.write_event(Event::End(BytesEnd::new(element.name.as_str())));
}
