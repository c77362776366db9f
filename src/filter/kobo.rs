//! Strips Kobo reader injections: the kobo.js script tag and the
//! `koboSpan` wrappers Kobo's pagination pass inserts around every
//! sentence.

use super::{Context, ExecMode, Filter};
use crate::error::Result;
use crate::xml::Node;

pub struct Kobo;

impl Kobo {
    pub fn new() -> Self {
        Kobo
    }
}

impl Default for Kobo {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for Kobo {
    fn name(&self) -> &'static str {
        "kobo"
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

        let changed = std::cell::Cell::new(false);
        doc.root.rewrite_elements(&|e| {
            match e.local_name() {
                "script"
                    if e.attr("src").is_some_and(|src| src.contains("kobo.js")) =>
                {
                    changed.set(true);
                    None
                }
                "span" if is_kobo_span(&e) => {
                    changed.set(true);
                    // Wrappers hold a text run; unwrap to it.
                    Some(Node::Text(e.text()))
                }
                _ => Some(Node::Element(e)),
            }
        });

        if changed.get() {
            ctx.log(&format!("Removed Kobo injections from {path}."));
            ctx.vfs.write_xml(path, doc)?;
        }
        Ok(())
    }
}

fn is_kobo_span(e: &crate::xml::Element) -> bool {
    e.attr("class")
        .is_some_and(|c| c.split_ascii_whitespace().any(|t| t == "koboSpan"))
}
