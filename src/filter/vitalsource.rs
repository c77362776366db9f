//! Removes VitalSource Bookshelf injections: the client API script tag
//! and inline scripts driving it.

use super::{Context, ExecMode, Filter};
use crate::error::Result;
use crate::xml::Node;

pub struct VitalSource;

impl VitalSource {
    pub fn new() -> Self {
        VitalSource
    }
}

impl Default for VitalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for VitalSource {
    fn name(&self) -> &'static str {
        "vitalsource"
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
            let injected = e.local_name() == "script"
                && (e
                    .attr("src")
                    .is_some_and(|src| src.contains("VSTEPUBClientAPI.js"))
                    || e.text().contains("VST."));
            if injected {
                changed.set(true);
                None
            } else {
                Some(Node::Element(e))
            }
        });

        if changed.get() {
            ctx.log(&format!("Removed Bookshelf injections from {path}."));
            ctx.vfs.write_xml(path, doc)?;
        }
        Ok(())
    }
}
