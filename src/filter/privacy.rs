//! Removes remote-origin content that can phone home when a reader
//! renders the book: external scripts, tracking pixels, remote frames.

use super::{Context, ExecMode, Filter};
use crate::error::Result;
use crate::xml::Node;

pub struct Privacy;

impl Privacy {
    pub fn new() -> Self {
        Privacy
    }
}

impl Default for Privacy {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for Privacy {
    fn name(&self) -> &'static str {
        "privacy"
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

        let removed = std::cell::Cell::new(0usize);
        doc.root.rewrite_elements(&|e| {
            let remote = matches!(e.local_name(), "script" | "img" | "iframe")
                && e.attr("src").is_some_and(is_remote);
            if remote {
                removed.set(removed.get() + 1);
                None
            } else {
                Some(Node::Element(e))
            }
        });

        if removed.get() > 0 {
            ctx.log(&format!(
                "Removed {} remote-origin elements from {path}.",
                removed.get()
            ));
            ctx.vfs.write_xml(path, doc)?;
        }
        Ok(())
    }
}

fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://") || src.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://tracker.example/p.gif"));
        assert!(is_remote("//cdn.example/lib.js"));
        assert!(!is_remote("images/cover.png"));
        assert!(!is_remote("../script.js"));
    }
}
