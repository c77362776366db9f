//! Filter pipeline: named transformation passes over the indexed package.
//!
//! Filters run strictly in the configured order because later filters read
//! registry state earlier ones mutated. Within one filter the per-file stage
//! may fan out over rayon; a failing file is logged and skipped, the batch
//! continues.

pub mod epub3;
pub mod general;
pub mod kobo;
pub mod privacy;
pub mod vitalsource;

use crate::config::{Config, ThreadMode};
use crate::error::Result;
use crate::index::PackageRegistry;
use crate::vfs::Vfs;
use crate::Logger;
use rayon::prelude::*;

/// Shared state one filter invocation sees. The registry is mutably borrowed
/// for the whole pipeline; the per-file stage only ever reads it through a
/// shared reference.
pub struct Context<'a> {
    pub vfs: &'a Vfs,
    pub registry: &'a mut PackageRegistry,
    pub config: &'a Config,
    pub logger: &'a Logger,
}

impl Context<'_> {
    pub fn log(&self, message: &str) {
        (self.logger)(message);
    }
}

/// How a filter's per-file stage may be driven. Sequential filters are the
/// one-worker case; parallel filters fall back to sequential when the
/// `threads` option says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Sequential,
    Parallel,
}

/// One named transformation pass. Instances live for a single pipeline run;
/// any state accumulated in `process` (behind interior mutability) is read
/// back in `post_process`.
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    fn mode(&self) -> ExecMode {
        ExecMode::Sequential
    }

    /// Target files, computed against current registry state so later
    /// filters observe earlier filters' manifest edits.
    fn targets(&self, ctx: &Context) -> Vec<String>;

    fn pre_process(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    fn process(&self, ctx: &Context, path: &str) -> Result<()>;

    fn post_process(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }
}

pub type FilterFactory = fn() -> Box<dyn Filter>;

/// Name-to-factory table of available filters, extensible at runtime.
pub struct FilterRegistry {
    factories: Vec<(String, FilterFactory)>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        let mut registry = FilterRegistry {
            factories: Vec::new(),
        };
        registry.register("general", || Box::new(general::General::new()));
        registry.register("epub3", || Box::new(epub3::Epub3::new()));
        registry.register("kobo", || Box::new(kobo::Kobo::new()));
        registry.register("vitalsource", || Box::new(vitalsource::VitalSource::new()));
        registry.register("privacy", || Box::new(privacy::Privacy::new()));
        registry
    }

    /// Add or replace a filter under `name`. This is the extension point
    /// external add-ons use.
    pub fn register(&mut self, name: &str, factory: FilterFactory) {
        match self.factories.iter_mut().find(|(n, _)| n == name) {
            Some((_, f)) => *f = factory,
            None => self.factories.push((name.to_string(), factory)),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Filter>> {
        self.factories
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory())
    }

    /// Expand the configured filter list: comma-separated names, `default`
    /// meaning the general filter, `all` meaning every registered filter.
    /// The epub3 filter is force-appended when the target version is 3.
    pub fn expand(&self, list: &str, target_version: u8) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for raw in list.split(',') {
            let name = raw.trim();
            match name {
                "" => {}
                "default" => push_unique(&mut names, "general"),
                "all" => {
                    for (n, _) in &self.factories {
                        push_unique(&mut names, n);
                    }
                }
                other => push_unique(&mut names, other),
            }
        }
        if target_version == 3 {
            push_unique(&mut names, "epub3");
        }
        names
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n == name) {
        names.push(name.to_string());
    }
}

/// Run every configured filter over the context, three stages each.
pub fn run_pipeline(filters: &FilterRegistry, ctx: &mut Context) -> Result<()> {
    let list = ctx.config.get_str("filter")?.to_string();
    let names = filters.expand(&list, ctx.registry.target_version);
    let threads: ThreadMode = ctx.config.get_enum("threads")?;

    for name in names {
        let Some(mut filter) = filters.create(&name) else {
            ctx.log(&format!("Unknown filter '{name}', skipped."));
            continue;
        };
        filter.pre_process(ctx)?;
        run_process_stage(filter.as_ref(), ctx, threads);
        filter.post_process(ctx)?;
    }
    Ok(())
}

fn run_process_stage(filter: &dyn Filter, ctx: &Context, threads: ThreadMode) {
    let files = filter.targets(ctx);
    if files.is_empty() {
        ctx.log(&format!("No files to process in filter {}.", filter.name()));
        return;
    }
    ctx.log(&format!(
        "Processing {} files in filter {}.",
        files.len(),
        filter.name()
    ));

    let run_one = |path: &String| {
        if let Err(e) = filter.process(ctx, path) {
            ctx.log(&format!(
                "Error processing file {path} in filter {}: {e}",
                filter.name()
            ));
        }
    };

    match (filter.mode(), threads) {
        (ExecMode::Parallel, ThreadMode::Multi) => files.par_iter().for_each(run_one),
        _ => files.iter().for_each(run_one),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Filter for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }
        fn targets(&self, _ctx: &Context) -> Vec<String> {
            Vec::new()
        }
        fn process(&self, _ctx: &Context, _path: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_expand_default_and_all() {
        let registry = FilterRegistry::new();
        assert_eq!(registry.expand("default", 2), vec!["general"]);

        let all = registry.expand("all", 2);
        assert_eq!(
            all,
            vec!["general", "epub3", "kobo", "vitalsource", "privacy"]
        );

        // comma list, duplicates collapsed
        assert_eq!(
            registry.expand("kobo,default,kobo", 2),
            vec!["kobo", "general"]
        );
    }

    #[test]
    fn test_expand_appends_epub3_for_v3() {
        let registry = FilterRegistry::new();
        assert_eq!(registry.expand("default", 3), vec!["general", "epub3"]);
        // not duplicated when already present
        assert_eq!(registry.expand("epub3", 3), vec!["epub3"]);
    }

    #[test]
    fn test_register_extension_point() {
        let mut registry = FilterRegistry::new();
        registry.register("noop", || Box::new(Noop));
        assert!(registry.create("noop").is_some());
        assert!(registry.names().contains(&"noop"));
        assert_eq!(registry.expand("noop", 2), vec!["noop"]);
    }

    #[test]
    fn test_unknown_filter_not_created() {
        let registry = FilterRegistry::new();
        assert!(registry.create("nonexistent").is_none());
    }
}
