//! Engine facade: one call takes an EPUB container in and writes the
//! sanitized container out.

use crate::config::{CacheMode, Config};
use crate::error::Result;
use crate::filter::{self, Context, FilterFactory, FilterRegistry};
use crate::index::PackageRegistry;
use crate::vfs::Vfs;
use crate::Logger;
use std::io::{Read, Seek, Write};
use zip::ZipArchive;

/// Sanitizer engine. Configuration and the filter table are set up once;
/// each [`sanitize`](Sanitizer::sanitize) call gets a fresh VFS and
/// package registry.
pub struct Sanitizer {
    config: Config,
    logger: Logger,
    filters: FilterRegistry,
}

impl Sanitizer {
    pub fn new(config: Config) -> Self {
        Sanitizer {
            config,
            logger: crate::default_logger(),
            filters: FilterRegistry::new(),
        }
    }

    pub fn with_logger(config: Config, logger: Logger) -> Self {
        Sanitizer {
            config,
            logger,
            filters: FilterRegistry::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register an additional filter; external add-ons hook in here.
    pub fn register_filter(&mut self, name: &str, factory: FilterFactory) {
        self.filters.register(name, factory);
    }

    /// Run the whole pipeline: import, index, filter, rewrite manifest,
    /// export. Structural absence of the container descriptor or package
    /// document is fatal; everything else is repaired and logged.
    pub fn sanitize<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        let archive = ZipArchive::new(reader)?;
        let cache_enabled = self.config.get_bool("xmlCache")?;
        let vfs = match self.config.get_enum("cache")? {
            CacheMode::Ram => Vfs::in_memory(cache_enabled, self.logger.clone()),
            CacheMode::Disk => Vfs::on_disk(cache_enabled, self.logger.clone())?,
        };
        vfs.import(archive)?;

        let mut registry = PackageRegistry::index(&vfs, &self.config, &self.logger)?;

        let mut ctx = Context {
            vfs: &vfs,
            registry: &mut registry,
            config: &self.config,
            logger: &self.logger,
        };
        filter::run_pipeline(&self.filters, &mut ctx)?;

        registry.update_manifest(&vfs)?;
        vfs.export(writer, self.config.get_int("compress")?)?;
        Ok(())
    }
}
