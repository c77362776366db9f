//! # epubscrub
//!
//! A library for cleaning up malformed EPUB publications: it ingests an
//! EPUB container, repairs the package manifest and navigation structure,
//! runs a configurable pipeline of content filters, and writes a
//! spec-conformant container back out.
//!
//! ## Quick Start
//!
//! ```no_run
//! use epubscrub::{Config, Sanitizer};
//! use std::fs::File;
//!
//! let input = File::open("book.epub").unwrap();
//! let output = File::create("book-clean.epub").unwrap();
//!
//! let sanitizer = Sanitizer::new(Config::new());
//! sanitizer.sanitize(input, output).unwrap();
//! ```
//!
//! ## Configuration
//!
//! Options are string-keyed with typed accessors; the first loaded value
//! for a key wins, so command-line arguments override later programmatic
//! defaults:
//!
//! ```
//! use epubscrub::Config;
//!
//! let mut config = Config::new();
//! config.load("filter", "default,kobo");
//! config.load("threads", "multi");
//! ```
//!
//! ## Filters
//!
//! Built-in filters: `general` (baseline repairs), `epub3` (EPUB 3
//! conformance, appended automatically when the target version is 3),
//! `kobo`, `vitalsource`, and `privacy`. External filters register via
//! [`Sanitizer::register_filter`].

pub mod config;
pub mod error;
pub mod filter;
pub mod index;
pub mod nav;
pub mod paths;
pub mod sanitizer;
pub mod vfs;
pub mod xml;

use std::sync::Arc;

pub use config::{CacheMode, Config, ThreadMode};
pub use error::{Error, Result};
pub use filter::{ExecMode, Filter, FilterRegistry};
pub use index::{ManifestEntry, PackageRegistry};
pub use sanitizer::Sanitizer;
pub use vfs::Vfs;

/// Free-form logging callback repairs are reported through.
pub type Logger = Arc<dyn Fn(&str) + Send + Sync>;

/// Hook given malformed markup a strict parse rejected; returns a
/// repaired candidate to parse again.
pub type RepairHook = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Logger forwarding everything to `tracing` at info level.
pub fn default_logger() -> Logger {
    Arc::new(|message: &str| tracing::info!("{message}"))
}
