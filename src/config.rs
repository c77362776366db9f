//! String-keyed configuration with typed accessors.
//!
//! Options arrive as strings (CLI flags, host-application maps) and are
//! parsed on access. Repeated loads never override an already-loaded key:
//! the first value wins, so a host can layer defaults under user input by
//! loading user input first.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Static per-component defaults. Filters contribute their own namespaced
/// keys (`epub3.guessToc` etc.) here rather than registering at runtime.
const DEFAULTS: &[(&str, &str)] = &[
    ("filter", "default"),
    ("compress", "6"),
    ("cache", "ram"),
    ("threads", "single"),
    ("epubVer", "0"),
    ("xmlCache", "true"),
    ("overwrite", "false"),
    ("publisherMode", "false"),
    ("sanitizeNcx", "true"),
    ("epub3.guessToc", "false"),
    ("epub3.correctSpine", "false"),
];

/// Where intermediate publication content is kept during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Ram,
    Disk,
}

impl FromStr for CacheMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "ram" => Ok(CacheMode::Ram),
            "disk" => Ok(CacheMode::Disk),
            _ => Err(()),
        }
    }
}

/// Whether parallel-capable filters may fan out over worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMode {
    Single,
    Multi,
}

impl FromStr for ThreadMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(ThreadMode::Single),
            "multi" => Ok(ThreadMode::Multi),
            _ => Err(()),
        }
    }
}

/// Configuration for one sanitize operation.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a single key. Ignored if the key was already loaded.
    pub fn load(&mut self, key: &str, value: &str) {
        self.values
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    /// Load a batch of keys; per-key, the first loaded value wins.
    pub fn load_all<'a>(&mut self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (key, value) in pairs {
            self.load(key, value);
        }
    }

    fn raw(&self, key: &str) -> Result<&str> {
        if let Some(value) = self.values.get(key) {
            return Ok(value);
        }
        DEFAULTS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .ok_or_else(|| Error::ConfigNotFound(key.to_string()))
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.raw(key)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        let raw = self.raw(key)?;
        raw.trim()
            .parse()
            .map_err(|_| Error::ConfigNotFound(key.to_string()))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let raw = self.raw(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::ConfigNotFound(key.to_string())),
        }
    }

    /// Parse a key into an enum via its `FromStr`. Unknown values report the
    /// key as missing rather than panicking, matching the other accessors.
    pub fn get_enum<E: FromStr>(&self, key: &str) -> Result<E> {
        let raw = self.raw(key)?;
        raw.trim()
            .parse()
            .map_err(|_| Error::ConfigNotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.get_str("filter").unwrap(), "default");
        assert_eq!(config.get_int("compress").unwrap(), 6);
        assert!(config.get_bool("xmlCache").unwrap());
        assert_eq!(config.get_enum::<CacheMode>("cache").unwrap(), CacheMode::Ram);
        assert_eq!(
            config.get_enum::<ThreadMode>("threads").unwrap(),
            ThreadMode::Single
        );
    }

    #[test]
    fn test_first_value_wins() {
        let mut config = Config::new();
        config.load("filter", "kobo");
        config.load("filter", "vitalsource");
        assert_eq!(config.get_str("filter").unwrap(), "kobo");

        config.load_all([("compress", "9"), ("compress", "1")]);
        assert_eq!(config.get_int("compress").unwrap(), 9);
    }

    #[test]
    fn test_missing_key() {
        let config = Config::new();
        assert!(matches!(
            config.get_str("nosuch"),
            Err(Error::ConfigNotFound(_))
        ));
    }

    #[test]
    fn test_bool_spellings() {
        let mut config = Config::new();
        config.load("overwrite", "1");
        assert!(config.get_bool("overwrite").unwrap());

        let mut config = Config::new();
        config.load("overwrite", "garbage");
        assert!(config.get_bool("overwrite").is_err());
    }

    #[test]
    fn test_enum_case_insensitive() {
        let mut config = Config::new();
        config.load("cache", "Disk");
        assert_eq!(config.get_enum::<CacheMode>("cache").unwrap(), CacheMode::Disk);
    }
}
