//! Container-root path <-> document-relative href conversion.
//!
//! Every href written in the package document, the legacy navigation, or a
//! content document is relative to the directory of the file it appears in.
//! The VFS keys everything by container-root path, so all reference handling
//! funnels through these two conversions.

use percent_encoding::percent_decode_str;

use crate::error::{Error, Result};

/// Expand `href` relative to the directory of `base` into a container-root
/// path. A leading `/` means container-root-absolute; `.` and `..` segments
/// are resolved (`..` never escapes the root).
pub fn to_container_path(base: &str, href: &str) -> String {
    if let Some(stripped) = href.strip_prefix('/') {
        return stripped.to_string();
    }

    let mut parts: Vec<&str> = base.split('/').collect();
    parts.pop(); // drop the file component of the base

    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    parts.join("/")
}

/// Inverse of [`to_container_path`]: express `container_path` relative to the
/// directory of `base`. Fails if the path is not under that directory.
pub fn to_relative_path(base: &str, container_path: &str) -> Result<String> {
    let dir = base_dir(base);
    container_path
        .strip_prefix(&dir)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Path(format!(
                "path '{container_path}' is not under base path '{base}'"
            ))
        })
}

/// Directory prefix of a container path, including the trailing `/`
/// (empty string for root-level files).
pub fn base_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[..=i].to_string(),
        None => String::new(),
    }
}

/// Percent-decode an href as written in a manifest or content document.
/// Malformed sequences are passed through untouched (handles EPUBs whose
/// authoring tools wrote raw `%` characters).
pub fn decode_href(href: &str) -> String {
    match percent_decode_str(href).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => href.to_string(),
    }
}

/// Split an href into its path and optional fragment.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, frag)) => (path, Some(frag)),
        None => (href, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_join() {
        assert_eq!(to_container_path("OEBPS/content.opf", "ch1.xhtml"), "OEBPS/ch1.xhtml");
        assert_eq!(to_container_path("content.opf", "ch1.xhtml"), "ch1.xhtml");
        assert_eq!(
            to_container_path("OEBPS/content.opf", "images/cover.jpg"),
            "OEBPS/images/cover.jpg"
        );
    }

    #[test]
    fn test_absolute_href() {
        assert_eq!(
            to_container_path("OEBPS/content.opf", "/OEBPS/a.xhtml"),
            "OEBPS/a.xhtml"
        );
        assert_eq!(to_container_path("content.opf", "/mimetype"), "mimetype");
    }

    #[test]
    fn test_dot_segments() {
        assert_eq!(
            to_container_path("OEBPS/content.opf", "./ch1.xhtml"),
            "OEBPS/ch1.xhtml"
        );
        assert_eq!(
            to_container_path("OEBPS/text/ch1.xhtml", "../images/fig.png"),
            "OEBPS/images/fig.png"
        );
        // .. past the root clamps instead of escaping
        assert_eq!(to_container_path("content.opf", "../../a.xhtml"), "a.xhtml");
    }

    #[test]
    fn test_to_relative() {
        assert_eq!(
            to_relative_path("OEBPS/content.opf", "OEBPS/ch1.xhtml").unwrap(),
            "ch1.xhtml"
        );
        assert_eq!(
            to_relative_path("content.opf", "images/cover.jpg").unwrap(),
            "images/cover.jpg"
        );
        assert!(to_relative_path("OEBPS/content.opf", "other/ch1.xhtml").is_err());
    }

    #[test]
    fn test_base_dir() {
        assert_eq!(base_dir("OEBPS/content.opf"), "OEBPS/");
        assert_eq!(base_dir("content.opf"), "");
        assert_eq!(base_dir("a/b/c.xhtml"), "a/b/");
    }

    #[test]
    fn test_decode_href() {
        assert_eq!(decode_href("ch%201.xhtml"), "ch 1.xhtml");
        assert_eq!(decode_href("plain.xhtml"), "plain.xhtml");
        // Invalid sequences pass through
        assert_eq!(decode_href("100%.xhtml"), "100%.xhtml");
    }

    #[test]
    fn test_split_fragment() {
        assert_eq!(split_fragment("ch1.xhtml#sec2"), ("ch1.xhtml", Some("sec2")));
        assert_eq!(split_fragment("ch1.xhtml"), ("ch1.xhtml", None));
        assert_eq!(split_fragment("#local"), ("", Some("local")));
    }

    proptest! {
        // to_relative_path(base, to_container_path(base, href)) == href for
        // hrefs that stay inside the base directory.
        #[test]
        fn round_trip(segments in prop::collection::vec("[a-z]{1,8}", 1..4)) {
            let href = segments.join("/");
            let base = "OEBPS/content.opf";
            let container = to_container_path(base, &href);
            prop_assert_eq!(to_relative_path(base, &container).unwrap(), href);
        }
    }
}
