//! End-to-end sanitize scenarios over in-memory containers.

use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

use epubscrub::{Config, Sanitizer};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn build_epub(files: &[(&str, &str)]) -> Cursor<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(
            "mimetype",
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
    writer.write_all(b"application/epub+zip").unwrap();
    for (path, content) in files {
        writer
            .start_file(*path, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap()
}

fn container_xml() -> &'static str {
    r#"<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
         <rootfiles>
           <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
         </rootfiles>
       </container>"#
}

fn xhtml(body: &str) -> String {
    format!(
        r#"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>t</title></head><body>{body}</body></html>"#
    )
}

fn sanitize(input: Cursor<Vec<u8>>, config: Config) -> Cursor<Vec<u8>> {
    let sanitizer = Sanitizer::new(config);
    let mut out = Cursor::new(Vec::new());
    sanitizer.sanitize(input, &mut out).unwrap();
    out.set_position(0);
    out
}

fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
    let mut entry = archive.by_name(name).unwrap();
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    content
}

fn entry_names(archive: &mut ZipArchive<Cursor<Vec<u8>>>) -> Vec<String> {
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// An EPUB 2 book with an NCX and no nav document.
fn legacy_book() -> Cursor<Vec<u8>> {
    build_epub(&[
        ("META-INF/container.xml", container_xml()),
        (
            "OEBPS/content.opf",
            r#"<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uid">
                 <metadata>
                   <dc:identifier id="uid">urn:uuid:legacy-1</dc:identifier>
                   <dc:title>Legacy</dc:title>
                 </metadata>
                 <manifest>
                   <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
                   <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
                   <item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>
                 </manifest>
                 <spine toc="ncx"><itemref idref="ch1"/><itemref idref="ch2"/></spine>
               </package>"#,
        ),
        (
            "OEBPS/toc.ncx",
            r#"<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
                 <head><meta name="dtb:uid" content="stale-uid"/></head>
                 <docTitle><text>Legacy</text></docTitle>
                 <navMap>
                   <navPoint id="n1" playOrder="1">
                     <navLabel><text>One</text></navLabel><content src="ch1.xhtml"/>
                   </navPoint>
                   <navPoint id="n2" playOrder="2">
                     <navLabel><text>Two</text></navLabel><content src="ch2.xhtml"/>
                   </navPoint>
                 </navMap>
               </ncx>"#,
        ),
        ("OEBPS/ch1.xhtml", &xhtml(r#"<p id="p1">one</p>"#)),
        ("OEBPS/ch2.xhtml", &xhtml(r#"<p id="p2">two</p>"#)),
    ])
}

#[test]
fn upgrades_version_2_to_3() {
    let out = sanitize(legacy_book(), Config::new());
    let mut archive = ZipArchive::new(out).unwrap();
    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    assert!(opf.contains(r#"version="3.0""#), "{opf}");
    assert!(opf.contains("dcterms:modified"));
}

#[test]
fn synthesizes_nav_from_ncx() {
    let out = sanitize(legacy_book(), Config::new());
    let mut archive = ZipArchive::new(out).unwrap();

    let nav = read_entry(&mut archive, "OEBPS/nav_generated.xhtml");
    assert!(nav.contains(r#"epub:type="toc""#));
    assert!(nav.contains(r#"href="ch1.xhtml""#));
    assert!(nav.contains(">One<"));

    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    assert!(opf.contains(r#"href="nav_generated.xhtml""#));
    assert!(opf.contains(r#"properties="nav""#));
}

#[test]
fn syncs_ncx_uid() {
    let out = sanitize(legacy_book(), Config::new());
    let mut archive = ZipArchive::new(out).unwrap();
    let ncx = read_entry(&mut archive, "OEBPS/toc.ncx");
    assert!(ncx.contains("urn:uuid:legacy-1"));
    assert!(!ncx.contains("stale-uid"));
}

#[test]
fn mimetype_marker_preserved() {
    let out = sanitize(legacy_book(), Config::new());
    let mut archive = ZipArchive::new(out).unwrap();
    let first = archive.by_index(0).unwrap();
    assert_eq!(first.name(), "mimetype");
    assert_eq!(first.compression(), CompressionMethod::Stored);
    assert_eq!(first.size(), "application/epub+zip".len() as u64);
}

#[test]
fn keeps_version_2_when_overwriting() {
    let mut config = Config::new();
    config.load("overwrite", "true");
    let out = sanitize(legacy_book(), config);
    let mut archive = ZipArchive::new(out).unwrap();
    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    assert!(opf.contains(r#"version="2.0""#));
    // no version-3 upgrade, no synthesized nav
    assert!(!entry_names(&mut archive).contains(&"OEBPS/nav_generated.xhtml".to_string()));
}

#[test]
fn replaces_missing_image_with_alt_text() {
    let input = build_epub(&[
        ("META-INF/container.xml", container_xml()),
        (
            "OEBPS/content.opf",
            r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
                 <metadata><dc:identifier id="uid">u</dc:identifier></metadata>
                 <manifest>
                   <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
                   <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
                 </manifest>
                 <spine><itemref idref="ch1"/></spine>
               </package>"#,
        ),
        (
            "OEBPS/nav.xhtml",
            &xhtml(r#"<nav epub:type="toc" xmlns:epub="http://www.idpf.org/2007/ops"><ol/></nav>"#),
        ),
        (
            "OEBPS/ch1.xhtml",
            &xhtml(
                r#"<p><img src="gone.png" alt="a lost figure"/></p>
                   <p><img src="also-gone.png"/></p>"#,
            ),
        ),
    ]);
    let out = sanitize(input, Config::new());
    let mut archive = ZipArchive::new(out).unwrap();
    let ch1 = read_entry(&mut archive, "OEBPS/ch1.xhtml");
    assert!(!ch1.contains("<img"), "{ch1}");
    assert!(ch1.contains("a lost figure"));
}

#[test]
fn publisher_mode_keeps_missing_images() {
    let input = build_epub(&[
        ("META-INF/container.xml", container_xml()),
        (
            "OEBPS/content.opf",
            r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
                 <metadata><dc:identifier id="uid">u</dc:identifier></metadata>
                 <manifest>
                   <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
                   <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
                 </manifest>
                 <spine><itemref idref="ch1"/></spine>
               </package>"#,
        ),
        (
            "OEBPS/nav.xhtml",
            &xhtml(r#"<nav epub:type="toc" xmlns:epub="http://www.idpf.org/2007/ops"><ol/></nav>"#),
        ),
        (
            "OEBPS/ch1.xhtml",
            &xhtml(r#"<p><img src="gone.png" alt="kept"/></p>"#),
        ),
    ]);
    let mut config = Config::new();
    config.load("publisherMode", "true");
    let out = sanitize(input, config);
    let mut archive = ZipArchive::new(out).unwrap();
    let ch1 = read_entry(&mut archive, "OEBPS/ch1.xhtml");
    assert!(ch1.contains("<img"), "{ch1}");
}

#[test]
fn broken_file_passes_through_while_siblings_are_repaired() {
    let broken = "<html><p>broken</div></html>";
    let input = build_epub(&[
        ("META-INF/container.xml", container_xml()),
        (
            "OEBPS/content.opf",
            r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
                 <metadata><dc:identifier id="uid">u</dc:identifier></metadata>
                 <manifest>
                   <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
                   <item id="bad" href="bad.xhtml" media-type="application/xhtml+xml"/>
                   <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
                 </manifest>
                 <spine><itemref idref="bad"/><itemref idref="ch1"/></spine>
               </package>"#,
        ),
        (
            "OEBPS/nav.xhtml",
            &xhtml(r#"<nav epub:type="toc" xmlns:epub="http://www.idpf.org/2007/ops"><ol/></nav>"#),
        ),
        ("OEBPS/bad.xhtml", broken),
        (
            "OEBPS/ch1.xhtml",
            &xhtml(r#"<p><img src="gone.png" alt="a lost figure"/></p>"#),
        ),
    ]);
    // The run completes despite the unparseable chapter
    let out = sanitize(input, Config::new());
    let mut archive = ZipArchive::new(out).unwrap();
    // which is exported byte for byte as it came in
    assert_eq!(read_entry(&mut archive, "OEBPS/bad.xhtml"), broken);
    // while its sibling still gets its repair
    let ch1 = read_entry(&mut archive, "OEBPS/ch1.xhtml");
    assert!(!ch1.contains("<img"), "{ch1}");
    assert!(ch1.contains("a lost figure"));
}

#[test]
fn renames_duplicate_ids_and_updates_references() {
    let input = build_epub(&[
        ("META-INF/container.xml", container_xml()),
        (
            "OEBPS/content.opf",
            r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
                 <metadata><dc:identifier id="uid">u</dc:identifier></metadata>
                 <manifest>
                   <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
                   <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
                 </manifest>
                 <spine><itemref idref="ch1"/></spine>
               </package>"#,
        ),
        (
            "OEBPS/nav.xhtml",
            &xhtml(r#"<nav epub:type="toc" xmlns:epub="http://www.idpf.org/2007/ops"><ol/></nav>"#),
        ),
        (
            "OEBPS/ch1.xhtml",
            &xhtml(
                r##"<div id="dup">first</div>
                   <div id="dup">second</div>
                   <div id="duplicate">other</div>
                   <a href="#dup">to dup</a>
                   <a href="#duplicate">to duplicate</a>"##,
            ),
        ),
    ]);
    let out = sanitize(input, Config::new());
    let mut archive = ZipArchive::new(out).unwrap();
    let ch1 = read_entry(&mut archive, "OEBPS/ch1.xhtml");
    assert!(ch1.contains(r#"id="dup_1""#), "{ch1}");
    assert!(ch1.contains(r##"href="#dup_1""##));
    // an id that merely contains the duplicate as a prefix is untouched
    assert!(ch1.contains(r#"id="duplicate""#));
    assert!(ch1.contains(r##"href="#duplicate""##));
}

#[test]
fn prunes_dangling_fragment_links() {
    let input = build_epub(&[
        ("META-INF/container.xml", container_xml()),
        (
            "OEBPS/content.opf",
            r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
                 <metadata><dc:identifier id="uid">u</dc:identifier></metadata>
                 <manifest>
                   <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
                   <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
                   <item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>
                 </manifest>
                 <spine><itemref idref="ch1"/><itemref idref="ch2"/></spine>
               </package>"#,
        ),
        (
            "OEBPS/nav.xhtml",
            &xhtml(r#"<nav epub:type="toc" xmlns:epub="http://www.idpf.org/2007/ops"><ol/></nav>"#),
        ),
        (
            "OEBPS/ch1.xhtml",
            &xhtml(
                r#"<p id="top">one</p>
                   <a href="ch2.xhtml#exists">good</a>
                   <a href="ch2.xhtml#ghost">bad</a>"#,
            ),
        ),
        ("OEBPS/ch2.xhtml", &xhtml(r#"<p id="exists">two</p>"#)),
    ]);
    let out = sanitize(input, Config::new());
    let mut archive = ZipArchive::new(out).unwrap();
    let ch1 = read_entry(&mut archive, "OEBPS/ch1.xhtml");
    assert!(ch1.contains(r#"href="ch2.xhtml#exists""#), "{ch1}");
    assert!(!ch1.contains("#ghost"));
    assert!(ch1.contains(r#"href="ch2.xhtml""#));
}

#[test]
fn sanitize_is_idempotent() {
    let first = sanitize(legacy_book(), Config::new());
    let mut archive = ZipArchive::new(first.clone()).unwrap();
    let first_names: HashSet<String> = entry_names(&mut archive).into_iter().collect();
    let first_opf = read_entry(&mut archive, "OEBPS/content.opf");

    let second = sanitize(first, Config::new());
    let mut archive = ZipArchive::new(second).unwrap();
    let second_names: HashSet<String> = entry_names(&mut archive).into_iter().collect();
    let second_opf = read_entry(&mut archive, "OEBPS/content.opf");

    assert_eq!(first_names, second_names);
    // same manifest ids both passes
    let ids = |opf: &str| -> HashSet<String> {
        opf.match_indices("id=\"")
            .map(|(i, _)| {
                let rest = &opf[i + 4..];
                rest[..rest.find('"').unwrap()].to_string()
            })
            .collect()
    };
    assert_eq!(ids(&first_opf), ids(&second_opf));
}

#[test]
fn auto_registers_unlisted_files() {
    let input = build_epub(&[
        ("META-INF/container.xml", container_xml()),
        (
            "OEBPS/content.opf",
            r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
                 <metadata><dc:identifier id="uid">u</dc:identifier></metadata>
                 <manifest>
                   <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
                 </manifest>
                 <spine/>
               </package>"#,
        ),
        (
            "OEBPS/nav.xhtml",
            &xhtml(r#"<nav epub:type="toc" xmlns:epub="http://www.idpf.org/2007/ops"><ol/></nav>"#),
        ),
        ("OEBPS/stray.css", "body { margin: 0 }"),
    ]);
    let out = sanitize(input, Config::new());
    let mut archive = ZipArchive::new(out).unwrap();
    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    assert!(opf.contains(r#"href="stray.css""#), "{opf}");
    assert!(opf.contains(r#"media-type="text/css""#));
}
