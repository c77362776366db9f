//! EPUB 3 conformance filter: metadata upgrades, deprecated markup
//! removal, navigation document synthesis, page-map conversion.

use super::{Context, ExecMode, Filter};
use crate::error::Result;
use crate::index::{opf, ManifestEntry, XHTML_MEDIA_TYPE};
use crate::nav;
use crate::paths;
use crate::xml::{Document, Element, Node};
use std::collections::BTreeMap;

/// MARC relator codes accepted as `scheme="marc:relators"` values for
/// upgraded role metadata.
const MARC_RELATORS: &[&str] = &[
    "abr", "acp", "act", "adi", "adp", "aft", "anl", "anm", "ann", "ant", "ape", "apl", "app",
    "aqt", "arc", "ard", "arr", "art", "asg", "asn", "ato", "att", "auc", "aud", "aue", "aui",
    "aup", "aus", "aut", "bdd", "bjd", "bka", "bkd", "bkp", "blw", "bnd", "bpd", "brd", "brl",
    "bsl", "cad", "cas", "ccp", "chr", "cli", "cll", "clr", "clt", "cmm", "cmp", "cmt", "cnd",
    "cng", "cns", "coe", "col", "com", "con", "cop", "cor", "cos", "cot", "cou", "cov", "cpc",
    "cpe", "cph", "cpl", "cpt", "cre", "crp", "crr", "crt", "csl", "csp", "cst", "ctb", "cte",
    "ctg", "ctr", "cts", "ctt", "cur", "cwt", "dbd", "dbp", "dfd", "dfe", "dft", "dgc", "dgg",
    "dgs", "dis", "djo", "dln", "dnc", "dnr", "dpc", "dpt", "drm", "drt", "dsr", "dst", "dtc",
    "dte", "dtm", "dto", "dub", "edc", "edd", "edm", "edt", "egr", "elg", "elt", "eng", "enj",
    "etr", "evp", "exp", "fac", "fds", "fld", "flm", "fmd", "fmk", "fmo", "fmp", "fnd", "fon",
    "fpy", "frg", "gdv", "gis", "his", "hnr", "hst", "ill", "ilu", "ink", "ins", "inv", "isb",
    "itr", "ive", "ivr", "jud", "jug", "lbr", "lbt", "ldr", "led", "lee", "lel", "len", "let",
    "lgd", "lie", "lil", "lit", "lsa", "lse", "lso", "ltg", "ltr", "lyr", "mcp", "mdc", "med",
    "mfp", "mfr", "mka", "mod", "mon", "mrb", "mrk", "msd", "mte", "mtk", "mup", "mus", "mxe",
    "nan", "nrt", "onp", "opn", "org", "orm", "osp", "oth", "own", "pad", "pan", "pat", "pbd",
    "pbl", "pdr", "pfr", "pht", "plt", "pma", "pmn", "pnc", "pop", "ppm", "ppt", "pra", "prc",
    "prd", "pre", "prf", "prg", "prm", "prn", "pro", "prp", "prs", "prt", "prv", "pta", "pte",
    "ptf", "pth", "ptt", "pup", "rap", "rbr", "rcd", "rce", "rcp", "rdd", "red", "ren", "res",
    "rev", "rpc", "rps", "rpt", "rpy", "rse", "rsg", "rsp", "rsr", "rst", "rth", "rtm", "rxa",
    "sad", "sce", "scl", "scr", "sde", "sds", "sec", "sfx", "sgd", "sgn", "sht", "sll", "sng",
    "spk", "spn", "spy", "srv", "std", "stg", "stl", "stm", "stn", "str", "swd", "tad", "tau",
    "tcd", "tch", "ths", "tld", "tlg", "tlh", "tlp", "trc", "trl", "tyd", "tyg", "uvp", "vac",
    "vdg", "vfx", "wac", "wal", "wam", "wat", "waw", "wdc", "wde", "wfs", "wft", "wfw", "win",
    "wit", "wpr", "wst", "wts",
];

/// Attributes EPUB 3 still allows on Dublin Core elements; everything else
/// is legacy refinement data to be lifted into `<meta refines>` elements.
const EXPECTED_DC_ATTRIBUTES: &[&str] = &["id", "dir", "xml:lang", "xsi:type"];

const GENERATED_NAV_NAME: &str = "nav_generated.xhtml";
const GENERATED_NAV_ID: &str = "toc_generated";

pub struct Epub3;

impl Epub3 {
    pub fn new() -> Self {
        Epub3
    }
}

impl Default for Epub3 {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for Epub3 {
    fn name(&self) -> &'static str {
        "epub3"
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Parallel
    }

    fn targets(&self, ctx: &Context) -> Vec<String> {
        ctx.registry.xhtml_paths()
    }

    fn pre_process(&mut self, ctx: &mut Context) -> Result<()> {
        upgrade_dc_meta_attributes(&mut ctx.registry.opf_doc, ctx.logger);
        Ok(())
    }

    fn process(&self, ctx: &Context, path: &str) -> Result<()> {
        let Some(mut doc) = ctx.vfs.read_xml(path) else {
            ctx.log(&format!("Error loading XHTML file {path}, skipping."));
            return Ok(());
        };
        let mut changed = remove_deprecated_roles(&mut doc);
        changed |= convert_table_cell_attributes(&mut doc);
        if changed {
            ctx.vfs.write_xml(path, doc)?;
        }
        Ok(())
    }

    fn post_process(&mut self, ctx: &mut Context) -> Result<()> {
        opf::remove_empty_dc_elements(&mut ctx.registry.opf_doc, ctx.logger);
        opf::add_dcterms_modified(&mut ctx.registry.opf_doc);

        if !nav_declared(ctx) {
            let guessed = ctx.config.get_bool("epub3.guessToc")? && guess_nav(ctx)?;
            if !guessed {
                build_nav_from_ncx(ctx)?;
            }
        }
        convert_page_map(ctx)?;

        if ctx.config.get_bool("epub3.correctSpine")?
            && let Some(ncx) = ctx.registry.ncx_doc.take()
        {
            opf::correct_spine_order(&mut ctx.registry.opf_doc, &ncx, ctx.logger);
            ctx.registry.ncx_doc = Some(ncx);
        }
        Ok(())
    }
}

/// Lift nonstandard attributes on `dc:` metadata elements into
/// `<meta refines="#id" property="...">` siblings, tagging known MARC
/// relator codes with their scheme.
fn upgrade_dc_meta_attributes(opf_doc: &mut Document, logger: &crate::Logger) {
    let Some(metadata) = opf_doc.root.find_mut("metadata") else {
        return;
    };
    let mut auto_id = 0usize;
    let mut upgraded = 0usize;
    let mut index = 0;
    while index < metadata.children.len() {
        let Some(element) = metadata.children[index].as_element_mut() else {
            index += 1;
            continue;
        };
        if !element.name.starts_with("dc:") {
            index += 1;
            continue;
        }

        let legacy: Vec<(String, String)> = element
            .attrs
            .iter()
            .filter(|(name, _)| {
                !EXPECTED_DC_ATTRIBUTES.contains(&name.as_str())
                    && !name.starts_with("xmlns")
            })
            .cloned()
            .collect();
        if legacy.is_empty() {
            index += 1;
            continue;
        }

        let refined_id = match element.attr("id") {
            Some(id) => id.to_string(),
            None => {
                auto_id += 1;
                let id = format!("meta-auto-{auto_id}");
                element.set_attr("id", &id);
                id
            }
        };
        for (name, _) in &legacy {
            element.remove_attr(name);
        }

        let mut insert_at = index + 1;
        for (name, value) in &legacy {
            if value.is_empty() {
                continue;
            }
            let mut meta = Element::new("meta");
            let property = name.strip_prefix("opf:").unwrap_or(name);
            meta.set_attr("property", property);
            meta.set_attr("refines", &format!("#{refined_id}"));
            if property == "role" && MARC_RELATORS.contains(&value.as_str()) {
                meta.set_attr("scheme", "marc:relators");
            }
            meta.set_text(value.clone());
            metadata.children.insert(insert_at, Node::Element(meta));
            insert_at += 1;
            upgraded += 1;
        }
        index = insert_at;
    }
    if upgraded > 0 {
        logger(&format!(
            "Upgraded {upgraded} legacy metadata attributes to refines elements."
        ));
    }
}

/// DPUB-ARIA dropped these role values; readers warn on them.
fn remove_deprecated_roles(doc: &mut Document) -> bool {
    let mut changed = false;
    doc.root.walk_mut(&mut |e| {
        if matches!(e.attr("role"), Some("doc-biblioentry" | "doc-endnote")) {
            e.remove_attr("role");
            changed = true;
        }
    });
    changed
}

/// Replace `cellpadding`/`cellspacing` table attributes with generated CSS
/// classes, one class per distinct value, declared in a `<style>` element
/// appended to the document head.
fn convert_table_cell_attributes(doc: &mut Document) -> bool {
    let mut padding: BTreeMap<String, usize> = BTreeMap::new();
    let mut spacing: BTreeMap<String, usize> = BTreeMap::new();

    doc.root.walk_mut(&mut |e| {
        if e.local_name() != "table" {
            return;
        }
        if let Some(value) = e.remove_attr("cellpadding") {
            e.add_class(&format!("cellpadding{value}"));
            *padding.entry(value).or_default() += 1;
        }
        if let Some(value) = e.remove_attr("cellspacing") {
            e.add_class(&format!("cellspacing{value}"));
            *spacing.entry(value).or_default() += 1;
        }
    });
    if padding.is_empty() && spacing.is_empty() {
        return false;
    }

    let mut css = String::new();
    for value in padding.keys() {
        css.push_str(&format!(
            ".cellpadding{value} td,\n.cellpadding{value} th {{\n    padding: {value}px;\n}}\n"
        ));
    }
    for value in spacing.keys() {
        css.push_str(&format!(
            ".cellspacing{value} {{\n    border-spacing: {value}px;\n    border-collapse: separate;\n}}\n"
        ));
    }

    let mut style = Element::new("style");
    style.set_attr("type", "text/css");
    style.set_text(css);
    match doc.root.find_mut("head") {
        Some(head) => head.push_element(style),
        None => {
            let mut head = Element::new("head");
            head.push_element(style);
            doc.root.children.insert(0, Node::Element(head));
        }
    }
    true
}

fn nav_declared(ctx: &Context) -> bool {
    ctx.registry
        .entries
        .iter()
        .any(|e| e.media_type == XHTML_MEDIA_TYPE && e.has_property("nav"))
}

/// Look for an existing `<nav epub:type="toc">` in the content documents
/// and retro-fit the manifest property onto its file.
fn guess_nav(ctx: &mut Context) -> Result<bool> {
    ctx.log("No nav declared in manifest, trying to find one in content...");
    let candidates = ctx.registry.xhtml_paths();
    for path in candidates {
        let Some(doc) = ctx.vfs.read_xml(&path) else {
            continue;
        };
        let navs = doc.root.find_all("nav");
        if navs.len() == 1 && navs[0].attr("epub:type") == Some("toc") {
            if let Some(entry) = ctx.registry.entry_by_path_mut(&path) {
                entry.add_property("nav");
                ctx.log(&format!("Nav found in {path}, manifest property added."));
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Synthesize a navigation document from the legacy NCX and register it.
fn build_nav_from_ncx(ctx: &mut Context) -> Result<()> {
    ctx.log("No nav declared in manifest, generating one from the NCX...");
    let nav_doc = nav::generate_from_ncx(ctx.registry.ncx_doc.as_ref());
    let nav_path =
        paths::to_container_path(&ctx.registry.opf_path, GENERATED_NAV_NAME);
    ctx.vfs.write_xml(&nav_path, nav_doc)?;

    let mut id = GENERATED_NAV_ID.to_string();
    while ctx.registry.entry_by_id(&id).is_some() {
        id.push('x');
    }
    ctx.registry.entries.push(ManifestEntry {
        id,
        package_path: GENERATED_NAV_NAME.to_string(),
        container_path: nav_path,
        media_type: XHTML_MEDIA_TYPE.to_string(),
        properties: vec!["nav".to_string()],
        origin: None,
    });
    Ok(())
}

/// Convert a legacy page-map (spine `page-map` attribute) into a
/// `page-list` block in the nav document, then delete the page-map file
/// and its manifest entry.
fn convert_page_map(ctx: &mut Context) -> Result<()> {
    let map_id = ctx
        .registry
        .opf_doc
        .root
        .find("spine")
        .and_then(|s| s.attr("page-map"))
        .map(str::to_string);
    let Some(map_id) = map_id else {
        return Ok(());
    };
    let Some(map_entry) = ctx.registry.entry_by_id(&map_id) else {
        if let Some(spine) = ctx.registry.opf_doc.root.find_mut("spine") {
            spine.remove_attr("page-map");
        }
        return Ok(());
    };
    let map_path = map_entry.container_path.clone();

    let nav_path = ctx
        .registry
        .entries
        .iter()
        .find(|e| e.media_type == XHTML_MEDIA_TYPE && e.has_property("nav"))
        .map(|e| e.container_path.clone());
    if let Some(nav_path) = nav_path
        && let Some(mut nav_doc) = ctx.vfs.read_xml(&nav_path)
        && !nav::has_page_list(&nav_doc)
        && let Some(map_doc) = ctx.vfs.read_xml(&map_path)
    {
        nav::append_page_list(&mut nav_doc, &map_doc, &map_path, &nav_path);
        ctx.vfs.write_xml(&nav_path, nav_doc)?;
        ctx.log(&format!(
            "Converted page-map '{map_path}' into a page-list nav."
        ));
    }

    ctx.registry.entries.retain(|e| e.container_path != map_path);
    ctx.vfs.delete(&map_path);
    if let Some(spine) = ctx.registry.opf_doc.root.find_mut("spine") {
        spine.remove_attr("page-map");
    }
    Ok(())
}
