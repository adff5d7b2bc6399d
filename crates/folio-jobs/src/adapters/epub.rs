//! EPUB extractor.
//!
//! Follows `META-INF/container.xml` to the package document, then reads the
//! spine in reading order. Each XHTML item is stripped to text with paragraph
//! boundaries kept; chapters are separated by a blank line.

use std::collections::HashMap;

use roxmltree::{Document, Node};
use tracing::warn;

use folio_core::{defaults, Error, ExtractedDocument, FormatExtractor, MaterialFormat, Result};

use super::markup::html_to_text;
use super::{element_text, parse_xml, Package};

const CONTAINER_PART: &str = "META-INF/container.xml";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

#[derive(Debug, Clone)]
pub struct EpubExtractor {
    max_decompressed: u64,
}

impl Default for EpubExtractor {
    fn default() -> Self {
        Self {
            max_decompressed: defaults::MAX_DECOMPRESSED_BYTES,
        }
    }
}

impl EpubExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_decompressed(mut self, bytes: u64) -> Self {
        self.max_decompressed = bytes;
        self
    }

    pub fn max_decompressed(&self) -> u64 {
        self.max_decompressed
    }
}

/// Elements with the given local name, whatever their namespace prefix.
fn elements<'a, 'input: 'a>(
    document: &'a Document<'input>,
    local: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    document
        .descendants()
        .filter(move |n| n.is_element() && n.tag_name().name() == local)
}

fn package_document_path(container: &Document<'_>) -> Option<String> {
    elements(container, "rootfile")
        .find_map(|n| n.attribute("full-path"))
        .map(str::to_string)
}

/// Resolve an href relative to the directory holding the package document.
fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/").replace("%20", " ")
}

fn dublin_core(opf: &Document<'_>, local: &str) -> Option<String> {
    opf.descendants()
        .find(|n| {
            n.is_element()
                && n.tag_name().namespace() == Some(DC_NS)
                && n.tag_name().name() == local
        })
        .and_then(element_text)
}

/// Spine entries resolved to archive paths, in reading order.
fn spine_paths(opf: &Document<'_>, base_dir: &str) -> Vec<String> {
    let manifest: HashMap<&str, &str> = elements(opf, "item")
        .filter_map(|item| Some((item.attribute("id")?, item.attribute("href")?)))
        .collect();

    elements(opf, "itemref")
        .filter_map(|itemref| {
            let href = manifest.get(itemref.attribute("idref")?)?;
            Some(resolve_href(base_dir, href))
        })
        .collect()
}

impl FormatExtractor for EpubExtractor {
    fn format(&self) -> MaterialFormat {
        MaterialFormat::Epub
    }

    fn extract(&self, data: &[u8]) -> Result<ExtractedDocument> {
        let mut package = Package::with_limit(data, "EPUB", self.max_decompressed)?;

        let container_xml = package.read_entry(CONTAINER_PART)?.ok_or_else(|| {
            Error::ExtractionFailed(format!("EPUB package has no {CONTAINER_PART}"))
        })?;
        let container = parse_xml(&container_xml, CONTAINER_PART)?;
        let opf_path = package_document_path(&container).ok_or_else(|| {
            Error::ExtractionFailed("EPUB container names no package document".to_string())
        })?;
        let opf_xml = package.read_entry(&opf_path)?.ok_or_else(|| {
            Error::ExtractionFailed(format!("EPUB package document {opf_path} is missing"))
        })?;
        let opf = parse_xml(&opf_xml, &opf_path)?;
        let base_dir = opf_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

        let spine = spine_paths(&opf, base_dir);
        if spine.is_empty() {
            return Err(Error::ExtractionFailed("EPUB spine is empty".to_string()));
        }

        let mut chapters = Vec::with_capacity(spine.len());
        for path in &spine {
            match package.read_entry(path)? {
                Some(xhtml) => {
                    let text = html_to_text(&xhtml);
                    if !text.is_empty() {
                        chapters.push(text);
                    }
                }
                None => warn!(
                    subsystem = "jobs",
                    component = "epub_extractor",
                    item = %path,
                    "Spine item missing from archive, skipping"
                ),
            }
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("chapter_count".into(), chapters.len().into());
        metadata.insert("spine_items".into(), spine.len().into());

        Ok(ExtractedDocument {
            text: chapters.join("\n\n"),
            title: dublin_core(&opf, "title"),
            author: dublin_core(&opf, "creator"),
            page_count: None,
            metadata,
        })
    }

    fn name(&self) -> &str {
        "epub"
    }
}
