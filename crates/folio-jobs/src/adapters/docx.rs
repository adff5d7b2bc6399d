//! DOCX extractor.
//!
//! Walks the XML tree of `word/document.xml` and keeps paragraph structure:
//! one output paragraph per `<w:p>`, tabs and breaks preserved, empty
//! paragraphs dropped. Paragraphs nested inside a text box are emitted on
//! their own after the paragraph that anchors them, and the `mc:Fallback`
//! copy of alternate content is skipped. `docProps/core.xml` supplies title
//! and author.

use roxmltree::{Document, Node};

use folio_core::{defaults, Error, ExtractedDocument, FormatExtractor, MaterialFormat, Result};

use super::{element_text, parse_xml, Package};

const DOCUMENT_PART: &str = "word/document.xml";
const CORE_PROPERTIES_PART: &str = "docProps/core.xml";

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const MC_NS: &str = "http://schemas.openxmlformats.org/markup-compatibility/2006";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

#[derive(Debug, Clone)]
pub struct DocxExtractor {
    max_decompressed: u64,
}

impl Default for DocxExtractor {
    fn default() -> Self {
        Self {
            max_decompressed: defaults::MAX_DECOMPRESSED_BYTES,
        }
    }
}

impl DocxExtractor {
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

fn is_w(node: Node<'_, '_>, local: &str) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(W_NS)
        && node.tag_name().name() == local
}

fn in_fallback(node: Node<'_, '_>) -> bool {
    node.ancestors()
        .any(|a| a.tag_name().namespace() == Some(MC_NS) && a.tag_name().name() == "Fallback")
}

/// Append the run text that belongs to this paragraph, leaving nested
/// paragraphs to be collected on their own.
fn collect_runs(node: Node<'_, '_>, out: &mut String) {
    for child in node.children().filter(|c| c.is_element()) {
        let name = child.tag_name();
        match (name.namespace(), name.name()) {
            (Some(W_NS), "p" | "pPr" | "rPr" | "delText" | "instrText") => {}
            (Some(W_NS), "t") => out.extend(child.text()),
            (Some(W_NS), "tab") => out.push('\t'),
            (Some(W_NS), "br" | "cr") => out.push('\n'),
            (Some(MC_NS), "Fallback") => {}
            _ => collect_runs(child, out),
        }
    }
}

/// Text of each non-empty paragraph, in document order.
fn paragraphs(document: &Document<'_>) -> Vec<String> {
    document
        .descendants()
        .filter(|n| is_w(*n, "p") && !in_fallback(*n))
        .filter_map(|paragraph| {
            let mut text = String::new();
            collect_runs(paragraph, &mut text);
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect()
}

fn core_property(core: &Document<'_>, local: &str) -> Option<String> {
    core.descendants()
        .find(|n| {
            n.is_element()
                && n.tag_name().namespace() == Some(DC_NS)
                && n.tag_name().name() == local
        })
        .and_then(element_text)
}

impl FormatExtractor for DocxExtractor {
    fn format(&self) -> MaterialFormat {
        MaterialFormat::Docx
    }

    fn extract(&self, data: &[u8]) -> Result<ExtractedDocument> {
        let mut package = Package::with_limit(data, "DOCX", self.max_decompressed)?;
        let document_xml = package.read_entry(DOCUMENT_PART)?.ok_or_else(|| {
            Error::ExtractionFailed(format!("DOCX package has no {DOCUMENT_PART}"))
        })?;
        let core_xml = package.read_entry(CORE_PROPERTIES_PART)?;

        let document = parse_xml(&document_xml, DOCUMENT_PART)?;
        let paragraphs = paragraphs(&document);
        // Properties are advisory; a malformed core.xml only loses them.
        let core = core_xml
            .as_deref()
            .and_then(|xml| parse_xml(xml, CORE_PROPERTIES_PART).ok());

        let mut metadata = serde_json::Map::new();
        metadata.insert("paragraph_count".into(), paragraphs.len().into());

        Ok(ExtractedDocument {
            text: paragraphs.join("\n\n"),
            title: core.as_ref().and_then(|c| core_property(c, "title")),
            author: core.as_ref().and_then(|c| core_property(c, "creator")),
            page_count: None,
            metadata,
        })
    }

    fn name(&self) -> &str {
        "docx"
    }
}
