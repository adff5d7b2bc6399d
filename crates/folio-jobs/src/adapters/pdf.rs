//! PDF extractor backed by `pdf-extract`.
//!
//! Page boundaries come out of `pdf-extract` as form feeds; they are counted
//! for `page_count` and rewritten as paragraph breaks. Title and author are
//! read best-effort from the document info dictionary.

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use tracing::debug;

use folio_core::{Error, ExtractedDocument, FormatExtractor, MaterialFormat, Result};

use super::markup::decode_entities;

const PDF_MAGIC: &[u8] = b"%PDF";

static INFO_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/Title\s*\(((?:[^()\\]|\\.){1,512})\)").expect("static title pattern"));
static INFO_AUTHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/Author\s*\(((?:[^()\\]|\\.){1,512})\)").expect("static author pattern")
});

pub struct PdfExtractor;

impl PdfExtractor {
    fn info_string(pattern: &Regex, data: &[u8]) -> Option<String> {
        let caps = pattern.captures(data)?;
        let raw = caps.get(1)?.as_bytes();
        // UTF-16 strings in the info dictionary are skipped.
        if raw.starts_with(b"\xFE\xFF") {
            return None;
        }
        let value = String::from_utf8_lossy(raw)
            .replace("\\(", "(")
            .replace("\\)", ")")
            .replace("\\\\", "\\");
        let value = decode_entities(value.trim());
        (!value.is_empty()).then_some(value)
    }
}

/// Collapse `pdf-extract` output into paragraphs and count pages.
fn normalize_pages(raw: &str) -> (String, i32) {
    let mut pages: Vec<&str> = raw.split('\u{000C}').collect();
    // A form feed closes its page; nothing after the last one is another page.
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    let page_count = pages.len().max(1) as i32;
    let text = pages
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    (text, page_count)
}

impl FormatExtractor for PdfExtractor {
    fn format(&self) -> MaterialFormat {
        MaterialFormat::Pdf
    }

    fn extract(&self, data: &[u8]) -> Result<ExtractedDocument> {
        if !data.starts_with(PDF_MAGIC) {
            return Err(Error::ExtractionFailed(
                "not a PDF document (missing %PDF header)".to_string(),
            ));
        }

        // pdf-extract panics on some malformed inputs instead of returning an error.
        let raw = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(data))
            .map_err(|_| Error::ExtractionFailed("PDF parser aborted on malformed input".to_string()))?
            .map_err(|e| Error::ExtractionFailed(format!("PDF parse error: {e}")))?;
        let (text, page_count) = normalize_pages(&raw);

        debug!(
            subsystem = "jobs",
            component = "pdf_extractor",
            pages = page_count,
            chars = text.len(),
            "PDF text extracted"
        );

        Ok(ExtractedDocument {
            text,
            title: Self::info_string(&INFO_TITLE, data),
            author: Self::info_string(&INFO_AUTHOR, data),
            page_count: Some(page_count),
            metadata: serde_json::Map::new(),
        })
    }

    fn name(&self) -> &str {
        "pdf"
    }
}
