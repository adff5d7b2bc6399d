//! Format extractor implementations.

pub mod docx;
pub mod epub;
pub mod markup;
pub mod pdf;
pub mod plain_text;

use std::io::{Cursor, Read};

use roxmltree::{Document, ParsingOptions};
use zip::result::ZipError;
use zip::ZipArchive;

use folio_core::{defaults, Error, Result};

pub use docx::DocxExtractor;
pub use epub::EpubExtractor;
pub use pdf::PdfExtractor;
pub use plain_text::PlainTextExtractor;

/// A ZIP-based container (DOCX, EPUB) held in memory, with a budget on how
/// many bytes may be decompressed out of it.
///
/// Header sizes are never trusted: every read is cut off one byte past the
/// remaining budget, and running out fails the extraction.
pub(crate) struct Package<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
    kind: &'static str,
    limit: u64,
    remaining: u64,
}

impl<'a> Package<'a> {
    pub fn open(data: &'a [u8], kind: &'static str) -> Result<Self> {
        Self::with_limit(data, kind, defaults::MAX_DECOMPRESSED_BYTES)
    }

    pub fn with_limit(data: &'a [u8], kind: &'static str, limit: u64) -> Result<Self> {
        let archive = ZipArchive::new(Cursor::new(data)).map_err(|e| {
            Error::ExtractionFailed(format!("{kind} is not a readable ZIP package: {e}"))
        })?;
        Ok(Self {
            archive,
            kind,
            limit,
            remaining: limit,
        })
    }

    fn over_limit(&self, name: &str) -> Error {
        Error::ExtractionFailed(format!(
            "{} expands past {} bytes (at {name})",
            self.kind, self.limit
        ))
    }

    /// Read one entry as text, charging it to the budget; `None` when the
    /// entry does not exist.
    pub fn read_entry(&mut self, name: &str) -> Result<Option<String>> {
        let budget = self.remaining;
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(Error::ExtractionFailed(format!(
                    "failed to open {name}: {e}"
                )))
            }
        };
        let mut bytes = Vec::new();
        entry
            .by_ref()
            .take(budget.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| Error::ExtractionFailed(format!("failed to read {name}: {e}")))?;
        drop(entry);

        let read = bytes.len() as u64;
        if read > budget {
            return Err(self.over_limit(name));
        }
        self.remaining = budget - read;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Parse an XML part. DTDs are allowed since EPUB 2 documents carry them.
pub(crate) fn parse_xml<'x>(text: &'x str, part: &str) -> Result<Document<'x>> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, options)
        .map_err(|e| Error::ExtractionFailed(format!("{part} is not well-formed XML: {e}")))
}

/// Concatenated text beneath `node`, trimmed; `None` when empty.
pub(crate) fn element_text(node: roxmltree::Node<'_, '_>) -> Option<String> {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
