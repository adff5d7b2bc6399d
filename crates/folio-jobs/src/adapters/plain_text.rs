//! Plain text extractor.

use folio_core::{ExtractedDocument, FormatExtractor, MaterialFormat, Result};

/// Reads bytes as UTF-8, replacing invalid sequences, and drops a leading BOM.
pub struct PlainTextExtractor;

impl FormatExtractor for PlainTextExtractor {
    fn format(&self) -> MaterialFormat {
        MaterialFormat::PlainText
    }

    fn extract(&self, data: &[u8]) -> Result<ExtractedDocument> {
        let decoded = String::from_utf8_lossy(data);
        let text = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded).to_string();

        let mut metadata = serde_json::Map::new();
        metadata.insert("line_count".into(), text.lines().count().into());
        if matches!(decoded, std::borrow::Cow::Owned(_)) {
            metadata.insert("lossy_utf8".into(), true.into());
        }

        Ok(ExtractedDocument {
            text,
            metadata,
            ..Default::default()
        })
    }

    fn name(&self) -> &str {
        "plain_text"
    }
}
