//! Registry mapping material formats to their extractors.

use std::collections::HashMap;
use std::sync::Arc;

use folio_core::{Error, ExtractedDocument, FormatExtractor, MaterialFormat, Result};

use crate::adapters::{DocxExtractor, EpubExtractor, PdfExtractor, PlainTextExtractor};

/// Dispatches extraction to the extractor registered for a format.
///
/// A format without a registered extractor is reported as
/// [`Error::UnsupportedFormat`] rather than falling back to another parser.
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<MaterialFormat, Arc<dyn FormatExtractor>>,
}

impl ExtractorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Registry with an extractor for every supported format.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PdfExtractor));
        registry.register(Arc::new(DocxExtractor::new()));
        registry.register(Arc::new(PlainTextExtractor));
        registry.register(Arc::new(EpubExtractor::new()));
        registry
    }

    /// Register an extractor. Replaces any existing extractor for the same format.
    pub fn register(&mut self, extractor: Arc<dyn FormatExtractor>) {
        self.extractors.insert(extractor.format(), extractor);
    }

    /// Extract using the extractor registered for `format`.
    ///
    /// Parsing is CPU-bound; async callers run this on a blocking thread.
    pub fn extract(&self, format: MaterialFormat, data: &[u8]) -> Result<ExtractedDocument> {
        let extractor = self.get(format)?;
        extractor.extract(data)
    }

    /// Look up the extractor for a format.
    pub fn get(&self, format: MaterialFormat) -> Result<Arc<dyn FormatExtractor>> {
        self.extractors
            .get(&format)
            .cloned()
            .ok_or_else(|| Error::UnsupportedFormat(format!("no extractor registered for {format}")))
    }

    pub fn has_extractor(&self, format: MaterialFormat) -> bool {
        self.extractors.contains_key(&format)
    }

    /// Formats with a registered extractor, in stable order.
    pub fn available_formats(&self) -> Vec<MaterialFormat> {
        let mut formats: Vec<_> = self.extractors.keys().copied().collect();
        formats.sort_by_key(|f| f.as_str());
        formats
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_new_is_empty() {
        let registry = ExtractorRegistry::new();
        assert!(registry.available_formats().is_empty());
        assert!(!registry.has_extractor(MaterialFormat::PlainText));
    }

    #[test]
    fn test_registry_defaults_cover_all_formats() {
        let registry = ExtractorRegistry::with_defaults();
        assert_eq!(
            registry.available_formats(),
            vec![
                MaterialFormat::Docx,
                MaterialFormat::Epub,
                MaterialFormat::Pdf,
                MaterialFormat::PlainText,
            ]
        );
        assert_eq!(registry.get(MaterialFormat::Pdf).unwrap().name(), "pdf");
    }

    #[test]
    fn test_registry_extract_missing_extractor() {
        let registry = ExtractorRegistry::new();
        let err = registry
            .extract(MaterialFormat::Pdf, b"%PDF-1.4")
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_registry_extract_with_extractor() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Arc::new(PlainTextExtractor));

        let doc = registry
            .extract(MaterialFormat::PlainText, b"hello world")
            .unwrap();
        assert_eq!(doc.text, "hello world");
    }

    #[test]
    fn test_registry_does_not_cross_formats() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Arc::new(PlainTextExtractor));
        assert!(registry.extract(MaterialFormat::Docx, b"hello").is_err());
    }
}
