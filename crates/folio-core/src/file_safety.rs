//! Upload filename hygiene and magic-byte format sniffing.

use crate::models::MaterialFormat;

/// Longest filename kept in a storage key, in bytes.
const MAX_FILENAME_BYTES: usize = 255;

/// Sanitize a client-supplied filename for use as the last segment of a
/// storage key.
///
/// Path components are dropped, reserved characters replaced, and the name
/// truncated on a character boundary while keeping the extension.
pub fn sanitize_filename(filename: &str) -> String {
    // Remove path components
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let sanitized = sanitized.trim().trim_start_matches('.');
    if sanitized.is_empty() {
        return "unnamed_file".to_string();
    }

    if sanitized.len() <= MAX_FILENAME_BYTES {
        return sanitized.to_string();
    }

    let (stem, ext) = match sanitized.rfind('.') {
        Some(pos) if sanitized.len() - pos <= 16 => sanitized.split_at(pos),
        _ => (sanitized, ""),
    };
    let mut cut = MAX_FILENAME_BYTES - ext.len();
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &stem[..cut], ext)
}

/// Detect a supported format from magic bytes.
///
/// Returns `None` when the bytes carry no recognizable signature, which is
/// the normal case for plain text.
pub fn sniff_format(data: &[u8]) -> Option<MaterialFormat> {
    let kind = infer::get(data)?;
    match MaterialFormat::from_mime(kind.mime_type()) {
        Some(format) => Some(format),
        // Bare zip archives are reported generically when the OOXML/EPUB
        // marker entries are not first in the archive.
        None if kind.mime_type() == "application/zip" => None,
        None => {
            tracing::trace!(mime = kind.mime_type(), "Sniffed unsupported type");
            None
        }
    }
}

/// Whether uploaded bytes contradict the declared format.
///
/// Only signatures that identify a *different* supported or binary type
/// count as a mismatch; unrecognized bytes are accepted.
pub fn contradicts_declared(declared: MaterialFormat, data: &[u8]) -> bool {
    let Some(kind) = infer::get(data) else {
        return false;
    };
    match MaterialFormat::from_mime(kind.mime_type()) {
        Some(sniffed) => sniffed != declared,
        // DOCX and EPUB are zip containers; a generic zip verdict is fine for them.
        None if kind.mime_type() == "application/zip" => {
            !matches!(declared, MaterialFormat::Docx | MaterialFormat::Epub)
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_paths() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\draft.docx"), "draft.docx");
    }

    #[test]
    fn test_sanitize_replaces_reserved() {
        assert_eq!(sanitize_filename("a<b>c:d.txt"), "a_b_c_d.txt");
        assert_eq!(sanitize_filename("tab\there.txt"), "tab_here.txt");
    }

    #[test]
    fn test_sanitize_empty_and_dots() {
        assert_eq!(sanitize_filename(""), "unnamed_file");
        assert_eq!(sanitize_filename("   "), "unnamed_file");
        assert_eq!(sanitize_filename(".."), "unnamed_file");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let long = format!("{}.pdf", "é".repeat(200));
        let out = sanitize_filename(&long);
        assert!(out.len() <= 255);
        assert!(out.ends_with(".pdf"));
    }

    #[test]
    fn test_sniff_pdf() {
        assert_eq!(
            sniff_format(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n"),
            Some(MaterialFormat::Pdf)
        );
    }

    #[test]
    fn test_sniff_plain_text_is_unknown() {
        assert_eq!(sniff_format(b"Chapter one. It was raining."), None);
    }

    #[test]
    fn test_contradiction() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert!(contradicts_declared(MaterialFormat::PlainText, &png));
        assert!(contradicts_declared(MaterialFormat::Docx, b"%PDF-1.4\n"));
        assert!(!contradicts_declared(MaterialFormat::Pdf, b"%PDF-1.4\n"));
        assert!(!contradicts_declared(MaterialFormat::PlainText, b"hello"));
    }
}
