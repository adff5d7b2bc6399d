//! Shared helpers for turning markup into paragraph-preserving plain text.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node};

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|amp|lt|gt|quot|apos|nbsp);")
        .expect("static entity pattern")
});

/// Elements whose boundaries start a new paragraph.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "section", "article", "aside", "header", "footer", "main", "nav", "blockquote",
    "pre", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "dl", "dt", "dd", "table", "tr",
    "figure", "figcaption", "hr", "body",
];

/// Elements whose content is never text.
const SKIPPED_ELEMENTS: &[&str] = &["head", "script", "style", "title", "noscript", "svg"];

/// Decode the XML predefined entities and numeric character references.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    ENTITY
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match name {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                "nbsp" => "\u{a0}".to_string(),
                _ => {
                    let code = if let Some(hex) = name
                        .strip_prefix("#x")
                        .or_else(|| name.strip_prefix("#X"))
                    {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        name[1..].parse::<u32>().ok()
                    };
                    code.and_then(char::from_u32)
                        .map(String::from)
                        .unwrap_or_else(|| caps[0].to_string())
                }
            }
        })
        .into_owned()
}

/// Paragraph accumulator: collapses whitespace inside a paragraph and keeps
/// explicit line breaks.
#[derive(Default)]
struct Paragraphs {
    done: Vec<String>,
    current: String,
}

impl Paragraphs {
    fn push_text(&mut self, text: &str) {
        let mut words = text.split_whitespace().peekable();
        if words.peek().is_none() {
            if !text.is_empty() && !self.at_boundary() {
                self.current.push(' ');
            }
            return;
        }
        if text.starts_with(char::is_whitespace) && !self.at_boundary() {
            self.current.push(' ');
        }
        let joined = words.collect::<Vec<_>>().join(" ");
        self.current.push_str(&joined);
        if text.ends_with(char::is_whitespace) {
            self.current.push(' ');
        }
    }

    fn at_boundary(&self) -> bool {
        self.current.is_empty() || self.current.ends_with([' ', '\n'])
    }

    fn line_break(&mut self) {
        let trimmed = self.current.trim_end_matches(' ').len();
        self.current.truncate(trimmed);
        self.current.push('\n');
    }

    fn flush(&mut self) {
        let paragraph = self
            .current
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if !paragraph.is_empty() {
            self.done.push(paragraph);
        }
        self.current.clear();
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.done
    }
}

fn walk(element: ElementRef<'_>, out: &mut Paragraphs) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }
    if name == "br" {
        out.line_break();
        return;
    }
    let is_block = BLOCK_ELEMENTS.contains(&name);
    if is_block {
        out.flush();
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_text(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    walk(child_el, out);
                }
            }
            _ => {}
        }
    }
    if is_block {
        out.flush();
    }
}

/// Strip (X)HTML to plain text, one paragraph per block element.
pub fn html_paragraphs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut out = Paragraphs::default();
    walk(document.root_element(), &mut out);
    out.finish()
}

/// Strip (X)HTML to plain text with paragraphs separated by a blank line.
pub fn html_to_text(html: &str) -> String {
    html_paragraphs(html).join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(decode_entities("&lt;tag&gt;"), "<tag>");
        assert_eq!(decode_entities("caf&#233; &#x2014; ok"), "café — ok");
        assert_eq!(decode_entities("&bogus; stays"), "&bogus; stays");
        assert_eq!(decode_entities("plain"), "plain");
    }

    #[test]
    fn test_html_paragraph_boundaries() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><h1>Chapter One</h1><p>It was a <em>dark</em> night.</p>\
                    <p>The ghost\n   wrote.</p></body></html>";
        assert_eq!(
            html_to_text(html),
            "Chapter One\n\nIt was a dark night.\n\nThe ghost wrote."
        );
    }

    #[test]
    fn test_html_line_breaks_and_scripts() {
        let html = "<body><p>line one<br/>line two</p><script>var x = 1;</script></body>";
        assert_eq!(html_to_text(html), "line one\nline two");
    }

    #[test]
    fn test_html_inline_runs_join() {
        let html = "<body><p><b>bo</b>ld and <i>italic</i></p></body>";
        assert_eq!(html_to_text(html), "bold and italic");
    }

    #[test]
    fn test_html_entities_decoded() {
        let html = "<body><p>Fish &amp; chips &#8212; cheap</p></body>";
        assert_eq!(html_to_text(html), "Fish & chips \u{2014} cheap");
    }
}
