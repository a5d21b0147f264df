//! HTML parsing and text extraction

use super::{normalize_whitespace, ExtractedContent, ExtractedLink, ExtractionError};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Elements whose content never counts as page text
const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "canvas", "iframe", "nav", "header",
    "footer", "aside", "form", "button", "select", "head",
];

/// ARIA landmark roles that mark navigation chrome
const BOILERPLATE_ROLES: &[&str] = &["navigation", "banner", "contentinfo", "search"];

/// Elements kept as structure when handing the cleaned tree to html2text
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol",
    "li", "pre", "blockquote", "table", "thead", "tbody", "tr", "td", "th", "dl", "dt", "dd",
    "figure", "figcaption",
];

const TEXT_WIDTH: usize = 200;

/// Extract title, plain text and links from an HTML page.
///
/// Script, style and navigation chrome are dropped. When the page has a
/// `<main>`, `[role=main]` or `<article>` region only that region is used,
/// unless it turns out empty. Content that is empty after stripping is an
/// [`ExtractionError::EmptyContent`], which still carries the page's links.
pub fn extract(html: &str, url: &str) -> Result<ExtractedContent, ExtractionError> {
    let base = Url::parse(url).map_err(|e| ExtractionError::Unparseable(format!("{}: {}", url, e)))?;
    let document = Html::parse_document(html);

    let links = extract_links(&document, &base);

    let mut content = String::new();
    for region in content_regions(&document) {
        content = render_text(region);
        if !content.is_empty() {
            break;
        }
    }

    if content.is_empty() {
        return Err(ExtractionError::EmptyContent { links });
    }

    let title = extract_title(&document).unwrap_or_else(|| url.to_string());

    Ok(ExtractedContent {
        title,
        content,
        links,
    })
}

/// Candidate roots for page text, most specific first
fn content_regions(document: &Html) -> Vec<ElementRef<'_>> {
    let mut regions = Vec::new();
    for css in ["main", "[role=main]", "article", "body"] {
        if let Ok(selector) = Selector::parse(css) {
            if let Some(elem) = document.select(&selector).next() {
                regions.push(elem);
            }
        }
    }
    regions.push(document.root_element());
    regions
}

fn extract_title(document: &Html) -> Option<String> {
    for css in ["title", "h1"] {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        if let Some(elem) = document.select(&selector).next() {
            let text = normalize_whitespace(&elem.text().collect::<String>());
            if !text.is_empty() {
                return Some(text.replace('\n', " "));
            }
        }
    }
    None
}

fn extract_links(document: &Html, base: &Url) -> Vec<ExtractedLink> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for elem in document.select(&selector) {
        let Some(href) = elem.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }

        let resolved = resolved.to_string();
        if !seen.insert(resolved.clone()) {
            continue;
        }

        let text = normalize_whitespace(&elem.text().collect::<String>());
        links.push(ExtractedLink {
            url: resolved,
            text: if text.is_empty() { None } else { Some(text) },
        });
    }

    links
}

fn is_boilerplate(elem: &ElementRef<'_>) -> bool {
    let value = elem.value();
    if BOILERPLATE_TAGS.contains(&value.name()) {
        return true;
    }
    if value.attr("hidden").is_some() || value.attr("aria-hidden") == Some("true") {
        return true;
    }
    value
        .attr("role")
        .map(|role| BOILERPLATE_ROLES.contains(&role.trim().to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Plain text of a region with boilerplate removed
fn render_text(root: ElementRef<'_>) -> String {
    let mut cleaned = String::new();
    let mut fallback = String::new();
    write_clean(root, &mut cleaned, &mut fallback);

    let text = html2text::from_read(cleaned.as_bytes(), TEXT_WIDTH).unwrap_or(fallback);
    normalize_whitespace(&text)
}

/// Serialize the element keeping only block structure and text, so the
/// renderer never sees inline markup, and collect a plain-text fallback
fn write_clean(elem: ElementRef<'_>, html_out: &mut String, text_out: &mut String) {
    if is_boilerplate(&elem) {
        return;
    }

    let name = elem.value().name();
    if name == "br" || name == "hr" {
        html_out.push_str("<br>");
        text_out.push('\n');
        return;
    }

    let is_block = BLOCK_TAGS.contains(&name);
    if is_block {
        html_out.push('<');
        html_out.push_str(name);
        html_out.push('>');
        text_out.push_str("\n\n");
    }

    for child in elem.children() {
        if let Some(child_elem) = ElementRef::wrap(child) {
            write_clean(child_elem, html_out, text_out);
        } else if let Some(text) = child.value().as_text() {
            escape_into(text, html_out);
            text_out.push_str(text);
        }
    }

    if is_block {
        html_out.push_str("</");
        html_out.push_str(name);
        html_out.push('>');
        text_out.push_str("\n\n");
    }
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <!DOCTYPE html>
        <html>
        <head><title>Billing Help</title><style>body { color: red; }</style></head>
        <body>
            <header><a href="/">Home</a></header>
            <nav><a href="/docs/setup">Setup</a><a href="/docs/billing#refunds">Refunds</a></nav>
            <main>
                <h1>Billing</h1>
                <p>Invoices are sent on the <strong>first</strong> day of each month.</p>
                <script>var tracking = "do not index";</script>
                <p>Contact <a href="mailto:help@example.com">support</a> for refunds.</p>
            </main>
            <footer>Copyright 2024</footer>
        </body>
        </html>
    "#;

    #[test]
    fn test_extract_drops_boilerplate() {
        let doc = extract(PAGE, "https://example.com/docs/billing").unwrap();

        assert_eq!(doc.title, "Billing Help");
        assert!(doc.content.contains("Invoices are sent on the"));
        assert!(doc.content.contains("first"));
        assert!(!doc.content.contains("do not index"));
        assert!(!doc.content.contains("color: red"));
        assert!(!doc.content.contains("Copyright"));
        assert!(!doc.content.contains("Setup"));
    }

    #[test]
    fn test_extract_has_no_markup() {
        let doc = extract(PAGE, "https://example.com/docs/billing").unwrap();
        assert!(!doc.content.contains('<'));
        assert!(!doc.content.contains("</"));
    }

    #[test]
    fn test_links_resolved_and_filtered() {
        let doc = extract(PAGE, "https://example.com/docs/billing").unwrap();
        let urls: Vec<_> = doc.links.iter().map(|l| l.url.as_str()).collect();

        assert!(urls.contains(&"https://example.com/"));
        assert!(urls.contains(&"https://example.com/docs/setup"));
        assert!(urls.contains(&"https://example.com/docs/billing#refunds"));
        assert!(!urls.iter().any(|u| u.starts_with("mailto:")));
    }

    #[test]
    fn test_empty_page_is_error_with_links() {
        let html = r#"<html><head><title>Shell</title></head>
            <body><nav><a href="/next">Next</a></nav><script>render()</script>   </body></html>"#;
        let err = extract(html, "https://example.com/").unwrap_err();

        assert_eq!(err.reason_code(), "empty_content");
        assert_eq!(err.links().len(), 1);
        assert_eq!(err.links()[0].url, "https://example.com/next");
    }

    #[test]
    fn test_title_fallbacks() {
        let html = "<html><body><h1>Getting Started</h1><p>Welcome aboard.</p></body></html>";
        let doc = extract(html, "https://example.com/start").unwrap();
        assert_eq!(doc.title, "Getting Started");

        let html = "<html><body><p>No headings at all.</p></body></html>";
        let doc = extract(html, "https://example.com/plain").unwrap();
        assert_eq!(doc.title, "https://example.com/plain");
    }

    #[test]
    fn test_falls_back_to_body_when_main_is_empty() {
        let html = r#"<html><body><main>   </main><div><p>Body text lives here.</p></div></body></html>"#;
        let doc = extract(html, "https://example.com/").unwrap();
        assert!(doc.content.contains("Body text lives here."));
    }

    #[test]
    fn test_escaped_text_is_not_markup() {
        let html = "<html><body><p>Use 5 &lt; 6 &amp; 7 &gt; 3</p></body></html>";
        let doc = extract(html, "https://example.com/").unwrap();
        assert!(doc.content.contains("5 < 6 & 7 > 3"));
    }

    #[test]
    fn test_invalid_base_url() {
        let err = extract("<p>x</p>", "not a url").unwrap_err();
        assert_eq!(err.reason_code(), "unparseable");
    }
}
