//! Page content extraction
//!
//! This module handles:
//! - HTML parsing and boilerplate removal
//! - Title and link extraction
//! - Whitespace normalization of the extracted text

mod html;

pub use html::*;

/// Text content extracted from one page
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// Page title (falls back to the first heading, then the URL)
    pub title: String,

    /// Plain text without markup
    pub content: String,

    /// Links found anywhere in the page, resolved to absolute URLs
    pub links: Vec<ExtractedLink>,
}

/// An extracted link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    /// Absolute link URL
    pub url: String,

    /// Link text
    pub text: Option<String>,
}

/// Why a page yielded no usable content
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no text content left after removing boilerplate")]
    EmptyContent {
        /// Links are still usable for crawling even without content
        links: Vec<ExtractedLink>,
    },

    #[error("unparseable page: {0}")]
    Unparseable(String),
}

impl ExtractionError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            ExtractionError::EmptyContent { .. } => "empty_content",
            ExtractionError::Unparseable(_) => "unparseable",
        }
    }

    /// Links discovered before extraction gave up
    pub fn links(&self) -> &[ExtractedLink] {
        match self {
            ExtractionError::EmptyContent { links } => links,
            ExtractionError::Unparseable(_) => &[],
        }
    }
}

/// Normalize whitespace in text
///
/// Runs of spaces collapse to one space, a single newline is kept as a line
/// break and two or more become a paragraph break.
pub fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut last_was_whitespace = true;
    let mut newline_count = 0;

    for c in text.chars() {
        if c.is_whitespace() {
            if c == '\n' {
                newline_count += 1;
            }
            last_was_whitespace = true;
        } else {
            if last_was_whitespace && !result.is_empty() {
                if newline_count >= 2 {
                    result.push_str("\n\n");
                } else if newline_count == 1 {
                    result.push('\n');
                } else {
                    result.push(' ');
                }
            }
            newline_count = 0;
            result.push(c);
            last_was_whitespace = false;
        }
    }

    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        let input = "Hello   world\n\n\n\ntest";
        let result = normalize_whitespace(input);
        assert_eq!(result, "Hello world\n\ntest");
    }

    #[test]
    fn test_normalize_whitespace_only() {
        assert_eq!(normalize_whitespace(" \n\t \n "), "");
    }

    #[test]
    fn test_empty_content_keeps_links() {
        let err = ExtractionError::EmptyContent {
            links: vec![ExtractedLink {
                url: "https://example.com/a".to_string(),
                text: None,
            }],
        };
        assert_eq!(err.reason_code(), "empty_content");
        assert_eq!(err.links().len(), 1);
    }
}
