//! Detection of client-rendered pages
//!
//! A page whose static HTML is an empty application shell has to be rendered
//! in a browser before any text can be extracted from it.

use scraper::{Html, Selector};
use tracing::debug;

/// Known SPA frameworks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaFramework {
    React,
    Angular,
    Vue,
    NextJs,
    Nuxt,
    Unknown,
}

impl std::fmt::Display for SpaFramework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpaFramework::React => write!(f, "React"),
            SpaFramework::Angular => write!(f, "Angular"),
            SpaFramework::Vue => write!(f, "Vue"),
            SpaFramework::NextJs => write!(f, "Next.js"),
            SpaFramework::Nuxt => write!(f, "Nuxt"),
            SpaFramework::Unknown => write!(f, "Unknown SPA"),
        }
    }
}

/// Result of page analysis
#[derive(Debug, Clone)]
pub struct PageAnalysis {
    pub framework: Option<SpaFramework>,
    pub needs_js_rendering: bool,
    /// Visible body text length in characters
    pub text_chars: usize,
    pub indicators: Vec<String>,
}

/// Body text below this many characters counts as an empty shell
const SHELL_TEXT_THRESHOLD: usize = 200;

/// Analyze static HTML for signs of client-side rendering
pub fn analyze_page(html: &str, url: &str) -> PageAnalysis {
    let lower = html.to_lowercase();
    let mut indicators = Vec::new();

    let framework = if lower.contains("id=\"__next\"") || lower.contains("__next_data__") {
        Some(SpaFramework::NextJs)
    } else if lower.contains("id=\"__nuxt\"") || lower.contains("window.__nuxt__") {
        Some(SpaFramework::Nuxt)
    } else if lower.contains("ng-version") || lower.contains("<app-root") {
        Some(SpaFramework::Angular)
    } else if lower.contains("data-v-app") || lower.contains("id=\"app\"") {
        Some(SpaFramework::Vue)
    } else if lower.contains("id=\"root\"") || lower.contains("data-reactroot") {
        Some(SpaFramework::React)
    } else if lower.contains("<noscript>") && lower.contains("enable javascript") {
        Some(SpaFramework::Unknown)
    } else {
        None
    };

    if let Some(fw) = framework {
        indicators.push(format!("{} markers present", fw));
    }

    let text_chars = visible_text_len(html);
    let is_shell = text_chars < SHELL_TEXT_THRESHOLD;
    if is_shell {
        indicators.push(format!("only {} characters of body text", text_chars));
    }

    let needs_js_rendering = framework.is_some() && is_shell;
    if needs_js_rendering {
        debug!("{} looks client-rendered: {:?}", url, indicators);
    }

    PageAnalysis {
        framework,
        needs_js_rendering,
        text_chars,
        indicators,
    }
}

fn visible_text_len(html: &str) -> usize {
    let document = Html::parse_document(html);
    let Ok(body) = Selector::parse("body") else {
        return 0;
    };
    document
        .select(&body)
        .next()
        .map(|b| {
            b.descendants()
                .filter(|n| {
                    n.parent()
                        .and_then(|p| p.value().as_element())
                        .map(|e| !matches!(e.name(), "script" | "style" | "noscript" | "template"))
                        .unwrap_or(true)
                })
                .filter_map(|n| n.value().as_text().map(|t| t.trim().chars().count()))
                .sum()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_react_shell_needs_rendering() {
        let html = r#"<html><head><title>App</title></head>
            <body><div id="root"></div><script src="/main.js"></script></body></html>"#;
        let analysis = analyze_page(html, "https://example.com");
        assert_eq!(analysis.framework, Some(SpaFramework::React));
        assert!(analysis.needs_js_rendering);
    }

    #[test]
    fn test_static_page_does_not_need_rendering() {
        let para = "This is a server rendered documentation page. ".repeat(10);
        let html = format!("<html><body><h1>Docs</h1><p>{}</p></body></html>", para);
        let analysis = analyze_page(&html, "https://example.com");
        assert!(analysis.framework.is_none());
        assert!(!analysis.needs_js_rendering);
    }

    #[test]
    fn test_prerendered_framework_page_is_static() {
        let para = "Pre-rendered content with plenty of text for readers. ".repeat(10);
        let html = format!(r#"<html><body><div id="__next"><p>{}</p></div></body></html>"#, para);
        let analysis = analyze_page(&html, "https://example.com");
        assert_eq!(analysis.framework, Some(SpaFramework::NextJs));
        assert!(!analysis.needs_js_rendering);
    }
}
