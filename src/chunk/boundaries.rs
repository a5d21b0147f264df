//! Break point detection for chunking

/// Priority levels for break points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakPriority {
    /// Word boundary (lowest)
    Word = 1,
    /// Sentence boundary
    Sentence = 2,
    /// Paragraph boundary
    Paragraph = 3,
    /// Heading boundary (highest)
    Heading = 4,
}

/// A potential break point in text
#[derive(Debug, Clone)]
pub struct BreakPoint {
    /// Byte position; a chunk ending here excludes everything from it on
    pub position: usize,
    /// Priority of this break point
    pub priority: BreakPriority,
}

impl BreakPoint {
    pub fn new(position: usize, priority: BreakPriority) -> Self {
        Self { position, priority }
    }
}

/// Find all break points in `text`, sorted by position.
///
/// Headings are lines starting with `#`, which is how extracted page text
/// renders `<h1>`..`<h6>`. When two kinds of break share a position the
/// higher priority one is kept.
pub fn find_break_points(text: &str, prefer_headings: bool) -> Vec<BreakPoint> {
    let mut points = Vec::new();

    let mut line_start = 0;
    for line in text.split_inclusive('\n') {
        if prefer_headings && line_start > 0 && line.trim_start().starts_with('#') {
            points.push(BreakPoint::new(line_start, BreakPriority::Heading));
        }
        line_start += line.len();
    }

    for (i, _) in text.match_indices("\n\n") {
        points.push(BreakPoint::new(i + 2, BreakPriority::Paragraph));
    }

    for pattern in [". ", ".\n", "? ", "?\n", "! ", "!\n"] {
        for (i, _) in text.match_indices(pattern) {
            points.push(BreakPoint::new(i + 2, BreakPriority::Sentence));
        }
    }

    for (i, c) in text.char_indices() {
        if c == ' ' || c == '\t' {
            points.push(BreakPoint::new(i + 1, BreakPriority::Word));
        }
    }

    points.retain(|p| p.position < text.len() && text.is_char_boundary(p.position));
    points.sort_by(|a, b| a.position.cmp(&b.position).then(b.priority.cmp(&a.priority)));
    points.dedup_by_key(|p| p.position);

    points
}
