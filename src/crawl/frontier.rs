//! URL frontier for a single crawl job
//!
//! Tracks pending and visited URLs, deduplicates by canonical form and
//! enforces the depth and page budgets of the job. Entries keep the URL as
//! discovered for fetching; the canonical form is only the dedup key.

use std::collections::{HashSet, VecDeque};
use tracing::trace;
use url::Url;

/// A URL waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// URL to fetch, as discovered minus its fragment
    pub url: String,
    /// Canonical dedup key
    pub key: String,
    /// Link distance from the seed (seed = 0)
    pub depth: u32,
}

/// Pending/visited URL sets with depth and page budgets
#[derive(Debug)]
pub struct UrlFrontier {
    max_depth: u32,
    max_pages: u32,
    pending: VecDeque<FrontierEntry>,
    queued: HashSet<String>,
    visited: HashSet<String>,
    dequeued: u32,
}

impl UrlFrontier {
    pub fn new(max_depth: u32, max_pages: u32) -> Self {
        Self {
            max_depth,
            max_pages,
            pending: VecDeque::new(),
            queued: HashSet::new(),
            visited: HashSet::new(),
            dequeued: 0,
        }
    }

    /// Queue `url` at `depth`.
    ///
    /// Returns `true` only if the URL was newly queued: URLs beyond the depth
    /// budget, already visited or already pending are ignored.
    pub fn enqueue(&mut self, url: &str, depth: u32) -> bool {
        if depth > self.max_depth {
            trace!("Depth {} exceeds budget for {}", depth, url);
            return false;
        }

        let key = canonicalize_url(url);
        if self.visited.contains(&key) || self.queued.contains(&key) {
            return false;
        }

        self.queued.insert(key.clone());
        self.pending.push_back(FrontierEntry {
            url: strip_fragment(url),
            key,
            depth,
        });
        true
    }

    /// Next URL to fetch, or `None` when empty or the page budget is spent
    pub fn next(&mut self) -> Option<FrontierEntry> {
        if self.budget_exhausted() {
            return None;
        }

        while let Some(entry) = self.pending.pop_front() {
            self.queued.remove(&entry.key);
            if self.visited.insert(entry.key.clone()) {
                self.dequeued += 1;
                return Some(entry);
            }
        }

        None
    }

    /// Mark a URL as visited; returns `true` if it was not visited before
    pub fn mark_visited(&mut self, url: &str) -> bool {
        self.visited.insert(canonicalize_url(url))
    }

    /// URLs dequeued so far
    pub fn dequeued(&self) -> u32 {
        self.dequeued
    }

    pub fn budget_exhausted(&self) -> bool {
        self.dequeued >= self.max_pages
    }
}

fn strip_fragment(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// Canonical form of a URL used as the dedup key.
///
/// Fragments are dropped and trailing slashes removed (the root path stays
/// `/`). Scheme and host case plus default ports are normalized by parsing.
/// Unparseable input is returned unchanged.
pub fn canonicalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);

            let path = parsed.path().trim_end_matches('/').to_string();
            if path.is_empty() {
                parsed.set_path("/");
            } else {
                parsed.set_path(&path);
            }

            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}
