//! Log statistics and source diagnostics

use crate::meta::{KnowledgeSource, ProcessingLog, SourceStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log steps written by the crawl orchestrator
pub mod steps {
    pub const PROCESSING_STARTED: &str = "processing_started";
    pub const PAGE_CRAWLED: &str = "page_crawled";
    pub const PAGE_CRAWL_FAILED: &str = "page_crawl_failed";
    pub const DUPLICATE_PAGE: &str = "duplicate_page";
    pub const SEED_CRAWL_FAILED: &str = "seed_crawl_failed";
    pub const LINK_FOUND: &str = "link_found";
    pub const EXTRACTION_FAILED: &str = "extraction_failed";
    pub const EMBEDDING_FAILED: &str = "embedding_failed";
    pub const EMBEDDING_UNAVAILABLE: &str = "embedding_unavailable";
    pub const NO_DOCUMENTS_CREATED: &str = "no_documents_created";
    pub const PROCESSING_COMPLETED: &str = "processing_completed";
    pub const PROCESSING_FAILED: &str = "processing_failed";
    pub const PROCESSING_CANCELLED: &str = "processing_cancelled";
    pub const STATUS_RESET: &str = "status_reset";
}

/// Aggregate view over the processing log of one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatistics {
    pub total_documents: i64,
    pub total_pages: i64,
    pub total_links: i64,
    pub failed_pages: i64,
    /// Percentage with one decimal, `"0"` when no page was attempted
    pub success_rate: String,
    /// Set while the source has not reached a terminal status
    pub in_progress: bool,
}

impl LogStatistics {
    pub fn from_step_counts(
        counts: &HashMap<String, i64>,
        total_documents: i64,
        status: SourceStatus,
    ) -> Self {
        let count = |step: &str| counts.get(step).copied().unwrap_or(0);

        let failed_pages = count(steps::PAGE_CRAWL_FAILED) + count(steps::SEED_CRAWL_FAILED);
        let total_pages = count(steps::PAGE_CRAWLED) + failed_pages;

        Self {
            total_documents,
            total_pages,
            total_links: count(steps::LINK_FOUND),
            failed_pages,
            success_rate: success_rate(total_pages, failed_pages),
            in_progress: !status.is_terminal(),
        }
    }
}

/// `(total - failed) / total * 100` formatted with one decimal
pub fn success_rate(total_pages: i64, failed_pages: i64) -> String {
    if total_pages <= 0 {
        return "0".to_string();
    }
    let succeeded = (total_pages - failed_pages).max(0) as f64;
    format!("{:.1}", succeeded / total_pages as f64 * 100.0)
}

/// Logs of a source together with their statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsReport {
    pub source_id: String,
    pub status: SourceStatus,
    pub logs: Vec<ProcessingLog>,
    pub statistics: LogStatistics,
}

/// Health report for a single source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub source_id: String,
    pub status: SourceStatus,
    pub is_stuck: bool,
    pub minutes_since_update: i64,
    pub total_documents: i64,
    pub documents_with_embeddings: i64,
    pub recent_errors: Vec<ProcessingLog>,
    pub possible_issues: Vec<String>,
}

/// Inputs to [`possible_issues`]
pub struct IssueContext<'a> {
    pub source: &'a KnowledgeSource,
    pub status: SourceStatus,
    pub is_stuck: bool,
    pub minutes_since_update: i64,
    pub total_documents: i64,
    pub recent_errors: usize,
    pub embedding_key_env: Option<&'a str>,
}

/// Human-readable hints about why a source may not be working
pub fn possible_issues(ctx: &IssueContext<'_>) -> Vec<String> {
    let mut issues = Vec::new();

    if ctx.is_stuck {
        issues.push(format!(
            "Processing has not made progress for {} minutes; the crawl may have died. \
             Reset the status and start processing again.",
            ctx.minutes_since_update
        ));
    }

    if ctx.status != SourceStatus::Pending && ctx.total_documents == 0 {
        issues.push(format!(
            "No documents have been created yet for {}",
            ctx.source.url
        ));
    }

    if let Some(env) = ctx.embedding_key_env {
        issues.push(format!(
            "Embedding API key is not configured (set ${}); documents are stored without embeddings",
            env
        ));
    }

    if ctx.recent_errors > 0 {
        issues.push(format!(
            "{} recent crawl error(s); see the processing logs",
            ctx.recent_errors
        ));
    }

    issues
}
