//! Process and start commands

use crate::config::IngestOptions;
use crate::error::{Error, Result};
use crate::ingest::{IngestService, ProcessingResult, RunOutcome};
use crate::meta::{LogLevel, ProcessingLog};
use std::time::Duration;

/// Command-line overrides on top of the `[crawl]` defaults
#[derive(Debug, Clone, Default)]
pub struct CrawlOverrides {
    pub max_pages: Option<u32>,
    pub max_depth: Option<u32>,
    pub delay_ms: Option<u64>,
    pub no_embeddings: bool,
    pub ignore_robots: bool,
}

impl CrawlOverrides {
    pub fn apply(&self, base: IngestOptions) -> IngestOptions {
        IngestOptions {
            max_pages: self.max_pages.unwrap_or(base.max_pages),
            max_depth: self.max_depth.unwrap_or(base.max_depth),
            delay_ms: self.delay_ms.unwrap_or(base.delay_ms),
            generate_embeddings: base.generate_embeddings && !self.no_embeddings,
            respect_robots_txt: base.respect_robots_txt && !self.ignore_robots,
        }
    }
}

/// Crawl a source in the foreground
pub async fn cmd_process(
    service: &IngestService,
    source_id: &str,
    overrides: &CrawlOverrides,
) -> Result<ProcessingResult> {
    let options = overrides.apply(service.default_options());
    service.process(source_id, options).await
}

/// Start a crawl in the background and hand each new processing log entry
/// to `on_log` until the run ends
pub async fn cmd_start(
    service: &IngestService,
    source_id: &str,
    overrides: &CrawlOverrides,
    poll_interval: Duration,
    mut on_log: impl FnMut(&ProcessingLog),
) -> Result<ProcessingResult> {
    let options = overrides.apply(service.default_options());
    let mut handle = service.start_processing(source_id, options).await?;
    let mut seen = 0usize;

    let result = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            _ = tokio::time::sleep(poll_interval) => {
                seen = follow_logs(service, source_id, seen, &mut on_log).await?;
            }
        }
    };

    follow_logs(service, source_id, seen, &mut on_log).await?;

    result.map_err(|e| Error::Other(format!("processing task failed: {}", e)))
}

async fn follow_logs(
    service: &IngestService,
    source_id: &str,
    seen: usize,
    on_log: &mut impl FnMut(&ProcessingLog),
) -> Result<usize> {
    let report = service.get_logs(source_id).await?;
    for log in report.logs.iter().skip(seen) {
        on_log(log);
    }
    Ok(report.logs.len().max(seen))
}

pub fn print_log_line(log: &ProcessingLog) {
    let marker = match log.get_level() {
        Ok(LogLevel::Error) => "✗",
        Ok(LogLevel::Warn) => "!",
        _ => "·",
    };
    match &log.url {
        Some(url) => println!("{} [{}] {} ({})", marker, log.step, log.message, url),
        None => println!("{} [{}] {}", marker, log.step, log.message),
    }
}

pub fn print_processing_result(result: &ProcessingResult) {
    match result.outcome {
        RunOutcome::Completed => println!("\n✓ Processing complete"),
        RunOutcome::Failed => println!("\n✗ Processing failed"),
        RunOutcome::Cancelled => println!("\n! Processing cancelled"),
    }
    println!("  Source: {}", result.source_id);
    println!("  Run: {}", result.run_id);
    println!("  Pages crawled: {}", result.pages_crawled);
    println!("  Pages failed: {}", result.pages_failed);
    println!("  Links found: {}", result.links_found);
    println!(
        "  Documents: {} ({} embedded)",
        result.documents_created, result.documents_embedded
    );
    if let Some(error) = &result.error {
        println!("  Error: {}", error);
    }
}
