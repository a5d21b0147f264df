//! Logs and diagnose output

use super::print_log_line;
use crate::ingest::{DiagnosticReport, LogsReport};

pub fn print_logs(report: &LogsReport) {
    println!("\n📜 Processing log for {} [{}]\n", report.source_id, report.status);

    if report.logs.is_empty() {
        println!("No log entries yet.");
    }
    for log in &report.logs {
        print!("{}  ", log.created_at);
        print_log_line(log);
    }

    let stats = &report.statistics;
    println!("\nStatistics:");
    println!("  Pages: {} ({} failed)", stats.total_pages, stats.failed_pages);
    println!("  Links found: {}", stats.total_links);
    println!("  Documents: {}", stats.total_documents);
    println!("  Success rate: {}%", stats.success_rate);
    if stats.in_progress {
        println!("  (processing has not finished)");
    }
}

pub fn print_diagnostics(report: &DiagnosticReport) {
    println!("\n🩺 Diagnostics for {}\n", report.source_id);
    println!("  Status: {}", report.status);
    println!(
        "  Last update: {} minute(s) ago{}",
        report.minutes_since_update,
        if report.is_stuck { " (stuck)" } else { "" }
    );
    println!(
        "  Documents: {} ({} with embeddings)",
        report.total_documents, report.documents_with_embeddings
    );

    if !report.recent_errors.is_empty() {
        println!("\nRecent errors:");
        for log in &report.recent_errors {
            print!("  ");
            print_log_line(log);
        }
    }

    if report.possible_issues.is_empty() {
        println!("\n✓ No issues found");
    } else {
        println!("\nPossible issues:");
        for issue in &report.possible_issues {
            println!("  - {}", issue);
        }
    }
}
