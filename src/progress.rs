//! Progress reporting and terminal output
//!
//! Provides the import spinner plus the header, summary and result-table
//! blocks printed by the CLI.

use crate::ingest::{ImportSummary, ProgressSnapshot};
use crate::query::{QueryDef, TableRow, QUERY_CATALOG};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Widest cell printed in a result table
const MAX_CELL_WIDTH: usize = 60;

/// Progress reporter that displays import status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,

    /// Start of the run, for the rate
    start: Instant,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            start: Instant::now(),
        }
    }

    /// Update the progress display
    pub fn update(&self, progress: &ProgressSnapshot) {
        let secs = self.start.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            progress.lines_read as f64 / secs
        } else {
            0.0
        };

        let msg = format!(
            "Lines: {} | Written: {} | Rejected: {} | Rate: {:.0}/s",
            format_number(progress.lines_read),
            format_number(progress.records_written),
            format_number(progress.lines_rejected),
            rate,
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a header at the start of an import
pub fn print_header(source: &str, source_size: Option<u64>, backend: &str, target: &str, workers: usize) {
    println!();
    println!("{} {}", style("logsift").cyan().bold(), env!("CARGO_PKG_VERSION"));
    println!("{}", style("─".repeat(50)).dim());
    match source_size {
        Some(size) => println!("  {} {} ({})", style("Source:").bold(), source, format_size(size, BINARY)),
        None => println!("  {} {}", style("Source:").bold(), source),
    }
    println!("  {} {}", style("Backend:").bold(), backend);
    println!("  {} {}", style("Target:").bold(), target);
    println!("  {} {}", style("Workers:").bold(), workers);
    println!();
}

/// Print a summary of the import
pub fn print_summary(summary: &ImportSummary, destination: &str, db_size: Option<u64>) {
    let title = if summary.completed {
        style("Import Complete").green().bold()
    } else {
        style("Import Interrupted").yellow().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Lines read:").bold(), format_number(summary.lines_read));
    println!("  {} {}", style("Records written:").bold(), format_number(summary.records_written));
    if summary.lines_rejected > 0 {
        let reasons = summary
            .rejected_by_reason
            .iter()
            .map(|(reason, count)| format!("{} {}", format_number(*count), reason))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {} {} ({})",
            style("Lines rejected:").yellow().bold(),
            format_number(summary.lines_rejected),
            reasons
        );
    }
    if summary.records_failed > 0 {
        println!(
            "  {} {}",
            style("Write failures:").red().bold(),
            format_number(summary.records_failed)
        );
        if let Some(first) = summary.errors.first() {
            println!("  {} record {}: {}", style("First failure:").dim(), first.sequence, first.error);
        }
    }
    println!(
        "  {} {:.1}s ({:.0} lines/sec)",
        style("Duration:").bold(),
        summary.duration.as_secs_f64(),
        summary.lines_per_second()
    );
    match db_size {
        Some(size) => println!(
            "  {} {} ({})",
            style("Destination:").bold(),
            destination,
            format_size(size, BINARY)
        ),
        None => println!("  {} {}", style("Destination:").bold(), destination),
    }
    println!();
}

/// Print rows as an aligned table, labelled by column name
pub fn print_table<T: TableRow>(rows: &[T]) {
    let headers = T::headers();
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            row.cells()
                .into_iter()
                .zip(headers)
                .map(|(cell, header)| format_cell(header, cell))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &body {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header_line = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{:<w$}", h, w = *w))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", style(header_line.trim_end()).bold());
    println!("{}", style("─".repeat(widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1))).dim());

    for row in &body {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:<w$}", cell, w = *w))
            .collect::<Vec<_>>()
            .join("  ");
        println!("{}", line.trim_end());
    }

    println!();
    println!("{} {}", style("Rows:").dim(), format_number(rows.len() as u64));
}

/// Print the query catalog grouped by category
pub fn print_catalog() {
    let mut category = None;
    for query in QUERY_CATALOG {
        if category != Some(query.category) {
            category = Some(query.category);
            println!();
            println!("{}", style(query.category.label()).cyan().bold());
        }
        print_query(query);
    }
    println!();
}

fn print_query(query: &QueryDef) {
    println!("  {:<20} {}", style(query.id).bold(), query.description);
    for param in query.params {
        let default = param.default.map(|d| format!(" [default: {}]", d)).unwrap_or_default();
        println!("      {:<16} {}{}", param.name, style(param.description).dim(), default);
    }
}

fn format_cell(header: &str, cell: String) -> String {
    if header == "count" {
        if let Ok(n) = cell.parse::<u64>() {
            return format_number(n);
        }
    }
    if cell.chars().count() > MAX_CELL_WIDTH {
        let mut cut: String = cell.chars().take(MAX_CELL_WIDTH - 1).collect();
        cut.push('…');
        return cut;
    }
    cell
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_format_cell() {
        assert_eq!(format_cell("count", "12345".to_string()), "12,345");
        assert_eq!(format_cell("status_code", "12345".to_string()), "12345");

        let long = "x".repeat(100);
        let cut = format_cell("user_agent", long);
        assert_eq!(cut.chars().count(), MAX_CELL_WIDTH);
        assert!(cut.ends_with('…'));
    }
}
