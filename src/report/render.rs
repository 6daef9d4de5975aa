//! Summary renderers: pretty JSON for machines, a fixed-width table for
//! terminals.

use std::fmt::Write;

use super::summary::{CategoryAverage, Summary};

/// Machine-readable rendering
pub fn render_json(summary: &Summary) -> serde_json::Result<String> {
    serde_json::to_string_pretty(summary)
}

/// Human-readable rendering
pub fn render_text(summary: &Summary) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(out, "Audit summary");
    let _ = writeln!(out, "{}", "-".repeat(40));
    let _ = writeln!(out, "{:<20} {:>10}", "Total", summary.total_tests);
    let _ = writeln!(out, "{:<20} {:>10}", "Passed", summary.passed_tests);
    let _ = writeln!(out, "{:<20} {:>10}", "Failed", summary.failed_tests);
    let _ = writeln!(out, "{:<20} {:>10}", "From cache", summary.cached_tests);
    let _ = writeln!(
        out,
        "{:<20} {:>10}",
        "Elapsed",
        format!("{:.1}s", summary.elapsed_ms as f64 / 1000.0)
    );

    if !summary.average_scores.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{:<20} {:>10}", "CATEGORY", "AVERAGE");
        let _ = writeln!(out, "{}", "-".repeat(40));
        for (category, average) in &summary.average_scores {
            let value = match average {
                CategoryAverage::Mean(mean) => format!("{:.1}", mean),
                CategoryAverage::NoData => "no data".to_string(),
            };
            let _ = writeln!(out, "{:<20} {:>10}", category, value);
        }
    }

    if !summary.failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Failures:");
        for failure in &summary.failures {
            let _ = writeln!(
                out,
                "  {} [{}] {}",
                failure.target, failure.kind, failure.message
            );
        }
    }

    out
}
