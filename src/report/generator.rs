//! Final run report generation.
//!
//! This module renders the terminal [`RunSummary`] as Markdown, JSON or CSV
//! and writes it next to the evidence log.

use crate::cli::OutputFormat;
use crate::models::{PairSummary, RunSummary, SourceReport};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Generate a complete Markdown report.
pub fn generate_markdown_report(summary: &RunSummary) -> String {
    let mut output = String::new();

    output.push_str("# Markerwatch Run Report\n\n");
    output.push_str(&generate_metadata_section(summary));
    output.push_str(&generate_pairs_section(&summary.pairs));
    output.push_str(&generate_sources_section(&summary.sources));
    output.push_str(&generate_alerts_section(summary));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(summary: &RunSummary) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Started:** {}\n",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Finished:** {}\n",
        summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        summary.duration_seconds
    ));
    section.push_str(&format!("- **Outcome:** {}\n", summary.outcome));
    section.push_str(&format!(
        "- **Observations:** {} ({} anomalous)\n",
        summary.total_observations(),
        summary.total_anomalous()
    ));
    section.push_str(&format!("- **Alerts:** {}\n", summary.alerts.len()));
    if let Some(ref error) = summary.error {
        section.push_str(&format!("- **Error:** {}\n", error));
    }
    section.push('\n');

    section
}

/// Generate the per-pair counts table.
fn generate_pairs_section(pairs: &[PairSummary]) -> String {
    let mut section = String::new();

    section.push_str("## Anomaly Counts\n\n");

    if pairs.is_empty() {
        section.push_str("No observations were recorded during this run.\n\n");
        return section;
    }

    section.push_str("| Identifier | Source | Observations | Anomalous | Rate |\n");
    section.push_str("|:---|:---|:---:|:---:|:---:|\n");
    for pair in pairs {
        section.push_str(&format!(
            "| `{}` | {} | {} | {} | {} |\n",
            pair.identifier,
            pair.source,
            pair.total,
            pair.anomalous,
            format_rate(pair)
        ));
    }
    section.push('\n');

    section
}

/// Generate the per-source activity table.
fn generate_sources_section(sources: &[SourceReport]) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Sources\n\n");
    section.push_str("| Source | Passes | Polls | Transport Errors | Status | Last Check |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|:---|\n");
    for source in sources {
        let last_check = source
            .last_check
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            source.name,
            source.passes_completed,
            source.polls,
            source.transport_errors,
            source.status,
            last_check
        ));
    }
    section.push('\n');

    section
}

/// Generate the alerts and packages section.
fn generate_alerts_section(summary: &RunSummary) -> String {
    let mut section = String::new();

    section.push_str("## Alerts\n\n");

    if summary.alerts.is_empty() {
        section.push_str("No anomaly rate crossed the alert threshold.\n\n");
        return section;
    }

    for alert in &summary.alerts {
        section.push_str(&format!(
            "- **{}** on {}: {:.1}% ({}/{}) at {}\n",
            alert.identifier,
            alert.source,
            alert.rate * 100.0,
            alert.anomalous_count,
            alert.total_count,
            alert.raised_at.format("%H:%M:%S")
        ));
    }
    section.push('\n');

    if !summary.packages.is_empty() {
        section.push_str("### Evidence Packages\n\n");
        for package in &summary.packages {
            section.push_str(&format!("- `{}`\n", package));
        }
        section.push('\n');
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    format!(
        "---\n\n*Report generated by markerwatch v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

fn format_rate(pair: &PairSummary) -> String {
    if pair.total == 0 {
        return "-".to_string();
    }
    format!("{:.1}%", pair.anomalous as f64 / pair.total as f64 * 100.0)
}

/// Generate a JSON report.
pub fn generate_json_report(summary: &RunSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).map_err(Into::into)
}

/// Generate a CSV report with one row per (identifier, source) pair.
pub fn generate_csv_report(summary: &RunSummary) -> String {
    let mut output = String::from("identifier,source,total,anomalous,rate,alerts\n");

    for pair in &summary.pairs {
        let alerts = summary
            .alerts
            .iter()
            .filter(|a| a.identifier == pair.identifier && a.source == pair.source)
            .count();
        let rate = if pair.total == 0 {
            String::new()
        } else {
            format!("{:.4}", pair.anomalous as f64 / pair.total as f64)
        };
        output.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_field(&pair.identifier),
            csv_field(&pair.source),
            pair.total,
            pair.anomalous,
            rate,
            alerts
        ));
    }

    output
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render the summary in `format`.
pub fn render(summary: &RunSummary, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Markdown => Ok(generate_markdown_report(summary)),
        OutputFormat::Json => generate_json_report(summary),
        OutputFormat::Csv => Ok(generate_csv_report(summary)),
    }
}

/// Write the summary to `dir` and return the report path.
pub fn write_summary(summary: &RunSummary, dir: &Path, format: OutputFormat) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(format!(
        "summary_{}.{}",
        summary.finished_at.format("%Y%m%d_%H%M%S"),
        format.extension()
    ));
    let content = render(summary, format)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;

    Ok(path)
}
