use std::fmt::Write;

use crate::engine::{ScanResult, ScanStatus};

/// Format styles supported in default reporter implementations.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Produce a report string from a `ScanResult` using the desired format.
///
/// The JSON form serializes the result directly; its field names are the
/// stable wire contract consumed by downstream tooling.
pub fn render_result(result: &ScanResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_human(result),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
    }
}

fn render_human(result: &ScanResult) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "Scan {} ({})", result.scan_id, status_label(result.status))?;
    writeln!(
        out,
        "Models: {}",
        join_or_dash(&result.summary.models_completed)
    )?;
    if !result.model_failures.is_empty() {
        writeln!(out, "Failed models:")?;
        for (model_id, reason) in &result.model_failures {
            writeln!(out, "  - {}: {}", model_id, sanitize_line(reason))?;
        }
    }
    writeln!(
        out,
        "Findings: {total} consensus ({critical} critical, {high} high, {medium} medium, {low} low)",
        total = result.summary.total_findings,
        critical = result.summary.critical,
        high = result.summary.high,
        medium = result.summary.medium,
        low = result.summary.low,
    )?;
    writeln!(out)?;

    if result.consensus_findings.is_empty() {
        writeln!(out, "No consensus findings.")?;
    } else {
        writeln!(out, "Consensus Findings:")?;
        for item in &result.consensus_findings {
            let finding = &item.finding;
            writeln!(
                out,
                "  - [{severity}] {name} ({cwe}) {file}:{start}-{end} :: confidence {confidence:.2}, models: {models}",
                severity = finding.severity.as_str(),
                name = finding.name,
                cwe = finding.cwe,
                file = finding.file,
                start = finding.start_line,
                end = finding.end_line,
                confidence = finding.confidence,
                models = item
                    .supporting_models
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            )?;
            if !finding.message.trim().is_empty() {
                writeln!(out, "    {}", sanitize_line(&finding.message))?;
            }
        }
    }

    writeln!(out)?;
    writeln!(out, "Per-Model Findings:")?;
    for (model_id, findings) in &result.per_model_findings {
        writeln!(out, "  - {:<24} {} finding(s)", model_id, findings.len())?;
    }

    Ok(out)
}

fn status_label(status: ScanStatus) -> &'static str {
    match status {
        ScanStatus::Running => "running",
        ScanStatus::Complete => "complete",
        ScanStatus::Aborted => "aborted",
    }
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn sanitize_line(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            _ => c,
        })
        .collect()
}
