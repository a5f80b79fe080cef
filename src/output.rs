//! Human-readable rendering of an analysis report.

use std::fmt::Write as _;

use colored::{ColoredString, Colorize};

use crate::bucketing::format_wall_clock;
use crate::model::{FlaggedEvent, FlaggedRecord, OperatorScore, RiskLevel};
use crate::pipeline::AnalysisReport;
use crate::rules::RuleFailure;
use crate::scoring::breakdown::{DeviceScore, LocationActivity};

fn risk_label(level: RiskLevel) -> ColoredString {
    let text = level.to_string();
    match level {
        RiskLevel::High => text.red().bold(),
        RiskLevel::Medium => text.yellow(),
        RiskLevel::Low => text.green(),
    }
}

/// Left-aligned plain-text table. Widths count escape codes too, so colored
/// cells only go in the last column.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }
    let mut out = String::new();
    let line = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let _ = writeln!(out, "{}", line(headers.iter().map(|h| h.to_string()).collect()).bold());
    for row in rows {
        let _ = writeln!(out, "{}", line(row.clone()));
    }
    out
}

fn section(title: &str) -> String {
    format!("\n{}\n", title.cyan().bold())
}

pub fn render_scores(scores: &[OperatorScore], strategy: &str) -> String {
    let rows: Vec<Vec<String>> = scores
        .iter()
        .map(|s| {
            vec![
                s.operator_id.clone(),
                s.total_tests.to_string(),
                s.flagged_events.to_string(),
                s.rule_flags.to_string(),
                format!("{:.2}", s.suspicion_score),
                risk_label(s.risk_level).to_string(),
            ]
        })
        .collect();
    let mut out = section(&format!("Operator risk ({strategy})"));
    out.push_str(&table(
        &["Operator", "Tests", "Flagged", "Rules", "Score", "Risk"],
        &rows,
    ));
    out
}

pub fn render_flagged(events: &[&FlaggedEvent]) -> String {
    let rows: Vec<Vec<String>> = events
        .iter()
        .filter(|e| e.is_flagged())
        .map(|e| {
            vec![
                e.event.event_id.to_string(),
                format_wall_clock(&e.event.timestamp),
                e.event.operator_id.clone(),
                e.event.device_id.clone(),
                e.event.barcode.clone().unwrap_or_default(),
                e.event.location.clone().unwrap_or_default(),
                e.flags
                    .raised()
                    .map(|f| -> &str { f.column() })
                    .chain(e.rules.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(","),
            ]
        })
        .collect();
    let mut out = section(&format!("Flagged events ({})", rows.len()));
    out.push_str(&table(
        &["Event", "Timestamp", "Operator", "Device", "Barcode", "Location", "Flags"],
        &rows,
    ));
    out
}

pub fn render_records(records: &[&FlaggedRecord]) -> String {
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.event_id.to_string(),
                r.label.clone(),
                r.detail.clone().unwrap_or_default(),
            ]
        })
        .collect();
    let mut out = section(&format!("Records ({})", rows.len()));
    out.push_str(&table(&["Event", "Flag", "Detail"], &rows));
    out
}

pub fn render_devices(devices: &[DeviceScore]) -> String {
    let rows: Vec<Vec<String>> = devices
        .iter()
        .map(|d| {
            vec![
                d.device_id.clone(),
                d.total_tests.to_string(),
                d.flagged_events.to_string(),
                d.distinct_operators.to_string(),
                d.shared_key_flags.to_string(),
                format!("{:.2}", d.device_risk_score),
            ]
        })
        .collect();
    let mut out = section("Device risk");
    out.push_str(&table(
        &["Device", "Tests", "Flagged", "Operators", "Shared", "Score"],
        &rows,
    ));
    out
}

pub fn render_locations(locations: &[LocationActivity]) -> String {
    let rows: Vec<Vec<String>> = locations
        .iter()
        .map(|l| {
            vec![
                l.location.clone(),
                l.events.to_string(),
                l.flagged_events.to_string(),
                l.distinct_operators.to_string(),
                l.distinct_devices.to_string(),
            ]
        })
        .collect();
    let mut out = section("Location activity");
    out.push_str(&table(
        &["Location", "Events", "Flagged", "Operators", "Devices"],
        &rows,
    ));
    out
}

pub fn render_sessions(report: &AnalysisReport) -> String {
    let rows: Vec<Vec<String>> = report
        .sessions
        .iter()
        .filter(|s| s.flagged_events > 0 || s.distinct_operators > 1)
        .map(|s| {
            vec![
                s.session_id.clone(),
                s.event_count.to_string(),
                s.distinct_operators.to_string(),
                s.flagged_events.to_string(),
            ]
        })
        .collect();
    let mut out = section(&format!(
        "Sessions of interest ({} of {})",
        rows.len(),
        report.sessions.len()
    ));
    out.push_str(&table(&["Session", "Events", "Operators", "Flagged"], &rows));
    out
}

pub fn render_failures(failures: &[RuleFailure]) -> String {
    let mut out = String::new();
    for failure in failures {
        let _ = writeln!(
            out,
            "{} rule '{}' failed: {}",
            "warning:".yellow().bold(),
            failure.rule,
            failure.message
        );
    }
    out
}

/// The full human report for a filtered view.
pub fn render_report(
    report: &AnalysisReport,
    events: &[&FlaggedEvent],
    records: &[&FlaggedRecord],
) -> String {
    let mut out = format!(
        "{} events analyzed, {} flagged, {} records\n",
        report.flagged_events.len(),
        report.flagged_count(),
        report.records.len()
    );
    out.push_str(&render_scores(&report.operator_scores, &report.strategy));
    out.push_str(&render_flagged(events));
    out.push_str(&render_records(records));
    out.push_str(&render_devices(&report.device_scores));
    out.push_str(&render_locations(&report.locations));
    out.push_str(&render_sessions(report));
    if !report.rule_failures.is_empty() {
        out.push('\n');
        out.push_str(&render_failures(&report.rule_failures));
    }
    out
}
