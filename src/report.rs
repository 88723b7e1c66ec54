use std::fmt::Write;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{RiskItem, RiskKind, RiskKindSummary, StudentRiskReport};
use crate::risk;

pub fn summarize_by_kind(reports: &[StudentRiskReport]) -> Vec<RiskKindSummary> {
    let mut summaries: Vec<RiskKindSummary> = [RiskKind::Absenteeism, RiskKind::Academic]
        .into_iter()
        .map(|kind| RiskKindSummary {
            kind,
            count: reports
                .iter()
                .filter(|report| report.assessment.risks.iter().any(|risk| risk.kind == kind))
                .count(),
        })
        .filter(|summary| summary.count > 0)
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

fn kind_label(kind: RiskKind) -> &'static str {
    match kind {
        RiskKind::Absenteeism => "absenteeism",
        RiskKind::Academic => "academic",
    }
}

fn describe_risk(risk: &RiskItem) -> String {
    let mut line = format!("{} ({})", risk.label, kind_label(risk.kind));
    if let Some(details) = &risk.details {
        let pairs: Vec<String> = details
            .iter()
            .map(|alert| {
                format!(
                    "{}: {} then {}",
                    alert.subject, alert.prev_note, alert.last_note
                )
            })
            .collect();
        let _ = write!(line, " [{}]", pairs.join("; "));
    }
    line
}

fn class_label(report: &StudentRiskReport) -> &str {
    report
        .student
        .class_name
        .as_deref()
        .unwrap_or("no class")
}

/// Header name for a school: its stored name, or its id when unnamed.
pub fn school_label(school_id: Uuid, name: Option<&str>) -> String {
    match name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => format!("school id {school_id}"),
    }
}

/// Markdown rendering of the admin Sentinelle listing. `reports` is expected
/// to be ranked and filtered already.
pub fn build_school_report(
    school: &str,
    now: DateTime<Utc>,
    reports: &[StudentRiskReport],
    limit: usize,
) -> String {
    let summaries = summarize_by_kind(reports);
    let mut output = String::new();

    let _ = writeln!(output, "# Sentinelle Risk Report");
    let _ = writeln!(
        output,
        "Generated for {} (absences since {})",
        school,
        risk::window_start(now).date_naive()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No students at risk.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} students",
                kind_label(summary.kind),
                summary.count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students At Risk");

    if reports.is_empty() {
        let _ = writeln!(output, "No students at risk.");
    } else {
        for report in reports.iter().take(limit) {
            let risks: Vec<String> = report.assessment.risks.iter().map(describe_risk).collect();
            let _ = writeln!(
                output,
                "- {} ({}, {}) {} recent absences: {}",
                report.student.name,
                report.student.matricule,
                class_label(report),
                report.assessment.recent_absences,
                risks.join(", ")
            );
        }
        if reports.len() > limit {
            let _ = writeln!(output, "- ... and {} more", reports.len() - limit);
        }
    }

    output
}

/// Markdown rendering of the public single-student lookup.
pub fn build_student_summary(report: &StudentRiskReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {}", report.student.name);
    let _ = writeln!(
        output,
        "Matricule {} in {}",
        report.student.matricule,
        class_label(report)
    );
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Recent absences (last {} days): {}",
        risk::RECENT_ABSENCE_WINDOW_DAYS,
        report.assessment.recent_absences
    );

    if report.assessment.is_at_risk {
        let _ = writeln!(output, "Status: at risk");
        for item in &report.assessment.risks {
            let _ = writeln!(output, "- {}", describe_risk(item));
        }
    } else {
        let _ = writeln!(output, "Status: no risk detected");
    }

    output
}

pub fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
