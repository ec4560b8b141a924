//! Report command: aggregate recorded work over a UTC day, week or month.
//!
//! Reads the database directly, so it works whether or not the daemon is
//! running. Only closed and active blocks already persisted are counted.

use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::Serialize;
use wh_core::WorkSummary;
use wh_db::Database;

use crate::api::utc_day_range;

/// Report period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day(NaiveDate),
    /// The Monday-to-Sunday week containing the date.
    Week(NaiveDate),
    /// The calendar month containing the date.
    Month(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Month,
    Week,
    Day,
}

impl Period {
    pub const fn period_type(self) -> PeriodType {
        match self {
            Self::Day(_) => PeriodType::Day,
            Self::Week(_) => PeriodType::Week,
            Self::Month(_) => PeriodType::Month,
        }
    }

    /// First and last day covered, both inclusive.
    pub fn days(self) -> (NaiveDate, NaiveDate) {
        match self {
            Self::Day(date) => (date, date),
            Self::Week(date) => {
                let monday =
                    date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                (monday, monday + Duration::days(6))
            }
            Self::Month(date) => {
                let first = date - Duration::days(i64::from(date.day0()));
                let last = first
                    .checked_add_months(Months::new(1))
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(date);
                (first, last)
            }
        }
    }

    pub fn bounds(self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (first, last) = self.days();
        utc_day_range(first, last)
    }
}

// ========== Duration Formatting ==========

/// Formats seconds as "Xh Ym" (at least an hour) or "Xm".
/// Negative durations are shown as 0m.
pub fn format_duration(seconds: i64) -> String {
    if seconds < 0 {
        return "0m".to_string();
    }
    let total_minutes = seconds / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

// ========== Progress Bar ==========

/// Generates a 10-character progress bar.
/// Values <5% of max get a single block for visibility.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn progress_bar(value: i64, max: i64) -> String {
    if max <= 0 {
        return "░░░░░░░░░░".to_string();
    }

    let ratio = value as f64 / max as f64;
    let filled = if ratio < 0.05 && value > 0 {
        1
    } else {
        (ratio * 10.0).round().clamp(0.0, 10.0) as usize
    };

    let empty = 10 - filled;
    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

fn plural(count: u64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

// ========== Rendering ==========

fn format_period_description(period: Period) -> String {
    let (first, _) = period.days();
    match period {
        Period::Week(_) => format!("Week of {}", first.format("%b %-d, %Y")),
        Period::Month(_) => first.format("%B %Y").to_string(),
        Period::Day(_) => first.format("%A, %b %-d, %Y").to_string(),
    }
}

/// Formats the human-readable report.
pub fn format_report(period: Period, summary: &WorkSummary) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "WORK REPORT: {} (UTC)",
        format_period_description(period)
    );

    if summary.projects.is_empty() {
        let period_word = match period.period_type() {
            PeriodType::Month => "month",
            PeriodType::Week => "week",
            PeriodType::Day => "day",
        };
        let _ = writeln!(output);
        let _ = writeln!(output, "No work recorded this {period_word}.");
        if summary.excluded_work_blocks > 0 {
            let _ = writeln!(
                output,
                "{} excluded for implausible boundaries.",
                plural(summary.excluded_work_blocks, "work block", "work blocks")
            );
        }
        let _ = writeln!(output);
        let _ = writeln!(output, "Hint: Run 'wh status' to check the daemon.");
        return output;
    }

    let max_project = summary
        .projects
        .iter()
        .map(|p| p.work_seconds)
        .max()
        .unwrap_or(0);

    let _ = writeln!(output);
    let _ = writeln!(output, "BY PROJECT");
    let _ = writeln!(output, "──────────");
    for project in &summary.projects {
        let _ = writeln!(
            output,
            "{:<28}{:>8}  {}  ({}, {})",
            project.project_name,
            format_duration(project.work_seconds),
            progress_bar(project.work_seconds, max_project),
            plural(project.work_blocks, "block", "blocks"),
            plural(project.activity_count, "activity", "activities"),
        );
    }

    if period.period_type() != PeriodType::Day {
        let _ = writeln!(output);
        let _ = writeln!(output, "BY DAY");
        let _ = writeln!(output, "──────");
        for day in &summary.days {
            let _ = writeln!(
                output,
                "{:<28}{:>8}",
                day.date.format("%a %b %-d").to_string(),
                format_duration(day.work_seconds),
            );
        }
    }

    if !summary.activity_histogram.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "ACTIVITY");
        let _ = writeln!(output, "────────");
        let counts: Vec<String> = summary
            .activity_histogram
            .iter()
            .map(|(activity, count)| format!("{activity}: {count}"))
            .collect();
        let _ = writeln!(output, "{}", counts.join(", "));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "SUMMARY");
    let _ = writeln!(output, "───────");
    let _ = writeln!(
        output,
        "Total worked:   {}",
        format_duration(summary.total_work_seconds)
    );
    let _ = writeln!(output, "Sessions:       {}", summary.session_count);
    let _ = writeln!(output, "Work blocks:    {}", summary.work_block_count);
    if summary.excluded_work_blocks > 0 {
        let _ = writeln!(
            output,
            "Excluded:       {} (implausible boundaries)",
            plural(summary.excluded_work_blocks, "block", "blocks")
        );
    }

    output
}

// ========== JSON Output ==========

#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub generated_at: String,
    pub period: JsonPeriod,
    #[serde(flatten)]
    pub summary: &'a WorkSummary,
}

#[derive(Debug, Serialize)]
pub struct JsonPeriod {
    pub start: String,
    pub end: String,
    #[serde(rename = "type")]
    pub period_type: PeriodType,
}

pub fn format_report_json(
    period: Period,
    summary: &WorkSummary,
    generated_at: DateTime<Utc>,
) -> Result<String> {
    let (first, last) = period.days();
    let report = JsonReport {
        generated_at: generated_at.to_rfc3339(),
        period: JsonPeriod {
            start: first.format("%Y-%m-%d").to_string(),
            end: last.format("%Y-%m-%d").to_string(),
            period_type: period.period_type(),
        },
        summary,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

// ========== Public Interface ==========

pub fn run(database_path: &Path, period: Period, json: bool) -> Result<()> {
    let db = Database::open(database_path)
        .with_context(|| format!("failed to open {}", database_path.display()))?;
    let (start, end) = period
        .bounds()
        .context("report period is outside the supported calendar")?;
    let summary = db.summarize(start, end)?;

    if json {
        println!("{}", format_report_json(period, &summary, Utc::now())?);
    } else {
        print!("{}", format_report(period, &summary));
    }
    Ok(())
}
