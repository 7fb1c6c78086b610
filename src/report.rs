use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::CredentialAvailability,
    evaluator::Strictness,
    suite::{AuthClass, Method, Placeholders, Suite},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

/// Result of one descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub method: Method,
    pub path: String,
    pub auth: AuthClass,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
        }
        self.total += 1;
    }

    /// `passed / total * 100`, or 0 for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64 * 100.0
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub base_url: String,
    pub strictness: Strictness,
    pub credentials: CredentialAvailability,
    pub records: Vec<TestRecord>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn new(
        base_url: impl Into<String>,
        strictness: Strictness,
        credentials: CredentialAvailability,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            base_url: base_url.into(),
            strictness,
            credentials,
            records: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn push(&mut self, record: TestRecord) {
        self.summary.record(record.outcome);
        self.records.push(record);
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
        let rendered = serde_json::to_string_pretty(self).context("serializing report")?;
        fs::write(path, rendered)
            .with_context(|| format!("writing report to {}", path.display()))?;
        Ok(())
    }
}

pub fn print_header(base_url: &str, total: usize, strictness: Strictness) {
    println!(
        "{} {} endpoints against {} {}",
        "Testing".bold(),
        total,
        base_url.cyan(),
        format!("({strictness})").dimmed()
    );
}

pub fn print_credentials(availability: CredentialAvailability) {
    for (role, available) in [("user", availability.user), ("admin", availability.admin)] {
        if available {
            println!("  {} {} token acquired", "✔".green(), role);
        } else {
            println!(
                "  {} {} token unavailable, {} tests will be skipped",
                "-".yellow(),
                role,
                role
            );
        }
    }
    println!("{}", "-".repeat(50).dimmed());
}

pub fn print_record(record: &TestRecord) {
    let status = record
        .status
        .map(|code| format!(" {code}"))
        .unwrap_or_default();
    match record.outcome {
        Outcome::Passed => {
            println!("{} {}{}", "✔".green(), record.name, status.green());
            if let Some(warning) = &record.message {
                println!("    {} {}", "warning:".yellow(), warning);
            }
        }
        Outcome::Failed => {
            println!("{} {}{}", "✘".red(), record.name.bold(), status.red());
            if let Some(message) = &record.message {
                println!("    {}", message.dimmed());
            }
        }
        Outcome::Skipped => {
            let reason = record.message.as_deref().unwrap_or("skipped");
            println!(
                "{} {} {}",
                "-".yellow(),
                record.name,
                format!("({reason})").dimmed()
            );
        }
    }
}

pub fn print_summary(summary: &RunSummary) {
    println!("{}", "-".repeat(50).dimmed());
    println!("{}", "Results".bold());
    println!("  {} {}", "passed: ".green(), summary.passed);
    println!("  {} {}", "failed: ".red(), summary.failed);
    println!("  {} {}", "skipped:".yellow(), summary.skipped);
    println!("  {} {}", "total:  ".bold(), summary.total);
    println!("  success rate: {}", format_rate(summary));
    if summary.is_success() {
        println!("{}", "All tests passed".green().bold());
    } else {
        println!("{}", format!("{} tests failed", summary.failed).red().bold());
    }
}

/// Lists descriptors without sending anything. Paths whose placeholders
/// cannot be filled are shown as templates and flagged.
pub fn print_descriptor_list(suite: &Suite, placeholders: &Placeholders) {
    for endpoint in suite.endpoints() {
        let path = match endpoint.render_path(placeholders) {
            Ok(path) => path.normal(),
            Err(_) => format!("{} (unresolved)", endpoint.path_template).red(),
        };
        let auth = match endpoint.auth {
            AuthClass::None => String::new(),
            class => format!(" [{class}]"),
        };
        println!(
            "{:<7}{}{} {}  {}",
            endpoint.method.as_str().bold(),
            path,
            auth.yellow(),
            format!("expect {}", endpoint.expected).dimmed(),
            endpoint.name
        );
    }
    println!("{} endpoints", suite.len());
}

pub fn format_rate(summary: &RunSummary) -> String {
    format!("{:.1}%", summary.success_rate())
}
