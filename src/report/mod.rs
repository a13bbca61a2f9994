// Module: Report
// Writes the execution report to disk, one file per requested format.

use crate::protocol::{CaseStatus, ExecutionReport};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    Json,
    Markdown,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "markdown" | "md" => Some(Self::Markdown),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Renders the report in each format and returns format name to
    /// written path. Files are named by suite id and run id.
    pub fn generate(
        &self,
        report: &ExecutionReport,
        formats: &[ReportFormat],
    ) -> Result<HashMap<String, PathBuf>> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("failed to create report dir: {}", self.output_dir.display())
        })?;

        let mut written = HashMap::new();
        for format in formats {
            let path = self.output_dir.join(format!(
                "{}_{}.{}",
                report.suite_id,
                report.run_id,
                format.extension()
            ));
            let contents = match format {
                ReportFormat::Json => serde_json::to_string_pretty(report)
                    .context("failed to serialize report to JSON")?,
                ReportFormat::Markdown => render_markdown(report),
            };
            fs::write(&path, contents)
                .with_context(|| format!("failed to write report: {}", path.display()))?;
            info!(path = %path.display(), "report written");
            written.insert(format.extension().to_string(), path);
        }
        Ok(written)
    }
}

fn render_markdown(report: &ExecutionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Test Report: {}", report.suite_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Run: `{}`", report.run_id);
    let _ = writeln!(out, "- Started: {}", report.started_at);
    let _ = writeln!(out, "- Finished: {}", report.finished_at);
    let _ = writeln!(
        out,
        "- Result: {}/{} passed ({:.1}%)",
        report.summary.passed, report.summary.total, report.summary.success_rate
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "| Test | Status | Duration | Detail |");
    let _ = writeln!(out, "|------|--------|----------|--------|");
    for result in &report.results {
        let status = match result.status {
            CaseStatus::Passed => "PASS",
            CaseStatus::Failed => "FAIL",
            CaseStatus::Skipped => "SKIP",
        };
        let detail = result
            .error
            .clone()
            .or_else(|| {
                result
                    .validations
                    .iter()
                    .find(|v| !v.success)
                    .map(|v| v.message.clone())
            })
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "| {} | {} | {}ms | {} |",
            result.test_name,
            status,
            result.duration_ms,
            detail.replace('|', "\\|").replace('\n', " ")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ExecutionResult, RunSummary};
    use crate::validators::ValidationResult;

    fn sample_report() -> ExecutionReport {
        let mut success_map = HashMap::new();
        success_map.insert("create_database_basic".to_string(), true);
        success_map.insert("delete_database_missing".to_string(), false);
        ExecutionReport {
            run_id: uuid::Uuid::new_v4(),
            suite_id: "glue-smoke".to_string(),
            started_at: "2025-01-01T00:00:00Z".to_string(),
            finished_at: "2025-01-01T00:01:00Z".to_string(),
            summary: RunSummary::from_success_map(&success_map),
            success_map,
            results: vec![
                ExecutionResult {
                    test_name: "create_database_basic".to_string(),
                    status: CaseStatus::Passed,
                    success: true,
                    validations: vec![ValidationResult::pass("Text and count match")],
                    error: None,
                    duration_ms: 120,
                },
                ExecutionResult {
                    test_name: "delete_database_missing".to_string(),
                    status: CaseStatus::Failed,
                    success: false,
                    validations: vec![ValidationResult::fail("Expected string 'gone' not found")],
                    error: None,
                    duration_ms: 80,
                },
            ],
        }
    }

    #[test]
    fn test_generate_writes_both_formats() {
        let dir = std::env::temp_dir().join(format!("harness-reports-{}", uuid::Uuid::new_v4()));
        let generator = ReportGenerator::new(&dir);
        let written = generator
            .generate(&sample_report(), &[ReportFormat::Json, ReportFormat::Markdown])
            .unwrap();

        assert_eq!(written.len(), 2);
        let json = fs::read_to_string(&written["json"]).unwrap();
        assert!(json.contains("\"suite_id\": \"glue-smoke\""));
        let md = fs::read_to_string(&written["md"]).unwrap();
        assert!(md.contains("# Test Report: glue-smoke"));
        assert!(md.contains("| create_database_basic | PASS |"));
        assert!(md.contains("| delete_database_missing | FAIL |"));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_markdown_escapes_pipes_in_detail() {
        let mut report = sample_report();
        report.results[1].validations[0].message = "bad | value".to_string();
        let md = render_markdown(&report);
        assert!(md.contains("bad \\| value"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ReportFormat::parse("json"), Some(ReportFormat::Json));
        assert_eq!(ReportFormat::parse("MD"), Some(ReportFormat::Markdown));
        assert_eq!(ReportFormat::parse("xml"), None);
    }
}
