//! Report artifacts for a finished batch
//!
//! Two files are produced from a [`BatchRunReport`]: a pretty-printed JSON
//! summary for tooling and a plain-text digest for people. Both are pure
//! renderings of the report.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::batch::{BatchRunReport, JobStatus};

/// File stem used for report artifacts inside the output directory
pub const DEFAULT_REPORT_NAME: &str = "batch_assembly_summary";

const RULE_WIDTH: usize = 60;
const ID_COLUMN_WIDTH: usize = 30;

/// Errors raised while writing report artifacts
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where the two report artifacts go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    /// Structured JSON summary
    pub json: PathBuf,
    /// Plain-text digest
    pub text: PathBuf,
}

impl ReportPaths {
    /// Default artifact locations inside `output_dir`
    pub fn in_dir(output_dir: &Path) -> Self {
        Self {
            json: output_dir.join(format!("{DEFAULT_REPORT_NAME}.json")),
            text: output_dir.join(format!("{DEFAULT_REPORT_NAME}.txt")),
        }
    }

    /// JSON at `path`, digest next to it with a `txt` extension
    pub fn from_report_path(path: impl Into<PathBuf>) -> Self {
        let json = path.into();
        let mut text = json.with_extension("txt");
        if text == json {
            text = json.with_extension("digest.txt");
        }
        Self { json, text }
    }
}

/// Structured summary as pretty JSON
pub fn to_json(report: &BatchRunReport) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Human-readable digest
pub fn render_text(report: &BatchRunReport) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let thin_rule = "-".repeat(RULE_WIDTH);
    let finished_at = report.started_at
        + chrono::Duration::from_std(report.total_duration).unwrap_or_default();

    let mut out = String::new();
    let _ = writeln!(out, "Organelle Batch Assembly Summary");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Run ID: {}", report.run_id);
    let _ = writeln!(out, "Started: {}", report.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Finished: {}", finished_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out);

    let _ = writeln!(out, "Total samples: {}", report.results.len());
    for (label, status) in [
        ("Succeeded", JobStatus::Succeeded),
        ("Failed", JobStatus::Failed),
        ("Timed out", JobStatus::TimedOut),
        ("Skipped", JobStatus::Skipped),
    ] {
        let _ = writeln!(out, "{label}: {}", report.counts.get(status));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Total duration: {}", format_duration(report.total_duration));
    let average = report
        .average_duration()
        .map(format_duration)
        .unwrap_or_else(|| "n/a".to_string());
    let _ = writeln!(out, "Average duration: {average}");
    let _ = writeln!(out);

    let _ = writeln!(out, "Sample Details:");
    let _ = writeln!(out, "{thin_rule}");
    for result in &report.results {
        let _ = writeln!(
            out,
            "{:<width$} {}",
            result.sample_id,
            result.status,
            width = ID_COLUMN_WIDTH
        );
    }

    if !report.failed_samples.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Unsuccessful samples:");
        let _ = writeln!(out, "{thin_rule}");
        for result in report.failures() {
            let detail = result.error_detail.as_deref().unwrap_or("no detail recorded");
            let _ = writeln!(out, "  - {} [{}]: {}", result.sample_id, result.status, detail);
        }
    }

    out
}

/// Write both artifacts, creating parent directories as needed
pub async fn write_artifacts(report: &BatchRunReport, paths: &ReportPaths) -> Result<(), ReportError> {
    write_file(&paths.json, to_json(report)?).await?;
    write_file(&paths.text, render_text(report)).await?;

    info!(
        json = %paths.json.display(),
        text = %paths.text.display(),
        "Summary report saved"
    );
    Ok(())
}

async fn write_file(path: &Path, contents: String) -> Result<(), ReportError> {
    let write_err = |source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(path, contents).await.map_err(write_err)
}

/// Render a duration as `1h 02m 03s`, `4m 05s` or `6.7s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(6_700)), "6.7s");
        assert_eq!(format_duration(Duration::from_secs(245)), "4m 05s");
        assert_eq!(format_duration(Duration::from_secs(3_723)), "1h 02m 03s");
    }

    #[test]
    fn test_default_paths() {
        let paths = ReportPaths::in_dir(Path::new("output"));
        assert_eq!(paths.json, PathBuf::from("output/batch_assembly_summary.json"));
        assert_eq!(paths.text, PathBuf::from("output/batch_assembly_summary.txt"));
    }

    #[test]
    fn test_report_path_derives_digest() {
        let paths = ReportPaths::from_report_path("reports/run1.json");
        assert_eq!(paths.text, PathBuf::from("reports/run1.txt"));

        let paths = ReportPaths::from_report_path("reports/run1.txt");
        assert_eq!(paths.json, PathBuf::from("reports/run1.txt"));
        assert_eq!(paths.text, PathBuf::from("reports/run1.digest.txt"));
    }
}
