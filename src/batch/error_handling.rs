//! Per-sample error taxonomy and outcome classification
//!
//! Nothing in here ever fails the batch. Every problem with a sample becomes a
//! [`SampleError`], and its display text becomes that sample's `error_detail`.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::debug;

use crate::assembly::ExecutionOutcome;
use crate::batch::JobStatus;

/// File name fragment the assembler uses for finished path sequences
pub const PATH_SEQUENCE_MARKER: &str = "path_sequence";

/// Detail recorded for samples cut off by a stop-on-error abort
pub const ABORTED_DETAIL: &str = "batch aborted";

/// Allowance for filesystems whose modification times lag the system clock
const MTIME_SLACK: Duration = Duration::from_secs(2);

/// Why a single sample did not succeed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    /// Missing or unreadable inputs, or invalid parameters
    #[error("{0}")]
    Validation(String),

    /// Assembler exited non-zero or was killed by a signal
    #[error("{}", describe_exit(.exit_code, .stderr_tail))]
    Execution {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// Assembler exited 0 without writing its expected output
    #[error(
        "silent failure: assembler exited 0 but expected output is missing \
         (no *path_sequence* file written to {} by this run)",
        .output_path.display()
    )]
    SilentFailure { output_path: PathBuf },

    /// Assembler exceeded the per-sample timeout
    #[error("timed out after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },

    /// Assembler could not be started or waited on
    #[error("could not run assembler: {0}")]
    Launch(String),

    /// Sample was never started because the batch stopped early
    #[error("batch aborted")]
    Aborted,

    /// The worker running or holding this sample panicked
    #[error("batch worker stopped unexpectedly")]
    WorkerLost,
}

impl SampleError {
    /// Terminal status this error puts the sample in
    pub fn status(&self) -> JobStatus {
        match self {
            SampleError::Validation(_) | SampleError::Aborted => JobStatus::Skipped,
            SampleError::Timeout { .. } => JobStatus::TimedOut,
            SampleError::Execution { .. }
            | SampleError::SilentFailure { .. }
            | SampleError::Launch(_)
            | SampleError::WorkerLost => JobStatus::Failed,
        }
    }

    /// Whether this error should stop a stop-on-error batch
    pub fn aborts_batch(&self) -> bool {
        matches!(self.status(), JobStatus::Failed | JobStatus::TimedOut)
    }
}

fn describe_exit(exit_code: &Option<i32>, stderr_tail: &str) -> String {
    let head = match exit_code {
        Some(code) => format!("assembler exited with code {code}"),
        None => "assembler terminated by signal".to_string(),
    };

    if stderr_tail.trim().is_empty() {
        head
    } else {
        format!("{head}: {}", stderr_tail.trim())
    }
}

/// Decide whether a finished assembler run counts as a success.
///
/// A zero exit code is not enough on its own: the assembler is known to exit
/// 0 on degenerate input without producing anything, so the output directory
/// must also contain a path sequence file written by this run. Files left in
/// the directory by an earlier run do not count.
pub async fn classify(
    outcome: &ExecutionOutcome,
    output_path: &Path,
    started_at: SystemTime,
) -> Result<(), SampleError> {
    if !outcome.exited_cleanly() {
        return Err(SampleError::Execution {
            exit_code: outcome.exit_code,
            stderr_tail: outcome.stderr_tail.clone(),
        });
    }

    if has_path_sequence(output_path, started_at).await {
        Ok(())
    } else {
        Err(SampleError::SilentFailure {
            output_path: output_path.to_path_buf(),
        })
    }
}

/// Whether `output_path` contains an entry matching `*path_sequence*` that
/// was modified at or after `since`
pub async fn has_path_sequence(output_path: &Path, since: SystemTime) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(output_path).await else {
        debug!(path = %output_path.display(), "Output directory missing");
        return false;
    };

    let cutoff = since.checked_sub(MTIME_SLACK).unwrap_or(SystemTime::UNIX_EPOCH);

    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry
            .file_name()
            .to_string_lossy()
            .contains(PATH_SEQUENCE_MARKER)
        {
            continue;
        }

        // Platforms without modification times cannot tell stale files apart
        let fresh = match entry.metadata().await.and_then(|meta| meta.modified()) {
            Ok(modified) => modified >= cutoff,
            Err(_) => true,
        };
        if fresh {
            return true;
        }
        debug!(entry = ?entry.file_name(), "Ignoring path sequence left by an earlier run");
    }

    false
}
