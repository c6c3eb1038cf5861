use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assembly::AssemblyParameters;
use crate::batch::error_handling::SampleError;
use crate::manifest::SampleDescriptor;

/// Status of a sample within a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted but not yet picked up by a worker
    Pending,
    /// Assembler currently running
    Running,
    /// Assembler exited 0 and produced its expected output
    Succeeded,
    /// Assembler failed, could not be started, or produced no output
    Failed,
    /// Assembler exceeded the per-sample timeout and was terminated
    TimedOut,
    /// Never run: rejected during validation or cut off by an abort
    Skipped,
}

impl JobStatus {
    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// Label used in the text report
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED OUT",
            JobStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Sample this result belongs to
    pub sample_id: String,
    /// Current status
    pub status: JobStatus,
    /// Assembler exit code, when the process produced one
    pub exit_code: Option<i32>,
    /// Wall-clock time spent on the sample
    #[serde(rename = "duration_secs", with = "duration_secs")]
    pub duration: Duration,
    /// Directory the assembler was told to write into
    pub output_path: PathBuf,
    /// Diagnostic for failed, timed out and skipped samples
    pub error_detail: Option<String>,
    /// Position of the sample in the manifest
    #[serde(skip)]
    pub position: usize,
}

impl JobResult {
    /// New result for an admitted sample
    pub fn pending(sample: &SampleDescriptor, output_path: PathBuf) -> Self {
        Self {
            sample_id: sample.sample_id.clone(),
            status: JobStatus::Pending,
            exit_code: None,
            duration: Duration::ZERO,
            output_path,
            error_detail: None,
            position: sample.position,
        }
    }

    /// Result for a sample that will never run
    pub fn skipped(sample: &SampleDescriptor, output_path: PathBuf, reason: SampleError) -> Self {
        let mut result = Self::pending(sample, output_path);
        result.finish(None, Duration::ZERO, Some(reason));
        result
    }

    /// Move a pending result to running
    pub fn mark_running(&mut self) {
        debug_assert_eq!(self.status, JobStatus::Pending, "only pending jobs can start");
        self.status = JobStatus::Running;
    }

    /// Record the terminal state. The status follows from `error`.
    pub fn finish(&mut self, exit_code: Option<i32>, duration: Duration, error: Option<SampleError>) {
        debug_assert!(!self.status.is_terminal(), "job result finalized twice");

        self.exit_code = exit_code;
        self.duration = duration;
        match error {
            Some(err) => {
                self.status = err.status();
                self.error_detail = Some(err.to_string());
            }
            None => {
                self.status = JobStatus::Succeeded;
                self.error_detail = None;
            }
        }
    }

    /// Whether the sample succeeded
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// A sample that passed validation, with its resolved parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSample {
    /// The manifest row
    pub descriptor: SampleDescriptor,
    /// Defaults merged with the row's overrides
    pub parameters: AssemblyParameters,
}

/// Result of validating a manifest's samples
#[derive(Debug, Clone, Default)]
pub struct Validation {
    /// Samples ready to be scheduled, in manifest order
    pub valid: Vec<ValidatedSample>,
    /// Samples that will not be scheduled, with the reason
    pub rejected: Vec<(SampleDescriptor, String)>,
}

/// Batch execution configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Number of samples assembled at the same time
    pub concurrency_limit: usize,
    /// Time limit per sample, unbounded when `None`
    pub per_sample_timeout: Option<Duration>,
    /// Keep going after a sample fails or times out
    pub continue_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 1,
            per_sample_timeout: None,
            continue_on_error: true,
        }
    }
}

impl BatchConfig {
    /// Set concurrency limit (number of parallel samples)
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Set timeout for individual samples
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_sample_timeout = Some(timeout);
        self
    }

    /// Choose whether a failure stops the remaining samples
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}

/// Progress callback receiving (finished samples, total samples)
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Serde helpers writing a [`Duration`] as fractional seconds
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
