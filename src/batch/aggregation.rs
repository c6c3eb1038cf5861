use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::types::duration_secs;
use crate::batch::{JobResult, JobStatus};

/// Number of samples per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Not yet started
    pub pending: usize,
    /// Still running
    pub running: usize,
    /// Finished successfully
    pub succeeded: usize,
    /// Failed, including silent failures
    pub failed: usize,
    /// Killed after the per-sample timeout
    pub timed_out: usize,
    /// Rejected or aborted before running
    pub skipped: usize,
}

impl StatusCounts {
    /// Count one result
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::TimedOut => self.timed_out += 1,
            JobStatus::Skipped => self.skipped += 1,
        }
    }

    /// Count for a single status
    pub fn get(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Running => self.running,
            JobStatus::Succeeded => self.succeeded,
            JobStatus::Failed => self.failed,
            JobStatus::TimedOut => self.timed_out,
            JobStatus::Skipped => self.skipped,
        }
    }

    /// Total number of samples counted
    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed + self.timed_out + self.skipped
    }
}

/// How the batch as a whole went, and the process exit code it maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every sample succeeded
    AllSucceeded,
    /// At least one sample failed, timed out or was skipped
    Incomplete,
    /// No sample was ever run
    NothingRan,
}

impl BatchOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            BatchOutcome::AllSucceeded => 0,
            BatchOutcome::Incomplete => 1,
            BatchOutcome::NothingRan => 2,
        }
    }
}

/// Aggregate over every sample of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRunReport {
    /// Identifier of this run
    pub run_id: Uuid,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Wall-clock time of the whole run
    #[serde(rename = "total_duration_secs", with = "duration_secs")]
    pub total_duration: Duration,
    /// Samples per status
    pub counts: StatusCounts,
    /// Every sample, in manifest order
    pub results: Vec<JobResult>,
    /// Samples that did not succeed, in manifest order
    pub failed_samples: Vec<String>,
}

impl BatchRunReport {
    /// Build a report from finished results.
    ///
    /// Results may arrive in completion order; the report is normalized to
    /// manifest order.
    pub fn aggregate(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        total_duration: Duration,
        mut results: Vec<JobResult>,
    ) -> Self {
        results.sort_by_key(|result| result.position);

        let mut counts = StatusCounts::default();
        for result in &results {
            counts.record(result.status);
        }

        let failed_samples = results
            .iter()
            .filter(|result| !result.succeeded())
            .map(|result| result.sample_id.clone())
            .collect();

        Self {
            run_id,
            started_at,
            total_duration,
            counts,
            results,
            failed_samples,
        }
    }

    /// Overall outcome of the batch
    pub fn outcome(&self) -> BatchOutcome {
        if self.counts.skipped == self.results.len() {
            BatchOutcome::NothingRan
        } else if self.failed_samples.is_empty() {
            BatchOutcome::AllSucceeded
        } else {
            BatchOutcome::Incomplete
        }
    }

    /// Mean duration of the samples that actually ran
    pub fn average_duration(&self) -> Option<Duration> {
        let ran: Vec<Duration> = self
            .results
            .iter()
            .filter(|result| result.status != JobStatus::Skipped)
            .map(|result| result.duration)
            .collect();

        if ran.is_empty() {
            return None;
        }

        Some(ran.iter().sum::<Duration>() / ran.len() as u32)
    }

    /// Results that did not succeed, in manifest order
    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|result| !result.succeeded())
    }

    /// Result for a sample, if present
    pub fn result(&self, sample_id: &str) -> Option<&JobResult> {
        self.results.iter().find(|result| result.sample_id == sample_id)
    }
}
