//! Batch dispatcher
//!
//! Turns manifest samples into a [`BatchRunReport`]:
//! - validation of read files and parameters, rejecting bad samples one by one
//! - a fixed pool of `concurrency_limit` workers pulling from a shared queue
//!   in manifest order
//! - per-sample timeouts with termination of the assembler
//! - optional stop-on-error that skips everything not yet started

use std::collections::VecDeque;
use std::fs::File;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::assembly::{AssemblyExecutor, AssemblyInvocation, AssemblyParameters};
use crate::batch::aggregation::BatchRunReport;
use crate::batch::error_handling::{self, SampleError};
use crate::batch::types::*;
use crate::manifest::{self, SampleDescriptor};

/// Validates samples and runs them through the assembler
pub struct Dispatcher {
    executor: Arc<dyn AssemblyExecutor>,
    output_dir: PathBuf,
    defaults: AssemblyParameters,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl Dispatcher {
    /// Create a dispatcher writing sample output under `output_dir`
    pub fn new(executor: Arc<dyn AssemblyExecutor>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            output_dir: output_dir.into(),
            defaults: AssemblyParameters::default(),
            progress_callback: None,
        }
    }

    /// Batch-wide parameters used where a manifest row has no override
    pub fn with_defaults(mut self, defaults: AssemblyParameters) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set progress callback
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Base output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Split samples into runnable and rejected ones.
    ///
    /// Every sample is checked; one bad sample never hides problems with the
    /// others.
    #[instrument(skip_all, fields(samples = samples.len()))]
    pub fn validate(&self, samples: Vec<SampleDescriptor>) -> Validation {
        let mut validation = Validation::default();

        for sample in samples {
            let mut problems: Vec<String> = [
                manifest::sample_id_problem(&sample.sample_id),
                check_reads(&sample.forward_reads_path, "forward reads"),
                check_reads(&sample.reverse_reads_path, "reverse reads"),
            ]
            .into_iter()
            .flatten()
            .collect();

            let resolved = match self.defaults.resolve(&sample) {
                Ok(parameters) => Some(parameters),
                Err(parameter_problems) => {
                    problems.extend(parameter_problems);
                    None
                }
            };

            match resolved {
                Some(parameters) if problems.is_empty() => {
                    debug!(sample_id = %sample.sample_id, "Sample passed validation");
                    validation.valid.push(ValidatedSample {
                        descriptor: sample,
                        parameters,
                    });
                }
                _ => {
                    let reason = problems.join("; ");
                    warn!(sample_id = %sample.sample_id, reason = %reason, "Sample rejected");
                    validation.rejected.push((sample, reason));
                }
            }
        }

        info!(
            valid = validation.valid.len(),
            rejected = validation.rejected.len(),
            "Validation finished"
        );
        validation
    }

    /// Skipped results for rejected samples
    pub fn rejections_to_results(&self, rejected: Vec<(SampleDescriptor, String)>) -> Vec<JobResult> {
        rejected
            .into_iter()
            .map(|(sample, reason)| {
                let output_path = AssemblyInvocation::output_path_for(&self.output_dir, &sample.sample_id);
                JobResult::skipped(&sample, output_path, SampleError::Validation(reason))
            })
            .collect()
    }

    /// Validate and run a whole manifest.
    ///
    /// Rejected samples show up in the report as skipped.
    #[instrument(skip_all, fields(samples = samples.len()))]
    pub async fn process(&self, samples: Vec<SampleDescriptor>, config: &BatchConfig) -> BatchRunReport {
        let clock = RunClock::start();

        let Validation { valid, rejected } = self.validate(samples);
        let mut results = self.rejections_to_results(rejected);
        results.extend(self.execute_all(valid, config).await);

        clock.finish(results)
    }

    /// Run validated samples. Each one is scheduled exactly once.
    #[instrument(skip_all, fields(samples = samples.len()))]
    pub async fn run(&self, samples: Vec<ValidatedSample>, config: &BatchConfig) -> BatchRunReport {
        let clock = RunClock::start();
        let results = self.execute_all(samples, config).await;
        clock.finish(results)
    }

    /// Aggregate finished results into a report
    pub fn report(results: Vec<JobResult>, wall_clock: Duration) -> BatchRunReport {
        let elapsed = chrono::Duration::from_std(wall_clock).unwrap_or_default();
        BatchRunReport::aggregate(Uuid::new_v4(), Utc::now() - elapsed, wall_clock, results)
    }

    async fn execute_all(&self, samples: Vec<ValidatedSample>, config: &BatchConfig) -> Vec<JobResult> {
        if samples.is_empty() {
            info!("No samples to run");
            return Vec::new();
        }

        let total = samples.len();
        let workers = config.concurrency_limit.max(1).min(total);
        self.warn_on_oversubscription(&samples, workers);

        info!(
            total_samples = total,
            workers = workers,
            timeout = ?config.per_sample_timeout,
            continue_on_error = config.continue_on_error,
            "Starting batch execution"
        );

        let state = Arc::new(RunState {
            queue: Mutex::new(samples.into_iter().collect()),
            results: Mutex::new(Vec::with_capacity(total)),
            in_flight: Mutex::new(vec![None; workers]),
            aborted: AtomicBool::new(false),
            finished: AtomicUsize::new(0),
            total,
        });

        let handles = (0..workers).map(|id| {
            let worker = Worker {
                id,
                executor: Arc::clone(&self.executor),
                output_dir: self.output_dir.clone(),
                config: config.clone(),
                progress: self.progress_callback.clone(),
            };
            tokio::spawn(worker.run(Arc::clone(&state)))
        });

        let mut lost = Vec::new();
        for (id, joined) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = joined {
                error!(worker = id, error = %e, "Batch worker stopped unexpectedly");
                lost.extend(state.in_flight.lock()[id].take());
            }
        }

        let mut results = std::mem::take(&mut *state.results.lock());
        for sample in lost {
            let output_path = AssemblyInvocation::output_path_for(&self.output_dir, &sample.sample_id);
            let mut result = JobResult::pending(&sample, output_path);
            result.mark_running();
            result.finish(None, Duration::ZERO, Some(SampleError::WorkerLost));
            results.push(result);
        }

        // Anything still queued has lost its worker
        let aborted = state.aborted.load(Ordering::SeqCst);
        let orphaned: Vec<ValidatedSample> = state.queue.lock().drain(..).collect();
        for sample in orphaned {
            let output_path = AssemblyInvocation::output_path_for(&self.output_dir, &sample.descriptor.sample_id);
            let reason = if aborted { SampleError::Aborted } else { SampleError::WorkerLost };
            results.push(JobResult::skipped(&sample.descriptor, output_path, reason));
        }

        results
    }

    fn warn_on_oversubscription(&self, samples: &[ValidatedSample], workers: usize) {
        let max_threads = samples
            .iter()
            .map(|sample| sample.parameters.threads as usize)
            .max()
            .unwrap_or(1);
        let cpus = num_cpus::get();

        if workers * max_threads > cpus {
            warn!(
                workers = workers,
                threads_per_sample = max_threads,
                cpus = cpus,
                "Concurrent assemblies may request more threads than available CPUs"
            );
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("output_dir", &self.output_dir)
            .field("defaults", &self.defaults)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

fn check_reads(path: &Path, label: &str) -> Option<String> {
    match std::fs::metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Some(format!("{label} not found: {}", path.display()))
        }
        Err(e) => Some(format!("{label} not accessible: {}: {e}", path.display())),
        Ok(meta) if !meta.is_file() => {
            Some(format!("{label} is not a regular file: {}", path.display()))
        }
        Ok(_) => File::open(path)
            .err()
            .map(|e| format!("{label} unreadable: {}: {e}", path.display())),
    }
}

/// Start time and identity of a run
struct RunClock {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl RunClock {
    fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    fn finish(self, results: Vec<JobResult>) -> BatchRunReport {
        let report = BatchRunReport::aggregate(self.run_id, self.started_at, self.started.elapsed(), results);

        info!(
            run_id = %report.run_id,
            succeeded = report.counts.succeeded,
            failed = report.counts.failed,
            timed_out = report.counts.timed_out,
            skipped = report.counts.skipped,
            batch_duration_ms = report.total_duration.as_millis(),
            "Batch execution completed"
        );
        report
    }
}

/// State shared by the workers of one run
struct RunState {
    queue: Mutex<VecDeque<ValidatedSample>>,
    results: Mutex<Vec<JobResult>>,
    /// Sample each worker is running, by worker id
    in_flight: Mutex<Vec<Option<SampleDescriptor>>>,
    aborted: AtomicBool,
    finished: AtomicUsize,
    total: usize,
}

impl RunState {
    fn next_sample(&self) -> Option<ValidatedSample> {
        let mut queue = self.queue.lock();
        if self.aborted.load(Ordering::SeqCst) {
            return None;
        }
        queue.pop_front()
    }

    /// Stop admitting work and skip everything still queued
    fn abort(&self, output_dir: &Path) -> usize {
        self.aborted.store(true, Ordering::SeqCst);

        let drained: Vec<ValidatedSample> = self.queue.lock().drain(..).collect();
        let skipped: Vec<JobResult> = drained
            .iter()
            .map(|sample| {
                let output_path = AssemblyInvocation::output_path_for(output_dir, &sample.descriptor.sample_id);
                JobResult::skipped(&sample.descriptor, output_path, SampleError::Aborted)
            })
            .collect();

        let count = skipped.len();
        self.results.lock().extend(skipped);
        count
    }
}

/// One member of the worker pool
struct Worker {
    id: usize,
    executor: Arc<dyn AssemblyExecutor>,
    output_dir: PathBuf,
    config: BatchConfig,
    progress: Option<Arc<ProgressCallback>>,
}

impl Worker {
    async fn run(self, state: Arc<RunState>) {
        debug!(worker = self.id, "Worker started");

        while let Some(sample) = state.next_sample() {
            state.in_flight.lock()[self.id] = Some(sample.descriptor.clone());
            let (result, aborts) = self.execute_sample(sample, state.total).await;

            // Close admission before anything else so no sibling starts another sample
            let first_abort = aborts
                && !self.config.continue_on_error
                && !state.aborted.swap(true, Ordering::SeqCst);

            state.results.lock().push(result);
            state.in_flight.lock()[self.id] = None;
            let mut finished = state.finished.fetch_add(1, Ordering::SeqCst) + 1;

            if first_abort {
                let skipped = state.abort(&self.output_dir);
                warn!(
                    worker = self.id,
                    skipped = skipped,
                    "Stopping batch after failure (stop-on-error)"
                );
                finished = state.finished.fetch_add(skipped, Ordering::SeqCst) + skipped;
            }

            if let Some(callback) = &self.progress {
                let total = state.total;
                if std::panic::catch_unwind(AssertUnwindSafe(|| callback(finished, total))).is_err() {
                    warn!(worker = self.id, "Progress callback panicked");
                }
            }
        }

        debug!(worker = self.id, "Worker finished");
    }

    #[instrument(skip_all, fields(sample_id = %sample.descriptor.sample_id, worker = self.id))]
    async fn execute_sample(&self, sample: ValidatedSample, total: usize) -> (JobResult, bool) {
        let invocation = AssemblyInvocation::new(&sample.descriptor, &sample.parameters, &self.output_dir);
        let mut result = JobResult::pending(&sample.descriptor, invocation.output_path.clone());

        result.mark_running();
        info!(
            sample = sample.descriptor.position + 1,
            total = total,
            command = %self.executor.describe(&invocation),
            "Processing sample"
        );

        let start = Instant::now();
        let started_at = SystemTime::now();
        let (exit_code, error) = match self.invoke(&invocation).await {
            Ok(outcome) => {
                let verdict = error_handling::classify(&outcome, &invocation.output_path, started_at).await;
                (outcome.exit_code, verdict.err())
            }
            Err(err) => (None, Some(err)),
        };
        let duration = start.elapsed();

        match &error {
            None => info!(duration_ms = duration.as_millis(), "Sample completed successfully"),
            Some(err) => error!(
                duration_ms = duration.as_millis(),
                status = %err.status(),
                error = %err,
                "Sample did not succeed"
            ),
        }

        let aborts = error.as_ref().is_some_and(SampleError::aborts_batch);
        result.finish(exit_code, duration, error);
        (result, aborts)
    }

    /// Run the assembler, enforcing the timeout and containing executor panics
    async fn invoke(&self, invocation: &AssemblyInvocation) -> Result<crate::assembly::ExecutionOutcome, SampleError> {
        let execution = AssertUnwindSafe(self.executor.execute(invocation)).catch_unwind();

        let joined = match self.config.per_sample_timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        timeout_ms = limit.as_millis(),
                        output_path = %invocation.output_path.display(),
                        "Assembler timed out, terminating; partial output kept"
                    );
                    return Err(SampleError::Timeout { after: limit });
                }
            },
            None => execution.await,
        };

        match joined {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(err)) => Err(SampleError::Launch(err.to_string())),
            Err(_) => Err(SampleError::Launch("assembler executor panicked".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{ExecutionOutcome, ExecutorError};
    use crate::manifest::THREADS;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct WritesOutput;

    #[async_trait]
    impl AssemblyExecutor for WritesOutput {
        async fn execute(&self, invocation: &AssemblyInvocation) -> Result<ExecutionOutcome, ExecutorError> {
            tokio::fs::create_dir_all(&invocation.output_path).await?;
            tokio::fs::write(invocation.output_path.join("mt.path_sequence.fasta"), ">mt\n").await?;
            Ok(ExecutionOutcome::exited(0))
        }
    }

    fn reads(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "@r\nACGT\n+\nIIII\n").unwrap();
        path
    }

    #[test]
    fn test_validate_accepts_existing_reads() {
        let dir = tempfile::tempdir().unwrap();
        let sample = SampleDescriptor::new("s1", reads(dir.path(), "r1.fq"), reads(dir.path(), "r2.fq"));

        let dispatcher = Dispatcher::new(Arc::new(WritesOutput), dir.path().join("out"));
        let validation = dispatcher.validate(vec![sample]);

        assert_eq!(validation.valid.len(), 1);
        assert!(validation.rejected.is_empty());
        assert_eq!(validation.valid[0].parameters, AssemblyParameters::default());
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let dir = tempfile::tempdir().unwrap();
        let sample = SampleDescriptor::new("s1", dir.path().join("missing_R1.fq"), dir.path())
            .with_parameter(THREADS, "0");

        let dispatcher = Dispatcher::new(Arc::new(WritesOutput), dir.path().join("out"));
        let validation = dispatcher.validate(vec![sample]);

        assert!(validation.valid.is_empty());
        let (_, reason) = &validation.rejected[0];
        assert!(reason.contains("forward reads not found"));
        assert!(reason.contains("missing_R1.fq"));
        assert!(reason.contains("reverse reads is not a regular file"));
        assert!(reason.contains("threads must be greater than 0"));
    }

    #[test]
    fn test_validate_rejects_ids_outside_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![
            SampleDescriptor::new("x", reads(dir.path(), "x1.fq"), reads(dir.path(), "x2.fq")),
            SampleDescriptor::new("../x", reads(dir.path(), "y1.fq"), reads(dir.path(), "y2.fq")),
        ];

        let dispatcher = Dispatcher::new(Arc::new(WritesOutput), dir.path().join("out"));
        let validation = dispatcher.validate(samples);

        assert_eq!(validation.valid.len(), 1);
        let (rejected, reason) = &validation.rejected[0];
        assert_eq!(rejected.sample_id, "../x");
        assert!(reason.contains("path separator"));
    }

    #[test]
    fn test_rejections_become_skipped_results() {
        let dispatcher = Dispatcher::new(Arc::new(WritesOutput), "out");
        let sample = SampleDescriptor::new("s1", "a.fq", "b.fq");
        let results = dispatcher.rejections_to_results(vec![(sample, "forward reads not found: a.fq".to_string())]);

        assert_eq!(results[0].status, JobStatus::Skipped);
        assert_eq!(results[0].output_path, PathBuf::from("out/s1_mt"));
        assert_eq!(results[0].error_detail.as_deref(), Some("forward reads not found: a.fq"));
    }

    #[tokio::test]
    async fn test_run_with_no_samples() {
        let dispatcher = Dispatcher::new(Arc::new(WritesOutput), "out");
        let report = dispatcher.run(Vec::new(), &BatchConfig::default()).await;
        assert!(report.results.is_empty());
        assert!(report.failed_samples.is_empty());
    }

    #[tokio::test]
    async fn test_process_single_sample() {
        let dir = tempfile::tempdir().unwrap();
        let sample = SampleDescriptor::new("s1", reads(dir.path(), "r1.fq"), reads(dir.path(), "r2.fq"));

        let dispatcher = Dispatcher::new(Arc::new(WritesOutput), dir.path().join("out"));
        let report = dispatcher.process(vec![sample], &BatchConfig::default()).await;

        assert_eq!(report.counts.succeeded, 1);
        assert_eq!(report.results[0].exit_code, Some(0));
        assert!(report.results[0].output_path.ends_with("s1_mt"));
    }

    #[test]
    fn test_report_is_pure_aggregation() {
        let report = Dispatcher::report(Vec::new(), Duration::from_secs(2));
        assert_eq!(report.total_duration, Duration::from_secs(2));
        assert!(report.started_at <= Utc::now());
    }
}
