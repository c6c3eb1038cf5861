//! Shared fixtures for the integration tests: stub assemblers and manifest
//! helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use mitobatch::assembly::{AssemblyExecutor, AssemblyInvocation, ExecutionOutcome, ExecutorError};
use mitobatch::manifest::SampleDescriptor;

/// What a stub assembler does for a given sample
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write a path sequence file and exit 0
    Succeed,
    /// Like `Succeed`, after running for the given time
    SucceedAfter(Duration),
    /// Exit with the given non-zero code
    Fail(i32),
    /// Exit 0 without writing anything
    ExitZeroWithoutOutput,
    /// Never finish on its own
    Hang,
    /// Return an executor error as if the program could not start
    SpawnError,
}

/// Scripted assembler: each sample gets the behavior configured for its id,
/// everything else succeeds.
#[derive(Debug, Default)]
pub struct ScriptedAssembler {
    behaviors: HashMap<String, Behavior>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sample_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(sample_id.to_string(), behavior);
        self
    }

    /// Simulated run time for every sample
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sample ids in the order the assembler was invoked
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Highest number of simultaneous invocations observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the running count when an invocation ends, including by
/// cancellation.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AssemblyExecutor for ScriptedAssembler {
    async fn execute(&self, invocation: &AssemblyInvocation) -> Result<ExecutionOutcome, ExecutorError> {
        self.calls.lock().push(invocation.sample_id.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behavior = self
            .behaviors
            .get(&invocation.sample_id)
            .cloned()
            .unwrap_or(Behavior::Succeed);

        if let Behavior::SucceedAfter(delay) = behavior {
            tokio::time::sleep(delay).await;
        }

        match behavior {
            Behavior::Succeed | Behavior::SucceedAfter(_) => {
                tokio::fs::create_dir_all(&invocation.output_path).await?;
                tokio::fs::write(
                    invocation.output_path.join("animal_mt.K105.complete.graph1.1.path_sequence.fasta"),
                    ">mt\nACGT\n",
                )
                .await?;
                Ok(ExecutionOutcome::exited(0))
            }
            Behavior::Fail(code) => {
                Ok(ExecutionOutcome::exited(code).with_stderr("ERROR: not enough reads to seed the assembly"))
            }
            Behavior::ExitZeroWithoutOutput => Ok(ExecutionOutcome::exited(0)),
            Behavior::Hang => std::future::pending().await,
            Behavior::SpawnError => Err(ExecutorError::Spawn {
                program: "get_organelle_from_reads.py".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            }),
        }
    }
}

/// Write a small FASTQ file
pub fn write_reads(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, "@read1\nACGTACGT\n+\nIIIIIIII\n").unwrap();
    path
}

/// Samples with existing read files, in manifest order
pub fn samples_with_reads(dir: &Path, ids: &[&str]) -> Vec<SampleDescriptor> {
    ids.iter()
        .enumerate()
        .map(|(position, id)| {
            let forward = write_reads(dir, &format!("{id}_R1.fastq"));
            let reverse = write_reads(dir, &format!("{id}_R2.fastq"));
            SampleDescriptor::new(*id, forward, reverse).at_position(position)
        })
        .collect()
}

/// Write a manifest CSV for samples whose reads live in `dir`
pub fn write_manifest(dir: &Path, ids: &[&str]) -> PathBuf {
    let mut csv = String::from("sample_id,forward_reads_path,reverse_reads_path\n");
    for id in ids {
        let forward = write_reads(dir, &format!("{id}_R1.fastq"));
        let reverse = write_reads(dir, &format!("{id}_R2.fastq"));
        csv.push_str(&format!("{},{},{}\n", id, forward.display(), reverse.display()));
    }
    let path = dir.join("samples.csv");
    std::fs::write(&path, csv).unwrap();
    path
}
