//! Assembler invocation and the executor abstraction
//!
//! The batch core never talks to a child process directly. It builds an
//! [`AssemblyInvocation`] for each sample and hands it to an
//! [`AssemblyExecutor`], which runs it to completion and reports the exit code
//! together with the tail of the process output. Tests swap in stub executors
//! through the same trait.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::SampleDescriptor;

pub mod command;
pub mod params;

pub use command::{CommandExecutor, DEFAULT_ASSEMBLER};
pub use params::AssemblyParameters;

/// Suffix appended to the sample id to form its output directory
pub const OUTPUT_DIR_SUFFIX: &str = "_mt";

/// Number of trailing output lines kept from the assembler
pub const TAIL_LINES: usize = 20;

/// Errors raised while running the assembler
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed while waiting for assembler: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a finished assembler process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Exit code, `None` if the process was ended by a signal
    pub exit_code: Option<i32>,
    /// Last lines written to stdout
    pub stdout_tail: String,
    /// Last lines written to stderr
    pub stderr_tail: String,
}

impl ExecutionOutcome {
    /// Outcome for a process that exited with `code` and printed nothing
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            stdout_tail: String::new(),
            stderr_tail: String::new(),
        }
    }

    /// Attach stderr output
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr_tail = stderr.into();
        self
    }

    /// Whether the process reported success
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A single assembler run for one sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyInvocation {
    /// Sample this run belongs to
    pub sample_id: String,
    /// Directory the assembler was told to write into
    pub output_path: PathBuf,
    /// Parameters the arguments were built from
    pub parameters: AssemblyParameters,
    /// Command-line arguments, excluding the program itself
    pub args: Vec<OsString>,
}

impl AssemblyInvocation {
    /// Build the invocation for a sample.
    ///
    /// The argument order is fixed:
    /// `-1 <fwd> -2 <rev> -o <out> -R <rounds> -k <kmers> -F <type> -t <threads>`.
    pub fn new(
        sample: &SampleDescriptor,
        parameters: &AssemblyParameters,
        output_dir: &Path,
    ) -> Self {
        let output_path = Self::output_path_for(output_dir, &sample.sample_id);

        let args = vec![
            OsString::from("-1"),
            sample.forward_reads_path.clone().into_os_string(),
            OsString::from("-2"),
            sample.reverse_reads_path.clone().into_os_string(),
            OsString::from("-o"),
            output_path.clone().into_os_string(),
            OsString::from("-R"),
            OsString::from(parameters.extension_rounds.to_string()),
            OsString::from("-k"),
            OsString::from(&parameters.k_mers),
            OsString::from("-F"),
            OsString::from(&parameters.organelle_type),
            OsString::from("-t"),
            OsString::from(parameters.threads.to_string()),
        ];

        Self {
            sample_id: sample.sample_id.clone(),
            output_path,
            parameters: parameters.clone(),
            args,
        }
    }

    /// Output directory used for `sample_id` under `output_dir`
    pub fn output_path_for(output_dir: &Path, sample_id: &str) -> PathBuf {
        output_dir.join(format!("{sample_id}{OUTPUT_DIR_SUFFIX}"))
    }

    /// Arguments rendered for logs
    pub fn display_args(&self) -> String {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs the external assembler
///
/// Implementations block until the run finishes. Timeouts are applied by the
/// caller by dropping the returned future, so implementations must stop the
/// underlying work when dropped.
#[async_trait]
pub trait AssemblyExecutor: Send + Sync {
    /// Run one invocation to completion
    async fn execute(&self, invocation: &AssemblyInvocation)
        -> Result<ExecutionOutcome, ExecutorError>;

    /// Full command line for logs
    fn describe(&self, invocation: &AssemblyInvocation) -> String {
        invocation.display_args()
    }
}

/// Keep the last `limit` lines of process output
pub(crate) fn tail_lines(output: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].join("\n")
}
