//! Child-process executor for the real assembler.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::{tail_lines, AssemblyExecutor, AssemblyInvocation, ExecutionOutcome, ExecutorError, TAIL_LINES};

/// Assembler program used when none is configured
pub const DEFAULT_ASSEMBLER: &str = "get_organelle_from_reads.py";

/// Runs the assembler as a child process
///
/// The child is spawned with `kill_on_drop`, so a caller that gives up on the
/// returned future (for example on timeout) also terminates the process.
/// Whatever it had written to its output directory stays on disk.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    working_dir: Option<PathBuf>,
    tail_lines: usize,
}

impl CommandExecutor {
    /// Create an executor for `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
            tail_lines: TAIL_LINES,
        }
    }

    /// Run the assembler from `dir`
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Number of trailing stdout/stderr lines to keep
    pub fn with_tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    /// Program this executor runs
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_ASSEMBLER)
    }
}

#[async_trait]
impl AssemblyExecutor for CommandExecutor {
    #[instrument(skip(self, invocation), fields(sample_id = %invocation.sample_id))]
    async fn execute(
        &self,
        invocation: &AssemblyInvocation,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let mut command = Command::new(&self.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| ExecutorError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        debug!(pid = ?child.id(), "Assembler process started");

        let output = child.wait_with_output().await?;

        if output.status.code().is_none() {
            warn!(status = %output.status, "Assembler terminated by signal");
        }

        Ok(ExecutionOutcome {
            exit_code: output.status.code(),
            stdout_tail: tail_lines(&output.stdout, self.tail_lines),
            stderr_tail: tail_lines(&output.stderr, self.tail_lines),
        })
    }

    fn describe(&self, invocation: &AssemblyInvocation) -> String {
        format!("{} {}", self.program, invocation.display_args())
    }
}
