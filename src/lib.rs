//! # mitobatch
//!
//! A fault-tolerant batch runner for organelle genome assembly pipelines.
//!
//! ## Overview
//!
//! mitobatch reads a manifest of paired-end samples, runs an external assembler
//! (GetOrganelle's `get_organelle_from_reads.py` by default) once per sample on a
//! bounded worker pool, and records the outcome of every sample without letting
//! one bad sample take down the rest of the batch. Each run produces a
//! machine-readable JSON summary and a plain-text digest.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mitobatch::assembly::{AssemblyParameters, CommandExecutor};
//! use mitobatch::batch::{BatchConfig, Dispatcher};
//! use mitobatch::manifest;
//! use mitobatch::report::{self, ReportPaths};
//!
//! # async fn example() -> mitobatch::Result<()> {
//! let samples = manifest::load("samples.csv")?;
//!
//! let dispatcher = Dispatcher::new(Arc::new(CommandExecutor::default()), "output")
//!     .with_defaults(AssemblyParameters::default());
//!
//! let config = BatchConfig::default().with_concurrency_limit(2);
//! let report = dispatcher.process(samples, &config).await;
//!
//! report::write_artifacts(&report, &ReportPaths::in_dir(dispatcher.output_dir())).await?;
//! println!("{} of {} samples succeeded", report.counts.succeeded, report.results.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`manifest`]: Sample manifest loading
//! - [`assembly`]: Assembler parameters, invocation and the executor seam
//! - [`batch`]: Validation, worker pool and aggregation
//! - [`report`]: JSON and text report artifacts
//! - [`logging`]: Tracing subscriber setup

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for mitobatch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Main error type for mitobatch operations
///
/// Only failures that stop a batch from running end up here. Problems with a
/// single sample are captured in that sample's [`batch::JobResult`] instead.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Malformed or unreadable sample manifest
    #[error("Manifest error: {0}")]
    Manifest(#[from] manifest::ManifestError),

    /// Failure writing report artifacts
    #[error("Report error: {0}")]
    Report(#[from] report::ReportError),
}

/// Sample manifest loading
pub mod manifest;

/// Assembler parameters, invocation and executor abstraction
pub mod assembly;

/// Batch validation, scheduling and aggregation
pub mod batch;

/// Report artifact generation
pub mod report;

/// Logging setup
pub mod logging;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_error_converts() {
        let err: BatchError = manifest::ManifestError::Empty.into();
        assert!(matches!(err, BatchError::Manifest(_)));
        assert!(err.to_string().starts_with("Manifest error"));
    }

    #[test]
    fn test_report_error_converts() {
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: BatchError = report::ReportError::Write {
            path: "output/batch_assembly_summary.json".into(),
            source,
        }
        .into();
        assert!(matches!(err, BatchError::Report(_)));
        assert!(err.to_string().contains("batch_assembly_summary.json"));
    }
}
