//! Sample manifest loading.
//!
//! A manifest is a CSV file with a header row. Three columns are required
//! (`sample_id`, `forward_reads_path`, `reverse_reads_path`); the optional
//! parameter columns (`k_mers`, `extension_rounds`, `organelle_type`,
//! `threads`) override the batch-wide assembler defaults for a single sample.
//! Any other column is ignored.
//!
//! Loading is purely syntactic. Whether the read files exist, or whether a
//! parameter value makes sense, is decided later by the dispatcher so that all
//! bad samples can be reported together.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Required column holding the sample identifier
pub const SAMPLE_ID: &str = "sample_id";
/// Required column holding the forward (R1) reads path
pub const FORWARD_READS: &str = "forward_reads_path";
/// Required column holding the reverse (R2) reads path
pub const REVERSE_READS: &str = "reverse_reads_path";

/// Optional column with a comma-separated k-mer list
pub const K_MERS: &str = "k_mers";
/// Optional column with the number of extension rounds
pub const EXTENSION_ROUNDS: &str = "extension_rounds";
/// Optional column with the organelle type
pub const ORGANELLE_TYPE: &str = "organelle_type";
/// Optional column with the assembler thread count
pub const THREADS: &str = "threads";

const REQUIRED_COLUMNS: [&str; 3] = [SAMPLE_ID, FORWARD_READS, REVERSE_READS];

/// Parameter columns recognised by the loader
pub const PARAMETER_COLUMNS: [&str; 4] = [K_MERS, EXTENSION_ROUNDS, ORGANELLE_TYPE, THREADS];

/// Errors that make a manifest unusable
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Cannot read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest at line {line}: {message}")]
    Csv { line: u64, message: String },

    #[error("Manifest is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("Line {line}: required field '{column}' is empty")]
    EmptyField { line: u64, column: &'static str },

    #[error("Line {line}: duplicate sample_id '{sample_id}' (first seen on line {first_line})")]
    DuplicateSampleId {
        line: u64,
        sample_id: String,
        first_line: u64,
    },

    #[error("Line {line}: {reason}")]
    InvalidSampleId {
        line: u64,
        sample_id: String,
        reason: String,
    },

    #[error("Manifest contains no samples")]
    Empty,
}

impl From<csv::Error> for ManifestError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        ManifestError::Csv {
            line,
            message: err.to_string(),
        }
    }
}

/// One sample row from the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleDescriptor {
    /// Unique sample identifier
    pub sample_id: String,
    /// Forward (R1) reads file
    pub forward_reads_path: PathBuf,
    /// Reverse (R2) reads file
    pub reverse_reads_path: PathBuf,
    /// Raw, non-blank parameter cells keyed by column name
    pub parameters: BTreeMap<String, String>,
    /// Zero-based position in the manifest
    pub position: usize,
    /// Line of the row in the manifest file
    pub line: u64,
}

impl SampleDescriptor {
    /// Create a descriptor without parameter overrides
    pub fn new(
        sample_id: impl Into<String>,
        forward_reads_path: impl Into<PathBuf>,
        reverse_reads_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sample_id: sample_id.into(),
            forward_reads_path: forward_reads_path.into(),
            reverse_reads_path: reverse_reads_path.into(),
            parameters: BTreeMap::new(),
            position: 0,
            line: 0,
        }
    }

    /// Set a parameter override
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Set the manifest position
    pub fn at_position(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    /// Raw override for a parameter column, if one was given
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// Why `sample_id` cannot name an output directory, if it cannot.
///
/// Each sample gets `<output_dir>/<sample_id>_mt`, so an id must be a single
/// plain path component.
pub fn sample_id_problem(sample_id: &str) -> Option<String> {
    if sample_id.contains(['/', '\\']) {
        Some(format!("sample_id '{sample_id}' must not contain a path separator"))
    } else if sample_id == "." || sample_id == ".." {
        Some(format!("sample_id '{sample_id}' is not a valid directory name"))
    } else {
        None
    }
}

/// Load a manifest from a file
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load(path: impl AsRef<Path>) -> Result<Vec<SampleDescriptor>, ManifestError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let samples = parse(file)?;
    info!(samples = samples.len(), "Loaded sample manifest");
    Ok(samples)
}

/// Parse a manifest from any reader
pub fn parse<R: Read>(reader: R) -> Result<Vec<SampleDescriptor>, ManifestError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let columns = ColumnIndex::from_headers(csv_reader.headers()?)?;

    let mut samples = Vec::new();
    let mut seen: HashMap<String, u64> = HashMap::new();

    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        let sample_id = columns.required(&record, SAMPLE_ID, line)?;
        let forward = columns.required(&record, FORWARD_READS, line)?;
        let reverse = columns.required(&record, REVERSE_READS, line)?;

        if let Some(reason) = sample_id_problem(sample_id) {
            return Err(ManifestError::InvalidSampleId {
                line,
                sample_id: sample_id.to_string(),
                reason,
            });
        }

        if let Some(&first_line) = seen.get(sample_id) {
            return Err(ManifestError::DuplicateSampleId {
                line,
                sample_id: sample_id.to_string(),
                first_line,
            });
        }
        seen.insert(sample_id.to_string(), line);

        let parameters = PARAMETER_COLUMNS
            .iter()
            .filter_map(|&name| {
                columns
                    .optional(&record, name)
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();

        debug!(sample_id, line, "Parsed manifest row");

        samples.push(SampleDescriptor {
            sample_id: sample_id.to_string(),
            forward_reads_path: PathBuf::from(forward),
            reverse_reads_path: PathBuf::from(reverse),
            parameters,
            position: samples.len(),
            line,
        });
    }

    if samples.is_empty() {
        return Err(ManifestError::Empty);
    }

    Ok(samples)
}

/// Maps known column names to their header positions
struct ColumnIndex {
    positions: HashMap<&'static str, usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, ManifestError> {
        let mut positions = HashMap::new();

        for (idx, header) in headers.iter().enumerate() {
            let header = header.trim().to_ascii_lowercase();
            let known = REQUIRED_COLUMNS
                .iter()
                .chain(PARAMETER_COLUMNS.iter())
                .find(|&&name| name == header);

            if let Some(&name) = known {
                // First occurrence wins
                positions.entry(name).or_insert(idx);
            }
        }

        for column in REQUIRED_COLUMNS {
            if !positions.contains_key(column) {
                return Err(ManifestError::MissingColumn(column));
            }
        }

        Ok(Self { positions })
    }

    fn cell<'r>(&self, record: &'r csv::StringRecord, column: &str) -> Option<&'r str> {
        self.positions
            .get(column)
            .and_then(|&idx| record.get(idx))
            .filter(|value| !value.is_empty())
    }

    fn required<'r>(
        &self,
        record: &'r csv::StringRecord,
        column: &'static str,
        line: u64,
    ) -> Result<&'r str, ManifestError> {
        self.cell(record, column)
            .ok_or(ManifestError::EmptyField { line, column })
    }

    fn optional<'r>(&self, record: &'r csv::StringRecord, column: &str) -> Option<&'r str> {
        self.cell(record, column)
    }
}
