//! Assembler parameters and their validation.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::manifest::{SampleDescriptor, EXTENSION_ROUNDS, K_MERS, ORGANELLE_TYPE, THREADS};

/// Default k-mer list passed to `-k`
pub const DEFAULT_K_MERS: &str = "21,45,65,85,105";
/// Default number of extension rounds passed to `-R`
pub const DEFAULT_EXTENSION_ROUNDS: u32 = 15;
/// Default organelle type passed to `-F`
pub const DEFAULT_ORGANELLE_TYPE: &str = "animal_mt";
/// Default assembler thread count passed to `-t`
pub const DEFAULT_THREADS: u32 = 4;

/// Organelle types the assembler accepts for `-F`
pub const KNOWN_ORGANELLE_TYPES: [&str; 8] = [
    "embplant_pt",
    "other_pt",
    "embplant_mt",
    "embplant_nr",
    "animal_mt",
    "fungus_mt",
    "fungus_nr",
    "anonym",
];

/// Largest k-mer the underlying assembler supports
pub const MAX_K_MER: u32 = 127;

lazy_static! {
    static ref K_MER_LIST: Regex = Regex::new(r"^\d+(,\d+)*$").expect("valid k-mer regex");
}

/// Fully resolved parameter set for one assembler invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyParameters {
    /// Comma-separated k-mer list
    pub k_mers: String,
    /// Number of read extension rounds
    pub extension_rounds: u32,
    /// Organelle type, or a comma-separated list of types
    pub organelle_type: String,
    /// Threads given to the assembler
    pub threads: u32,
}

impl Default for AssemblyParameters {
    fn default() -> Self {
        Self {
            k_mers: DEFAULT_K_MERS.to_string(),
            extension_rounds: DEFAULT_EXTENSION_ROUNDS,
            organelle_type: DEFAULT_ORGANELLE_TYPE.to_string(),
            threads: DEFAULT_THREADS,
        }
    }
}

impl AssemblyParameters {
    /// Apply a sample's manifest overrides on top of these defaults.
    ///
    /// Every problem found is returned, not just the first one.
    pub fn resolve(&self, sample: &SampleDescriptor) -> Result<Self, Vec<String>> {
        let mut resolved = self.clone();
        let mut problems = Vec::new();

        if let Some(raw) = sample.parameter(THREADS) {
            match parse_positive(THREADS, raw) {
                Ok(threads) => resolved.threads = threads,
                Err(problem) => problems.push(problem),
            }
        }

        if let Some(raw) = sample.parameter(EXTENSION_ROUNDS) {
            match parse_positive(EXTENSION_ROUNDS, raw) {
                Ok(rounds) => resolved.extension_rounds = rounds,
                Err(problem) => problems.push(problem),
            }
        }

        if let Some(raw) = sample.parameter(K_MERS) {
            resolved.k_mers = normalize_list(raw);
        }

        if let Some(raw) = sample.parameter(ORGANELLE_TYPE) {
            resolved.organelle_type = normalize_list(raw);
        }

        problems.extend(resolved.check());

        if problems.is_empty() {
            Ok(resolved)
        } else {
            Err(problems)
        }
    }

    /// Sanity-check the parameter values, returning one message per problem
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.threads == 0 {
            problems.push("threads must be greater than 0".to_string());
        }
        if self.extension_rounds == 0 {
            problems.push("extension_rounds must be greater than 0".to_string());
        }

        problems.extend(check_k_mers(&self.k_mers));
        problems.extend(check_organelle_type(&self.organelle_type));
        problems
    }
}

fn parse_positive(column: &str, raw: &str) -> Result<u32, String> {
    match raw.parse::<u32>() {
        Ok(0) => Err(format!("{column} must be greater than 0")),
        Ok(value) => Ok(value),
        Err(_) => Err(format!("invalid {column} '{raw}': expected a positive integer")),
    }
}

fn normalize_list(raw: &str) -> String {
    raw.split(',')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(",")
}

fn check_k_mers(k_mers: &str) -> Vec<String> {
    if !K_MER_LIST.is_match(k_mers) {
        return vec![format!(
            "invalid k-mer list '{k_mers}': expected comma-separated integers"
        )];
    }

    let mut problems = Vec::new();
    for k in k_mers.split(',') {
        match k.parse::<u32>() {
            Ok(k) if k > MAX_K_MER => {
                problems.push(format!("k-mer {k} exceeds maximum of {MAX_K_MER}"))
            }
            Ok(k) if k % 2 == 0 => problems.push(format!("k-mer {k} must be odd")),
            Ok(_) => {}
            Err(_) => problems.push(format!("k-mer '{k}' is out of range")),
        }
    }
    problems
}

fn check_organelle_type(organelle_type: &str) -> Vec<String> {
    organelle_type
        .split(',')
        .filter(|kind| !KNOWN_ORGANELLE_TYPES.contains(kind))
        .map(|kind| {
            format!(
                "unknown organelle type '{kind}' (expected one of {})",
                KNOWN_ORGANELLE_TYPES.join(", ")
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> SampleDescriptor {
        SampleDescriptor::new("s1", "a.fq", "b.fq")
    }

    #[test]
    fn test_defaults_are_valid() {
        let params = AssemblyParameters::default();
        assert!(params.check().is_empty());
    }

    #[test]
    fn test_resolve_without_overrides_keeps_defaults() {
        let defaults = AssemblyParameters::default();
        assert_eq!(defaults.resolve(&sample()).unwrap(), defaults);
    }

    #[test]
    fn test_resolve_applies_overrides() {
        let sample = sample()
            .with_parameter(THREADS, "12")
            .with_parameter(EXTENSION_ROUNDS, "10")
            .with_parameter(K_MERS, "21, 55 ,85")
            .with_parameter(ORGANELLE_TYPE, "embplant_pt,embplant_mt");

        let resolved = AssemblyParameters::default().resolve(&sample).unwrap();
        assert_eq!(resolved.threads, 12);
        assert_eq!(resolved.extension_rounds, 10);
        assert_eq!(resolved.k_mers, "21,55,85");
        assert_eq!(resolved.organelle_type, "embplant_pt,embplant_mt");
    }

    #[test]
    fn test_resolve_collects_every_problem() {
        let sample = sample()
            .with_parameter(THREADS, "0")
            .with_parameter(EXTENSION_ROUNDS, "many")
            .with_parameter(K_MERS, "21,40,131")
            .with_parameter(ORGANELLE_TYPE, "plastid");

        let problems = AssemblyParameters::default().resolve(&sample).unwrap_err();
        assert_eq!(
            problems,
            vec![
                "threads must be greater than 0".to_string(),
                "invalid extension_rounds 'many': expected a positive integer".to_string(),
                "k-mer 40 must be odd".to_string(),
                "k-mer 131 exceeds maximum of 127".to_string(),
                format!(
                    "unknown organelle type 'plastid' (expected one of {})",
                    KNOWN_ORGANELLE_TYPES.join(", ")
                ),
            ]
        );
    }

    #[test]
    fn test_malformed_k_mer_list() {
        let params = AssemblyParameters {
            k_mers: "21;45".to_string(),
            ..Default::default()
        };
        assert_eq!(
            params.check(),
            vec!["invalid k-mer list '21;45': expected comma-separated integers".to_string()]
        );
    }

    #[test]
    fn test_negative_threads_rejected() {
        let sample = sample().with_parameter(THREADS, "-2");
        let problems = AssemblyParameters::default().resolve(&sample).unwrap_err();
        assert_eq!(problems, vec!["invalid threads '-2': expected a positive integer".to_string()]);
    }
}
