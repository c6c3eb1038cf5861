//! Manifest loading tests

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use common::{write_manifest, ScriptedAssembler};
use mitobatch::batch::Dispatcher;
use mitobatch::manifest::{self, ManifestError};

#[test]
fn test_load_manifest_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_manifest(dir.path(), &["Mus_01", "Mus_02", "Rattus_01"]);

    let samples = manifest::load(&path).unwrap();

    let ids: Vec<_> = samples.iter().map(|s| s.sample_id.as_str()).collect();
    assert_eq!(ids, vec!["Mus_01", "Mus_02", "Rattus_01"]);
    assert_eq!(samples[2].position, 2);
    assert_eq!(samples[0].forward_reads_path, dir.path().join("Mus_01_R1.fastq"));
    assert_eq!(samples[0].line, 2);
}

#[test]
fn test_load_missing_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let err = manifest::load(dir.path().join("nope.csv")).unwrap_err();

    assert!(matches!(err, ManifestError::Io { .. }));
    assert!(err.to_string().contains("nope.csv"));
}

#[test]
fn test_load_with_overrides_and_extra_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.csv");
    std::fs::write(
        &path,
        "# plants and animals\n\
         Sample_ID,Forward_Reads_Path,Reverse_Reads_Path,Organelle_Type,notes\n\
         leaf1,leaf1_1.fq.gz,leaf1_2.fq.gz,embplant_pt,field sample\n\
         fish1,fish1_1.fq.gz,fish1_2.fq.gz,,\n",
    )
    .unwrap();

    let samples = manifest::load(&path).unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].parameter("organelle_type"), Some("embplant_pt"));
    assert_eq!(samples[1].parameter("organelle_type"), None);
}

#[test]
fn test_ids_naming_the_same_directory_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.csv");
    std::fs::write(
        &path,
        "sample_id,forward_reads_path,reverse_reads_path\n\
         x,x_1.fq,x_2.fq\n\
         ./x,y_1.fq,y_2.fq\n",
    )
    .unwrap();

    let err = manifest::load(&path).unwrap_err();
    assert!(
        matches!(&err, ManifestError::InvalidSampleId { line: 3, sample_id, .. } if sample_id == "./x"),
        "unexpected error: {err}"
    );
    assert!(err.to_string().contains("path separator"));
}

#[test]
fn test_header_only_manifest_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.csv");
    std::fs::write(&path, "sample_id,forward_reads_path,reverse_reads_path\n").unwrap();

    assert!(matches!(manifest::load(&path), Err(ManifestError::Empty)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_well_formed_rows_all_validate(count in 1usize..12) {
        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<String> = (0..count).map(|i| format!("sample_{i:03}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let path = write_manifest(dir.path(), &id_refs);

        let samples = manifest::load(&path).unwrap();
        prop_assert_eq!(samples.len(), count);
        for (position, sample) in samples.iter().enumerate() {
            prop_assert_eq!(sample.position, position);
            prop_assert_eq!(&sample.sample_id, &ids[position]);
        }

        let dispatcher = Dispatcher::new(Arc::new(ScriptedAssembler::new()), dir.path().join("output"));
        let validation = dispatcher.validate(samples);
        prop_assert_eq!(validation.valid.len(), count);
        prop_assert!(validation.rejected.is_empty());
    }

    #[test]
    fn prop_duplicate_ids_are_rejected(count in 2usize..8, dup in 1usize..8) {
        let dup = dup % count;
        let mut csv = String::from("sample_id,forward_reads_path,reverse_reads_path\n");
        for i in 0..count {
            csv.push_str(&format!("s{i},s{i}_1.fq,s{i}_2.fq\n"));
        }
        csv.push_str(&format!("s{dup},x_1.fq,x_2.fq\n"));

        let err = manifest::parse(csv.as_bytes()).unwrap_err();
        match err {
            ManifestError::DuplicateSampleId { sample_id, first_line, line } => {
                prop_assert_eq!(sample_id, format!("s{dup}"));
                prop_assert_eq!(first_line, dup as u64 + 2);
                prop_assert_eq!(line, count as u64 + 2);
            }
            other => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}
