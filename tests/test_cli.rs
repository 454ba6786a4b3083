
use fixtures::*;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use std::fs::{self, File};
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

fn phive_dump() -> Command {
    Command::new(assert_cmd::cargo_bin!("phive_dump"))
}

#[test]
fn test_info_prints_json_summary() {
    let d = tempdir().unwrap();
    let sample = write_sample(d.path(), "cloth.bphcl", &cloth_file());

    let output = phive_dump()
        .args(["info", sample.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["sdk_version"], "20220100");
    assert_eq!(summary["relocations"], 4);
    assert_eq!(summary["file_type"], "Cloth");
    assert_eq!(
        summary["sections"],
        serde_json::json!(["SDKV", "DATA", "TYPE", "INDX"])
    );
}

#[test]
fn test_types_and_roots() {
    let d = tempdir().unwrap();
    let sample = write_sample(d.path(), "cloth.bphcl", &cloth_file());

    phive_dump()
        .args(["types", sample.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("hkRootLevelContainer"))
        .stdout(predicate::str::contains("\"Array\""));

    phive_dump()
        .args(["roots", sample.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"class_name\": \"hclClothContainer\""))
        .stdout(predicate::str::contains("\"offset\": 72"));
}

#[test]
fn test_check_passes_on_canonical_file() {
    let d = tempdir().unwrap();
    let sample = write_sample(d.path(), "cloth.bphcl", &cloth_file());

    phive_dump()
        .args(["check", sample.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"reserialized_identical\": true"));
}

#[test]
fn test_check_fails_when_layout_is_not_canonical() {
    let d = tempdir().unwrap();
    let mut bytes = cloth_file();
    // Trailing bytes past the last blob are not reproduced.
    bytes.extend_from_slice(&[0; 16]);
    let sample = write_sample(d.path(), "padded.bphcl", &bytes);

    phive_dump()
        .args(["check", sample.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("\"reserialized_identical\": false"));
}

#[test]
fn test_malformed_input_fails_without_output() {
    let d = tempdir().unwrap();
    let mut bytes = cloth_file();
    bytes.truncate(100);
    let sample = write_sample(d.path(), "broken.bphcl", &bytes);

    phive_dump()
        .args(["info", sample.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_extract_data_writes_resolved_and_stored_forms() {
    let d = tempdir().unwrap();
    let sample = write_sample(d.path(), "cloth.bphcl", &cloth_file());
    let resolved = d.path().join("out").join("resolved.bin");
    let stored = d.path().join("stored.bin");

    phive_dump()
        .args([
            "extract-data",
            sample.to_str().unwrap(),
            "--output",
            resolved.to_str().unwrap(),
        ])
        .assert()
        .success();
    let data = fs::read(&resolved).unwrap();
    assert_eq!(data.len(), stored_data().len());
    assert_eq!(&data[..8], &16_i64.to_le_bytes());

    phive_dump()
        .args([
            "extract-data",
            "--stored",
            "-f",
            stored.to_str().unwrap(),
            sample.to_str().unwrap(),
        ])
        .assert()
        .success();
    assert_eq!(fs::read(&stored).unwrap(), stored_data());
}

#[test]
fn test_extract_data_requires_output() {
    let d = tempdir().unwrap();
    let sample = write_sample(d.path(), "cloth.bphcl", &cloth_file());

    phive_dump()
        .args(["extract-data", sample.to_str().unwrap()])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_it_refuses_to_overwrite_directory() {
    let d = tempdir().unwrap();
    let sample = write_sample(d.path(), "cloth.bphcl", &cloth_file());

    phive_dump()
        .args([
            "info",
            "-f",
            &d.path().to_string_lossy(),
            sample.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_it_overwrites_file_anyways_if_passed_flag() {
    let d = tempdir().unwrap();
    let sample = write_sample(d.path(), "cloth.bphcl", &cloth_file());
    let f = d.path().join("info.json");

    let mut file = File::create(&f).unwrap();
    file.write_all(b"I'm a file!").unwrap();

    phive_dump()
        .args([
            "info",
            "-f",
            &f.to_string_lossy(),
            "--no-confirm-overwrite",
            sample.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let written = fs::read_to_string(&f).unwrap();
    assert!(written.contains("\"sdk_version\": \"20220100\""));
}

#[test]
fn test_file_type_can_be_relaxed() {
    let d = tempdir().unwrap();
    let bytes = phive_file_with(&tag_file_with(b"20220100"), phive::FileType::NavMesh);
    let sample = write_sample(d.path(), "navmesh.bphnm", &bytes);

    phive_dump()
        .args(["info", sample.to_str().unwrap()])
        .assert()
        .failure()
        .code(1);

    phive_dump()
        .args(["info", "--file-type", "any", sample.to_str().unwrap()])
        .assert()
        .success();
}
