mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, fixture_path};
use csv_import::{audit::AuditRecord, store::MemoryStore};
use predicates::prelude::PredicateBooleanExt;
use predicates::str::{contains, is_match};

fn csv_import() -> Command {
    Command::cargo_bin("csv-import").expect("binary exists")
}

#[test]
fn import_prints_run_log_and_persists_store() {
    let workspace = TestWorkspace::new();
    let store = workspace.store_path();
    csv_import()
        .args(["import", "-i"])
        .arg(fixture_path("people.csv"))
        .arg("--catalog")
        .arg(fixture_path("catalog.yaml"))
        .args(["--model", "crm.Person", "--store"])
        .arg(&store)
        .assert()
        .success()
        .stdout(
            contains("Assumed charset = UTF-8")
                .and(contains("Using mapping from first row of CSV file"))
                .and(contains("Columns = 'name', 'age'"))
                .and(contains("row 1: Column age = notanumber is not a number so is set to 0"))
                .and(contains("Imported 2 rows to Person")),
        );

    let saved = MemoryStore::load(&store).expect("store written");
    assert_eq!(saved.count("crm.Person"), 2);
}

#[test]
fn repeated_import_with_deduplicate_adds_nothing() {
    let workspace = TestWorkspace::new();
    let store = workspace.store_path();
    let input = workspace.write("people.csv", "Alice,Acme\nBob,Acme\n");
    for expected in ["Imported 2 rows to Person", "Imported 0 rows to Person"] {
        csv_import()
            .args(["import", "-i"])
            .arg(&input)
            .arg("--catalog")
            .arg(fixture_path("catalog.yaml"))
            .args([
                "--model",
                "Person",
                "--mappings",
                "column1=name,column2=owner(Organisation|title)",
                "--deduplicate",
                "--store",
            ])
            .arg(&store)
            .assert()
            .success()
            .stdout(contains(expected));
    }
    let saved = MemoryStore::load(&store).unwrap();
    assert_eq!(saved.count("crm.Person"), 2);
    assert_eq!(saved.count("crm.Organisation"), 1);
}

#[test]
fn audit_log_flag_appends_json_lines() {
    let workspace = TestWorkspace::new();
    let audit = workspace.path().join("audit.jsonl");
    for _ in 0..2 {
        csv_import()
            .args(["import", "-i"])
            .arg(fixture_path("people.csv"))
            .arg("--catalog")
            .arg(fixture_path("catalog.yaml"))
            .args(["--model", "Person", "--audit-log"])
            .arg(&audit)
            .arg("--settings")
            .arg(fixture_path("settings.yaml"))
            .assert()
            .success();
    }
    let contents = fs::read_to_string(&audit).unwrap();
    let records = contents
        .lines()
        .map(|line| serde_json::from_str::<AuditRecord>(line).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].import_user, "nightly");
    assert_eq!(records[0].upload_method, "scheduler");
    assert!(records[0].error_log.contains("row 1: Column age"));
}

#[test]
fn missing_input_fails_with_message() {
    csv_import()
        .args(["import", "-i", "/definitely/not/here.csv"])
        .arg("--catalog")
        .arg(fixture_path("catalog.yaml"))
        .args(["--model", "Person"])
        .assert()
        .failure()
        .stderr(contains("File /definitely/not/here.csv not found"));
}

#[test]
fn unknown_model_fails_with_message() {
    csv_import()
        .args(["import", "-i"])
        .arg(fixture_path("people.csv"))
        .arg("--catalog")
        .arg(fixture_path("catalog.yaml"))
        .args(["--model", "crm.Invoice"])
        .assert()
        .failure()
        .stderr(contains("crm.Invoice"));
}

#[test]
fn fields_lists_catalog_entity() {
    csv_import()
        .arg("fields")
        .arg("--catalog")
        .arg(fixture_path("catalog.yaml"))
        .args(["--model", "person"])
        .assert()
        .success()
        .stdout(
            contains("crm.Person")
                .and(contains("non-negative"))
                .and(contains("foreign-key  Organisation")),
        );
}

#[test]
fn mapping_shows_resolved_columns_without_importing() {
    let workspace = TestWorkspace::new();
    let store = workspace.store_path();
    csv_import()
        .args(["mapping", "-i"])
        .arg(fixture_path("people_crlf.csv"))
        .arg("--catalog")
        .arg(fixture_path("catalog.yaml"))
        .args([
            "--model",
            "Person",
            "--mappings",
            "Full_Name=name,Company=owner(Organisation|title)",
            "--use-header-as-index",
        ])
        .assert()
        .success()
        .stdout(
            is_match(r"Full_Name\s+1\s+name")
                .unwrap()
                .and(is_match(r"Company\s+3\s+owner\s+\(Organisation\|title\)").unwrap()),
        );
    assert!(!store.exists());
}

#[test]
fn mapping_leaves_name_locators_unplaced_without_header_index() {
    csv_import()
        .args(["mapping", "-i"])
        .arg(fixture_path("people_crlf.csv"))
        .arg("--catalog")
        .arg(fixture_path("catalog.yaml"))
        .args(["--model", "Person", "--mappings", "Full_Name=name,column2=age"])
        .assert()
        .success()
        .stdout(
            is_match(r"Full_Name\s+-\s+name")
                .unwrap()
                .and(is_match(r"column2\s+2\s+age").unwrap()),
        );
}
