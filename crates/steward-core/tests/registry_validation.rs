//! Integration tests for registry loading and repository validation.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use steward_core::validate::validate_repo;
use steward_core::{Registry, StewardError, Tier};

fn write(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn registry_file(root: &Path, payload: Value) -> PathBuf {
    let path = root.join("data/registry/systems.json");
    write(&path, &payload.to_string());
    path
}

fn lines(err: StewardError) -> Vec<String> {
    assert_eq!(err.code(), "REGISTRY_INVALID");
    err.registry_lines()
}

fn row(id: &str, deps: Value) -> Value {
    json!({
        "system_id": id,
        "contracts_glob": "data/contracts/*.json",
        "events_glob": "data/events/*.jsonl",
        "depends_on": deps,
    })
}

// ---- Structural errors ----

#[test]
fn missing_and_unparsable_registry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data/registry/systems.json");
    let missing = lines(Registry::load(&path).unwrap_err());
    assert!(missing[0].starts_with("REGISTRY_MISSING: "));

    write(&path, "{not json");
    let parse = lines(Registry::load(&path).unwrap_err());
    assert!(parse[0].starts_with("REGISTRY_PARSE_ERROR: "));

    write(&path, "42");
    let schema = lines(Registry::load(&path).unwrap_err());
    assert!(schema[0].starts_with("REGISTRY_SCHEMA_INVALID: "));
}

#[test]
fn list_and_object_payloads_are_equivalent() {
    let dir = tempfile::tempdir().unwrap();
    let a = registry_file(dir.path(), json!([row("svc", json!([]))]));
    let from_list = Registry::load(&a).unwrap();
    let b = registry_file(dir.path(), json!({"systems": [row("svc", json!([]))]}));
    let from_object = Registry::load(&b).unwrap();
    assert_eq!(from_list.systems(), from_object.systems());
    assert_eq!(from_list.systems()[0].tier, Tier::Prod);
}

#[test]
fn every_structural_error_is_collected_and_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let mut bad_tier = row("web", json!([]));
    bad_tier["tier"] = json!("qa");
    let path = registry_file(
        dir.path(),
        json!([
            row("api", json!(["ghost"])),
            row("api", json!([])),
            bad_tier,
            row("jobs", json!("core")),
            {"system_id": "", "contracts_glob": "x", "events_glob": "y"},
        ]),
    );
    let got = lines(Registry::load(&path).unwrap_err());
    assert_eq!(
        got,
        vec![
            "REGISTRY_DEPENDENCY_INVALID: jobs",
            "REGISTRY_DEPENDENCY_MISSING: api: ghost",
            "REGISTRY_DUPLICATE_SYSTEM_ID: api",
            "REGISTRY_SCHEMA_INVALID: row[4] missing system_id",
            "REGISTRY_TIER_INVALID: web: qa",
        ]
    );
}

#[test]
fn cycle_reports_closed_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = registry_file(
        dir.path(),
        json!([
            row("a", json!(["b"])),
            row("b", json!(["c"])),
            row("c", json!(["a"])),
            row("d", json!(["a"])),
        ]),
    );
    let got = lines(Registry::load(&path).unwrap_err());
    assert_eq!(got, vec!["REGISTRY_CYCLE_DETECTED: a -> b -> c -> a"]);
}

#[test]
fn dependencies_are_trimmed_and_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let path = registry_file(
        dir.path(),
        json!([row("core", json!([])), row("api", json!([" core ", "core", ""]))]),
    );
    let registry = Registry::load(&path).unwrap();
    assert_eq!(registry.get("api").unwrap().depends_on, vec!["core"]);
    assert_eq!(registry.root(), dir.path());
}

// ---- Content validation ----

fn content_repo(root: &Path) -> PathBuf {
    write(
        &root.join("data/primitives/schemas/event.json"),
        r#"{"type": "object"}"#,
    );
    registry_file(root, json!([row("svc", json!([]))]))
}

#[test]
fn valid_repository_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let registry = content_repo(dir.path());
    write(
        &dir.path().join("data/contracts/svc.json"),
        &json!({
            "contract_id": "svc-1",
            "system_id": "svc",
            "name": "Svc",
            "primitives_used": [],
            "invariants": [],
        })
        .to_string(),
    );
    write(
        &dir.path().join("data/events/svc.jsonl"),
        "{\"ts\": \"2026-02-01T00:00:00Z\"}\n\n",
    );
    let report = validate_repo(&registry).unwrap();
    assert!(report.ok, "{:?}", report.errors);
    assert_eq!(report.status_line(), "VALIDATE_OK");
}

#[test]
fn content_errors_are_reported_with_codes() {
    let dir = tempfile::tempdir().unwrap();
    let registry = content_repo(dir.path());
    write(&dir.path().join("data/contracts/svc.json"), r#"{"contract_id": "svc-1"}"#);
    write(
        &dir.path().join("data/events/svc.jsonl"),
        "{\"ts\": \"yesterday\"}\n{\"event_type\": \"x\"}\nnope\n",
    );
    write(&dir.path().join("data/primitives/schemas/bad.json"), "[]");

    let report = validate_repo(&registry).unwrap();
    assert!(!report.ok);
    let codes: Vec<&str> = report
        .errors
        .iter()
        .map(|e| e.split(':').next().unwrap())
        .collect();
    for expected in [
        "CONTRACT_MISSING_FIELD",
        "EVENT_TS_UNPARSABLE",
        "EVENT_TS_MISSING",
        "EVENT_PARSE_ERROR",
        "SCHEMA_PARSE_ERROR",
    ] {
        assert!(codes.contains(&expected), "missing {expected} in {codes:?}");
    }
    let mut sorted = report.errors.clone();
    sorted.sort();
    assert_eq!(sorted, report.errors);
}

#[test]
fn unmatched_globs_and_broken_registry_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let registry = content_repo(dir.path());
    let report = validate_repo(&registry).unwrap();
    assert!(report
        .errors
        .contains(&"GLOB_NO_MATCH: svc: contracts_glob -> data/contracts/*.json".to_string()));

    registry_file(dir.path(), json!([row("a", json!(["missing"]))]));
    let report = validate_repo(&registry).unwrap();
    assert_eq!(report.errors, vec!["REGISTRY_DEPENDENCY_MISSING: a: missing"]);
}
