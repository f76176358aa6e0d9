use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

use super::fixture::{MANUAL, RECIPE};

fn docseek(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("docseek").unwrap();
    cmd.env("HOME", dir.path())
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("DOCSEEK_CONFIG")
        .arg("--data-dir")
        .arg(dir.path().join("data"));
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn write_docs(dir: &TempDir) -> std::path::PathBuf {
    let docs = dir.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("manual.txt"), MANUAL).unwrap();
    std::fs::write(docs.join("recipe.md"), RECIPE).unwrap();
    docs
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("docseek").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("docseek").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_ingest_search_delete_workflow() {
    let dir = TempDir::new().unwrap();
    let docs = write_docs(&dir);

    let ingested = json_stdout(docseek(&dir).args(["--json", "ingest"]).arg(&docs));
    assert_eq!(ingested["status"], "ok");
    assert_eq!(ingested["data"]["documents"].as_array().unwrap().len(), 2);

    let found = json_stdout(docseek(&dir).args(["--json", "search", "dishwasher warranty"]));
    let results = found["data"]["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["document_id"], "manual.txt");

    let stats = json_stdout(docseek(&dir).args(["--json", "stats"]));
    assert_eq!(stats["data"]["document_count"], 2);
    assert_eq!(stats["data"]["cache_size"], 1);

    let deleted = json_stdout(docseek(&dir).args(["--json", "delete", "manual.txt"]));
    assert_eq!(deleted["data"]["document_id"], "manual.txt");

    let after = json_stdout(docseek(&dir).args(["--json", "search", "dishwasher warranty"]));
    let results = after["data"]["results"].as_array().unwrap();
    assert!(results.iter().all(|r| r["document_id"] != "manual.txt"));
}

#[test]
fn test_search_after_new_ingest_sees_new_document() {
    let dir = TempDir::new().unwrap();
    let docs = dir.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("a.txt"), MANUAL).unwrap();
    std::fs::write(
        docs.join("b.txt"),
        "Dishwasher rinse aid. Refill the dishwasher monthly. Dishwasher salt too.",
    )
    .unwrap();

    let document_ids = |json: &Value| -> Vec<String> {
        json["data"]["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["document_id"].as_str().unwrap().to_string())
            .collect()
    };

    json_stdout(docseek(&dir).args(["--json", "ingest"]).arg(docs.join("a.txt")));
    let before = json_stdout(docseek(&dir).args(["--json", "search", "dishwasher"]));
    let ids = document_ids(&before);
    assert!(!ids.is_empty());
    assert!(ids.iter().all(|id| id == "a.txt"));

    json_stdout(docseek(&dir).args(["--json", "ingest"]).arg(docs.join("b.txt")));
    let after = json_stdout(docseek(&dir).args(["--json", "search", "dishwasher"]));
    let ids = document_ids(&after);
    assert!(ids.contains(&"b.txt".to_string()), "stale results after ingest: {ids:?}");
}

#[test]
fn test_delete_unknown_document_reports_structured_error() {
    let dir = TempDir::new().unwrap();
    let output = docseek(&dir)
        .args(["--json", "delete", "missing"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["status"]["error"]["code"], "DOCUMENT_NOT_FOUND");
    assert_eq!(json["status"]["error"]["context"]["document_id"], "missing");
}

#[test]
fn test_human_search_output() {
    let dir = TempDir::new().unwrap();
    let docs = write_docs(&dir);
    docseek(&dir)
        .args(["-q", "ingest"])
        .arg(docs.join("manual.txt"))
        .args(["--id", "manual"])
        .assert()
        .success();

    docseek(&dir)
        .args(["-q", "search", "dishwasher", "--bm25-only"])
        .env("NO_COLOR", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains("manual#0000"));
}

#[test]
fn test_bad_filter_is_rejected() {
    let dir = TempDir::new().unwrap();
    docseek(&dir)
        .args(["search", "dishwasher", "--filter", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not key=value"));
}

#[test]
fn test_reindex_reports_counts() {
    let dir = TempDir::new().unwrap();
    let docs = write_docs(&dir);
    docseek(&dir).arg("-q").arg("ingest").arg(&docs).assert().success();

    let reindexed = json_stdout(docseek(&dir).args(["--json", "reindex"]));
    assert_eq!(reindexed["data"]["chunks"], 2);
    assert_eq!(reindexed["data"]["embedded"], 0);
}
