// SPDX-License-Identifier: MIT OR Apache-2.0

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn stylerag() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("stylerag"))
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn write_hash_config(root: &Path) {
    write_file(
        &root.join(".styleragrc.toml"),
        r#"
[segmenter]
min_chunk_tokens = 12
max_chunk_tokens = 24
chunk_overlap = 3

[embeddings]
provider = "hash"
dimension = 128
max_retries = 0

[retrieval]
k_target = 5
k_min = 1
"#,
    );
}

fn write_rules(root: &Path) {
    write_file(
        &root.join("rules").join("party-boho.md"),
        "Flowing maxi dresses and fringe bags define a boho party look for warm summer evenings.\n\n\
         Add layered necklaces and woven sandals so the summer party outfit feels relaxed and bohemian.\n",
    );
    write_file(
        &root.join("rules").join("office-classic.txt"),
        "A tailored blazer over a crisp shirt keeps office outfits classic and polished.\n\n\
         Choose neutral trousers and loafers for a timeless work wardrobe in winter.\n",
    );
}

fn seeded_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_hash_config(dir.path());
    write_rules(dir.path());
    stylerag()
        .current_dir(dir.path())
        .args(["ingest", "rules", "--quiet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("from 2 of 2 documents"));
    dir
}

fn json_stdout(dir: &Path, args: &[&str]) -> Value {
    let assert = stylerag()
        .current_dir(dir)
        .arg("--format")
        .arg("json")
        .args(args)
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn retrieve_returns_matching_passages_as_json() {
    let dir = seeded_dir();

    let json = json_stdout(
        dir.path(),
        &[
            "retrieve",
            "--occasion",
            "Party",
            "--style",
            "boho",
            "--season",
            "summer",
            "--provenance",
        ],
    );

    let passages = json["passages"].as_array().unwrap();
    assert_eq!(passages.len(), 2);
    let provenance = json["provenance"].as_array().unwrap();
    assert!(provenance
        .iter()
        .all(|p| p["source"] == "party-boho.md"));
    assert!(provenance
        .iter()
        .all(|p| p["confidence"].as_f64().unwrap() > 0.5));
    assert_eq!(json["applied_filter"]["occasion"], "party");
    assert_eq!(json["applied_filter"]["style_type"], "boho");
    assert!(json["dropped_facets"].as_array().unwrap().is_empty());
}

#[test]
fn retrieve_reports_relaxed_filter_in_text_mode() {
    let dir = seeded_dir();

    stylerag()
        .current_dir(dir.path())
        .env("NO_COLOR", "1")
        .args(["retrieve", "--occasion", "party", "--season", "winter"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Filter: occasion=party (relaxed: season)"))
        .stdout(predicate::str::contains("bohemian"));
}

#[test]
fn retrieve_profile_file() {
    let dir = seeded_dir();
    write_file(
        &dir.path().join("profile.json"),
        r#"{"occasion": "Office", "style": "classic", "gender": "Prefer not to say"}"#,
    );

    let json = json_stdout(
        dir.path(),
        &["retrieve", "--profile", "profile.json", "--provenance"],
    );
    let provenance = json["provenance"].as_array().unwrap();
    assert!(!provenance.is_empty());
    assert!(provenance
        .iter()
        .all(|p| p["source"] == "office-classic.txt"));
    assert!(json["applied_filter"].get("gender").is_none());
}

#[test]
fn retrieve_rejects_unknown_profile_value() {
    let dir = seeded_dir();
    stylerag()
        .current_dir(dir.path())
        .args(["retrieve", "--style", "cyberpunk"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("validation error"));
}

#[test]
fn stats_delete_and_clear() {
    let dir = seeded_dir();

    let stats = json_stdout(dir.path(), &["stats"]);
    assert_eq!(stats["chunks"], 4);
    assert_eq!(stats["sources"], 2);
    assert_eq!(stats["model_id"], "hash-v1");
    assert_eq!(stats["dimension"], 128);

    stylerag()
        .current_dir(dir.path())
        .args(["delete", "party-boho.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 2 chunks"));

    stylerag()
        .current_dir(dir.path())
        .args(["clear"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));

    stylerag()
        .current_dir(dir.path())
        .args(["clear", "--yes"])
        .assert()
        .success();

    let stats = json_stdout(dir.path(), &["stats"]);
    assert_eq!(stats["chunks"], 0);
    assert!(stats["model_id"].is_null());
}

#[test]
fn ingest_records_reports_each_document() {
    let dir = TempDir::new().unwrap();
    write_hash_config(dir.path());
    write_file(
        &dir.path().join("records.json"),
        r#"[
  {"source": "good", "text": "Pastel knits work for spring weekends.", "hints": {"season": "spring"}},
  {"source": "bad", "text": "Rain boots for wet days.", "hints": {"season": "monsoon"}}
]"#,
    );

    stylerag()
        .current_dir(dir.path())
        .env("NO_COLOR", "1")
        .args(["ingest", "records.json", "--quiet"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed bad"))
        .stdout(predicate::str::contains("from 1 of 2 documents"));

    let stats = json_stdout(dir.path(), &["stats"]);
    assert_eq!(stats["sources"], 1);
}

#[test]
fn ingest_single_file_with_hints() {
    let dir = TempDir::new().unwrap();
    write_hash_config(dir.path());
    write_file(&dir.path().join("note.txt"), "Linen shirts breathe well.");

    stylerag()
        .current_dir(dir.path())
        .args([
            "ingest", "note.txt", "--source", "linen", "--hint", "season=summer", "--quiet",
        ])
        .assert()
        .success();

    let json = json_stdout(dir.path(), &["retrieve", "--season", "summer", "--provenance"]);
    assert_eq!(json["provenance"][0]["source"], "linen");
}

#[test]
fn min_confidence_holds_back_bare_rules() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join(".styleragrc.toml"),
        "[embeddings]\nprovider = \"hash\"\n\n[index]\nmin_confidence = 0.45\n",
    );
    write_file(&dir.path().join("note.txt"), "Linen shirts breathe well.");

    stylerag()
        .current_dir(dir.path())
        .env("NO_COLOR", "1")
        .args(["ingest", "note.txt", "--quiet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ingested 0 chunks from 1 of 1 documents"))
        .stdout(predicate::str::contains("1 chunks held back below min_confidence"));

    let stats = json_stdout(dir.path(), &["stats"]);
    assert_eq!(stats["chunks"], 0);
}

#[test]
fn invalid_config_is_fatal() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join(".styleragrc.toml"),
        "[segmenter]\nchunk_overlap = 0\n",
    );

    stylerag()
        .current_dir(dir.path())
        .args(["stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn vocabulary_lists_facets() {
    let dir = TempDir::new().unwrap();
    write_hash_config(dir.path());

    stylerag()
        .current_dir(dir.path())
        .env("NO_COLOR", "1")
        .args(["vocabulary"])
        .assert()
        .success()
        .stdout(predicate::str::contains("style_type:"))
        .stdout(predicate::str::contains("boho"));

    let json = json_stdout(dir.path(), &["vocabulary"]);
    assert_eq!(json["version"], "builtin-1");
    assert!(json["facets"]["season"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "summer"));
}

#[test]
fn completions_need_no_config() {
    stylerag()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stylerag"));
}
