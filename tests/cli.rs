use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn hkb_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hkb"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let kb = root.join("kb");
    fs::create_dir_all(kb.join("guides")).unwrap();
    fs::write(
        kb.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt covers cargo and crates.",
    )
    .unwrap();
    fs::write(
        kb.join("guides").join("beta.md"),
        "# Beta Guide\n\nPython notebooks and machine learning pipelines.",
    )
    .unwrap();
    fs::write(
        kb.join("gamma.txt"),
        "Gamma notes about deployment with Kubernetes and Docker.",
    )
    .unwrap();
    fs::write(kb.join("ignored.rs"), "fn main() {}").unwrap();

    let config_content = format!(
        r#"[kb]
root = "{root}/kb"
extensions = ["md", "txt"]

[index]
db_path = "{root}/data/hkb.sqlite"
versions_path = "{root}/data/versions.json"

[chunking]
chunk_size = 200
chunk_overlap = 40

[retrieval]
k = 3
threshold = 0.55
w_dense = 0.4
w_sparse = 0.6

[embedding]
provider = "hash"
dims = 128

[telemetry]
log_path = "{root}/data/telemetry.jsonl"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("hkb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_hkb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = hkb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run hkb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_hkb(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/hkb.sqlite").exists());

    let (_, stderr, ok) = run_hkb(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_scan_lists_allowed_extensions_only() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_hkb(&config, &["scan"]);
    assert!(ok, "scan failed: {}", stderr);
    assert!(stdout.contains("alpha.md"));
    assert!(stdout.contains("guides_beta.md"));
    assert!(stdout.contains("gamma.txt"));
    assert!(!stdout.contains("ignored.rs"));
    assert!(stdout.contains("3 documents"));
}

#[test]
fn test_ingest_then_reingest_is_noop() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_hkb(&config, &["ingest"]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("new: 3"), "unexpected output: {}", stdout);
    assert!(stdout.contains("ok"));

    let (stdout, stderr, ok) = run_hkb(&config, &["ingest"]);
    assert!(ok, "second ingest failed: {}", stderr);
    assert!(stdout.contains("new: 0"));
    assert!(stdout.contains("updated: 0"));
    assert!(stdout.contains("unchanged: 3"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_hkb(&config, &["ingest", "--dry-run"]);
    assert!(ok, "dry run failed: {}", stderr);
    assert!(stdout.contains("new: 3"));
    assert!(!tmp.path().join("data/versions.json").exists());
}

#[test]
fn test_edit_and_delete_are_detected() {
    let (tmp, config) = setup_test_env();
    run_hkb(&config, &["ingest"]);

    fs::write(tmp.path().join("kb/alpha.md"), "Alpha rewritten entirely.").unwrap();
    fs::remove_file(tmp.path().join("kb/gamma.txt")).unwrap();

    let (stdout, stderr, ok) = run_hkb(&config, &["ingest"]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("updated: 1"), "unexpected output: {}", stdout);
    assert!(stdout.contains("removed: 1"));
}

#[test]
fn test_query_json_reports_decision() {
    let (tmp, config) = setup_test_env();
    run_hkb(&config, &["ingest"]);

    let (stdout, stderr, ok) = run_hkb(&config, &["query", "Kubernetes", "--json"]);
    assert!(ok, "query failed: {}", stderr);
    let outcome: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(outcome["decision"], "hit");
    assert_eq!(outcome["hits"][0]["metadata"]["doc_id"], "gamma.txt");
    assert_eq!(outcome["telemetry"]["query_normalized"], "kubernetes");

    let (stdout, _, ok) = run_hkb(&config, &["query", "zzqxv wvvkj", "--json"]);
    assert!(ok);
    let outcome: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(outcome["decision"], "no_hit");
    assert_eq!(outcome["hits"].as_array().unwrap().len(), 0);

    let log = fs::read_to_string(tmp.path().join("data/telemetry.jsonl")).unwrap();
    assert_eq!(log.lines().count(), 2);
}

#[test]
fn test_query_source_filter() {
    let (_tmp, config) = setup_test_env();
    run_hkb(&config, &["ingest"]);

    let (stdout, stderr, ok) = run_hkb(
        &config,
        &["query", "document", "--source", "guides/beta.md", "--json"],
    );
    assert!(ok, "query failed: {}", stderr);
    let outcome: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    for entry in outcome["topk"].as_array().unwrap() {
        assert_eq!(entry["metadata"]["source"], "guides/beta.md");
    }
}

#[test]
fn test_status_reports_in_sync() {
    let (_tmp, config) = setup_test_env();
    run_hkb(&config, &["ingest"]);
    let (stdout, stderr, ok) = run_hkb(&config, &["status"]);
    assert!(ok, "status failed: {}", stderr);
    assert!(stdout.contains("Documents:   3"));
    assert!(stdout.contains("in sync"));
}

#[test]
fn test_invalid_config_fails_fast() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        "[kb]\nroot = \"./kb\"\n[chunking]\nchunk_size = 10\nchunk_overlap = 10\n",
    )
    .unwrap();
    let (_, stderr, ok) = run_hkb(&bad, &["scan"]);
    assert!(!ok);
    assert!(stderr.contains("chunk_overlap"));
}
