//! CLI integration tests
//!
//! Runs the bagctl binary against fixture bags it generates itself.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn bagctl(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bagctl"))
        .args(args)
        .env("HOME", home)
        .env_remove("BAGHOUSE_CACHE_SIZE")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute bagctl")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Writes a 2-topic, 50-message fixture and returns its path.
fn write_fixture(dir: &TempDir) -> String {
    let path = dir.path().join("fixture.bag");
    let path = path.to_str().unwrap().to_string();
    let output = bagctl(
        dir.path(),
        &[
            "fixture",
            &path,
            "--topics",
            "2",
            "--messages",
            "50",
            "--start",
            "100",
            "--chunk-size",
            "1024",
        ],
    );
    assert!(output.status.success(), "{:?}", output);
    path
}

#[test]
fn test_help_flag() {
    let dir = TempDir::new().unwrap();
    let output = bagctl(dir.path(), &["--help"]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("bagctl"));
    for command in ["info", "read", "metrics", "fixture"] {
        assert!(text.contains(command), "missing {command}");
    }
}

#[test]
fn test_info_json() {
    let dir = TempDir::new().unwrap();
    let bag = write_fixture(&dir);

    let output = bagctl(dir.path(), &["info", &bag, "--output", "json"]);
    assert!(output.status.success(), "{:?}", output);

    let info: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(info["start"]["sec"], 100);
    let topics = info["topics"].as_array().unwrap();
    assert_eq!(topics.len(), 2);
    assert_eq!(topics[0]["name"], "/fixture_0");
    assert_eq!(topics[0]["num_messages"], 50);
}

#[test]
fn test_info_table() {
    let dir = TempDir::new().unwrap();
    let bag = write_fixture(&dir);

    let output = bagctl(dir.path(), &["info", &bag, "--no-color"]);
    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    assert!(text.contains("/fixture_1"));
    assert!(text.contains("Messages: 100"));
}

#[test]
fn test_read_range() {
    let dir = TempDir::new().unwrap();
    let bag = write_fixture(&dir);

    // 10 Hz: 100.0 ..= 101.0 holds 11 messages per topic.
    let output = bagctl(
        dir.path(),
        &[
            "read", &bag, "--topic", "/fixture_0", "--start", "100", "--end", "101", "-o", "json",
        ],
    );
    assert!(output.status.success(), "{:?}", output);

    let rows: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 11);
    assert!(rows.iter().all(|r| r["topic"] == "/fixture_0"));
    assert_eq!(rows[0]["receive_time"], "100.000000000");
}

#[test]
fn test_read_limit() {
    let dir = TempDir::new().unwrap();
    let bag = write_fixture(&dir);

    let output = bagctl(dir.path(), &["read", &bag, "--limit", "3", "-o", "json"]);
    assert!(output.status.success(), "{:?}", output);
    let rows: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 3);
}

#[test]
fn test_metrics_output() {
    let dir = TempDir::new().unwrap();
    let bag = write_fixture(&dir);

    let output = bagctl(dir.path(), &["metrics", &bag, "--window-ms", "500", "--no-color"]);
    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    assert!(text.contains("baghouse_messages_read_total"));
    assert!(text.contains("baghouse_cache_misses_total"));
}

#[test]
fn test_missing_bag_fails() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.bag");

    let output = bagctl(dir.path(), &["info", missing.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to open bag"));
}

#[test]
fn test_config_reads_home() {
    let dir = TempDir::new().unwrap();
    let config_dir = dir.path().join(".baghouse");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[provider.cache]\ncache_size_bytes = 4096\n",
    )
    .unwrap();

    let output = bagctl(dir.path(), &["config", "--no-color"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("cache_size_bytes = 4096"));
}
