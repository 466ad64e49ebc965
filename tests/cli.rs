use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;
use tempfile::TempDir;

fn ordkv() -> Command {
    Command::cargo_bin("ordkv").unwrap()
}

#[test]
fn init_put_get_scan_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");

    ordkv()
        .arg("init").arg("--path").arg(&path)
        .assert()
        .success()
        .stdout(contains("Store initialized successfully"));

    for (key, value) in [("db_host", "localhost"), ("db_port", "5432")] {
        ordkv()
            .arg("put").arg(key).arg(value)
            .arg("--path").arg(&path)
            .assert()
            .success();
    }

    ordkv()
        .arg("get").arg("db_host")
        .arg("--path").arg(&path)
        .assert()
        .success()
        .stdout(contains("localhost"));

    ordkv()
        .arg("scan").arg("db_a").arg("db_z")
        .arg("--path").arg(&path)
        .assert()
        .success()
        .stdout(contains("db_port = 5432"))
        .stdout(contains("Found 2 entries"));

    ordkv()
        .arg("bounds")
        .arg("--path").arg(&path)
        .assert()
        .success()
        .stdout(contains("db_host .. db_port"));
}

#[test]
fn delete_and_missing_key() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");

    ordkv().arg("init").arg("--path").arg(&path).assert().success();
    ordkv().arg("put").arg("k").arg("v").arg("--path").arg(&path).assert().success();

    ordkv()
        .arg("delete").arg("k").arg("--if-value").arg("other")
        .arg("--path").arg(&path)
        .assert()
        .success()
        .stdout(contains("not deleted"));

    ordkv().arg("delete").arg("k").arg("--path").arg(&path).assert().success();

    ordkv()
        .arg("get").arg("k")
        .arg("--path").arg(&path)
        .assert()
        .success()
        .stdout(contains("Key not found: k"));
}

#[test]
fn commands_fail_without_store() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nothing-here");

    ordkv()
        .arg("get").arg("k")
        .arg("--path").arg(&path)
        .assert()
        .failure();
    assert!(!path.exists());
}

#[test]
fn options_file_and_codec_flags() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");
    let config = temp_dir.path().join("options.json");
    std::fs::write(&config, r#"{ "compress": false, "sync_writes": true }"#).unwrap();

    ordkv()
        .arg("--config").arg(&config)
        .arg("--codec").arg("postcard")
        .arg("init").arg("--path").arg(&path)
        .assert()
        .success()
        .stdout(contains("Compression: none"))
        .stdout(contains("Codec: postcard"));

    ordkv()
        .arg("--codec").arg("postcard")
        .arg("put").arg("k").arg("v")
        .arg("--path").arg(&path)
        .assert()
        .success();

    ordkv()
        .arg("--codec").arg("postcard")
        .arg("stats").arg("ordkv.sequence")
        .arg("--path").arg(&path)
        .assert()
        .success()
        .stdout(contains("1"));

    ordkv()
        .arg("--codec").arg("yaml")
        .arg("count").arg("--path").arg(&path)
        .assert()
        .failure();
}

#[test]
fn repair_and_destroy() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");

    ordkv().arg("init").arg("--path").arg(&path).assert().success();
    ordkv().arg("put").arg("k").arg("v").arg("--path").arg(&path).assert().success();

    ordkv()
        .arg("repair").arg("--path").arg(&path)
        .assert()
        .success()
        .stdout(contains("Live keys: 1"));

    ordkv()
        .arg("destroy").arg("--path").arg(&path)
        .assert()
        .success();
    assert!(!path.exists());
}
