use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_plugin(dir: &Path, key: &str) {
    let descriptor = format!(
        r#"{{ "key": "{key}", "name": "{key}", "plugin-info": {{ "version": "1.0.0" }} }}"#
    );
    std::fs::write(dir.join(format!("{}.json", key)), descriptor).unwrap();
}

fn maera(plugin_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("maera").unwrap();
    cmd.arg("--plugin-dir").arg(plugin_dir).arg("--no-container");
    cmd
}

#[test]
fn test_ping_command() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("maera")?;

    cmd.arg("--ping");

    cmd.assert().success().stdout(predicate::str::contains("pong"));
    Ok(())
}

#[test]
fn test_list_with_no_plugins() {
    let dir = tempfile::tempdir().unwrap();

    maera(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No plugins loaded."));
}

#[test]
fn test_disable_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), "test.a");

    maera(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("test.a 1.0.0 [enabled]"));

    maera(dir.path())
        .args(["disable", "test.a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Disabled test.a"));

    maera(dir.path())
        .arg("list")
        .assert()
        .success()
        // Persisted as disabled, so a fresh start never enables it
        .stdout(predicate::str::contains("test.a 1.0.0 [installed]"));

    maera(dir.path()).args(["enable", "test.a"]).assert().success();
    maera(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("test.a 1.0.0 [enabled]"));
}

#[test]
fn test_install_and_uninstall() {
    let dir = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    write_plugin(source.path(), "test.b");

    maera(dir.path())
        .arg("install")
        .arg(source.path().join("test.b.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed test.b"));
    assert!(dir.path().join("test.b.json").exists());

    maera(dir.path())
        .args(["uninstall", "test.b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Uninstalled test.b"));
    assert!(!dir.path().join("test.b.json").exists());
}

#[test]
fn test_missing_plugin_directory_fails() {
    let dir = tempfile::tempdir().unwrap();

    maera(&dir.path().join("absent"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_run_once_starts_and_stops() {
    let dir = tempfile::tempdir().unwrap();

    maera(dir.path()).args(["run", "--once"]).assert().success();
}
