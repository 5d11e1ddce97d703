//! Integration tests for the CLI interface
//!
//! Tests argument parsing, config validation and the `check` subcommand

mod common;

use assert_cmd::Command;
use common::BatchFixture;
use predicates::prelude::*;

fn solbatch() -> Command {
    let mut cmd = Command::cargo_bin("solbatch").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("SOLBATCH_DATABASE_URL")
        .env_remove("SOLBATCH_CONCURRENCY")
        .env_remove("SOLBATCH_LOG_DIR");
    cmd
}

#[test]
fn test_cli_help_flag() {
    solbatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_missing_subcommand() {
    solbatch()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_missing_app_config_is_rejected() {
    let fx = BatchFixture::new();
    let (_, run) = fx.write_configs(&["ACC"]);

    solbatch()
        .arg("run")
        .arg("--app-config")
        .arg(fx.root().join("absent.yaml"))
        .arg("--run-config")
        .arg(&run)
        .args(["--mode", "E"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_invalid_mode_is_rejected() {
    let fx = BatchFixture::new();
    let (app, run) = fx.write_configs(&["ACC"]);

    solbatch()
        .arg("run")
        .arg("--app-config")
        .arg(&app)
        .arg("--run-config")
        .arg(&run)
        .args(["--mode", "X"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("valid values"));
}

#[test]
fn test_check_prints_extract_statements() {
    let fx = BatchFixture::new();
    fx.write_sols(&["101", "102", "103"]);
    fx.write_template("ACC", &[("ACC_NO", 6, "left"), ("BAL", 8, "right")]);
    fx.write_template("TXN", &[("TXN_ID", 4, "")]);
    let (app, run) = fx.write_configs(&["ACC", "TXN"]);

    solbatch()
        .arg("check")
        .arg("--app-config")
        .arg(&app)
        .arg("--run-config")
        .arg(&run)
        .args(["--mode", "extract"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Identifiers: 3"))
        .stdout(predicate::str::contains("Work items:  6"))
        .stdout(predicate::str::contains("FROM ACC"))
        .stdout(predicate::str::contains("FROM TXN"));
}

#[test]
fn test_check_insert_with_oracle_dialect() {
    let fx = BatchFixture::new();
    fx.write_sols(&["101"]);
    let (app, run) = fx.write_configs(&["LOAD_BAL"]);

    solbatch()
        .arg("check")
        .arg("--app-config")
        .arg(&app)
        .arg("--run-config")
        .arg(&run)
        .args(["--mode", "I", "--dialect", "oracle"])
        .assert()
        .success()
        .stdout(predicate::str::contains("BEGIN PKG_SOL.LOAD_BAL("));
}

#[test]
fn test_check_fails_on_missing_template() {
    let fx = BatchFixture::new();
    fx.write_sols(&["101"]);
    fx.write_template("ACC", &[("ACC_NO", 6, "left")]);
    let (app, run) = fx.write_configs(&["ACC", "TXN"]);

    solbatch()
        .arg("check")
        .arg("--app-config")
        .arg(&app)
        .arg("--run-config")
        .arg(&run)
        .args(["--mode", "E"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("TXN"));
}

#[test]
fn test_empty_sol_file_is_rejected() {
    let fx = BatchFixture::new();
    fx.write_sols(&[]);
    let (app, run) = fx.write_configs(&["LOAD_BAL"]);

    solbatch()
        .arg("check")
        .arg("--app-config")
        .arg(&app)
        .arg("--run-config")
        .arg(&run)
        .args(["--mode", "I"])
        .assert()
        .code(1);
}

#[test]
fn test_check_rejects_ambiguous_spool_names() {
    let fx = BatchFixture::new();
    fx.write_sols(&["BAL_1", "1"]);
    fx.write_template("ACC", &[("ACC_NO", 6, "left")]);
    fx.write_template("ACC_BAL", &[("BAL", 8, "right")]);
    let (app, run) = fx.write_configs(&["ACC", "ACC_BAL"]);

    solbatch()
        .arg("check")
        .arg("--app-config")
        .arg(&app)
        .arg("--run-config")
        .arg(&run)
        .args(["--mode", "E"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E2008"))
        .stderr(predicate::str::contains("ACC_BAL_1.spool"));
}

#[cfg(not(feature = "postgres"))]
#[test]
fn test_run_without_backend_fails_cleanly() {
    let fx = BatchFixture::new();
    fx.write_sols(&["101"]);
    let (app, run) = fx.write_configs(&["LOAD_BAL"]);

    solbatch()
        .arg("run")
        .arg("--app-config")
        .arg(&app)
        .arg("--run-config")
        .arg(&run)
        .args(["--mode", "I", "--no-progress"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E2007"))
        .stderr(predicate::str::contains("no database backend"));
}
