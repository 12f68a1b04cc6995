//! Integration tests for the harvest CLI.
//!
//! None of these reach the network: they exercise argument handling, configuration errors and
//! the on-disk status report. They run serially because each spawns the binary with its own
//! temporary data directory and the converter probe spawns further processes.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::{tempdir, TempDir};

// Helper function to create a clean command instance
fn harvest() -> Command { Command::cargo_bin("harvest").unwrap() }

// A data directory plus a configuration file inside it
fn workspace(config: &str) -> (TempDir, PathBuf) {
  let dir = tempdir().unwrap();
  let config_path = dir.path().join("config.toml");
  std::fs::write(&config_path, config).unwrap();
  (dir, config_path)
}

fn write_pdf(dir: &Path, name: &str) {
  std::fs::create_dir_all(dir).unwrap();
  let mut body = b"%PDF-1.4\n".to_vec();
  body.resize(60_000, b' ');
  std::fs::write(dir.join(name), body).unwrap();
}

const NO_CONVERTER: &str = "[conversion]\ncommand = \"no-such-converter-binary\"\n";

#[test]
#[serial]
fn test_help_lists_commands() {
  harvest()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("download"))
    .stdout(predicate::str::contains("convert"))
    .stdout(predicate::str::contains("status"));
}

#[test]
#[serial]
fn test_download_requires_a_conference() {
  let (dir, config) = workspace("");
  harvest()
    .args(["download", "--config"])
    .arg(&config)
    .arg("--base-dir")
    .arg(dir.path())
    .assert()
    .code(1)
    .stderr(predicate::str::contains("No conference selected"));
}

#[test]
#[serial]
fn test_unknown_conference_is_rejected() {
  let (dir, config) = workspace("");
  harvest()
    .args(["download", "-c", "sigcomm", "--config"])
    .arg(&config)
    .arg("--base-dir")
    .arg(dir.path())
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Unknown conference: sigcomm"));
}

#[test]
#[serial]
fn test_conference_and_all_conflict() {
  harvest().args(["download", "-c", "ndss", "--all"]).assert().failure();
}

#[test]
#[serial]
fn test_invalid_format_is_rejected() {
  harvest().args(["download", "-c", "ndss", "--format", "xml"]).assert().failure();
}

#[test]
#[serial]
fn test_missing_credential_fails_before_network() {
  let (dir, config) = workspace("[conferences.acm_ccs]\nrequires_credentials = true\n");
  harvest()
    .args(["download", "-c", "acm_ccs", "-y", "2024", "--config"])
    .arg(&config)
    .arg("--base-dir")
    .arg(dir.path())
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Missing credential for ACM CCS"));
  assert!(!dir.path().join("ACM_CCS/2024").exists());
}

#[test]
#[serial]
fn test_invalid_config_fails() {
  let (dir, config) = workspace("workers = 0\n");
  harvest()
    .args(["status", "--config"])
    .arg(&config)
    .arg("--base-dir")
    .arg(dir.path())
    .assert()
    .code(1)
    .stderr(predicate::str::contains("workers"));
}

#[test]
#[serial]
fn test_install_guide() {
  harvest()
    .args(["convert", "--install-guide"])
    .assert()
    .success()
    .stdout(predicate::str::contains("mineru-models download"));
}

#[test]
#[serial]
fn test_convert_without_converter_fails() {
  let (dir, config) = workspace(NO_CONVERTER);
  harvest()
    .args(["convert", "--all", "--config"])
    .arg(&config)
    .arg("--base-dir")
    .arg(dir.path())
    .assert()
    .code(1)
    .stdout(predicate::str::contains("MinerU Installation Guide"))
    .stderr(predicate::str::contains("no-such-converter-binary"));
}

#[test]
#[serial]
fn test_status_reports_disk_state() {
  let (dir, config) = workspace(NO_CONVERTER);
  let year_dir = dir.path().join("NDSS").join("2024");
  write_pdf(&year_dir.join("papers"), "Converted Paper.pdf");
  write_pdf(&year_dir.join("papers"), "Pending Paper.pdf");
  let markdown = year_dir.join("markdown").join("Converted Paper");
  std::fs::create_dir_all(&markdown).unwrap();
  std::fs::write(markdown.join("Converted Paper.md"), "# Converted Paper").unwrap();

  harvest()
    .args(["status", "-c", "ndss", "-y", "2024", "2023", "--config"])
    .arg(&config)
    .arg("--base-dir")
    .arg(dir.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("2024: 2 papers"))
    .stdout(predicate::str::contains("2023: (not downloaded)"))
    .stdout(predicate::str::contains("2024: 1/2 converted (1 remaining)"))
    .stdout(predicate::str::contains("2023: (no PDFs)"))
    .stdout(predicate::str::contains("no-such-converter-binary is not installed"))
    .stdout(predicate::str::contains("USENIX").not());

  assert!(dir.path().join("logs").is_dir());
}

#[test]
#[serial]
fn test_status_defaults_to_every_conference() {
  let (dir, config) = workspace(NO_CONVERTER);
  harvest()
    .args(["status", "--config"])
    .arg(&config)
    .arg("--base-dir")
    .arg(dir.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("USENIX Security"))
    .stdout(predicate::str::contains("IEEE S&P"))
    .stdout(predicate::str::contains("ACM CCS"));
}
