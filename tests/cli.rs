use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Command isolated from the user's real configuration
fn scanrig(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("scanrig").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env_remove("SCANRIG_LOG_LEVEL")
        .env_remove("SCANRIG_LOG_FORMAT")
        .env_remove("SCANRIG_MAX_CONCURRENT")
        .env_remove("SCANRIG_DEFAULT_TIMEOUT")
        .env_remove("SCANRIG_DEFAULT_WORDLIST");
    cmd
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    scanrig(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("scanrig 0.1.0"));
}

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    scanrig(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("without a shell"));
}

#[test]
fn test_cli_run_missing_target() {
    let home = TempDir::new().unwrap();
    scanrig(&home)
        .args(["run", "--template", "x.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required arguments were not provided"));
}

#[test]
fn test_cli_check_target() {
    let home = TempDir::new().unwrap();
    scanrig(&home)
        .args(["check-target", "https://example.com/path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Target is valid"));

    scanrig(&home)
        .args(["check-target", "example.com;reboot"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Target rejected"))
        .stderr(predicate::str::contains("reboot").not());
}

#[test]
fn test_cli_presets() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("config.toml");
    fs::write(
        &config,
        "[presets.nmap]\nquick = [\"-T4\", \"-F\"]\n\n[presets.global]\nverbose = [\"-v\"]\n",
    )
    .unwrap();

    scanrig(&home)
        .arg("--config")
        .arg(&config)
        .arg("presets")
        .assert()
        .success()
        .stdout(predicate::str::contains("nmap.quick"))
        .stdout(predicate::str::contains("verbose"));

    scanrig(&home)
        .arg("--config")
        .arg(&config)
        .args(["presets", "--tool", "ffuf"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nmap.quick").not());
}

#[test]
fn test_cli_run_writes_results() {
    let home = TempDir::new().unwrap();
    let template = home.path().join("greet.json");
    fs::write(
        &template,
        r#"{"name": "greet", "tool": "echo", "args": ["hello", "{{target}}"]}"#,
    )
    .unwrap();
    let output = home.path().join("results.jsonl");

    scanrig(&home)
        .args(["run", "--target", "example.com", "--template"])
        .arg(&template)
        .arg("--output")
        .arg(&output)
        .arg("--metrics")
        .assert()
        .success()
        .stdout(predicate::str::contains("greet (echo): success"))
        .stdout(predicate::str::contains("1 succeeded, 0 failed"))
        .stdout(predicate::str::contains("template_executions_total"));

    let lines = fs::read_to_string(&output).unwrap();
    let result: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
    assert_eq!(result["template_name"], "greet");
    assert_eq!(result["stdout"], "hello example.com\n");
    assert_eq!(result["return_code"], 0);
}

#[test]
fn test_cli_run_rejects_invalid_target() {
    let home = TempDir::new().unwrap();
    let template = home.path().join("greet.json");
    fs::write(&template, r#"{"name": "greet", "tool": "echo", "args": ["hi"]}"#).unwrap();

    scanrig(&home)
        .args(["run", "--target", "$(id)", "--template"])
        .arg(&template)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid target"));
}

#[test]
fn test_cli_invalid_config_file() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("config.toml");
    fs::write(&config, "[orchestrator]\nmax_concurrent = 0\n").unwrap();

    scanrig(&home)
        .arg("--config")
        .arg(&config)
        .args(["check-target", "example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Max concurrent"));
}

#[test]
fn test_cli_run_uses_default_wordlist() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("config.toml");
    fs::write(
        &config,
        "[orchestrator]\ndefault_wordlist = \"/usr/share/wordlists/common.txt\"\n",
    )
    .unwrap();
    let template = home.path().join("dirs.json");
    fs::write(
        &template,
        r#"{"name": "dirs", "tool": "echo", "args": ["-w", "auto"]}"#,
    )
    .unwrap();
    let output = home.path().join("results.jsonl");

    scanrig(&home)
        .arg("--config")
        .arg(&config)
        .args(["run", "--target", "example.com", "--template"])
        .arg(&template)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 succeeded, 0 failed"));

    let lines = fs::read_to_string(&output).unwrap();
    let result: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
    assert_eq!(result["stdout"], "-w /usr/share/wordlists/common.txt\n");
}
