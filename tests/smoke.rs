//! Smoke tests -- verify the binary runs and each subcommand is wired up.

use assert_cmd::Command;
use predicates::prelude::*;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("cropsentinel").unwrap();
    cmd.env_remove("CROPSENTINEL_CONFIG");
    cmd
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Sensor anomaly detection"));
}

#[test]
fn test_cli_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cropsentinel"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["replay", "simulate", "evaluate", "check-config", "incidents"] {
        cli().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_check_config_prints_effective_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cropsentinel.toml");
    std::fs::write(
        &path,
        r#"
clock_skew_seconds = 10

[sensors.moisture]
strategy = "threshold"
min = 30.0
max = 80.0

[sensors.temperature]
min = 8.0
max = 35.0

[sensors.humidity]
min = 25.0
max = 90.0
"#,
    )
    .unwrap();

    cli()
        .args(["check-config", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("clock_skew_seconds = 10"))
        .stdout(predicate::str::contains("strategy = \"threshold\""));
}

#[test]
fn test_check_config_rejects_inverted_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(
        &path,
        r#"
[sensors.moisture]
min = 80.0
max = 30.0

[sensors.temperature]
min = 8.0
max = 35.0

[sensors.humidity]
min = 25.0
max = 90.0
"#,
    )
    .unwrap();

    cli()
        .args(["check-config", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("moisture"));
}

#[test]
fn test_simulate_emits_json_lines() {
    let output = cli()
        .args(["simulate", "--plots", "1,2", "--steps", "3", "--seed", "5"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3 * 2 * 3);
    for line in lines {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(v.get("plot_id").is_some());
        assert!(v.get("sensor_type").is_some());
    }
}

#[test]
fn test_replay_from_stdin_stores_records() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("replay.db");

    let mut input = String::new();
    for minute in 0..20 {
        let value = if minute % 2 == 0 { 60.4 } else { 59.6 };
        input.push_str(&format!(
            "{{\"plot_id\":3,\"sensor_type\":\"moisture\",\"timestamp\":\"2024-06-01T06:{:02}:00Z\",\"value\":{}}}\n",
            minute, value
        ));
    }
    input.push_str("{\"plot_id\":3,\"sensor_type\":\"moisture\",\"timestamp\":\"2024-06-01T06:20:00Z\",\"value\":22.0}\n");

    cli()
        .args(["replay", "--quiet", "--json", "--db"])
        .arg(&db)
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"anomalies\": 1"));

    cli()
        .args(["incidents", "--json", "--db"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("irrigation_check"));
}
