//! CLI integration tests

use std::process::{Command, Output};

fn rbctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rbctl"))
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute rbctl")
}

#[test]
fn test_cli_help() {
    let output = rbctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("spot rebalancer"), "Should describe the tool");
    for command in ["status", "nodes", "interrupt", "simulate", "window"] {
        assert!(stdout.contains(command), "Should show {command} command");
    }
}

#[test]
fn test_cli_version() {
    let output = rbctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("rbctl"));
}

#[test]
fn test_simulate_rebalance_help() {
    let output = rbctl(&["simulate", "rebalance", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--interrupt"));
    assert!(stdout.contains("--seed"));
    assert!(stdout.contains("--max-pods"));
}

#[test]
fn test_simulate_rebalance_json() {
    let output = rbctl(&["--format", "json", "simulate", "rebalance", "--seed", "3"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["cycle"]["candidates"], 10);
    assert_eq!(result["cycle"]["migration"]["moved"], 7);
    assert!(result["interruption"].is_null());
    assert_eq!(result["nodes"].as_array().unwrap().len(), 3);
}

#[test]
fn test_simulate_rebalance_with_interruption() {
    let output = rbctl(&[
        "--format",
        "json",
        "simulate",
        "rebalance",
        "--interrupt",
        "aks-spot-2",
        "--seed",
        "3",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["interruption"]["node"], "aks-spot-2");
    let nodes = result["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    let pods: u64 = nodes.iter().map(|n| n["pod_count"].as_u64().unwrap()).sum();
    assert_eq!(pods, 10);
}

#[test]
fn test_simulate_rebalance_table() {
    let output = rbctl(&["simulate", "rebalance", "--seed", "3"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("Before rebalance"));
    assert!(stdout.contains("aks-spot-1"));
    assert!(stdout.contains("moved"));
}

#[test]
fn test_simulate_scaling_json() {
    let output = rbctl(&[
        "--format",
        "json",
        "simulate",
        "scaling",
        "--iterations",
        "12",
        "--seed",
        "9",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let rows: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows.len(), 12);
    assert_eq!(rows[0]["phase"], "Low");
    assert_eq!(rows[11]["phase"], "Medium");
}

#[test]
fn test_window_at_time() {
    let output = rbctl(&["--format", "json", "window", "--at", "07:45"]);
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["active"], "morning");
    assert_eq!(result["global_max_replicas"], 8);
    assert_eq!(result["windows"].as_array().unwrap().len(), 4);
}

#[test]
fn test_window_rejects_bad_time() {
    let output = rbctl(&["window", "--at", "7pm"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("HH:MM"));
}

#[test]
fn test_status_without_daemon_fails() {
    let output = rbctl(&["--api-url", "http://127.0.0.1:1", "status"]);
    assert!(!output.status.success());
}
