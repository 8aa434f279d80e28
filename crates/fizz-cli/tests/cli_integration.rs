//! Runs the `fizz` binary against small ASTs written into a temp directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const COUNTER: &str = r#"{
    "states": {"code": "x = 0"},
    "actions": [{"name": "Inc", "block": {"flow": "FLOW_ATOMIC", "stmts": [
        {"requireStmt": {"condition": "x < 3"}},
        {"pyStmt": {"code": "x = x + 1"}}
    ]}}],
    "invariants": [{"name": "Small", "always": true, "pyExpr": "x <= LIMIT"}]
}"#;

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn counter(dir: &Path, limit: u32) -> PathBuf {
    write(dir, "counter.json", &COUNTER.replace("LIMIT", &limit.to_string()))
}

fn fizz(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fizz"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn check_passes_and_dumps_states() {
    let dir = TempDir::new().unwrap();
    let ast = counter(dir.path(), 3);
    let out = dir.path().join("out");
    let output = fizz(&[
        "check",
        ast.to_str().unwrap(),
        "--out-dir",
        out.to_str().unwrap(),
        "--save-states",
    ]);
    let text = stdout(&output);
    assert!(output.status.success(), "{}", text);
    assert!(text.contains("Result: PASSED"), "{}", text);
    assert!(out.join("nodes_000000.json").exists());
    assert!(out.join("links_000000.json").exists());
    assert!(out.join("graph.dot").exists());
    assert!(!out.join("error-graph.json").exists());
}

#[test]
fn check_reports_violation_with_trace() {
    let dir = TempDir::new().unwrap();
    let ast = counter(dir.path(), 1);
    let output = fizz(&["check", ast.to_str().unwrap()]);
    let text = stdout(&output);
    assert_eq!(output.status.code(), Some(1), "{}", text);
    assert!(text.contains("Result: INVARIANT VIOLATION"), "{}", text);
    assert!(text.contains("Invariants: Small"), "{}", text);
    assert!(text.contains("    0: init -> "), "{}", text);
    assert!(text.contains(": Inc -> "), "{}", text);

    // the error graph lands next to the AST by default
    let graph: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("error-graph.json")).unwrap()).unwrap();
    assert!(!graph["links"].as_array().unwrap().is_empty());
    assert!(dir.path().join("error-graph.dot").exists());
}

#[test]
fn config_file_next_to_ast_is_used() {
    let dir = TempDir::new().unwrap();
    let ast = counter(dir.path(), 1);
    // one action never gets past x = 1
    write(dir.path(), "fizz.yaml", "options:\n  max_actions: 1\n");
    let output = fizz(&["check", ast.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stdout(&output));
}

#[test]
fn invalid_strategy_is_an_error() {
    let dir = TempDir::new().unwrap();
    let ast = counter(dir.path(), 3);
    let output = fizz(&["check", ast.to_str().unwrap(), "--strategy", "sideways"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("sideways"));
}

#[test]
fn simulation_prints_seed() {
    let dir = TempDir::new().unwrap();
    let ast = counter(dir.path(), 3);
    let output = fizz(&[
        "check",
        ast.to_str().unwrap(),
        "--simulation",
        "--max-runs",
        "5",
        "--seed",
        "42",
    ]);
    let text = stdout(&output);
    assert!(output.status.success(), "{}", text);
    assert!(text.contains("Seed: 42"), "{}", text);
}

#[test]
fn ast_summary_and_syntax_errors() {
    let dir = TempDir::new().unwrap();
    let ast = counter(dir.path(), 3);
    let output = fizz(&["ast", ast.to_str().unwrap()]);
    let text = stdout(&output);
    assert!(output.status.success(), "{}", text);
    assert!(text.contains("action Inc [atomic"), "{}", text);
    assert!(text.contains("invariant Small [always]"), "{}", text);
    assert!(text.contains("ast: ok"), "{}", text);

    let broken = write(dir.path(), "broken.json", &COUNTER.replace("x <= LIMIT", "x <="));
    let output = fizz(&["ast", broken.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invariants[0]"));
}

#[test]
fn perf_reports_counter_means() {
    let dir = TempDir::new().unwrap();
    let ast = write(
        dir.path(),
        "coin.json",
        r#"{
            "states": {"code": "done = False"},
            "actions": [{"name": "Toss", "block": {"flow": "FLOW_ONEOF", "stmts": [
                {"label": "heads", "pyStmt": {"code": "done = True"}},
                {"label": "tails", "pyStmt": {"code": "done = False"}}
            ]}}]
        }"#,
    );
    let perf = write(
        dir.path(),
        "perf_model.yaml",
        "configs:\n  Toss.heads:\n    counters:\n      cost:\n        numeric: 1.0\n  Toss.tails:\n    counters:\n      cost:\n        numeric: 2.0\n",
    );
    let output = fizz(&[
        "perf",
        ast.to_str().unwrap(),
        "--perf-model",
        perf.to_str().unwrap(),
        "--max-actions",
        "2",
    ]);
    let text = stdout(&output);
    assert!(output.status.success(), "{}", text);
    assert!(text.contains("Markov analysis"), "{}", text);
    assert!(text.contains("Mean cost: "), "{}", text);
}
