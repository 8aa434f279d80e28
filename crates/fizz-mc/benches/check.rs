//! Criterion benchmarks for the model checker.
//!
//! Run with: cargo bench -p fizz-mc

use criterion::{criterion_group, criterion_main, Criterion};
use fizz_mc::{CheckConfig, Model, Processor, Strategy};
use std::sync::Arc;

/// `n` independent counters, each bumped by its own atomic action up to `max`.
fn counters(n: usize, max: u32) -> Arc<Model> {
    let vars: Vec<String> = (0..n).map(|i| format!("c{} = 0", i)).collect();
    let actions: Vec<String> = (0..n)
        .map(|i| {
            format!(
                r#"{{"name": "Inc{i}", "block": {{"flow": "FLOW_ATOMIC", "stmts": [
                    {{"requireStmt": {{"condition": "c{i} < {max}"}}}},
                    {{"pyStmt": {{"code": "c{i} = c{i} + 1"}}}}
                ]}}}}"#
            )
        })
        .collect();
    let json = format!(
        r#"{{"states": {{"code": "{}"}}, "actions": [{}]}}"#,
        vars.join("\\n"),
        actions.join(", ")
    );
    Arc::new(Model::from_json(&json).unwrap())
}

/// Two threads of a serial action racing on a shared counter.
fn racing_increments() -> Arc<Model> {
    Arc::new(
        Model::from_json(
            r#"{
                "states": {"code": "x = 0"},
                "actions": [{"name": "Add", "block": {"flow": "FLOW_SERIAL", "stmts": [
                    {"pyStmt": {"code": "tmp = x"}},
                    {"pyStmt": {"code": "x = tmp + 1"}}
                ]}}]
            }"#,
        )
        .unwrap(),
    )
}

fn bench_check(c: &mut Criterion, name: &str, model: Arc<Model>, config: CheckConfig) {
    c.bench_function(name, |b| {
        b.iter(|| {
            let mut processor = Processor::new(Arc::clone(&model), config.clone()).unwrap();
            processor.check().unwrap();
        })
    });
}

fn benchmarks(c: &mut Criterion) {
    let mut bfs = CheckConfig::default();
    bfs.options.options.max_actions = 12;
    bfs.seed = 1;

    let mut dfs = bfs.clone();
    dfs.strategy = Strategy::Dfs;

    let mut simulation = bfs.clone();
    simulation.simulation = true;
    simulation.max_runs = 200;

    bench_check(c, "counters_N2_MAX5", counters(2, 5), bfs.clone());
    bench_check(c, "counters_N3_MAX4", counters(3, 4), bfs.clone());
    bench_check(c, "counters_N3_MAX4_dfs", counters(3, 4), dfs);
    bench_check(c, "racing_increments", racing_increments(), bfs);
    bench_check(c, "counters_N3_MAX4_simulation", counters(3, 4), simulation);
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
