//! Property tests over generated counter models.

use fizz_eval::{RoleRef, Value};
use fizz_mc::markov::MarkovChain;
use fizz_mc::role::RoleInstance;
use fizz_mc::symmetry::Symmetry;
use fizz_mc::{CheckConfig, CheckOutcome, Model, PerfModel, Process, Processor, Strategy};
use proptest::prelude::*;
use proptest::strategy::Strategy as _;
use std::collections::BTreeMap;
use std::sync::Arc;

/// `x` counts modulo `modulus`; `y` counts up to `limit`.
fn two_counters(modulus: u8, limit: u8) -> Arc<Model> {
    let json = format!(
        r#"{{
            "states": {{"code": "x = 0\ny = 0"}},
            "actions": [
                {{"name": "Spin", "block": {{"flow": "FLOW_ATOMIC", "stmts": [
                    {{"pyStmt": {{"code": "x = (x + 1) % {}"}}}}
                ]}}}},
                {{"name": "Climb", "block": {{"flow": "FLOW_ATOMIC", "stmts": [
                    {{"requireStmt": {{"condition": "y < {}"}}}},
                    {{"pyStmt": {{"code": "y = y + 1"}}}}
                ]}}}}
            ]
        }}"#,
        modulus, limit
    );
    Arc::new(Model::from_json(&json).expect("model json"))
}

fn run(model: Arc<Model>, strategy: Strategy, max_actions: u64, seed: u64) -> (Processor, CheckOutcome) {
    let mut config = CheckConfig::default();
    config.options.options.max_actions = max_actions;
    config.strategy = strategy;
    config.seed = seed;
    let mut processor = Processor::new(model, config).expect("processor");
    let outcome = processor.check().expect("check");
    (processor, outcome)
}

fn states(outcome: &CheckOutcome) -> usize {
    match outcome {
        CheckOutcome::Ok { states_explored, .. } => *states_explored,
        other => panic!("unexpected {:?}", other),
    }
}

/// Symmetric `Node` roles holding `values`, plus a `leader` reference,
/// where role `i` is given the id `ids[i]`.
fn nodes(values: &[i64], leader: usize, ids: &[u32]) -> Process {
    let mut p = Process::new(Arc::new(BTreeMap::new()), &[]);
    let mut roles: Vec<RoleInstance> = values
        .iter()
        .zip(ids)
        .map(|(v, id)| {
            let mut role = RoleInstance::new(RoleRef::new("Node", *id), true, BTreeMap::new());
            role.fields.insert("v".into(), Value::Int(*v));
            role
        })
        .collect();
    roles.sort_by_key(|r| r.rref.id);
    p.roles = roles;
    p.heap.insert("leader", Value::Role(RoleRef::new("Node", ids[leader])));
    p
}

fn relabelled_nodes() -> impl proptest::strategy::Strategy<Value = (Vec<i64>, usize, Vec<u32>)> {
    (1usize..=4).prop_flat_map(|n| {
        (
            prop::collection::vec(0i64..3, n),
            0..n,
            Just((0..n as u32).collect::<Vec<_>>()).prop_shuffle(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn every_strategy_finds_the_whole_cycle(modulus in 1u8..=5, seed in 1u64..1000) {
        // with enough actions every ordering reaches each x once; the root
        // is not in the visited table, so x = 0 is counted on its return
        let max_actions = u64::from(modulus) + 1;
        for strategy in [Strategy::Bfs, Strategy::Dfs, Strategy::Random] {
            let (_, outcome) = run(two_counters(modulus, 0), strategy, max_actions, seed);
            prop_assert_eq!(states(&outcome), usize::from(modulus));
        }
    }

    #[test]
    fn markov_rows_are_stochastic(modulus in 1u8..=4, limit in 0u8..=3) {
        let (p, outcome) = run(two_counters(modulus, limit), Strategy::Bfs, 6, 1);
        prop_assert!(outcome.is_ok());
        let chain = MarkovChain::new(p.graph(), &PerfModel::default()).expect("chain");
        prop_assert!(!chain.is_empty());
        for sum in chain.row_sums() {
            prop_assert!((sum - 1.0).abs() < 1e-9, "row sum {}", sum);
        }
        let analysis = chain.steady_state();
        let total: f64 = analysis.distribution.iter().map(|(_, p)| p).sum();
        prop_assert!((total - 1.0).abs() < 1e-6, "mass {}", total);
    }

    #[test]
    fn symmetric_ids_do_not_change_the_key((values, leader, ids) in relabelled_nodes()) {
        let model = Model::from_json(r#"{"roles": [{"name": "Node", "modifiers": ["symmetric"]}]}"#)
            .expect("model json");
        let symmetry = Symmetry::new(&model, &BTreeMap::new());
        let identity: Vec<u32> = (0..values.len() as u32).collect();
        let original = nodes(&values, leader, &identity).compute_key();

        let relabelled = nodes(&values, leader, &ids);
        let mut keys = vec![relabelled.compute_key()];
        keys.extend(symmetry.renamings(&relabelled).iter().map(|r| r.apply(&relabelled).compute_key()));
        prop_assert!(keys.contains(&original), "ids {:?}", ids);
    }
}
