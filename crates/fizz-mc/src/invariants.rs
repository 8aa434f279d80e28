//! Safety and witness checks run on every new state.
//!
//! Invariants come in three shapes:
//!
//! - expression invariants (`always x < 3`, `always eventually done`)
//! - assertion blocks (`always assertion Safe: ...`), executed as a
//!   throwaway thread whose return value is the verdict
//! - transition assertions, which see the previous and the new state as
//!   two records
//!
//! Safety invariants record a failure. `eventually` and `exists` forms only
//! record a witness bit; the liveness pass reads those bits later.

use crate::error::{ModelError, ModelResult};
use crate::frame::CallFrame;
use crate::graph::Graph;
use crate::model::Model;
use crate::process::{InvariantPosition, Process, ProcessHost};
use crate::thread;
use fizz_ast::Invariant;
use fizz_eval::{RecordKind, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Evaluates every non-transition invariant against `process`, setting its
/// witness bits and returning the safety failures.
pub fn check_invariants(model: &Model, process: &mut Process) -> ModelResult<Vec<InvariantPosition>> {
    let mut failures = Vec::new();
    for (fi, file) in model.files.iter().enumerate() {
        for (j, inv) in file.invariants.iter().enumerate() {
            let (passed, witnessing) = match &inv.block {
                None => (check_expression(model, process, inv)?, inv.eventually),
                Some(_) if inv.has_operator("transition") => continue,
                Some(_) => {
                    if !inv.has_operator("always") && !inv.is_exists() {
                        return Err(ModelError::unsupported(
                            &format!("Invariants[{}]", j),
                            format!("assertion {} needs always, eventually or exists", inv.name),
                        ));
                    }
                    let mut cloned = process.clone_for_assert();
                    (run_assertion(model, &mut cloned, fi, j, inv)?, inv.is_eventually() || inv.is_exists())
                }
            };
            if witnessing {
                if passed {
                    if let Some(w) = process.witness.get_mut(fi).and_then(|w| w.get_mut(j)) {
                        *w = true;
                    }
                }
            } else if !passed {
                debug!(invariant = %inv.name, "invariant failed");
                failures.push(InvariantPosition::new(fi, j));
            }
        }
    }
    Ok(failures)
}

/// Evaluates the transition assertions for the step `parent -> child`.
/// Steps that leave the state variables untouched are not checked.
pub fn check_transition_invariants(
    model: &Model,
    parent: &Process,
    child: &Process,
) -> ModelResult<Vec<InvariantPosition>> {
    if parent.heap.state == child.heap.state {
        return Ok(Vec::new());
    }
    let mut failures = Vec::new();
    for (fi, file) in model.files.iter().enumerate() {
        for (j, inv) in file.invariants.iter().enumerate() {
            if !inv.is_transition() {
                continue;
            }
            let (before, after) = match inv.params.as_slice() {
                [] => ("before".to_string(), "after".to_string()),
                [b, a] => (b.name.clone(), a.name.clone()),
                _ => {
                    return Err(ModelError::Invalid(format!(
                        "transition assertion {} takes no parameters or exactly two",
                        inv.name
                    )))
                }
            };
            let mut cloned = child.clone_for_assert();
            let after_record = Value::record(RecordKind::Struct, child.heap.state.clone());
            let before_record = Value::record(RecordKind::Struct, parent.heap.state.clone());
            cloned.heap.insert(after, after_record);
            cloned.heap.insert(before, before_record);
            if !run_assertion(model, &mut cloned, fi, j, inv)? {
                failures.push(InvariantPosition::new(fi, j));
            }
        }
    }
    Ok(failures)
}

/// `exists` invariants that no node in the graph witnessed.
pub fn unwitnessed_exists(model: &Model, graph: &Graph) -> Vec<InvariantPosition> {
    let mut pending: Vec<InvariantPosition> = model
        .files
        .iter()
        .enumerate()
        .flat_map(|(fi, file)| {
            file.invariants
                .iter()
                .enumerate()
                .filter(|(_, inv)| inv.block.is_some() && inv.is_exists())
                .map(move |(j, _)| InvariantPosition::new(fi, j))
        })
        .collect();
    for (_, node) in graph.iter() {
        if pending.is_empty() {
            break;
        }
        pending.retain(|pos| !witnessed(&node.process, *pos));
    }
    pending
}

pub fn witnessed(process: &Process, pos: InvariantPosition) -> bool {
    process
        .witness
        .get(pos.file_index)
        .and_then(|w| w.get(pos.invariant_index))
        .copied()
        .unwrap_or(false)
}

fn check_expression(model: &Model, process: &Process, inv: &Invariant) -> ModelResult<bool> {
    let nested_always = inv.nested.as_ref().is_some_and(|n| n.always);
    let eventually_always = inv.eventually && nested_always;
    if !inv.always && !eventually_always {
        return Err(ModelError::Invalid(format!(
            "invariant {} must be always, always-eventually or eventually-always",
            inv.name
        )));
    }
    let code = match &inv.nested {
        Some(nested) if eventually_always => nested.py_expr.as_str(),
        Some(_) => {
            return Err(ModelError::Invalid(format!(
                "nested temporal operators in {} are not supported",
                inv.name
            )))
        }
        None => inv.py_expr.as_str(),
    };
    let mut cloned = process.clone_for_assert();
    let mut host = ProcessHost::new(model, &mut cloned, None);
    fizz_eval::eval_bool(code, &mut host)
        .map_err(|e| ModelError::eval(format!("invariant {} `{}`", inv.name, code), e))
}

/// Runs the assertion block `Invariants[j]` of file `fi` on a new thread of
/// `process` and reads its verdict from the returns.
fn run_assertion(
    model: &Model,
    process: &mut Process,
    fi: usize,
    j: usize,
    inv: &Invariant,
) -> ModelResult<bool> {
    let returns = Value::dict(
        process
            .returns
            .iter()
            .map(|(k, v)| (Value::str(k), v.clone())),
    );
    process.heap.insert("__returns__", returns);
    process.returns = BTreeMap::new();
    process.new_thread(CallFrame::new(fi, format!("Invariants[{}]", j), inv.name.clone()));
    thread::run_to_completion(model, process)?;
    Ok(process
        .returns
        .get(&inv.name)
        .is_some_and(|v| v.truth()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Pending;
    use std::sync::Arc;

    fn model(invariants: &str) -> Model {
        Model::from_json(&format!(r#"{{"invariants": {}}}"#, invariants)).unwrap()
    }

    fn process(model: &Model, x: i64) -> Process {
        let mut p = Process::new(Arc::new(BTreeMap::new()), &model.invariant_counts());
        p.heap.insert("x", Value::Int(x));
        p
    }

    fn assertion(name: &str, ops: &str, body: &str) -> String {
        format!(
            r#"{{"name": "{}", "temporalOperators": {}, "block": {{"flow": "FLOW_ATOMIC", "stmts": [
                {{"returnStmt": {{"pyExpr": "{}"}}}}
            ]}}}}"#,
            name, ops, body
        )
    }

    #[test]
    fn test_always_expression() {
        let m = model(r#"[{"name": "Small", "always": true, "pyExpr": "x < 3"}]"#);
        assert!(check_invariants(&m, &mut process(&m, 2)).unwrap().is_empty());
        assert_eq!(
            check_invariants(&m, &mut process(&m, 3)).unwrap(),
            vec![InvariantPosition::new(0, 0)]
        );
    }

    #[test]
    fn test_eventually_sets_witness_only() {
        let m = model(r#"[{"name": "Done", "always": true, "eventually": true, "pyExpr": "x == 0"}]"#);
        let mut p = process(&m, 0);
        assert!(check_invariants(&m, &mut p).unwrap().is_empty());
        assert!(p.witness[0][0]);

        let mut p = process(&m, 1);
        assert!(check_invariants(&m, &mut p).unwrap().is_empty());
        assert!(!p.witness[0][0]);
    }

    #[test]
    fn test_eventually_always_uses_nested_expression() {
        let m = model(
            r#"[{"name": "Settles", "eventually": true, "nested": {"always": true, "pyExpr": "x > 5"}}]"#,
        );
        let mut p = process(&m, 6);
        check_invariants(&m, &mut p).unwrap();
        assert!(p.witness[0][0]);
    }

    #[test]
    fn test_assertion_block() {
        let m = model(&format!("[{}]", assertion("Safe", r#"["always"]"#, "x != 1")));
        assert!(check_invariants(&m, &mut process(&m, 0)).unwrap().is_empty());
        let mut p = process(&m, 1);
        assert_eq!(check_invariants(&m, &mut p).unwrap().len(), 1);
        assert!(p.threads.is_empty());
        assert!(p.heap.get("__returns__").is_none());
    }

    #[test]
    fn test_assertion_sees_returns() {
        let m = model(&format!(
            "[{}]",
            assertion("Ret", r#"["always"]"#, "__returns__.get('Read', 0) != 7")
        ));
        let mut p = process(&m, 0);
        p.returns.insert("Read".into(), Value::Int(7));
        assert_eq!(check_invariants(&m, &mut p).unwrap().len(), 1);
    }

    #[test]
    fn test_transition_assertion() {
        let m = model(&format!(
            "[{}]",
            assertion("Grows", r#"["transition"]"#, "after.x >= before.x")
        ));
        let parent = process(&m, 2);
        assert!(check_transition_invariants(&m, &parent, &process(&m, 3))
            .unwrap()
            .is_empty());
        assert_eq!(
            check_transition_invariants(&m, &parent, &process(&m, 1)).unwrap(),
            vec![InvariantPosition::new(0, 0)]
        );
        // unchanged state is not checked
        assert!(check_transition_invariants(&m, &parent, &process(&m, 2))
            .unwrap()
            .is_empty());
        // transition assertions are skipped by the per-state pass
        assert!(check_invariants(&m, &mut process(&m, 1)).unwrap().is_empty());
    }

    #[test]
    fn test_exists_witness() {
        let m = model(&format!("[{}]", assertion("Reach", r#"["exists"]"#, "x == 2")));
        let mut graph = Graph::new();
        let mut p = process(&m, 1);
        check_invariants(&m, &mut p).unwrap();
        let root = graph.attach(Pending::root(p), None);
        assert_eq!(unwitnessed_exists(&m, &graph), vec![InvariantPosition::new(0, 0)]);

        let mut p = process(&m, 2);
        check_invariants(&m, &mut p).unwrap();
        graph.attach(Pending::for_action(root, p, "A", 0, 0), None);
        assert!(unwitnessed_exists(&m, &graph).is_empty());
    }
}
