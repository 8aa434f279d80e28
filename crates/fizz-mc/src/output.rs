//! Files and terminal text produced after a run: the error graph of a
//! failing trace, the optional dump of every reachable node and link, and
//! the DOT renderings of both.

use crate::error::{CheckError, CheckResult};
use crate::graph::{Graph, Link, NodeId, TraceStep};
use crate::process::Process;
use fizz_eval::Value;
use serde::Serialize;
use serde_json::{json, Map};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Entries per `nodes_*.json` / `links_*.json` shard.
pub const SHARD_SIZE: usize = 10_000;
/// Larger graphs are not rendered to `graph.dot`.
pub const MAX_DOT_NODES: usize = 250;

pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(n) => json!(n),
        Value::Float(x) => json!(x),
        Value::Str(s) => json!(&**s),
        Value::List(items) | Value::Tuple(items) | Value::Bag(items) | Value::GenericSet(items) => {
            items.iter().map(value_to_json).collect()
        }
        Value::Set(items) => items.iter().map(value_to_json).collect(),
        Value::Range(r) => {
            let mut out = Vec::new();
            let mut i = r.start;
            while (r.step > 0 && i < r.stop) || (r.step < 0 && i > r.stop) {
                out.push(json!(i));
                i += r.step;
            }
            serde_json::Value::Array(out)
        }
        Value::Dict(items) => object(items.iter().map(|(k, v)| (k, v))),
        Value::GenericMap(items) => object(items.iter().map(|(k, v)| (k, v))),
        Value::Record(record) => serde_json::Value::Object(
            record
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::Role(rref) => json!(rref.short()),
        Value::RoleStub(stub) => json!(stub.role.short()),
        other => json!(other.to_string()),
    }
}

fn object<'a>(items: impl Iterator<Item = (&'a Value, &'a Value)>) -> serde_json::Value {
    let mut map = Map::new();
    for (k, v) in items {
        let key = match k {
            Value::Str(s) => s.to_string(),
            other => other.to_string(),
        };
        map.insert(key, value_to_json(v));
    }
    serde_json::Value::Object(map)
}

/// The state variables and role fields of `process` as a JSON object.
pub fn state_json(process: &Process) -> serde_json::Value {
    serde_json::Value::Object(
        process
            .state_map()
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect(),
    )
}

fn step_name(step: &TraceStep) -> &str {
    match step.name() {
        "" => "init",
        name => name,
    }
}

/// `"    i: <link> -> <state json>"` for each step of `trace`.
pub fn format_trace(graph: &Graph, trace: &[TraceStep]) -> Vec<String> {
    trace
        .iter()
        .enumerate()
        .map(|(i, step)| {
            format!(
                "    {}: {} -> {}",
                i,
                step_name(step),
                state_json(&graph.node(step.node).process)
            )
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct ErrorLink<'a> {
    index: usize,
    name: &'a str,
    labels: &'a [String],
    messages: &'a [crate::role::Message],
    fairness: fizz_ast::FairnessLevel,
    from: Option<NodeId>,
    to: NodeId,
    before: Option<serde_json::Value>,
    after: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ErrorGraph<'a> {
    links: Vec<ErrorLink<'a>>,
}

fn error_links<'a>(graph: &Graph, trace: &'a [TraceStep]) -> Vec<ErrorLink<'a>> {
    let mut prev: Option<NodeId> = None;
    trace
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let link = step.link.as_ref();
            let entry = ErrorLink {
                index: i,
                name: step_name(step),
                labels: link.map(|l| l.labels.as_slice()).unwrap_or_default(),
                messages: link.map(|l| l.messages.as_slice()).unwrap_or_default(),
                fairness: link.map(|l| l.fairness).unwrap_or_default(),
                from: prev,
                to: step.node,
                before: prev.map(|p| state_json(&graph.node(p).process)),
                after: state_json(&graph.node(step.node).process),
            };
            prev = Some(step.node);
            entry
        })
        .collect()
}

/// The failure path as a DOT chain.
pub fn error_graph_dot(graph: &Graph, trace: &[TraceStep]) -> String {
    let mut out = String::from("digraph error {\n  node [shape=box];\n");
    for (i, step) in trace.iter().enumerate() {
        let _ = writeln!(
            out,
            "  s{} [label=\"{}\"];",
            i,
            escape(&state_json(&graph.node(step.node).process).to_string())
        );
        if i > 0 {
            let _ = writeln!(out, "  s{} -> s{} [label=\"{}: {}\"];", i - 1, i, i, escape(step_name(step)));
        }
    }
    out.push_str("}\n");
    out
}

fn is_witness(process: &Process) -> bool {
    process.witness.iter().flatten().any(|w| *w)
}

/// The whole graph as DOT.
pub fn graph_dot(graph: &Graph) -> String {
    let mut out = String::from("digraph G {\n");
    for (id, node) in graph.iter() {
        let mut attrs = vec![format!(
            "label=\"{}\\n{}\"",
            escape(node.name()),
            escape(&state_json(&node.process).to_string())
        )];
        if node.has_failed_invariants() {
            attrs.push("color=red".into());
        } else if is_witness(&node.process) {
            attrs.push("color=green".into());
        }
        if node.is_yield() || node.outbound.is_empty() {
            attrs.push("penwidth=2".into());
        }
        let _ = writeln!(out, "  n{} [{}];", id, attrs.join(", "));
    }
    for (id, node) in graph.iter() {
        for link in &node.outbound {
            let _ = writeln!(out, "  n{} -> n{} [{}];", id, link.node, edge_attrs(link));
        }
    }
    out.push_str("}\n");
    out
}

fn edge_attrs(link: &Link) -> String {
    let mut attrs = vec![format!("label=\"{}\"", escape(&link.name))];
    if link.is_fair() {
        attrs.push("color=forestgreen".into());
    }
    if link.is_strong() {
        attrs.push("penwidth=3".into());
    }
    if !link.failed_invariants.is_empty() {
        attrs.push("color=red".into());
    }
    attrs.join(", ")
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Serialize)]
struct NodeRecord {
    id: NodeId,
    name: String,
    fingerprint: Option<String>,
    enabled: bool,
    threads: usize,
    action_depth: u64,
    fork_depth: u64,
    failed_invariants: Vec<crate::process::InvariantPosition>,
    witness: bool,
    state: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct LinkRecord<'a> {
    from: NodeId,
    #[serde(flatten)]
    link: &'a Link,
}

/// Writes run artifacts into one directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> CheckResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CheckError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&self, name: &str, contents: &str) -> CheckResult<PathBuf> {
        let path = self.dir.join(name);
        fs::write(&path, contents).map_err(|source| CheckError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "wrote");
        Ok(path)
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> CheckResult<PathBuf> {
        let text = serde_json::to_string_pretty(value).map_err(|e| CheckError::Output(e.to_string()))?;
        self.write(name, &text)
    }

    /// `error-graph.json` and `error-graph.dot` for a failing trace.
    pub fn write_error_graph(&self, graph: &Graph, trace: &[TraceStep]) -> CheckResult<PathBuf> {
        let path = self.write_json(
            "error-graph.json",
            &ErrorGraph {
                links: error_links(graph, trace),
            },
        )?;
        self.write("error-graph.dot", &error_graph_dot(graph, trace))?;
        info!(path = %path.display(), "wrote error graph");
        Ok(path)
    }

    /// Dumps every node and link in shards, plus `graph.dot` for small
    /// graphs. Returns the number of shard files written.
    pub fn write_states(&self, graph: &Graph) -> CheckResult<usize> {
        let nodes: Vec<NodeRecord> = graph
            .iter()
            .map(|(id, node)| NodeRecord {
                id,
                name: node.name().to_string(),
                fingerprint: node.fingerprint.map(|f| f.to_string()),
                enabled: node.process.enabled,
                threads: node.process.threads.len(),
                action_depth: node.action_depth,
                fork_depth: node.fork_depth,
                failed_invariants: node.process.failed_invariants.clone(),
                witness: is_witness(&node.process),
                state: state_json(&node.process),
            })
            .collect();
        let links: Vec<LinkRecord> = graph
            .iter()
            .flat_map(|(from, node)| node.outbound.iter().map(move |link| LinkRecord { from, link }))
            .collect();

        let mut files = 0;
        for (i, chunk) in nodes.chunks(SHARD_SIZE).enumerate() {
            self.write_json(&format!("nodes_{:06}.json", i), chunk)?;
            files += 1;
        }
        for (i, chunk) in links.chunks(SHARD_SIZE).enumerate() {
            self.write_json(&format!("links_{:06}.json", i), chunk)?;
            files += 1;
        }
        if graph.len() <= MAX_DOT_NODES {
            self.write("graph.dot", &graph_dot(graph))?;
        }
        info!(nodes = nodes.len(), links = links.len(), files, "saved states");
        Ok(files)
    }
}
