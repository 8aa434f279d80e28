//! The reachable-state graph.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. A process that
//! is still waiting in the frontier is a [`Pending`] entry, not a node: it
//! becomes a node when it is attached, or is folded into an existing node
//! when its state turns out to be a duplicate.

use crate::process::{InvariantPosition, Process};
use crate::role::Message;
use crate::state::Fingerprint;
use fizz_ast::FairnessLevel;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(index: usize) -> Self {
        NodeId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// A new action started.
    Action,
    /// Any other step: a non-deterministic choice, `thread-i`, `crash`,
    /// channel delivery.
    Fork,
}

/// A directed edge. In `Node::outbound` the `node` is the destination; in
/// `Node::inbound` it is the source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub node: NodeId,
    pub name: String,
    pub kind: LinkKind,
    pub labels: Vec<String>,
    pub fairness: FairnessLevel,
    pub choice_fairness: FairnessLevel,
    pub messages: Vec<Message>,
    /// Thread slot in the source-side process -> equivalent slot in the
    /// canonical destination, recorded when the edge lands on a duplicate.
    pub threads_map: Vec<(usize, usize)>,
    pub failed_invariants: Vec<InvariantPosition>,
}

impl Link {
    pub fn is_fair(&self) -> bool {
        self.fairness.is_fair() || self.choice_fairness.is_fair()
    }

    pub fn is_strong(&self) -> bool {
        self.fairness == FairnessLevel::Strong || self.choice_fairness == FairnessLevel::Strong
    }

    /// A self-loop standing for "nothing fair is left to do here".
    pub fn stutter(node: NodeId) -> Link {
        Link {
            node,
            name: "stutter".to_string(),
            kind: LinkKind::Fork,
            labels: Vec::new(),
            fairness: FairnessLevel::Unknown,
            choice_fairness: FairnessLevel::Unknown,
            messages: Vec::new(),
            threads_map: Vec::new(),
            failed_invariants: Vec::new(),
        }
    }

    pub fn is_stutter(&self) -> bool {
        self.name == "stutter"
    }

    fn pointing_to(&self, node: NodeId) -> Link {
        Link {
            node,
            ..self.clone()
        }
    }
}

/// One hop of a reported trace: the node reached and the edge taken to
/// reach it, oriented source to destination (`link.node == node`). The
/// first hop of a trace has no edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStep {
    pub node: NodeId,
    pub link: Option<Link>,
}

impl TraceStep {
    pub fn start(node: NodeId) -> Self {
        Self { node, link: None }
    }

    pub fn via(link: &Link) -> Self {
        Self {
            node: link.node,
            link: Some(link.clone()),
        }
    }

    pub fn name(&self) -> &str {
        self.link.as_ref().map_or("", |l| l.name.as_str())
    }
}

/// The edge a pending process will arrive through.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLink {
    pub from: NodeId,
    pub name: String,
    pub kind: LinkKind,
}

/// A process waiting in the frontier.
#[derive(Debug, Clone)]
pub struct Pending {
    pub process: Process,
    pub link: Option<PendingLink>,
    pub action_depth: u64,
    pub fork_depth: u64,
}

impl Pending {
    pub fn root(process: Process) -> Self {
        Self {
            process,
            link: None,
            action_depth: 0,
            fork_depth: 0,
        }
    }

    /// A new action started from `from`.
    pub fn for_action(from: NodeId, process: Process, name: &str, action_depth: u64, fork_depth: u64) -> Self {
        Self {
            process,
            link: Some(PendingLink {
                from,
                name: name.to_string(),
                kind: LinkKind::Action,
            }),
            action_depth: action_depth + 1,
            fork_depth: fork_depth + 1,
        }
    }

    /// Any other step out of `from`.
    pub fn for_fork(from: NodeId, process: Process, name: &str, action_depth: u64, fork_depth: u64) -> Self {
        Self {
            process,
            link: Some(PendingLink {
                from,
                name: name.to_string(),
                kind: LinkKind::Fork,
            }),
            action_depth,
            fork_depth: fork_depth + 1,
        }
    }

    /// The complete edge, carrying what the step recorded on the process.
    pub fn inbound_link(&self) -> Option<Link> {
        self.link.as_ref().map(|l| Link {
            node: l.from,
            name: l.name.clone(),
            kind: l.kind,
            labels: self.process.labels.clone(),
            fairness: self.process.fairness,
            choice_fairness: self.process.choice_fairness,
            messages: self.process.messages.clone(),
            threads_map: Vec::new(),
            failed_invariants: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct Node {
    pub process: Process,
    pub fingerprint: Option<Fingerprint>,
    pub inbound: Vec<Link>,
    pub outbound: Vec<Link>,
    /// Fewest actions from the root.
    pub action_depth: u64,
    /// Fewest forks from the root.
    pub fork_depth: u64,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.process.name
    }

    pub fn is_yield(&self) -> bool {
        self.process.name == "yield"
    }

    pub fn has_threads(&self) -> bool {
        !self.process.threads.is_empty()
    }

    pub fn has_failed_invariants(&self) -> bool {
        !self.process.failed_invariants.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId::new(i), n))
    }

    /// Adds `pending` as a node, linking it from its parent.
    pub fn attach(&mut self, pending: Pending, fingerprint: Option<Fingerprint>) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        let inbound = pending.inbound_link();
        let mut process = pending.process;
        process.node = Some(id);
        let mut node = Node {
            process,
            fingerprint,
            inbound: Vec::new(),
            outbound: Vec::new(),
            action_depth: pending.action_depth,
            fork_depth: pending.fork_depth,
        };
        if let Some(link) = inbound {
            self.nodes[link.node.index()].outbound.push(link.pointing_to(id));
            node.inbound.push(link);
        }
        self.nodes.push(node);
        id
    }

    /// Routes the edge that produced `pending` to the existing node `target`.
    pub fn duplicate(&mut self, pending: &Pending, target: NodeId, threads_map: Vec<(usize, usize)>) {
        let Some(mut link) = pending.inbound_link() else {
            return;
        };
        link.threads_map = threads_map;
        self.nodes[link.node.index()].outbound.push(link.pointing_to(target));
        self.nodes[target.index()].inbound.push(link);
    }

    /// Marks the ancestors of a process that just made progress as enabled,
    /// stopping at the first one that already is or has no threads.
    pub fn enable_ancestors(&mut self, mut parent: Option<NodeId>) {
        while let Some(id) = parent {
            let node = &mut self.nodes[id.index()];
            if node.process.enabled || node.process.threads.is_empty() {
                break;
            }
            node.process.enabled = true;
            parent = node.process.parent;
        }
    }

    /// Records transition-invariant failures on the edge into `id`.
    pub fn record_link_failures(&mut self, id: NodeId, failures: &[InvariantPosition]) {
        if failures.is_empty() {
            return;
        }
        let Some(link) = self.nodes[id.index()].inbound.first_mut() else {
            return;
        };
        link.failed_invariants.extend_from_slice(failures);
        let from = link.node;
        let index = self.nodes[from.index()]
            .outbound
            .iter()
            .rposition(|l| l.node == id);
        if let Some(i) = index {
            self.nodes[from.index()].outbound[i]
                .failed_invariants
                .extend_from_slice(failures);
        }
    }

    /// The path from the root to `id` along first inbound links, as
    /// `(node, edge into it)` pairs. The root has no edge, even when later
    /// states link back to it.
    pub fn path_to(&self, id: NodeId) -> Vec<(NodeId, Option<&Link>)> {
        let mut path = Vec::new();
        let mut current = id;
        loop {
            let inbound = match current.index() {
                0 => None,
                _ => self.nodes[current.index()].inbound.first(),
            };
            path.push((current, inbound));
            match inbound {
                Some(link) if link.node != current => current = link.node,
                _ => break,
            }
        }
        path.reverse();
        path
    }

    /// [`Graph::path_to`] as an owned trace with outbound-oriented edges.
    pub fn trace_to(&self, id: NodeId) -> Vec<TraceStep> {
        self.path_to(id)
            .into_iter()
            .map(|(node, link)| TraceStep {
                node,
                link: link.map(|l| l.pointing_to(node)),
            })
            .collect()
    }

    /// Nodes reachable from `from`, breadth first.
    pub fn reachable(&self, from: NodeId) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut queue = VecDeque::from([from]);
        seen[from.index()] = true;
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for link in &self.nodes[id.index()].outbound {
                if !seen[link.node.index()] {
                    seen[link.node.index()] = true;
                    queue.push_back(link.node);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CallFrame;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn process() -> Process {
        Process::new(Arc::new(BTreeMap::new()), &[])
    }

    #[test]
    fn test_attach_links_both_directions() {
        let mut graph = Graph::new();
        let root = graph.attach(Pending::root(process()), None);
        let mut child = process();
        child.labels.push("A.l".into());
        child.fairness = FairnessLevel::Strong;
        let id = graph.attach(Pending::for_action(root, child, "A", 0, 0), None);

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.node(id).action_depth, 1);
        assert_eq!(graph.node(id).process.node, Some(id));
        let out = &graph.node(root).outbound[0];
        assert_eq!(out.node, id);
        assert_eq!(out.labels, vec!["A.l".to_string()]);
        assert!(out.is_strong());
        assert_eq!(graph.node(id).inbound[0].node, root);
    }

    #[test]
    fn test_duplicate_routes_to_target() {
        let mut graph = Graph::new();
        let root = graph.attach(Pending::root(process()), None);
        let a = graph.attach(Pending::for_action(root, process(), "A", 0, 0), None);
        let dup = Pending::for_fork(a, process(), "thread-0", 1, 1);
        graph.duplicate(&dup, root, vec![(0, 0)]);

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.node(a).outbound[0].node, root);
        assert_eq!(graph.node(root).inbound[0].node, a);
        assert_eq!(graph.node(root).inbound[0].threads_map, vec![(0, 0)]);
    }

    #[test]
    fn test_enable_ancestors_stops_at_threadless() {
        let mut graph = Graph::new();
        let root = graph.attach(Pending::root(process()), None);
        let mut mid = process();
        mid.threads.push(crate::frame::Thread::new(CallFrame::new(0, "Actions[0]", "A")));
        mid.parent = Some(root);
        let mid = graph.attach(Pending::for_action(root, mid, "A", 0, 0), None);

        graph.enable_ancestors(Some(mid));
        assert!(graph.node(mid).process.enabled);
        assert!(!graph.node(root).process.enabled);
    }

    #[test]
    fn test_path_to_follows_first_inbound() {
        let mut graph = Graph::new();
        let root = graph.attach(Pending::root(process()), None);
        let a = graph.attach(Pending::for_action(root, process(), "A", 0, 0), None);
        let b = graph.attach(Pending::for_fork(a, process(), "yield", 1, 1), None);
        graph.duplicate(&Pending::for_fork(b, process(), "x", 1, 2), a, Vec::new());

        let path = graph.path_to(b);
        let names: Vec<_> = path
            .iter()
            .map(|(_, l)| l.map_or("", |l| l.name.as_str()))
            .collect();
        assert_eq!(names, vec!["", "A", "yield"]);
        let trace = graph.trace_to(b);
        assert_eq!(trace[2].node, b);
        assert_eq!(trace[2].link.as_ref().map(|l| l.node), Some(b));
        assert_eq!(trace[1].name(), "A");
        assert_eq!(graph.reachable(root), vec![root, a, b]);

        graph.duplicate(&Pending::for_action(b, process(), "back", 2, 0), root, Vec::new());
        assert_eq!(graph.path_to(root).len(), 1);
        assert_eq!(graph.path_to(b).len(), 3);
    }
}
