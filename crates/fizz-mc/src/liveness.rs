//! Liveness checking over the finished state graph.
//!
//! `always eventually P` fails when some fair cycle never visits a state
//! witnessing `P`; `eventually always P` fails when some fair cycle visits
//! a state that does not. A state with no fair way out is treated as a
//! cycle onto itself (a `stutter` link).
//!
//! Three checkers are available, see [`LivenessMode`]. The strict ones
//! split the graph into strongly connected components until what remains
//! is fair, then walk to the first such component depth or breadth first;
//! the eventual one is a backwards fixed point over fair links, which is
//! fast but only builds a plausible counterexample.

use crate::config::LivenessMode;
use crate::error::{CheckError, CheckResult};
use crate::graph::{Graph, Link, Node, NodeId, TraceStep};
use crate::invariants::witnessed;
use crate::model::Model;
use crate::process::InvariantPosition;
use fizz_ast::{FairnessLevel, Invariant};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessKind {
    AlwaysEventually,
    EventuallyAlways,
}

impl LivenessKind {
    pub fn of(inv: &Invariant) -> Option<Self> {
        match &inv.block {
            None if inv.always && inv.eventually => Some(LivenessKind::AlwaysEventually),
            None if inv.eventually && inv.nested.as_ref().is_some_and(|n| n.always) => {
                Some(LivenessKind::EventuallyAlways)
            }
            None => None,
            Some(_) => match inv.temporal_operators.as_slice() {
                [a, b, ..] if a == "always" && b == "eventually" => Some(LivenessKind::AlwaysEventually),
                [a, b, ..] if a == "eventually" && b == "always" => Some(LivenessKind::EventuallyAlways),
                _ => None,
            },
        }
    }
}

/// A liveness counterexample: a path from the root whose tail is a fair
/// cycle, or which ends in a `stutter` link.
#[derive(Debug, Clone)]
pub struct LivenessFailure {
    pub position: InvariantPosition,
    pub path: Vec<TraceStep>,
}

/// Checks every liveness invariant of the model, returning the first failure.
pub fn check_liveness(
    model: &Model,
    graph: &Graph,
    mode: LivenessMode,
) -> CheckResult<Option<LivenessFailure>> {
    if mode == LivenessMode::Off || graph.is_empty() {
        return Ok(None);
    }
    let root = NodeId::new(0);
    for (fi, file) in model.files.iter().enumerate() {
        for (j, inv) in file.invariants.iter().enumerate() {
            let Some(kind) = LivenessKind::of(inv) else {
                continue;
            };
            let position = InvariantPosition::new(fi, j);
            info!(invariant = %inv.name, ?kind, mode = mode.as_str(), "checking liveness");
            let relevant = |id: NodeId| {
                let node = graph.node(id);
                (
                    !node.has_threads() || node.is_yield(),
                    witnessed(&node.process, position),
                )
            };
            let path = match (mode, kind) {
                (LivenessMode::Off, _) => None,
                (LivenessMode::Strict, kind) => strict(graph, root, &relevant, kind.goal(), false),
                (LivenessMode::StrictBfs, kind) => strict(graph, root, &relevant, kind.goal(), true),
                (LivenessMode::Eventual, kind) => {
                    let fast = |id: NodeId| {
                        let node = graph.node(id);
                        (!node.has_threads(), witnessed(&node.process, position))
                    };
                    match kind {
                        LivenessKind::AlwaysEventually => always_eventually_fast(graph, &fast),
                        LivenessKind::EventuallyAlways => eventually_always_fast(graph, &fast)?,
                    }
                }
            };
            if let Some(path) = path {
                info!(invariant = %inv.name, len = path.len(), "liveness violated");
                return Ok(Some(LivenessFailure {
                    position,
                    path: materialize(graph, &path),
                }));
            }
        }
    }
    Ok(None)
}

/// One step of a path under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hop {
    node: NodeId,
    via: Via,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Via {
    Start,
    /// `outbound[index]` of the source node.
    Edge(NodeId, usize),
    Stutter,
}

impl Hop {
    fn start(node: NodeId) -> Self {
        Hop {
            node,
            via: Via::Start,
        }
    }

    fn edge(graph: &Graph, from: NodeId, index: usize) -> Self {
        Hop {
            node: graph.node(from).outbound[index].node,
            via: Via::Edge(from, index),
        }
    }

    fn stutter(node: NodeId) -> Self {
        Hop {
            node,
            via: Via::Stutter,
        }
    }
}

fn materialize(graph: &Graph, path: &[Hop]) -> Vec<TraceStep> {
    path.iter()
        .map(|hop| match hop.via {
            Via::Start => TraceStep::start(hop.node),
            Via::Edge(from, i) => TraceStep::via(&graph.node(from).outbound[i]),
            Via::Stutter => TraceStep::via(&Link::stutter(hop.node)),
        })
        .collect()
}

/// `(relevant, value)` of a node for one invariant.
type Predicate<'p> = &'p dyn Fn(NodeId) -> (bool, bool);

/// What a fair cycle has to look like to refute a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Goal {
    /// No state on the cycle witnesses it.
    AvoidWitness,
    /// Some state on the cycle refutes it.
    VisitRefuting,
}

impl Goal {
    fn allows(self, value: (bool, bool)) -> bool {
        match self {
            Goal::AvoidWitness => value != (true, true),
            Goal::VisitRefuting => true,
        }
    }

    fn is_target(self, value: (bool, bool)) -> bool {
        match self {
            Goal::AvoidWitness => true,
            Goal::VisitRefuting => value == (true, false),
        }
    }
}

impl LivenessKind {
    fn goal(self) -> Goal {
        match self {
            LivenessKind::AlwaysEventually => Goal::AvoidWitness,
            LivenessKind::EventuallyAlways => Goal::VisitRefuting,
        }
    }
}

/// An `any` choice, or a `oneof` branch taken by a fair action.
fn is_choice_link(link: &Link) -> bool {
    link.name.starts_with("Any:") || (link.name.starts_with("Stmt:") && link.choice_fairness.is_fair())
}

/// Name and effective fairness of an outbound link for fairness
/// bookkeeping. Choices and thread switches are told apart by the program
/// counter (and role) they resume, and always count as strong.
fn fairness_link_name(node: &Node, link: &Link) -> (String, FairnessLevel) {
    if !is_choice_link(link) && !link.name.starts_with("thread-") {
        return (link.name.clone(), link.fairness);
    }
    let mut name = link.name.clone();
    if let Some(thread) = node.process.current_thread() {
        name.push('|');
        name.push_str(thread.current_pc());
        if let Some(obj) = thread.top().and_then(|f| f.obj.as_ref()) {
            name.push('|');
            name.push_str(&obj.short());
        }
    }
    (name, FairnessLevel::Strong)
}

fn is_fair_choice(node: &Node) -> bool {
    node.outbound
        .first()
        .is_some_and(|l| is_choice_link(l) && l.choice_fairness.is_fair())
}

/// Where fairness is judged: `Some(true)` at a fair choice, `Some(false)`
/// at a state between actions.
fn scheduling_point(node: &Node) -> Option<bool> {
    if matches!(node.name(), "init" | "yield" | "crash") {
        Some(false)
    } else if is_fair_choice(node) {
        Some(true)
    } else {
        None
    }
}

/// A crash taken where something else could run never closes a fair cycle.
fn usable(node: &Node, link: &Link) -> bool {
    !link.name.starts_with("crash") || node.outbound.iter().all(|l| l.name.starts_with("crash"))
}

/// Whether a node may stutter: a scheduling point with nothing fair left
/// to run and no thread waiting to resume.
fn may_stutter(node: &Node) -> bool {
    matches!(node.name(), "yield" | "crash" | "init")
        && !node.outbound.iter().any(|l| l.fairness.is_fair())
        && !node.outbound.iter().any(|l| l.name.starts_with("thread-"))
}

const UNSET: u32 = u32::MAX;

enum Judgement {
    Fair,
    /// Only the remaining nodes can still lie on a fair cycle.
    Split(Vec<NodeId>),
    Unfair,
}

/// Strongly connected components holding a fair cycle that meets the goal.
///
/// A component is fair when every strong-fair link enabled at one of its
/// scheduling points is also taken inside it, and no weak-fair link is
/// enabled at all of them without being taken. Nodes enabling a strong
/// link the component never takes are dropped and the rest split again.
/// The result is independent of link order.
struct FairComponents<'g, 'p> {
    graph: &'g Graph,
    pred: Predicate<'p>,
    goal: Goal,
    /// Nodes of the set being worked on share its stamp.
    stamp: Vec<u32>,
    next_stamp: u32,
    index: Vec<u32>,
    low: Vec<u32>,
    on_stack: Vec<bool>,
}

impl<'g, 'p> FairComponents<'g, 'p> {
    fn new(graph: &'g Graph, pred: Predicate<'p>, goal: Goal) -> Self {
        let n = graph.len();
        Self {
            graph,
            pred,
            goal,
            stamp: vec![UNSET; n],
            next_stamp: 0,
            index: vec![UNSET; n],
            low: vec![UNSET; n],
            on_stack: vec![false; n],
        }
    }

    fn find(mut self) -> Vec<Vec<NodeId>> {
        let pred = self.pred;
        let goal = self.goal;
        let all: Vec<NodeId> = self.graph.ids().filter(|&id| goal.allows(pred(id))).collect();
        let mut work = vec![all];
        let mut fair = Vec::new();
        while let Some(set) = work.pop() {
            let stamp = self.mark(&set);
            for component in self.components(&set, stamp) {
                let stamp = self.mark(&component);
                match self.judge(&component, stamp) {
                    Judgement::Split(rest) => work.push(rest),
                    Judgement::Unfair => {}
                    Judgement::Fair => {
                        if component.iter().any(|&id| goal.is_target(pred(id))) {
                            fair.push(component);
                        }
                    }
                }
            }
        }
        fair
    }

    fn mark(&mut self, set: &[NodeId]) -> u32 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        for id in set {
            self.stamp[id.index()] = stamp;
        }
        stamp
    }

    fn visit(&mut self, id: NodeId, counter: &mut u32, stack: &mut Vec<NodeId>) {
        self.index[id.index()] = *counter;
        self.low[id.index()] = *counter;
        *counter += 1;
        self.on_stack[id.index()] = true;
        stack.push(id);
    }

    /// Tarjan over the nodes stamped `stamp`, keeping only components that
    /// contain a cycle.
    fn components(&mut self, set: &[NodeId], stamp: u32) -> Vec<Vec<NodeId>> {
        let graph = self.graph;
        let mut out = Vec::new();
        let mut counter = 0;
        let mut stack = Vec::new();
        for &root in set {
            if self.index[root.index()] != UNSET {
                continue;
            }
            self.visit(root, &mut counter, &mut stack);
            let mut calls = vec![(root, 0usize)];
            while let Some(&(v, i)) = calls.last() {
                let node = graph.node(v);
                if let Some(link) = node.outbound.get(i) {
                    if let Some(top) = calls.last_mut() {
                        top.1 += 1;
                    }
                    let w = link.node;
                    if self.stamp[w.index()] != stamp || !usable(node, link) {
                        continue;
                    }
                    if self.index[w.index()] == UNSET {
                        self.visit(w, &mut counter, &mut stack);
                        calls.push((w, 0));
                    } else if self.on_stack[w.index()] {
                        self.low[v.index()] = self.low[v.index()].min(self.index[w.index()]);
                    }
                    continue;
                }
                calls.pop();
                if let Some(&(u, _)) = calls.last() {
                    self.low[u.index()] = self.low[u.index()].min(self.low[v.index()]);
                }
                if self.low[v.index()] != self.index[v.index()] {
                    continue;
                }
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    self.on_stack[w.index()] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                let self_loop = node.outbound.iter().any(|l| l.node == v && usable(node, l));
                if component.len() > 1 || self_loop {
                    component.sort();
                    out.push(component);
                }
            }
        }
        for id in set {
            self.index[id.index()] = UNSET;
            self.low[id.index()] = UNSET;
        }
        out
    }

    fn judge(&self, component: &[NodeId], stamp: u32) -> Judgement {
        let mut strong_enabled: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        let mut strong_taken = BTreeSet::new();
        let mut weak_enabled: BTreeMap<(bool, String), usize> = BTreeMap::new();
        let mut weak_taken = BTreeSet::new();
        let mut points = [0usize; 2];
        for &id in component {
            let node = self.graph.node(id);
            let Some(choice) = scheduling_point(node) else {
                continue;
            };
            points[usize::from(choice)] += 1;
            let mut weak_here = BTreeSet::new();
            for link in &node.outbound {
                let (name, fairness) = fairness_link_name(node, link);
                let taken = self.stamp[link.node.index()] == stamp && usable(node, link);
                match fairness {
                    FairnessLevel::Strong => {
                        if taken {
                            strong_taken.insert(name.clone());
                        }
                        strong_enabled.entry(name).or_default().push(id);
                    }
                    FairnessLevel::Weak => {
                        if taken {
                            weak_taken.insert(name.clone());
                        }
                        weak_here.insert((is_choice_link(link), name));
                    }
                    _ => {}
                }
            }
            for key in weak_here {
                *weak_enabled.entry(key).or_default() += 1;
            }
        }
        let blocked: BTreeSet<NodeId> = strong_enabled
            .iter()
            .filter(|(name, _)| !strong_taken.contains(*name))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        if !blocked.is_empty() {
            let rest = component.iter().copied().filter(|id| !blocked.contains(id)).collect();
            return Judgement::Split(rest);
        }
        let starved = weak_enabled.iter().any(|((choice, name), count)| {
            *count == points[usize::from(*choice)] && !weak_taken.contains(name)
        });
        if starved {
            Judgement::Unfair
        } else {
            Judgement::Fair
        }
    }
}

/// Depth- or breadth-first spanning tree from the root, used to order
/// counterexamples and to build their prefix.
struct SearchTree {
    order: Vec<usize>,
    parent: Vec<Option<(NodeId, usize)>>,
    root: NodeId,
}

impl SearchTree {
    fn new(graph: &Graph, root: NodeId, breadth_first: bool) -> Self {
        let mut tree = SearchTree {
            order: vec![usize::MAX; graph.len()],
            parent: vec![None; graph.len()],
            root,
        };
        let mut count = 0;
        tree.order[root.index()] = count;
        if breadth_first {
            let mut queue = VecDeque::from([root]);
            while let Some(id) = queue.pop_front() {
                for (i, link) in graph.node(id).outbound.iter().enumerate() {
                    if tree.order[link.node.index()] == usize::MAX {
                        count += 1;
                        tree.order[link.node.index()] = count;
                        tree.parent[link.node.index()] = Some((id, i));
                        queue.push_back(link.node);
                    }
                }
            }
        } else {
            let mut stack = vec![(root, 0usize)];
            while let Some(&(id, i)) = stack.last() {
                let Some(link) = graph.node(id).outbound.get(i) else {
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if tree.order[link.node.index()] == usize::MAX {
                    count += 1;
                    tree.order[link.node.index()] = count;
                    tree.parent[link.node.index()] = Some((id, i));
                    stack.push((link.node, 0));
                }
            }
        }
        tree
    }

    fn order(&self, id: NodeId) -> Option<usize> {
        Some(self.order[id.index()]).filter(|&o| o != usize::MAX)
    }

    fn path(&self, graph: &Graph, id: NodeId) -> Vec<Hop> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some((from, index)) = self.parent[current.index()] {
            path.push(Hop::edge(graph, from, index));
            current = from;
        }
        path.push(Hop::start(self.root));
        path.reverse();
        path
    }
}

/// Shortest route from `from` to `to` inside `members`, excluding `from`.
fn route(graph: &Graph, members: &BTreeSet<NodeId>, from: NodeId, to: NodeId) -> Vec<Hop> {
    if from == to {
        return Vec::new();
    }
    let mut parent: BTreeMap<NodeId, (NodeId, usize)> = BTreeMap::new();
    let mut queue = VecDeque::from([from]);
    while let Some(id) = queue.pop_front() {
        let node = graph.node(id);
        for (i, link) in node.outbound.iter().enumerate() {
            let next = link.node;
            if next == from || !members.contains(&next) || !usable(node, link) || parent.contains_key(&next) {
                continue;
            }
            parent.insert(next, (id, i));
            if next == to {
                let mut hops = Vec::new();
                let mut at = to;
                while let Some(&(prev, index)) = parent.get(&at) {
                    hops.push(Hop::edge(graph, prev, index));
                    if prev == from {
                        break;
                    }
                    at = prev;
                }
                hops.reverse();
                return hops;
            }
            queue.push_back(next);
        }
    }
    Vec::new()
}

/// A closed walk from `entry` through a fair component: it takes one link
/// of every fair name taken inside, passes a state where each untaken
/// weak-fair link is disabled, and visits a refuting state.
fn fair_walk(graph: &Graph, component: &[NodeId], entry: NodeId, pred: Predicate<'_>, goal: Goal) -> Vec<Hop> {
    let members: BTreeSet<NodeId> = component.iter().copied().collect();
    let mut edges: BTreeMap<String, (NodeId, usize)> = BTreeMap::new();
    let mut weak: BTreeMap<String, bool> = BTreeMap::new();
    let mut points: Vec<(NodeId, bool, BTreeSet<String>)> = Vec::new();
    for &id in component {
        let node = graph.node(id);
        let Some(choice) = scheduling_point(node) else {
            continue;
        };
        let mut enabled = BTreeSet::new();
        for (i, link) in node.outbound.iter().enumerate() {
            let (name, fairness) = fairness_link_name(node, link);
            if !fairness.is_fair() {
                continue;
            }
            if members.contains(&link.node) && usable(node, link) {
                edges.entry(name.clone()).or_insert((id, i));
            }
            if fairness == FairnessLevel::Weak {
                weak.insert(name.clone(), is_choice_link(link));
                enabled.insert(name);
            }
        }
        points.push((id, choice, enabled));
    }

    let mut visits = Vec::new();
    for (name, choice) in &weak {
        if edges.contains_key(name) {
            continue;
        }
        let rest = points.iter().find(|(_, c, enabled)| c == choice && !enabled.contains(name));
        if let Some(&(id, _, _)) = rest {
            visits.push(id);
        }
    }
    if goal == Goal::VisitRefuting {
        visits.extend(component.iter().copied().find(|&id| goal.is_target(pred(id))));
    }
    if edges.is_empty() {
        let node = graph.node(entry);
        let first = node
            .outbound
            .iter()
            .position(|l| members.contains(&l.node) && usable(node, l));
        if let Some(index) = first {
            edges.insert(String::new(), (entry, index));
        }
    }

    let mut walk = Vec::new();
    let mut at = entry;
    for &(from, index) in edges.values() {
        walk.extend(route(graph, &members, at, from));
        let hop = Hop::edge(graph, from, index);
        walk.push(hop);
        at = hop.node;
    }
    for id in visits {
        walk.extend(route(graph, &members, at, id));
        at = id;
    }
    walk.extend(route(graph, &members, at, entry));
    walk
}

/// The strict check: the fair cycle or stutter meeting `goal` whose entry
/// comes first in a depth- or breadth-first walk from the root. Both walks
/// reach the same verdict; they differ only in the counterexample.
fn strict(graph: &Graph, root: NodeId, pred: Predicate<'_>, goal: Goal, breadth_first: bool) -> Option<Vec<Hop>> {
    let tree = SearchTree::new(graph, root, breadth_first);
    let mut best: Option<(usize, NodeId, Option<Vec<NodeId>>)> = None;
    for id in graph.ids() {
        let value = pred(id);
        if !may_stutter(graph.node(id)) || !goal.allows(value) || !goal.is_target(value) {
            continue;
        }
        if let Some(order) = tree.order(id) {
            if best.as_ref().map_or(true, |(o, ..)| order < *o) {
                best = Some((order, id, None));
            }
        }
    }
    for component in FairComponents::new(graph, pred, goal).find() {
        let entry = component
            .iter()
            .filter_map(|&id| tree.order(id).map(|o| (o, id)))
            .min();
        if let Some((order, id)) = entry {
            if best.as_ref().map_or(true, |(o, ..)| order < *o) {
                best = Some((order, id, Some(component)));
            }
        }
    }
    let (_, entry, component) = best?;
    let mut path = tree.path(graph, entry);
    match component {
        Some(component) => {
            debug!(entry = %entry, size = component.len(), "fair cycle found");
            path.extend(fair_walk(graph, &component, entry, pred, goal));
        }
        None => path.push(Hop::stutter(entry)),
    }
    Some(path)
}

/// Follows first links from `root` until a state repeats.
fn first_lasso(graph: &Graph, root: NodeId) -> Vec<Hop> {
    let mut seen = vec![false; graph.len()];
    let mut path = vec![Hop::start(root)];
    let mut at = root;
    while !std::mem::replace(&mut seen[at.index()], true) {
        if graph.node(at).outbound.is_empty() {
            path.push(Hop::stutter(at));
            break;
        }
        let hop = Hop::edge(graph, at, 0);
        path.push(hop);
        at = hop.node;
    }
    path
}

/// Fixed point for `always eventually`: a node is good when it witnesses
/// the property or a fair link leads from it to a good node.
fn always_eventually_fast(graph: &Graph, pred: Predicate<'_>) -> Option<Vec<Hop>> {
    let mut good = vec![false; graph.len()];
    let mut visited = vec![false; graph.len()];
    let mut queue = VecDeque::new();
    for id in graph.ids() {
        if pred(id) == (true, true) {
            good[id.index()] = true;
            queue.push_back(id);
        }
    }
    while let Some(id) = queue.pop_front() {
        if std::mem::replace(&mut visited[id.index()], true) {
            continue;
        }
        for link in &graph.node(id).inbound {
            if visited[link.node.index()] || link.node == id || !link.fairness.is_fair() {
                continue;
            }
            good[link.node.index()] = true;
            queue.push_back(link.node);
        }
    }
    let closest = graph
        .iter()
        .filter(|(id, _)| !good[id.index()])
        .min_by_key(|(id, node)| (node.has_threads(), node.action_depth, node.fork_depth, *id))
        .map(|(id, _)| id)?;
    debug!(node = %closest, "closest node that cannot reach a witness");
    let mut path = path_to_root(graph, closest);
    path.extend(cycle_from(graph, closest, &good));
    Some(path)
}

/// Fixed point for `eventually always`: nodes that can reach a bad node
/// are bad; the rest must be reached infinitely often.
fn eventually_always_fast(graph: &Graph, pred: Predicate<'_>) -> CheckResult<Option<Vec<Hop>>> {
    let mut good = vec![false; graph.len()];
    let mut visited = vec![false; graph.len()];
    let mut queue = VecDeque::new();
    for (id, node) in graph.iter() {
        if node.outbound.is_empty() {
            return Err(CheckError::LivenessDeadlock(id.index()));
        }
        match pred(id) {
            (true, false) => queue.push_back(id),
            (true, true) => good[id.index()] = true,
            _ => {}
        }
    }
    while let Some(id) = queue.pop_front() {
        if std::mem::replace(&mut visited[id.index()], true) {
            continue;
        }
        for link in &graph.node(id).inbound {
            if !visited[link.node.index()] {
                good[link.node.index()] = false;
                queue.push_back(link.node);
            }
        }
    }
    if good.iter().any(|&g| g) {
        let settled = |id: NodeId| (true, good[id.index()]);
        return Ok(always_eventually_fast(graph, &settled));
    }
    debug!("every behavior reaches a bad state");
    Ok(Some(first_lasso(graph, NodeId::new(0))))
}

/// Path from the root to `id` along first inbound links.
fn path_to_root(graph: &Graph, id: NodeId) -> Vec<Hop> {
    let mut path = Vec::new();
    let mut current = id;
    loop {
        let node = graph.node(current);
        let parent = node.inbound.first().map(|l| l.node);
        match parent {
            Some(from) if current.index() != 0 && node.name() != "init" => {
                let index = graph
                    .node(from)
                    .outbound
                    .iter()
                    .position(|l| l.node == current);
                match index {
                    Some(index) => path.push(Hop {
                        node: current,
                        via: Via::Edge(from, index),
                    }),
                    None => {
                        path.push(Hop::start(current));
                        break;
                    }
                }
                current = from;
            }
            _ => {
                path.push(Hop::start(current));
                break;
            }
        }
    }
    path.reverse();
    path
}

/// A cycle (or stutter) starting at `start` that stays among the nodes not
/// marked `good`, following strong-fair links.
fn cycle_from(graph: &Graph, start: NodeId, good: &[bool]) -> Vec<Hop> {
    let mut on_path = vec![false; graph.len()];
    let mut done = vec![false; graph.len()];
    let mut path: Vec<Hop> = Vec::new();
    let mut stack = vec![(start, 0usize)];
    on_path[start.index()] = true;
    while let Some(&(id, next)) = stack.last() {
        let candidates: Vec<usize> = graph
            .node(id)
            .outbound
            .iter()
            .enumerate()
            .filter(|(_, l)| l.fairness == FairnessLevel::Strong && !good[l.node.index()])
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            path.push(Hop::stutter(id));
            return path;
        }
        let Some(&index) = candidates.get(next) else {
            stack.pop();
            on_path[id.index()] = false;
            done[id.index()] = true;
            path.pop();
            continue;
        };
        if let Some(top) = stack.last_mut() {
            top.1 += 1;
        }
        let hop = Hop::edge(graph, id, index);
        if on_path[hop.node.index()] {
            path.push(hop);
            return path;
        }
        if done[hop.node.index()] {
            continue;
        }
        path.push(hop);
        on_path[hop.node.index()] = true;
        stack.push((hop.node, 0));
    }
    vec![Hop::stutter(start)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Pending;
    use crate::process::Process;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const ALWAYS_EVENTUALLY: &str =
        r#"{"invariants": [{"name": "Live", "always": true, "eventually": true, "pyExpr": "x == 0"}]}"#;
    const EVENTUALLY_ALWAYS: &str =
        r#"{"invariants": [{"name": "Settle", "eventually": true, "nested": {"always": true, "pyExpr": "x > 5"}}]}"#;

    fn state(name: &str, witness: bool, fairness: FairnessLevel) -> Process {
        let mut p = Process::new(Arc::new(BTreeMap::new()), &[1]);
        p.name = name.to_string();
        p.witness[0][0] = witness;
        p.fairness = fairness;
        p
    }

    /// `init -> a -> b -> a` with every edge an action `A` of `fairness`.
    fn lasso(fairness: FairnessLevel, witnesses: [bool; 3]) -> Graph {
        let mut graph = Graph::new();
        let root = graph.attach(Pending::root(state("init", witnesses[0], fairness)), None);
        let a = graph.attach(
            Pending::for_action(root, state("yield", witnesses[1], fairness), "A", 0, 0),
            None,
        );
        let b = graph.attach(
            Pending::for_action(a, state("yield", witnesses[2], fairness), "A", 1, 1),
            None,
        );
        let back = Pending::for_action(b, state("yield", witnesses[1], fairness), "A", 2, 2);
        graph.duplicate(&back, a, Vec::new());
        graph
    }

    fn names(failure: &LivenessFailure) -> Vec<&str> {
        failure.path.iter().map(TraceStep::name).collect()
    }

    const ALL_MODES: [LivenessMode; 3] = [LivenessMode::Strict, LivenessMode::StrictBfs, LivenessMode::Eventual];

    #[test]
    fn test_kind_detection() {
        let model = Model::from_json(ALWAYS_EVENTUALLY).unwrap();
        assert_eq!(
            LivenessKind::of(&model.main().invariants[0]),
            Some(LivenessKind::AlwaysEventually)
        );
        let model = Model::from_json(EVENTUALLY_ALWAYS).unwrap();
        assert_eq!(
            LivenessKind::of(&model.main().invariants[0]),
            Some(LivenessKind::EventuallyAlways)
        );
        let model = Model::from_json(
            r#"{"invariants": [{"name": "Safe", "always": true, "pyExpr": "True"}]}"#,
        )
        .unwrap();
        assert_eq!(LivenessKind::of(&model.main().invariants[0]), None);
    }

    #[test]
    fn test_fair_cycle_through_witness_is_live() {
        let model = Model::from_json(ALWAYS_EVENTUALLY).unwrap();
        let graph = lasso(FairnessLevel::Strong, [true, false, true]);
        for mode in ALL_MODES {
            assert!(check_liveness(&model, &graph, mode).unwrap().is_none(), "{:?}", mode);
        }
    }

    #[test]
    fn test_fair_cycle_without_witness_fails() {
        let model = Model::from_json(ALWAYS_EVENTUALLY).unwrap();
        let graph = lasso(FairnessLevel::Strong, [true, false, false]);
        let failure = check_liveness(&model, &graph, LivenessMode::Strict).unwrap().unwrap();
        assert_eq!(failure.position, InvariantPosition::new(0, 0));
        assert_eq!(names(&failure), vec!["", "A", "A", "A"]);
        assert_eq!(failure.path.last().map(|s| s.node), Some(NodeId::new(1)));

        for mode in [LivenessMode::StrictBfs, LivenessMode::Eventual] {
            assert!(check_liveness(&model, &graph, mode).unwrap().is_some(), "{:?}", mode);
        }
    }

    #[test]
    fn test_unfair_action_stutters() {
        let model = Model::from_json(ALWAYS_EVENTUALLY).unwrap();
        let graph = lasso(FairnessLevel::Unknown, [true, false, true]);
        for mode in ALL_MODES {
            let failure = check_liveness(&model, &graph, mode).unwrap().unwrap();
            assert_eq!(names(&failure), vec!["", "A", "stutter"], "{:?}", mode);
        }
    }

    #[test]
    fn test_eventually_always() {
        let model = Model::from_json(EVENTUALLY_ALWAYS).unwrap();
        // init -> a -> a: settles in a
        let mut graph = Graph::new();
        let root = graph.attach(Pending::root(state("init", false, FairnessLevel::Strong)), None);
        let a = graph.attach(
            Pending::for_action(root, state("yield", true, FairnessLevel::Strong), "A", 0, 0),
            None,
        );
        let back = Pending::for_action(a, state("yield", true, FairnessLevel::Strong), "A", 1, 1);
        graph.duplicate(&back, a, Vec::new());
        for mode in ALL_MODES {
            assert!(check_liveness(&model, &graph, mode).unwrap().is_none(), "{:?}", mode);
        }

        // a <-> b, b never settles
        let graph = lasso(FairnessLevel::Strong, [false, true, false]);
        for mode in ALL_MODES {
            assert!(check_liveness(&model, &graph, mode).unwrap().is_some(), "{:?}", mode);
        }
    }

    #[test]
    fn test_eventual_mode_reports_deadlock() {
        let model = Model::from_json(EVENTUALLY_ALWAYS).unwrap();
        let mut graph = Graph::new();
        let root = graph.attach(Pending::root(state("init", true, FairnessLevel::Strong)), None);
        graph.attach(
            Pending::for_action(root, state("yield", true, FairnessLevel::Strong), "A", 0, 0),
            None,
        );
        assert!(matches!(
            check_liveness(&model, &graph, LivenessMode::Eventual),
            Err(CheckError::LivenessDeadlock(1))
        ));
    }

    #[test]
    fn test_off_skips() {
        let model = Model::from_json(ALWAYS_EVENTUALLY).unwrap();
        let graph = lasso(FairnessLevel::Unknown, [false, false, false]);
        assert!(check_liveness(&model, &graph, LivenessMode::Off).unwrap().is_none());
    }
}
