//! Markov-chain cost analysis over an explored graph.
//!
//! Every enabled node reachable from the root is a chain state. A node's
//! outgoing probability is split between its links: links whose labels the
//! perf model prices take the configured probability, the rest share what
//! is left equally. Nodes without links are absorbing. Power iteration then
//! yields the long-run distribution and, per counter, the expected total
//! accumulated before absorption.

use crate::config::PerfModel;
use crate::error::{ModelError, ModelResult};
use crate::graph::{Graph, NodeId};
use crate::invariants::witnessed;
use crate::process::InvariantPosition;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

pub const MAX_ITERATIONS: usize = 10_000;
/// L2 distance between successive distributions that counts as converged.
pub const TOLERANCE: f64 = 1e-7;

type Row = Vec<(usize, f64)>;

/// Probability of having terminated alongside the counters accumulated by
/// the paths still running at that point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramEntry {
    pub probability: f64,
    pub counters: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Histogram {
    pub entries: Vec<HistogramEntry>,
    /// Expected value of each counter.
    pub mean: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    /// Final probability of every chain state, by node.
    pub distribution: Vec<(NodeId, f64)>,
    pub histogram: Histogram,
    pub iterations: usize,
    pub converged: bool,
}

impl Analysis {
    /// States holding at least `threshold` of the probability mass.
    pub fn significant(&self, threshold: f64) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.distribution
            .iter()
            .copied()
            .filter(move |(_, p)| *p > threshold)
    }
}

/// The transition matrix and per-counter cost matrices, stored by row.
#[derive(Debug, Clone)]
pub struct MarkovChain {
    nodes: Vec<NodeId>,
    rows: Vec<Row>,
    /// Per counter and state: the cost expected on the next transition.
    expected_costs: BTreeMap<String, Vec<f64>>,
    costs: BTreeMap<String, Vec<Row>>,
}

impl MarkovChain {
    pub fn new(graph: &Graph, perf: &PerfModel) -> ModelResult<Self> {
        let nodes = enabled_nodes(graph);
        let mut index = vec![None; graph.len()];
        for (i, id) in nodes.iter().enumerate() {
            index[id.index()] = Some(i);
        }

        let mut rows = Vec::with_capacity(nodes.len());
        let mut costs: BTreeMap<String, Vec<Row>> = perf
            .configs
            .values()
            .flat_map(|c| c.counters.keys())
            .map(|name| (name.clone(), vec![Vec::new(); nodes.len()]))
            .collect();

        for (i, &id) in nodes.iter().enumerate() {
            let links: Vec<_> = graph
                .node(id)
                .outbound
                .iter()
                .filter_map(|l| index[l.node.index()].map(|j| (j, l)))
                .collect();
            if links.is_empty() {
                rows.push(vec![(i, 1.0)]);
                continue;
            }

            let priced: Vec<Option<f64>> = links
                .iter()
                .map(|(_, l)| {
                    let probs: Vec<f64> = l
                        .labels
                        .iter()
                        .filter_map(|label| perf.configs.get(label).and_then(|c| c.probability))
                        .collect();
                    (!probs.is_empty()).then(|| probs.iter().sum())
                })
                .collect();
            let total: f64 = priced.iter().flatten().sum();
            if total > 1.0 + 1e-9 {
                return Err(ModelError::Invalid(format!(
                    "link probabilities out of node {} sum to {}",
                    id, total
                )));
            }
            let missing = if total == 0.0 {
                links.len()
            } else {
                priced.iter().filter(|p| p.is_none()).count()
            };
            let share = if missing > 0 {
                (1.0 - total) / missing as f64
            } else {
                0.0
            };

            let mut row = BTreeMap::new();
            for ((j, link), p) in links.iter().zip(&priced) {
                let p = match p {
                    Some(p) if total > 0.0 => *p,
                    _ => share,
                };
                *row.entry(*j).or_insert(0.0) += p;
                for label in &link.labels {
                    let Some(config) = perf.configs.get(label) else {
                        continue;
                    };
                    for (name, counter) in &config.counters {
                        if let Some(matrix) = costs.get_mut(name) {
                            matrix[i].push((*j, counter.numeric));
                        }
                    }
                }
            }
            rows.push(row.into_iter().collect());
        }

        let mut chain = Self {
            nodes,
            rows,
            expected_costs: BTreeMap::new(),
            costs,
        };
        chain.update_expected_costs();
        debug!(states = chain.len(), counters = chain.costs.len(), "built markov chain");
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn row_sums(&self) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|(_, p)| p).sum())
            .collect()
    }

    /// Makes every state witnessing `pos` absorbing.
    pub fn absorb_witnesses(mut self, graph: &Graph, pos: InvariantPosition) -> Self {
        for (i, id) in self.nodes.iter().enumerate() {
            if witnessed(&graph.node(*id).process, pos) {
                self.rows[i] = vec![(i, 1.0)];
            }
        }
        self.update_expected_costs();
        self
    }

    /// Long-run distribution starting from the root.
    pub fn steady_state(&self) -> Analysis {
        let mut initial = vec![0.0; self.len()];
        if let Some(first) = initial.first_mut() {
            *first = 1.0;
        }
        self.analyze(initial)
    }

    /// Starts uniformly over the scheduling points (`init` and `yield`
    /// nodes); used with [`MarkovChain::absorb_witnesses`] to price the way
    /// to a witness from anywhere.
    pub fn absorption(&self, graph: &Graph) -> Analysis {
        let starts: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, id)| matches!(graph.node(**id).name(), "init" | "yield"))
            .map(|(i, _)| i)
            .collect();
        let mut initial = vec![0.0; self.len()];
        for &i in &starts {
            initial[i] = 1.0 / starts.len() as f64;
        }
        self.analyze(initial)
    }

    fn update_expected_costs(&mut self) {
        self.expected_costs = self
            .costs
            .iter()
            .map(|(name, matrix)| {
                let expected = self
                    .rows
                    .iter()
                    .zip(matrix)
                    .map(|(row, cost)| {
                        cost.iter()
                            .map(|(j, c)| c * probability(row, *j))
                            .sum()
                    })
                    .collect();
                (name.clone(), expected)
            })
            .collect();
    }

    fn is_absorbing(&self, i: usize) -> bool {
        matches!(self.rows[i].as_slice(), [(j, p)] if *j == i && *p == 1.0)
    }

    fn step(&self, dist: &[f64]) -> Vec<f64> {
        let mut next = vec![0.0; dist.len()];
        for (i, row) in self.rows.iter().enumerate() {
            if dist[i] == 0.0 {
                continue;
            }
            for (j, p) in row {
                next[*j] += dist[i] * p;
            }
        }
        next
    }

    fn analyze(&self, initial: Vec<f64>) -> Analysis {
        let mut histogram = Histogram::default();
        let mut mean: BTreeMap<String, f64> =
            self.expected_costs.keys().map(|k| (k.clone(), 0.0)).collect();
        // `running` tracks only paths that have not terminated, renormalised
        let mut raw = mean.clone();
        let mut running = initial.clone();
        let mut dist = initial;
        let mut prev_termination = 0.0;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < MAX_ITERATIONS {
            iterations += 1;
            for (name, expected) in &self.expected_costs {
                *mean.entry(name.clone()).or_default() += dot(&dist, expected);
                *raw.entry(name.clone()).or_default() += dot(&running, expected);
            }

            let next = self.step(&dist);
            running = self.step(&running);
            let mut termination = 0.0;
            for j in 0..self.len() {
                if self.is_absorbing(j) {
                    termination += next[j];
                    running[j] = 0.0;
                }
            }
            let total: f64 = running.iter().sum();
            if total > 0.0 {
                running.iter_mut().for_each(|p| *p /= total);
            }
            if !mean.is_empty() && termination > prev_termination {
                prev_termination = termination;
                histogram.entries.push(HistogramEntry {
                    probability: termination,
                    counters: raw.clone(),
                });
            }

            let change = l2_distance(&next, &dist);
            dist = next;
            if change < TOLERANCE {
                converged = true;
                break;
            }
        }
        if converged {
            debug!(iterations, "markov chain converged");
        } else {
            info!(iterations, "markov chain did not converge");
        }
        histogram.mean = mean;
        Analysis {
            distribution: self.nodes.iter().copied().zip(dist).collect(),
            histogram,
            iterations,
            converged,
        }
    }
}

fn probability(row: &Row, j: usize) -> f64 {
    row.iter()
        .find(|(k, _)| *k == j)
        .map_or(0.0, |(_, p)| *p)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Enabled nodes reachable from the root through enabled nodes, breadth
/// first. The root is always first.
fn enabled_nodes(graph: &Graph) -> Vec<NodeId> {
    if graph.is_empty() {
        return Vec::new();
    }
    let mut seen = vec![false; graph.len()];
    let mut order = Vec::new();
    let root = NodeId::new(0);
    let mut queue = VecDeque::from([root]);
    seen[0] = true;
    while let Some(id) = queue.pop_front() {
        order.push(id);
        for link in &graph.node(id).outbound {
            let next = link.node;
            if !seen[next.index()] && graph.node(next).process.enabled {
                seen[next.index()] = true;
                queue.push_back(next);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CounterValue, TransitionCost};
    use crate::graph::Pending;
    use crate::process::Process;
    use std::sync::Arc;

    fn process(labels: &[&str]) -> Process {
        let mut p = Process::new(Arc::new(BTreeMap::new()), &[1]);
        p.enable();
        p.labels = labels.iter().map(|s| s.to_string()).collect();
        p
    }

    fn cost(probability: f64, latency: f64) -> TransitionCost {
        TransitionCost {
            probability: Some(probability),
            counters: BTreeMap::from([("latency".to_string(), CounterValue { numeric: latency })]),
        }
    }

    /// root -> fast | slow, both terminal.
    fn branching() -> Graph {
        let mut graph = Graph::new();
        let root = graph.attach(Pending::root(process(&[])), None);
        graph.attach(Pending::for_fork(root, process(&["A.fast"]), "Stmt:0", 0, 0), None);
        graph.attach(Pending::for_fork(root, process(&["A.slow"]), "Stmt:1", 0, 0), None);
        graph
    }

    #[test]
    fn test_equal_weights_without_perf_model() {
        let graph = branching();
        let chain = MarkovChain::new(&graph, &PerfModel::default()).unwrap();
        assert_eq!(chain.len(), 3);
        for sum in chain.row_sums() {
            assert!((sum - 1.0).abs() < 1e-9);
        }
        let analysis = chain.steady_state();
        assert!(analysis.converged);
        let probs: Vec<f64> = analysis.distribution.iter().map(|(_, p)| *p).collect();
        assert_eq!(probs, vec![0.0, 0.5, 0.5]);
        assert!(analysis.histogram.mean.is_empty());
    }

    #[test]
    fn test_expected_cost() {
        let graph = branching();
        let perf = PerfModel {
            configs: BTreeMap::from([
                ("A.fast".to_string(), cost(0.9, 1.0)),
                ("A.slow".to_string(), cost(0.1, 10.0)),
            ]),
        };
        let analysis = MarkovChain::new(&graph, &perf).unwrap().steady_state();
        let mean = analysis.histogram.mean["latency"];
        assert!((mean - 1.9).abs() < 1e-9, "{}", mean);
        let first = &analysis.histogram.entries[0];
        assert!((first.probability - 1.0).abs() < 1e-9);
        assert!((first.counters["latency"] - 1.9).abs() < 1e-9);
        assert_eq!(analysis.significant(0.5).map(|(id, _)| id).collect::<Vec<_>>(), vec![NodeId::new(1)]);
    }

    #[test]
    fn test_unpriced_links_share_the_rest() {
        let graph = branching();
        let perf = PerfModel {
            configs: BTreeMap::from([("A.fast".to_string(), cost(0.75, 1.0))]),
        };
        let chain = MarkovChain::new(&graph, &perf).unwrap();
        let probs: Vec<f64> = chain.steady_state().distribution.iter().map(|(_, p)| *p).collect();
        assert!((probs[1] - 0.75).abs() < 1e-9);
        assert!((probs[2] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_overfull_probabilities_rejected() {
        let graph = branching();
        let perf = PerfModel {
            configs: BTreeMap::from([
                ("A.fast".to_string(), cost(0.8, 1.0)),
                ("A.slow".to_string(), cost(0.8, 1.0)),
            ]),
        };
        assert!(MarkovChain::new(&graph, &perf).is_err());
    }

    #[test]
    fn test_cycle_absorbed_by_witness() {
        // root <-> a, a -> done (witness); every step costs 1
        let mut graph = Graph::new();
        let root = graph.attach(Pending::root(process(&["step"])), None);
        let a = graph.attach(Pending::for_action(root, process(&["step"]), "A", 0, 0), None);
        let mut done = process(&["step"]);
        done.witness[0][0] = true;
        graph.attach(Pending::for_action(a, done, "Done", 1, 1), None);
        graph.duplicate(&Pending::for_action(a, process(&["step"]), "Back", 1, 1), root, Vec::new());
        graph.node_mut(root).process.name = "init".into();
        graph.node_mut(a).process.name = "yield".into();

        let perf = PerfModel {
            configs: BTreeMap::from([(
                "step".to_string(),
                TransitionCost {
                    probability: None,
                    counters: BTreeMap::from([("steps".to_string(), CounterValue { numeric: 1.0 })]),
                },
            )]),
        };
        let chain = MarkovChain::new(&graph, &perf)
            .unwrap()
            .absorb_witnesses(&graph, InvariantPosition::new(0, 0));
        let analysis = chain.absorption(&graph);
        assert!(analysis.converged);
        let done = analysis.distribution.last().map(|(_, p)| *p).unwrap();
        assert!((done - 1.0).abs() < 1e-6);
        // from root: 1 + E[a]; from a: 1 + E[root]/2, so E[root] = 4, E[a] = 3
        let mean = analysis.histogram.mean["steps"];
        assert!((mean - 3.5).abs() < 1e-5, "{}", mean);
        let probs: Vec<f64> = analysis.histogram.entries.iter().map(|e| e.probability).collect();
        assert!(probs.windows(2).all(|w| w[0] < w[1]));
    }
}
