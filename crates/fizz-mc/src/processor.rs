//! The scheduler: explores the reachable states of a model.
//!
//! Every frontier entry is a [`Pending`] process. Running its current
//! thread ends either at a yield, which is a state other threads may
//! interleave with, or at a non-deterministic choice, whose alternatives
//! are drained immediately as intermediate states. New states are
//! deduplicated against the visited table (modulo symmetry when the model
//! declares symmetric domains) and checked against the invariants. At a
//! yield the processor schedules every live thread, every pending channel
//! message, crashes, and every action that is still within its limits.

use crate::collection::{Frontier, Queue, RandomQueue, Stack};
use crate::config::{ActionOptions, CheckConfig, LivenessMode, StateSpaceOptions, Strategy};
use crate::error::{CheckResult, ModelError, ModelResult};
use crate::frame::CallFrame;
use crate::graph::{Graph, Link, NodeId, Pending, TraceStep};
use crate::invariants;
use crate::liveness::{self, LivenessKind};
use crate::model::Model;
use crate::process::{InvariantPosition, Process, ProcessHost};
use crate::role::RoleInstance;
use crate::store::VisitedStore;
use crate::symmetry::Symmetry;
use crate::thread;
use fizz_ast::{Action, FairnessLevel};
use fizz_eval::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace};

/// Visited states between progress reports.
const PROGRESS_INTERVAL: usize = 20_000;

/// Result of a checker run.
#[derive(Debug)]
pub enum CheckOutcome {
    /// Exploration finished without a failure.
    Ok {
        states_explored: usize,
        nodes: usize,
        max_depth: u64,
    },
    /// A reachable state broke a safety or transition invariant.
    InvariantViolation {
        invariants: Vec<String>,
        node: NodeId,
        trace: Vec<TraceStep>,
    },
    /// A state from which every scheduled transition was disabled.
    Deadlock { node: NodeId, trace: Vec<TraceStep> },
    /// A fair cycle or stuttering path that never satisfies a liveness
    /// invariant.
    LivenessViolation {
        invariant: String,
        trace: Vec<TraceStep>,
    },
    /// `exists` invariants no reachable state witnessed.
    ExistsNotWitnessed { invariants: Vec<String> },
    /// The stop flag was raised before exploration finished.
    Stopped { states_explored: usize, nodes: usize },
}

impl CheckOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CheckOutcome::Ok { .. })
    }

    pub fn is_violation(&self) -> bool {
        !matches!(self, CheckOutcome::Ok { .. } | CheckOutcome::Stopped { .. })
    }

    pub fn trace(&self) -> &[TraceStep] {
        match self {
            CheckOutcome::InvariantViolation { trace, .. }
            | CheckOutcome::Deadlock { trace, .. }
            | CheckOutcome::LivenessViolation { trace, .. } => trace,
            _ => &[],
        }
    }

    /// Summary line for the terminal.
    pub fn label(&self) -> &'static str {
        match self {
            CheckOutcome::Ok { .. } => "PASSED",
            CheckOutcome::InvariantViolation { .. } => "INVARIANT VIOLATION",
            CheckOutcome::Deadlock { .. } => "DEADLOCK",
            CheckOutcome::LivenessViolation { .. } => "LIVENESS FAILURE",
            CheckOutcome::ExistsNotWitnessed { .. } => "EXISTS NOT WITNESSED",
            CheckOutcome::Stopped { .. } => "STOPPED",
        }
    }
}

/// What became of one pending process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Processed {
    /// Disabled, or pruned by a symmetry bound. Nothing was added.
    Pruned,
    /// The state was already known; only an edge was added.
    Duplicate { target: NodeId },
    Attached { node: NodeId },
    /// Attached, and an invariant failed on it or on the edge into it.
    Failed(NodeId),
}

/// One checker run over a model.
pub struct Processor {
    model: Arc<Model>,
    config: CheckConfig,
    globals: Arc<BTreeMap<String, Value>>,
    symmetry: Symmetry,
    graph: Graph,
    visited: VisitedStore,
    frontier: Box<dyn Frontier<Pending>>,
    intermediate: Box<dyn Frontier<Pending>>,
    /// Nodes from which a scheduled transition turned out disabled.
    disabled_from: BTreeSet<NodeId>,
    seed: u64,
    rng: StdRng,
    stop: Arc<AtomicBool>,
    /// Current action bound; simulation stretches it for the fair suffix.
    max_actions: u64,
    crash_enabled: bool,
    runs: u64,
}

impl Processor {
    /// Runs the top-level statements and prepares the frontier. A zero
    /// seed is replaced by one derived from the clock.
    pub fn new(model: Arc<Model>, config: CheckConfig) -> CheckResult<Self> {
        let seed = if config.seed == 0 {
            clock_seed()
        } else {
            config.seed
        };
        info!(
            seed,
            strategy = ?config.strategy,
            simulation = config.simulation,
            max_actions = config.options.options.max_actions,
            "creating processor"
        );
        let globals = if model.main().stmts.is_empty() {
            BTreeMap::new()
        } else {
            let mut scratch = Process::new(Arc::new(BTreeMap::new()), &model.invariant_counts());
            thread::run_preinit(&model, &mut scratch)?
        };
        let symmetry = Symmetry::new(&model, &globals);
        let mut rng = StdRng::seed_from_u64(seed);
        let (frontier, intermediate) = frontiers(&config, &mut rng);
        Ok(Self {
            max_actions: config.options.options.max_actions,
            model,
            config,
            globals: Arc::new(globals),
            symmetry,
            graph: Graph::new(),
            visited: VisitedStore::new(),
            frontier,
            intermediate,
            disabled_from: BTreeSet::new(),
            seed,
            rng,
            stop: Arc::new(AtomicBool::new(false)),
            crash_enabled: true,
            runs: 0,
        })
    }

    /// Raising the returned flag stops the run at the next node.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Completed simulation walks.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn unique_states(&self) -> usize {
        self.visited.len()
    }

    /// Runs the exhaustive search or the random walks.
    pub fn check(&mut self) -> CheckResult<CheckOutcome> {
        if !self.graph.is_empty() {
            return Err(ModelError::Internal("processor already started".into()).into());
        }
        self.model.reset_counters();
        if self.config.simulation {
            self.simulate()
        } else {
            self.explore()
        }
    }

    fn explore(&mut self) -> CheckResult<CheckOutcome> {
        let start = Instant::now();
        let continue_on_failure = self.config.options.continue_on_invariant_failures;
        let mut first_failure = self.initialize()?;
        if let Some(failed) = first_failure.filter(|_| !continue_on_failure) {
            return Ok(self.violation(failed));
        }
        let mut next_report = PROGRESS_INTERVAL;
        while let Some(pending) = self.frontier.remove() {
            if self.stop.load(Ordering::Relaxed) {
                info!(nodes = self.graph.len(), "stop requested");
                return Ok(self.stopped());
            }
            if pending.action_depth > self.max_actions {
                continue;
            }
            let (_, failed) = self.process_chain(pending)?;
            if self.visited.len() >= next_report {
                info!(
                    states = self.visited.len(),
                    nodes = self.graph.len(),
                    queue = self.frontier.len(),
                    elapsed = ?start.elapsed(),
                    "progress"
                );
                next_report += PROGRESS_INTERVAL;
            }
            if let Some(id) = failed {
                first_failure.get_or_insert(id);
                if !continue_on_failure {
                    break;
                }
            }
        }
        info!(
            states = self.visited.len(),
            nodes = self.graph.len(),
            collisions = self.visited.collision_count(),
            elapsed = ?start.elapsed(),
            "exploration finished"
        );
        if let Some(id) = first_failure {
            return Ok(self.violation(id));
        }
        self.after_exploration()
    }

    /// Deadlocks, `exists` witnesses and liveness, on the finished graph.
    fn after_exploration(&mut self) -> CheckResult<CheckOutcome> {
        if self.config.options.deadlock_detection {
            if let Some(node) = self.find_deadlock() {
                info!(%node, "deadlock");
                return Ok(CheckOutcome::Deadlock {
                    node,
                    trace: self.graph.trace_to(node),
                });
            }
        }
        let missing = invariants::unwitnessed_exists(&self.model, &self.graph);
        if !missing.is_empty() {
            return Ok(CheckOutcome::ExistsNotWitnessed {
                invariants: missing.iter().map(|p| self.invariant_name(*p)).collect(),
            });
        }
        if let Some(failure) =
            liveness::check_liveness(&self.model, &self.graph, self.config.options.liveness)?
        {
            return Ok(CheckOutcome::LivenessViolation {
                invariant: self.invariant_name(failure.position),
                trace: failure.path,
            });
        }
        Ok(self.passed())
    }

    /// Creates the root. A model whose first action is `Init` starts with
    /// that action running; otherwise the state variables are initialised
    /// directly and the root is attached and scheduled here. Returns the
    /// root when it already breaks an invariant.
    fn initialize(&mut self) -> CheckResult<Option<NodeId>> {
        let model = Arc::clone(&self.model);
        let mut process = Process::new(Arc::clone(&self.globals), &model.invariant_counts());
        process.name = "init".into();
        let main = model.main();
        if let Some(action) = main.actions.first().filter(|a| a.name == "Init") {
            process.name = action.name.clone();
            process.new_thread(CallFrame::new(0, "Actions[0]", action.name.clone()));
            self.frontier.add(Pending::root(process));
            return Ok(None);
        }
        if let Some(states) = &main.states {
            let mut host = ProcessHost::new(&model, &mut process, None);
            fizz_eval::exec(&states.code, &mut host)
                .map_err(|e| ModelError::eval("state variables", e))?;
        }
        process.enable();
        process.failed_invariants = invariants::check_invariants(&model, &mut process)?;
        let failed = !process.failed_invariants.is_empty();
        let key = process.state_key();
        let root = self.graph.attach(Pending::root(process), Some(key.fingerprint));
        self.visited.insert(key, root);
        debug!(state = ?self.graph.node(root).process.heap.state, "initial state");
        if failed && !self.config.options.continue_path_on_invariant_failures {
            return Ok(Some(root));
        }
        self.yield_node(root)?;
        Ok(failed.then_some(root))
    }

    /// Processes `pending` and then every intermediate state it forks,
    /// returning the last result and the first failure.
    fn process_chain(&mut self, pending: Pending) -> ModelResult<(Processed, Option<NodeId>)> {
        let mut current = pending;
        let mut failure = None;
        loop {
            let processed = self.process_node(current)?;
            if let Processed::Failed(id) = processed {
                failure.get_or_insert(id);
            }
            match self.intermediate.remove() {
                Some(next) => current = next,
                None => return Ok((processed, failure)),
            }
        }
    }

    fn process_node(&mut self, mut pending: Pending) -> ModelResult<Processed> {
        let model = Arc::clone(&self.model);
        let action = pending.process.current_thread().map(|t| t.root_name());
        let crash_roles = self.crash_on_yield(action);
        let step = match thread::run(&model, &mut pending.process) {
            Ok(step) => step,
            Err(e) if e.is_disable() => {
                trace!(link = pending_name(&pending), error = %e, "transition disabled");
                self.record_disabled(&pending);
                return Ok(Processed::Pruned);
            }
            Err(e) => return Err(e),
        };
        if step.forks.is_empty() && !pending.process.enabled {
            self.record_disabled(&pending);
            return Ok(Processed::Pruned);
        }
        if pending.process.enabled {
            self.graph.enable_ancestors(pending.process.parent);
        }
        if let Some(reason) = self.symmetry.check_constraints(&pending.process) {
            trace!(link = pending_name(&pending), %reason, "symmetry bound exceeded");
            return Ok(Processed::Pruned);
        }

        let key = pending.process.state_key();
        if let Some(target) = self.visited.get(&key) {
            if self.graph.node(target).process.enabled || !pending.process.enabled {
                self.link_duplicate(&pending, &pending.process, target, step.yielded);
                return Ok(Processed::Duplicate { target });
            }
        } else if self.symmetry.is_active() {
            for renaming in self.symmetry.renamings(&pending.process) {
                if renaming.is_identity() {
                    continue;
                }
                let renamed = renaming.apply(&pending.process);
                let Some(target) = self.visited.get(&renamed.compute_key()) else {
                    continue;
                };
                if self.graph.node(target).process.enabled || !pending.process.enabled {
                    self.link_duplicate(&pending, &renamed, target, step.yielded);
                    return Ok(Processed::Duplicate { target });
                }
            }
        }

        let continue_path = self.config.options.continue_path_on_invariant_failures;
        let from = pending.link.as_ref().map(|l| l.from);
        let node = self.graph.attach(pending, Some(key.fingerprint));
        self.visited.insert(key, node);
        let mut failed = false;

        if let Some(from) = from {
            let failures = invariants::check_transition_invariants(
                &model,
                &self.graph.node(from).process,
                &self.graph.node(node).process,
            )?;
            if !failures.is_empty() {
                self.record_failures(node, &failures, true);
                failed = true;
                if !continue_path {
                    return Ok(Processed::Failed(node));
                }
            }
        }

        if !step.yielded {
            for mut fork in step.forks {
                fork.parent = Some(node);
                let name = fork.name.clone();
                let (action_depth, fork_depth) = self.depths(node);
                self.intermediate
                    .add(Pending::for_fork(node, fork, &name, action_depth, fork_depth));
            }
            return Ok(if failed {
                Processed::Failed(node)
            } else {
                Processed::Attached { node }
            });
        }

        let failures = invariants::check_invariants(&model, &mut self.graph.node_mut(node).process)?;
        if !failures.is_empty() {
            self.record_failures(node, &failures, false);
            failed = true;
            if !continue_path {
                return Ok(Processed::Failed(node));
            }
        }

        if step.forks.is_empty() {
            self.graph.node_mut(node).process.name = "yield".into();
            self.yield_node(node)?;
        } else {
            for mut fork in step.forks {
                fork.parent = Some(node);
                self.yield_fork(node, &fork)?;
            }
        }

        if self.crash_enabled {
            let crash_failure = match self.crash_thread(node)? {
                Some(id) => Some(id),
                None if crash_roles => self.crash_roles(node)?,
                None => None,
            };
            if let Some(id) = crash_failure {
                return Ok(Processed::Failed(id));
            }
        }
        Ok(if failed {
            Processed::Failed(node)
        } else {
            Processed::Attached { node }
        })
    }

    /// Schedules the successors of the yielded node `id`.
    fn yield_node(&mut self, id: NodeId) -> ModelResult<()> {
        let children = self.successors(id, &self.graph.node(id).process)?;
        for child in children {
            self.frontier.add(child);
        }
        Ok(())
    }

    /// Schedules the successors of `fork`, an alternative continuation of
    /// node `id` that yielded as it was created.
    fn yield_fork(&mut self, id: NodeId, fork: &Process) -> ModelResult<()> {
        let children = self.successors(id, fork)?;
        for child in children {
            self.frontier.add(child);
        }
        Ok(())
    }

    fn successors(&self, from: NodeId, base: &Process) -> ModelResult<Vec<Pending>> {
        let (action_depth, fork_depth) = self.depths(from);
        let mut out = Vec::new();

        for (i, thread) in base.threads.iter().enumerate() {
            if thread.current_pc().is_empty() {
                continue;
            }
            let name = format!("thread-{}", i);
            let mut child = base.fork();
            child.current = i;
            child.name = name.clone();
            out.push(Pending::for_fork(from, child, &name, action_depth, fork_depth));
        }

        for (&channel, queue) in &base.pending {
            for j in 0..queue.len() {
                let name = format!("channel-{}-message-{}", channel, j);
                if let Some(child) = self.deliver(base, channel, j, &name)? {
                    out.push(Pending::for_fork(from, child, &name, action_depth, fork_depth));
                }
            }
        }

        let options = &self.config.options.options;
        if action_depth >= self.max_actions
            || base.threads.len() as u64 >= options.max_concurrent_actions
        {
            return Ok(out);
        }

        for (i, action) in self.model.main().actions.iter().enumerate() {
            let pc = format!("Actions[{}]", i);
            out.extend(self.start_action(from, base, None, 0, pc, action));
        }
        for role in &base.roles {
            let Some(decl) = self.model.role(&role.rref.name) else {
                continue;
            };
            for (i, action) in decl.role.actions.iter().enumerate() {
                let pc = format!("{}.Actions[{}]", decl.path(), i);
                out.extend(self.start_action(from, base, Some(role), decl.file_index, pc, action));
            }
        }
        Ok(out)
    }

    /// A child of `base` with a new thread running `action`, unless the
    /// action is `Init` or over one of its limits.
    fn start_action(
        &self,
        from: NodeId,
        base: &Process,
        role: Option<&RoleInstance>,
        file_index: usize,
        pc: String,
        action: &Action,
    ) -> Option<Pending> {
        if action.name == "Init" || exceeds_limits(&self.config.options, action, base, role) {
            return None;
        }
        let (name, frame_name, obj) = match role {
            Some(r) => (
                format!("{}.{}", r.rref.short(), action.name),
                format!("{}.{}", r.rref.name, action.name),
                Some(r.rref.clone()),
            ),
            None => (action.name.clone(), action.name.clone(), None),
        };
        let mut child = base.fork();
        child.name = name.clone();
        child.stats.increment(&name);
        let mut frame = CallFrame::new(file_index, pc, frame_name);
        frame.obj = obj;
        child.new_thread(frame);
        child.fairness = action.fairness.level;
        if let Some(thread) = child.current_thread_mut() {
            thread.fairness = action.fairness.level;
        }
        let (action_depth, fork_depth) = self.depths(from);
        Some(Pending::for_action(from, child, &name, action_depth, fork_depth))
    }

    /// A child of `base` that takes message `j` off `channel` and starts a
    /// thread running the receiver's handler. Messages to roles that no
    /// longer exist are not delivered.
    fn deliver(&self, base: &Process, channel: u32, j: usize, name: &str) -> ModelResult<Option<Process>> {
        let Some(message) = base.pending.get(&channel).and_then(|q| q.get(j)) else {
            return Ok(None);
        };
        if base.role(&message.receiver).is_none() {
            return Ok(None);
        }
        let qualified = format!("{}.{}", message.receiver.name, message.function);
        let (fref, function) = self.model.function(&qualified).ok_or_else(|| {
            ModelError::Invalid(format!(
                "message on channel {} calls unknown function {}",
                channel, qualified
            ))
        })?;

        let mut child = base.fork();
        if let Some(queue) = child.pending.get_mut(&channel) {
            queue.remove(j);
            if queue.is_empty() {
                child.pending.remove(&channel);
            }
        }
        let mut frame = CallFrame::new(
            fref.file_index,
            format!("{}.Block", fref.path),
            message.function.clone(),
        );
        frame.obj = Some(message.receiver.clone());
        for (i, value) in message.args.iter().enumerate() {
            let param = function.params.get(i).ok_or_else(|| {
                ModelError::Invalid(format!("too many arguments in message to {}", qualified))
            })?;
            frame.args.insert(param.name.clone(), value.clone());
        }
        for (key, value) in &message.kwargs {
            frame.args.insert(key.clone(), value.clone());
        }
        for param in &function.params {
            if frame.args.contains_key(&param.name) {
                continue;
            }
            if param.default_py_expr.is_empty() {
                return Err(ModelError::MissingArgument {
                    function: qualified,
                    param: param.name.clone(),
                });
            }
            let mut host = ProcessHost::new(&self.model, &mut child, None);
            let value = fizz_eval::eval(&param.default_py_expr, &mut host).map_err(|e| {
                ModelError::eval(format!("default of {} in {}", param.name, qualified), e)
            })?;
            frame.args.insert(param.name.clone(), value);
        }
        child.name = name.to_string();
        child.new_thread(frame);
        child.fairness = FairnessLevel::Strong;
        if let Some(thread) = child.current_thread_mut() {
            thread.fairness = FairnessLevel::Strong;
        }
        Ok(Some(child))
    }

    /// Whether a yield of `action` is followed by crash links. Yields outside
    /// any action fall back to the global option.
    fn crash_on_yield(&self, action: Option<&str>) -> bool {
        match action {
            Some(name) => self.config.options.crash_on_yield(name),
            None => self.config.options.options.crash_on_yield,
        }
    }

    /// Removes the thread that just yielded, when its action may crash.
    fn crash_thread(&mut self, id: NodeId) -> ModelResult<Option<NodeId>> {
        let process = &self.graph.node(id).process;
        let Some(thread) = process.current_thread() else {
            return Ok(None);
        };
        if !self.config.options.crash_on_yield(thread.root_name()) {
            return Ok(None);
        }
        let mut child = process.fork();
        child.name = "crash".into();
        child.remove_current_thread();
        self.add_crash(id, child, "crash")
    }

    /// Crashes every role that declares durability and is idle, resetting
    /// its ephemeral fields.
    fn crash_roles(&mut self, id: NodeId) -> ModelResult<Option<NodeId>> {
        let mut children = Vec::new();
        {
            let process = &self.graph.node(id).process;
            for role in &process.roles {
                let Some(durability) = self.model.durability(&role.rref.name) else {
                    continue;
                };
                if process.is_role_running(&role.rref) {
                    continue;
                }
                let mut crashed = role.clone();
                crashed.crash(durability);
                if &crashed == role {
                    continue;
                }
                let mut child = process.fork();
                child.name = "crash".into();
                if let Some(slot) = child.role_mut(&role.rref) {
                    *slot = crashed;
                }
                child.invalidate_key();
                children.push((format!("crash-{}", role.rref.short()), child));
            }
        }
        let mut failure = None;
        for (name, child) in children {
            if let Some(failed) = self.add_crash(id, child, &name)? {
                failure.get_or_insert(failed);
            }
        }
        Ok(failure)
    }

    /// Adds a crashed child of `from` as a yielded state.
    fn add_crash(&mut self, from: NodeId, mut child: Process, name: &str) -> ModelResult<Option<NodeId>> {
        let failures = invariants::check_invariants(&self.model, &mut child)?;
        child.failed_invariants = failures;
        if self.graph.node(from).process.enabled {
            child.enable();
        }
        let (action_depth, fork_depth) = self.depths(from);
        let mut pending = Pending::for_fork(from, child, name, action_depth, fork_depth);
        let key = pending.process.state_key();
        if let Some(target) = self.visited.get(&key) {
            self.link_duplicate(&pending, &pending.process, target, true);
            return Ok(None);
        }
        let failed = !pending.process.failed_invariants.is_empty();
        let id = self.graph.attach(pending, Some(key.fingerprint));
        self.visited.insert(key, id);
        trace!(%id, link = name, "crash");
        if failed {
            debug!(%id, link = name, "invariant failed after crash");
            if !self.config.options.continue_path_on_invariant_failures {
                return Ok(Some(id));
            }
        }
        self.yield_node(id)?;
        Ok(failed.then_some(id))
    }

    /// Routes the edge of `pending` to `target`. A yielded step that made
    /// no progress adds nothing.
    fn link_duplicate(&mut self, pending: &Pending, as_seen: &Process, target: NodeId, yielded: bool) {
        if yielded && !pending.process.enabled {
            return;
        }
        let map = threads_map(as_seen, &self.graph.node(target).process);
        self.graph.duplicate(pending, target, map);
    }

    fn record_disabled(&mut self, pending: &Pending) {
        if let Some(link) = &pending.link {
            self.disabled_from.insert(link.from);
        }
    }

    fn record_failures(&mut self, node: NodeId, failures: &[InvariantPosition], on_link: bool) {
        if on_link {
            self.graph.record_link_failures(node, failures);
        }
        let names: Vec<String> = failures.iter().map(|p| self.invariant_name(*p)).collect();
        debug!(%node, invariants = ?names, "invariant failed");
        self.graph
            .node_mut(node)
            .process
            .failed_invariants
            .extend_from_slice(failures);
    }

    /// A scheduling point with no way forward although some transition out
    /// of it was tried.
    fn find_deadlock(&self) -> Option<NodeId> {
        self.disabled_from.iter().copied().find(|&id| {
            let node = self.graph.node(id);
            node.outbound.is_empty() && matches!(node.name(), "yield" | "init" | "crash")
        })
    }

    fn depths(&self, id: NodeId) -> (u64, u64) {
        let node = self.graph.node(id);
        (node.action_depth, node.fork_depth)
    }

    fn invariant_name(&self, pos: InvariantPosition) -> String {
        self.model
            .files
            .get(pos.file_index)
            .and_then(|f| f.invariants.get(pos.invariant_index))
            .map_or_else(
                || format!("Invariants[{}]", pos.invariant_index),
                |inv| inv.name.clone(),
            )
    }

    fn violation(&self, node: NodeId) -> CheckOutcome {
        let invariants = self
            .graph
            .node(node)
            .process
            .failed_invariants
            .iter()
            .map(|p| self.invariant_name(*p))
            .collect();
        CheckOutcome::InvariantViolation {
            invariants,
            node,
            trace: self.graph.trace_to(node),
        }
    }

    fn passed(&self) -> CheckOutcome {
        CheckOutcome::Ok {
            states_explored: self.visited.len(),
            nodes: self.graph.len(),
            max_depth: self
                .graph
                .iter()
                .map(|(_, n)| n.action_depth)
                .max()
                .unwrap_or(0),
        }
    }

    fn stopped(&self) -> CheckOutcome {
        CheckOutcome::Stopped {
            states_explored: self.visited.len(),
            nodes: self.graph.len(),
        }
    }

    fn simulate(&mut self) -> CheckResult<CheckOutcome> {
        let start = Instant::now();
        let max_runs = self.config.max_runs;
        while max_runs == 0 || self.runs < max_runs {
            if self.stop.load(Ordering::Relaxed) {
                info!(runs = self.runs, "stop requested");
                return Ok(self.stopped());
            }
            self.reset_walk();
            let outcome = self.walk()?;
            self.runs += 1;
            if let Some(outcome) = outcome {
                info!(runs = self.runs, seed = self.seed, outcome = outcome.label(), "simulation failed");
                return Ok(outcome);
            }
            if self.runs % 1000 == 0 {
                info!(runs = self.runs, elapsed = ?start.elapsed(), "simulation progress");
            }
        }
        info!(runs = self.runs, elapsed = ?start.elapsed(), "simulation finished");
        Ok(self.passed())
    }

    fn reset_walk(&mut self) {
        self.graph = Graph::new();
        self.visited.clear();
        self.disabled_from.clear();
        self.frontier = Box::new(RandomQueue::new(self.rng.gen()));
        self.intermediate = Box::new(RandomQueue::new(self.rng.gen()));
        self.max_actions = self.config.options.options.max_actions;
        self.crash_enabled = true;
        self.model.reset_counters();
    }

    /// One random walk. With liveness invariants, the walk runs unbounded
    /// for a random prefix and then follows only fair threads for up to
    /// twice the action bound; where it gets stuck or closes a cycle, the
    /// liveness invariants must be witnessed.
    fn walk(&mut self) -> CheckResult<Option<CheckOutcome>> {
        if let Some(failed) = self.initialize()? {
            return Ok(Some(self.violation(failed)));
        }
        let max = self.config.options.options.max_actions;
        let liveness_enabled =
            self.config.options.liveness == LivenessMode::Strict && self.model.has_liveness();
        let prefix = if liveness_enabled && max > 0 {
            self.rng.gen_range(0..max)
        } else {
            max
        };
        self.max_actions = prefix;
        let mut fair_suffix = false;
        let mut stuck: Option<NodeId> = None;

        while let Some(pending) = self.frontier.remove() {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(Some(self.stopped()));
            }
            if liveness_enabled && !fair_suffix && pending.action_depth + 1 > self.max_actions {
                fair_suffix = true;
                self.max_actions = 2 * max;
                self.crash_enabled = false;
            } else if pending.action_depth > self.max_actions {
                continue;
            }
            if fair_suffix && pending.action_depth > prefix {
                let fair = pending
                    .process
                    .current_thread()
                    .is_some_and(|t| t.fairness.is_fair());
                if !fair {
                    stuck = pending.link.as_ref().map(|l| l.from);
                    continue;
                }
            }

            let prev_len = self.frontier.len();
            if !fair_suffix || pending.action_depth <= max {
                self.visited.clear();
            }
            let from = pending.link.as_ref().map(|l| l.from);
            let (processed, failure) = self.process_walk_step(pending)?;
            if let Some(id) = failure {
                return Ok(Some(self.violation(id)));
            }
            match processed {
                Processed::Duplicate { target } if fair_suffix => {
                    if let Some(from) = from {
                        if let Some(outcome) = self.check_walk_cycle(target, from) {
                            return Ok(Some(outcome));
                        }
                    }
                }
                Processed::Attached { node } => {
                    let node = self.graph.node(node);
                    if node.is_yield() && node.process.enabled {
                        self.frontier.drop_oldest(prev_len);
                    }
                }
                Processed::Pruned => {
                    let dead_end = from.filter(|&f| {
                        prev_len == 0
                            && self.frontier.is_empty()
                            && self.graph.node(f).outbound.is_empty()
                    });
                    if let Some(from) = dead_end {
                        if !fair_suffix && self.config.options.deadlock_detection {
                            return Ok(Some(CheckOutcome::Deadlock {
                                node: from,
                                trace: self.graph.trace_to(from),
                            }));
                        }
                        stuck = Some(from);
                    }
                }
                _ => {}
            }
        }

        if fair_suffix {
            if let Some(id) = stuck {
                if let Some(pos) = self.unwitnessed_liveness(&[id]) {
                    let mut trace = self.graph.trace_to(id);
                    trace.push(TraceStep::via(&Link::stutter(id)));
                    return Ok(Some(CheckOutcome::LivenessViolation {
                        invariant: self.invariant_name(pos),
                        trace,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Like [`Processor::process_chain`], but stops at the first yield so
    /// the walk follows a single path.
    fn process_walk_step(&mut self, pending: Pending) -> ModelResult<(Processed, Option<NodeId>)> {
        let mut current = pending;
        let result = loop {
            let processed = self.process_node(current)?;
            match processed {
                Processed::Failed(id) => break (processed, Some(id)),
                Processed::Attached { node } if self.graph.node(node).is_yield() => {
                    break (processed, None)
                }
                _ => {}
            }
            match self.intermediate.remove() {
                Some(next) => current = next,
                None => break (processed, None),
            }
        };
        self.intermediate.clear();
        Ok(result)
    }

    /// The walk returned to `target` from `from`: the cycle through
    /// `target` must witness every liveness invariant.
    fn check_walk_cycle(&self, target: NodeId, from: NodeId) -> Option<CheckOutcome> {
        let mut cycle = vec![target];
        let mut current = target;
        while let Some(link) = self.graph.node(current).outbound.first() {
            if link.node == target || cycle.contains(&link.node) {
                break;
            }
            cycle.push(link.node);
            current = link.node;
        }
        let pos = self.unwitnessed_liveness(&cycle)?;
        let mut trace = self.graph.trace_to(from);
        if let Some(link) = self.graph.node(from).outbound.last() {
            trace.push(TraceStep::via(link));
        }
        Some(CheckOutcome::LivenessViolation {
            invariant: self.invariant_name(pos),
            trace,
        })
    }

    /// The first liveness invariant the nodes fail: `always eventually`
    /// needs a witness somewhere, `eventually always` at every yield.
    fn unwitnessed_liveness(&self, nodes: &[NodeId]) -> Option<InvariantPosition> {
        for (fi, file) in self.model.files.iter().enumerate() {
            for (j, inv) in file.invariants.iter().enumerate() {
                let pos = InvariantPosition::new(fi, j);
                let holds = match LivenessKind::of(inv) {
                    None => continue,
                    Some(LivenessKind::AlwaysEventually) => nodes
                        .iter()
                        .any(|&id| invariants::witnessed(&self.graph.node(id).process, pos)),
                    Some(LivenessKind::EventuallyAlways) => nodes
                        .iter()
                        .map(|&id| self.graph.node(id))
                        .filter(|n| n.is_yield() || !n.has_threads())
                        .all(|n| invariants::witnessed(&n.process, pos)),
                };
                if !holds {
                    return Some(pos);
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("nodes", &self.graph.len())
            .field("states", &self.visited.len())
            .field("queue", &self.frontier.len())
            .field("seed", &self.seed)
            .finish()
    }
}

fn frontiers(
    config: &CheckConfig,
    rng: &mut StdRng,
) -> (Box<dyn Frontier<Pending>>, Box<dyn Frontier<Pending>>) {
    if config.simulation {
        return (
            Box::new(RandomQueue::new(rng.gen())),
            Box::new(RandomQueue::new(rng.gen())),
        );
    }
    let frontier: Box<dyn Frontier<Pending>> = match config.strategy {
        Strategy::Bfs => Box::new(Queue::default()),
        Strategy::Dfs => Box::new(Stack::default()),
        Strategy::Random => Box::new(RandomQueue::new(rng.gen())),
    };
    (frontier, Box::new(Queue::default()))
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
        .max(1)
}

fn pending_name(pending: &Pending) -> &str {
    pending.link.as_ref().map_or("", |l| l.name.as_str())
}

/// Pairs each thread of `from` with an unused thread of `to` that has the
/// same hash.
fn threads_map(from: &Process, to: &Process) -> Vec<(usize, usize)> {
    let theirs = to.thread_hashes();
    let mut used = vec![false; theirs.len()];
    from.thread_hashes()
        .iter()
        .enumerate()
        .filter_map(|(i, hash)| {
            let j = (0..theirs.len()).find(|&j| !used[j] && theirs[j] == *hash)?;
            used[j] = true;
            Some((i, j))
        })
        .collect()
}

/// Whether starting `action` (of `role`, if any) in `base` would break an
/// action limit. Keys are consulted from the most to the least specific:
/// `Action` or `Role#ref.Action`, then `Role#.Action` per instance, then
/// `Role.Action` summed over instances.
pub fn exceeds_limits(
    options: &StateSpaceOptions,
    action: &Action,
    base: &Process,
    role: Option<&RoleInstance>,
) -> bool {
    let limits = &options.action_options;
    let key = match role {
        Some(r) => format!("{}.{}", r.rref.short(), action.name),
        None => action.name.clone(),
    };

    let mut running: BTreeMap<String, u64> = BTreeMap::new();
    for thread in &base.threads {
        let Some(root) = thread.stack.first() else {
            continue;
        };
        *running.entry(root.name.clone()).or_default() += 1;
        if let (Some((role_name, action_name)), Some(obj)) = (root.name.split_once('.'), &root.obj) {
            *running
                .entry(format!("{}#.{}", role_name, action_name))
                .or_default() += 1;
            *running
                .entry(format!("{}.{}", obj.short(), action_name))
                .or_default() += 1;
        }
    }
    let running_of = |k: &str| running.get(k).copied().unwrap_or(0);
    let over = |o: &ActionOptions, count: u64, live: u64| {
        (o.max_actions > 0 && count >= o.max_actions)
            || (o.max_concurrent_actions > 0 && live >= o.max_concurrent_actions)
    };

    if let Some(o) = limits.get(&key) {
        if over(o, base.stats.count(&key), running_of(&key)) {
            return true;
        }
    }
    let Some(role) = role else {
        return false;
    };
    if let Some(o) = limits.get(&format!("{}#.{}", role.rref.name, action.name)) {
        if over(o, base.stats.count(&key), running_of(&key)) {
            return true;
        }
    }
    let aggregate = format!("{}.{}", role.rref.name, action.name);
    let Some(o) = limits.get(&aggregate) else {
        return false;
    };
    let prefix = format!("{}#", role.rref.name);
    let suffix = format!(".{}", action.name);
    let total = base
        .stats
        .counts
        .iter()
        .filter(|(k, _)| k.starts_with(&prefix) && k.ends_with(&suffix))
        .map(|(_, c)| *c)
        .sum();
    over(o, total, running_of(&aggregate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fizz_eval::RoleRef;

    const COUNTER: &str = r#"{
        "states": {"code": "x = 0"},
        "actions": [{"name": "Inc", "flow": "FLOW_ATOMIC", "block": {"flow": "FLOW_ATOMIC", "stmts": [
            {"pyStmt": {"code": "x = (x + 1) % MOD"}}
        ]}}],
        "invariants": INVARIANTS
    }"#;

    fn counter(modulus: i64, invariants: &str) -> Arc<Model> {
        let json = COUNTER
            .replace("MOD", &modulus.to_string())
            .replace("INVARIANTS", invariants);
        Arc::new(Model::from_json(&json).unwrap())
    }

    fn config(max_actions: u64) -> CheckConfig {
        let mut config = CheckConfig::default();
        config.options.options.max_actions = max_actions;
        config.seed = 1;
        config
    }

    fn link_names(trace: &[TraceStep]) -> Vec<&str> {
        trace.iter().map(TraceStep::name).collect()
    }

    #[test]
    fn test_counter_graph() {
        let mut p = Processor::new(counter(100, "[]"), config(3)).unwrap();
        let outcome = p.check().unwrap();
        // init, then x = 1, 2, 3
        assert!(
            matches!(outcome, CheckOutcome::Ok { nodes: 4, states_explored: 4, max_depth: 3 }),
            "{:?}",
            outcome
        );
        assert_eq!(p.graph().node(NodeId::new(0)).name(), "init");
        assert!(p.graph().node(NodeId::new(1)).is_yield());
    }

    #[test]
    fn test_duplicates_fold_into_existing_nodes() {
        let mut p = Processor::new(counter(2, "[]"), config(5)).unwrap();
        let outcome = p.check().unwrap();
        // x = 0 again folds into the root
        assert!(matches!(outcome, CheckOutcome::Ok { nodes: 2, states_explored: 2, .. }), "{:?}", outcome);
        let last = p.graph().node(NodeId::new(1));
        assert_eq!(last.outbound[0].node, NodeId::new(0));
        assert_eq!(p.graph().node(NodeId::new(0)).inbound.len(), 1);
    }

    #[test]
    fn test_invariant_violation_trace() {
        let model = counter(100, r#"[{"name": "Small", "always": true, "pyExpr": "x < 2"}]"#);
        let mut p = Processor::new(model, config(5)).unwrap();
        match p.check().unwrap() {
            CheckOutcome::InvariantViolation {
                invariants, trace, ..
            } => {
                assert_eq!(invariants, vec!["Small".to_string()]);
                assert_eq!(link_names(&trace), vec!["", "Inc", "Inc"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_deadlock_detection() {
        let json = r#"{
            "states": {"code": "x = 0"},
            "actions": [{"name": "Once", "flow": "FLOW_ATOMIC", "block": {"flow": "FLOW_ATOMIC", "stmts": [
                {"requireStmt": {"condition": "x < 1"}},
                {"pyStmt": {"code": "x = x + 1"}}
            ]}}]
        }"#;
        let model = Arc::new(Model::from_json(json).unwrap());
        let mut cfg = config(5);
        let outcome = Processor::new(Arc::clone(&model), cfg.clone())
            .unwrap()
            .check()
            .unwrap();
        assert!(outcome.is_ok(), "{:?}", outcome);

        cfg.options.deadlock_detection = true;
        match Processor::new(model, cfg).unwrap().check().unwrap() {
            CheckOutcome::Deadlock { node, trace } => {
                assert_eq!(node, NodeId::new(1));
                assert_eq!(link_names(&trace), vec!["", "Once"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stop_flag() {
        let mut p = Processor::new(counter(100, "[]"), config(50)).unwrap();
        p.stop_handle().store(true, Ordering::Relaxed);
        let outcome = p.check().unwrap();
        assert!(matches!(outcome, CheckOutcome::Stopped { .. }));
        assert!(!outcome.is_violation());
    }

    #[test]
    fn test_stopped_run_keeps_partial_graph() {
        let mut p = Processor::new(counter(100, "[]"), config(50)).unwrap();
        p.stop_handle().store(true, Ordering::Relaxed);
        match p.check().unwrap() {
            CheckOutcome::Stopped { nodes, .. } => {
                assert!(nodes >= 1);
                assert_eq!(nodes, p.graph().len());
            }
            other => panic!("unexpected {:?}", other),
        }
        let dir = tempfile::TempDir::new().unwrap();
        let out = crate::output::OutputWriter::new(dir.path()).unwrap();
        assert!(out.write_states(p.graph()).unwrap() >= 1);
        assert!(dir.path().join("nodes_000000.json").exists());
    }

    #[test]
    fn test_check_runs_once() {
        let mut p = Processor::new(counter(2, "[]"), config(2)).unwrap();
        p.check().unwrap();
        assert!(p.check().is_err());
    }

    #[test]
    fn test_simulation_finds_violation() {
        let model = counter(100, r#"[{"name": "Small", "always": true, "pyExpr": "x < 4"}]"#);
        let mut cfg = config(10);
        cfg.simulation = true;
        cfg.max_runs = 3;
        let mut p = Processor::new(model, cfg).unwrap();
        match p.check().unwrap() {
            CheckOutcome::InvariantViolation { trace, .. } => assert_eq!(trace.len(), 5),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(p.runs(), 1);
    }

    #[test]
    fn test_simulation_passes_within_runs() {
        let mut cfg = config(4);
        cfg.simulation = true;
        cfg.max_runs = 5;
        let mut p = Processor::new(counter(3, "[]"), cfg).unwrap();
        assert!(p.check().unwrap().is_ok());
        assert_eq!(p.runs(), 5);
    }

    fn action(name: &str) -> Action {
        Action {
            name: name.into(),
            ..Action::default()
        }
    }

    #[test]
    fn test_action_limits() {
        let mut options = StateSpaceOptions::default();
        let inc = action("Inc");
        let mut process = Process::new(Arc::new(BTreeMap::new()), &[]);
        assert!(!exceeds_limits(&options, &inc, &process, None));

        options.action_options.insert(
            "Inc".into(),
            ActionOptions {
                max_actions: 2,
                ..ActionOptions::default()
            },
        );
        process.stats.increment("Inc");
        assert!(!exceeds_limits(&options, &inc, &process, None));
        process.stats.increment("Inc");
        assert!(exceeds_limits(&options, &inc, &process, None));
    }

    #[test]
    fn test_role_action_limits() {
        let mut options = StateSpaceOptions::default();
        let send = action("Send");
        let r0 = RoleInstance::new(RoleRef::new("Node", 0), false, BTreeMap::new());
        let r1 = RoleInstance::new(RoleRef::new("Node", 1), false, BTreeMap::new());
        let mut process = Process::new(Arc::new(BTreeMap::new()), &[]);
        process.stats.increment("Node#0.Send");

        options.action_options.insert(
            "Node#.Send".into(),
            ActionOptions {
                max_actions: 1,
                ..ActionOptions::default()
            },
        );
        assert!(exceeds_limits(&options, &send, &process, Some(&r0)));
        assert!(!exceeds_limits(&options, &send, &process, Some(&r1)));

        options.action_options.clear();
        options.action_options.insert(
            "Node.Send".into(),
            ActionOptions {
                max_concurrent_actions: 1,
                ..ActionOptions::default()
            },
        );
        assert!(!exceeds_limits(&options, &send, &process, Some(&r1)));
        let mut frame = CallFrame::new(0, "Roles[0].Actions[0]", "Node.Send");
        frame.obj = Some(r0.rref.clone());
        process.new_thread(frame);
        assert!(exceeds_limits(&options, &send, &process, Some(&r1)));
    }
}
