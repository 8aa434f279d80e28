//! A process is one global state of the model: the heap, the threads
//! running actions, role instances and in-flight channel messages.
//!
//! [`ProcessHost`] exposes a process (and the thread being executed, if
//! any) to the expression engine.

use crate::channel::{self, ChannelMessage};
use crate::frame::{CallFrame, Thread};
use crate::graph::NodeId;
use crate::heap::Heap;
use crate::model::Model;
use crate::role::{Message, RoleInstance};
use crate::state::{fingerprint_of, Fingerprint, KeyHasher, StateKey};
use fizz_ast::FairnessLevel;
use fizz_eval::{
    collect_symmetric_ids, EvalError, EvalResult, Host, RoleRef, RoleStub, SymmetryContext, Value,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;
use std::sync::Arc;
use tracing::trace;

/// Position of an invariant: `(file index, invariant index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct InvariantPosition {
    pub file_index: usize,
    pub invariant_index: usize,
}

impl InvariantPosition {
    pub fn new(file_index: usize, invariant_index: usize) -> Self {
        Self {
            file_index,
            invariant_index,
        }
    }
}

/// How many times each action has been started on a path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub total_actions: u64,
    pub counts: BTreeMap<String, u64>,
}

impl Stats {
    pub fn increment(&mut self, action: &str) {
        self.total_actions += 1;
        *self.counts.entry(action.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, action: &str) -> u64 {
        self.counts.get(action).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct Process {
    /// Name of the step that produced this process: an action, `yield`,
    /// `crash`, `thread-i`, `Any:x`, ...
    pub name: String,
    pub heap: Heap,
    pub threads: Vec<Thread>,
    pub current: usize,
    pub roles: Vec<RoleInstance>,
    /// Pending channel messages per channel id, kept sorted.
    pub pending: BTreeMap<u32, Vec<ChannelMessage>>,
    /// Values returned by actions finishing in this step.
    pub returns: BTreeMap<String, Value>,
    pub labels: Vec<String>,
    pub messages: Vec<Message>,
    pub stats: Stats,
    /// `witness[file][invariant]`: the `eventually` predicate held here.
    pub witness: Vec<Vec<bool>>,
    pub failed_invariants: Vec<InvariantPosition>,
    pub fairness: FairnessLevel,
    /// Fairness of the `any` choice that produced this fork.
    pub choice_fairness: FairnessLevel,
    /// Whether any statement ran since the fork.
    pub enabled: bool,
    /// Node this process was forked from.
    pub parent: Option<NodeId>,
    /// Node that owns this process once attached.
    pub node: Option<NodeId>,
    pub symmetry: SymmetryContext,
    cached_key: Option<StateKey>,
}

impl Process {
    pub fn new(globals: Arc<BTreeMap<String, Value>>, invariant_counts: &[usize]) -> Self {
        Self {
            name: String::new(),
            heap: Heap::new(globals),
            threads: Vec::new(),
            current: 0,
            roles: Vec::new(),
            pending: BTreeMap::new(),
            returns: BTreeMap::new(),
            labels: Vec::new(),
            messages: Vec::new(),
            stats: Stats::default(),
            witness: invariant_counts.iter().map(|&n| vec![false; n]).collect(),
            failed_invariants: Vec::new(),
            fairness: FairnessLevel::Unknown,
            choice_fairness: FairnessLevel::Unknown,
            enabled: false,
            parent: None,
            node: None,
            symmetry: SymmetryContext::new(),
            cached_key: None,
        }
    }

    /// A child process for the next step. State, threads and roles are
    /// copied; per-step data (returns, labels, messages, witnesses,
    /// failures, fairness) starts empty.
    pub fn fork(&self) -> Process {
        Process {
            name: self.name.clone(),
            heap: self.heap.clone(),
            threads: self.threads.clone(),
            current: self.current,
            roles: self.roles.clone(),
            pending: self.pending.clone(),
            returns: BTreeMap::new(),
            labels: Vec::new(),
            messages: Vec::new(),
            stats: self.stats.clone(),
            witness: self.witness.iter().map(|w| vec![false; w.len()]).collect(),
            failed_invariants: Vec::new(),
            fairness: FairnessLevel::Unknown,
            choice_fairness: FairnessLevel::Unknown,
            enabled: false,
            parent: self.node.or(self.parent),
            node: None,
            symmetry: SymmetryContext::new(),
            cached_key: None,
        }
    }

    /// A copy for evaluating assertions: like a fork but keeps `returns`.
    pub fn clone_for_assert(&self) -> Process {
        let mut p = self.fork();
        p.returns = self.returns.clone();
        p.enabled = self.enabled;
        p
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Appends a thread running `frame` and makes it current.
    pub fn new_thread(&mut self, frame: CallFrame) -> usize {
        self.threads.push(Thread::new(frame));
        self.current = self.threads.len() - 1;
        self.cached_key = None;
        self.current
    }

    pub fn current_thread(&self) -> Option<&Thread> {
        self.threads.get(self.current)
    }

    pub fn current_thread_mut(&mut self) -> Option<&mut Thread> {
        self.threads.get_mut(self.current)
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut CallFrame> {
        self.current_thread_mut().and_then(Thread::top_mut)
    }

    pub fn remove_current_thread(&mut self) {
        if self.current < self.threads.len() {
            self.threads.remove(self.current);
        }
        self.current = 0;
        self.cached_key = None;
    }

    pub fn role(&self, rref: &RoleRef) -> Option<&RoleInstance> {
        self.roles.iter().find(|r| &r.rref == rref)
    }

    pub fn role_mut(&mut self, rref: &RoleRef) -> Option<&mut RoleInstance> {
        self.roles.iter_mut().find(|r| &r.rref == rref)
    }

    /// Whether any frame of any thread runs on behalf of `rref`.
    pub fn is_role_running(&self, rref: &RoleRef) -> bool {
        self.threads
            .iter()
            .flat_map(|t| t.stack.iter())
            .any(|f| f.obj.as_ref() == Some(rref))
    }

    pub fn enqueue_message(&mut self, message: ChannelMessage) {
        let queue = self.pending.entry(message.channel).or_default();
        let at = queue.partition_point(|m| m < &message);
        queue.insert(at, message);
        self.cached_key = None;
    }

    pub fn invalidate_key(&mut self) {
        self.cached_key = None;
    }

    /// Canonical state key, cached until invalidated.
    pub fn state_key(&mut self) -> StateKey {
        if let Some(key) = self.cached_key {
            return key;
        }
        let key = self.compute_key();
        self.cached_key = Some(key);
        key
    }

    pub fn fingerprint(&mut self) -> Fingerprint {
        self.state_key().fingerprint
    }

    /// Hash of the current thread first, then every thread in sorted hash
    /// order, then returns, heap, roles and channel contents. Thread order
    /// and role creation order do not matter.
    pub fn compute_key(&self) -> StateKey {
        let mut hasher = KeyHasher::default();
        let mut thread_hashes: Vec<Fingerprint> = self.threads.iter().map(fingerprint_of).collect();
        self.threads
            .get(self.current)
            .map(fingerprint_of)
            .hash(&mut hasher);
        thread_hashes.sort();
        thread_hashes.hash(&mut hasher);
        self.returns.hash(&mut hasher);
        self.heap.hash(&mut hasher);
        let mut roles: Vec<&RoleInstance> = self.roles.iter().collect();
        roles.sort_by(|a, b| a.rref.cmp(&b.rref));
        roles.hash(&mut hasher);
        self.pending.hash(&mut hasher);
        hasher.finish_key()
    }

    pub fn thread_hashes(&self) -> Vec<Fingerprint> {
        self.threads.iter().map(fingerprint_of).collect()
    }

    /// Every value the process holds, for symmetry scans.
    pub fn visit_values(&self, f: &mut dyn FnMut(&Value)) {
        for v in self.heap.state.values() {
            f(v);
        }
        for v in self.returns.values() {
            f(v);
        }
        for thread in &self.threads {
            visit_thread(thread, f);
        }
        for role in &self.roles {
            role.params.values().chain(role.fields.values()).for_each(&mut *f);
        }
        for msg in self.pending.values().flatten() {
            msg.args.iter().chain(msg.kwargs.iter().map(|(_, v)| v)).for_each(&mut *f);
        }
    }

    /// State as a JSON-friendly map: state variables plus role fields.
    pub fn state_map(&self) -> BTreeMap<String, Value> {
        let mut out = self.heap.state.clone();
        for role in &self.roles {
            let fields = role
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            out.insert(
                role.rref.short(),
                Value::record(fizz_eval::RecordKind::Struct, fields),
            );
        }
        if !self.returns.is_empty() {
            out.insert(
                "__returns__".into(),
                Value::dict(self.returns.iter().map(|(k, v)| (Value::str(k), v.clone()))),
            );
        }
        out
    }
}

fn visit_thread(thread: &Thread, f: &mut dyn FnMut(&Value)) {
    for frame in &thread.stack {
        for scope in &frame.scopes {
            scope.vars.values().chain(scope.loop_range.iter()).for_each(&mut *f);
        }
        frame.args.values().for_each(&mut *f);
    }
}

fn symmetric_ids_of(
    values: impl FnOnce(&mut dyn FnMut(&Value)),
) -> BTreeMap<Arc<str>, BTreeSet<i64>> {
    let mut out = BTreeMap::new();
    values(&mut |v| collect_symmetric_ids(std::iter::once(v), &mut out));
    out
}

/// Expression-engine view of a process, optionally with the thread that
/// is executing (taken out of the process while it runs).
pub struct ProcessHost<'a> {
    pub model: &'a Model,
    pub process: &'a mut Process,
    pub thread: Option<&'a mut Thread>,
}

impl<'a> ProcessHost<'a> {
    pub fn new(model: &'a Model, process: &'a mut Process, thread: Option<&'a mut Thread>) -> Self {
        Self {
            model,
            process,
            thread,
        }
    }

    fn frame(&self) -> Option<&CallFrame> {
        self.thread.as_ref().and_then(|t| t.stack.last())
    }

    fn frame_mut(&mut self) -> Option<&mut CallFrame> {
        self.thread.as_mut().and_then(|t| t.stack.last_mut())
    }

    fn create_role(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult<Value> {
        if !args.is_empty() {
            return Err(EvalError::InvalidArgument(format!(
                "{}() takes keyword arguments only",
                name
            )));
        }
        let decl = self
            .model
            .role(name)
            .ok_or_else(|| EvalError::UndefinedName(name.to_string()))?;
        let rref = RoleRef::new(name, self.model.next_role_ref(name));
        let mut role = RoleInstance::new(rref.clone(), decl.role.is_symmetric(), kwargs.into_iter().collect());
        if let Some(states) = &decl.role.states {
            let mut env = fizz_eval::Env::from_vars(role.params.clone());
            fizz_eval::exec(&states.code, &mut env)?;
            for (k, v) in env.vars {
                if !role.params.contains_key(&k) {
                    role.fields.insert(k, v);
                }
            }
        }
        if let Some(durability) = self.model.durability(name) {
            role.snapshot(durability);
        }
        trace!(role = %rref.short(), "created role");
        self.process.roles.push(role);
        self.process.invalidate_key();
        Ok(Value::Role(rref))
    }
}

impl Host for ProcessHost<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(frame) = self.frame() {
            if let Some(v) = frame.lookup(name) {
                return Some(v.clone());
            }
            if name == "self" {
                if let Some(obj) = &frame.obj {
                    return Some(Value::Role(obj.clone()));
                }
            }
        }
        if let Some(v) = self.process.heap.get(name) {
            return Some(v.clone());
        }
        if name == "__returns__" {
            return Some(Value::dict(
                self.process
                    .returns
                    .iter()
                    .map(|(k, v)| (Value::str(k), v.clone())),
            ));
        }
        if name == "Channel" || self.model.is_role(name) {
            return Some(Value::RoleType(Arc::from(name)));
        }
        None
    }

    fn assign(&mut self, name: &str, value: Value) -> EvalResult<()> {
        if matches!(value, Value::Builtin(_) | Value::Module(_)) {
            return Ok(());
        }
        let value = match self.frame_mut() {
            Some(frame) => match frame.update_if_exists(name, value) {
                Ok(()) => return Ok(()),
                Err(v) => v,
            },
            None => value,
        };
        self.process.invalidate_key();
        if self.process.heap.update_if_exists(name, value.clone()) {
            return Ok(());
        }
        if self.process.heap.is_global(name) {
            return Err(EvalError::ImmutableField {
                type_name: "globals".into(),
                field: name.to_string(),
            });
        }
        if name == "self" {
            return match (value, self.frame_mut()) {
                (Value::Role(r), Some(frame)) => {
                    frame.obj = Some(r);
                    Ok(())
                }
                (other, _) => Err(EvalError::type_error(format!(
                    "cannot bind self to {}",
                    other.type_name()
                ))),
            };
        }
        match self.frame_mut() {
            Some(frame) => frame.declare(name, value),
            None => self.process.heap.insert(name, value),
        }
        Ok(())
    }

    fn get_attr(&self, obj: &Value, name: &str) -> EvalResult<Value> {
        match obj {
            Value::Role(rref) => self
                .process
                .role(rref)
                .ok_or_else(|| EvalError::Internal(format!("unknown role {}", rref.short())))?
                .attr(name),
            Value::Channel(spec) => {
                channel::channel_attr(spec, name).ok_or_else(|| EvalError::no_attr(obj, name))
            }
            Value::RoleStub(stub) if name == "role" => Ok(Value::Role(stub.role.clone())),
            _ => Err(EvalError::no_attr(obj, name)),
        }
    }

    fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> EvalResult<()> {
        match obj {
            Value::Role(rref) => {
                self.process.invalidate_key();
                self.process
                    .role_mut(rref)
                    .ok_or_else(|| EvalError::Internal(format!("unknown role {}", rref.short())))?
                    .set_field(name, value)
            }
            _ => Err(EvalError::no_attr(obj, name)),
        }
    }

    fn call(
        &mut self,
        func: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult<Value> {
        match func {
            Value::RoleType(name) if &**name == "Channel" => {
                let spec = channel::new_channel(self.model.next_channel_id(), &args, &kwargs)?;
                Ok(Value::Channel(Arc::new(spec)))
            }
            Value::RoleType(name) => self.create_role(name, args, kwargs),
            other => Err(EvalError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_method(
        &mut self,
        obj: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult<Value> {
        match (obj, name) {
            (Value::Channel(spec), "stub") => match args.as_slice() {
                [Value::Role(role)] => Ok(Value::RoleStub(RoleStub {
                    role: role.clone(),
                    channel: spec.id,
                })),
                _ => Err(EvalError::InvalidArgument(
                    "Channel.stub() takes one role".into(),
                )),
            },
            (Value::RoleStub(stub), _) => {
                self.process.enqueue_message(ChannelMessage {
                    channel: stub.channel,
                    receiver: stub.role.clone(),
                    function: name.to_string(),
                    args,
                    kwargs,
                });
                Ok(Value::None)
            }
            (Value::Role(r), _) => Err(EvalError::type_error(format!(
                "role function {}.{} can only be called as a statement",
                r.name, name
            ))),
            _ => Err(EvalError::no_attr(obj, name)),
        }
    }

    fn symmetric_ids(&self) -> BTreeMap<Arc<str>, BTreeSet<i64>> {
        let process = &*self.process;
        let thread = self.thread.as_deref();
        symmetric_ids_of(|f| {
            process.visit_values(f);
            if let Some(t) = thread {
                visit_thread(t, f);
            }
        })
    }

    fn symmetry(&mut self) -> &mut SymmetryContext {
        &mut self.process.symmetry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fizz_ast::Flow;

    fn model() -> Model {
        Model::from_json(
            r#"{"roles": [{"name": "Server", "states": {"code": "log = []"}}]}"#,
        )
        .unwrap()
    }

    fn process() -> Process {
        Process::new(Arc::new(BTreeMap::new()), &[0])
    }

    fn thread(pc: &str, var: (&str, i64)) -> Thread {
        let mut frame = CallFrame::new(0, pc, "A");
        frame
            .push_scope(Flow::Atomic)
            .vars
            .insert(var.0.into(), Value::Int(var.1));
        Thread::new(frame)
    }

    #[test]
    fn test_fork_resets_step_data() {
        let mut p = process();
        p.heap.insert("x", Value::Int(1));
        p.returns.insert("A".into(), Value::Int(3));
        p.labels.push("A.l".into());
        p.witness[0] = vec![];
        p.enable();
        p.node = Some(NodeId::new(4));

        let child = p.fork();
        assert_eq!(child.heap.get("x"), Some(&Value::Int(1)));
        assert!(child.returns.is_empty());
        assert!(child.labels.is_empty());
        assert!(!child.enabled);
        assert_eq!(child.parent, Some(NodeId::new(4)));
        assert_eq!(child.node, None);

        let assert_copy = p.clone_for_assert();
        assert_eq!(assert_copy.returns.len(), 1);
    }

    #[test]
    fn test_fork_leaves_parent_untouched() {
        let mut p = process();
        p.heap.insert("x", Value::Int(1));
        p.threads = vec![thread("Actions[0].Block", ("i", 0))];
        let before = p.compute_key();

        let mut child = p.fork();
        child.heap.insert("x", Value::Int(2));
        child.threads[0].stack[0].scopes[0]
            .vars
            .insert("i".into(), Value::Int(7));
        child.threads.push(thread("Actions[1].Block", ("j", 1)));

        assert_eq!(p.heap.get("x"), Some(&Value::Int(1)));
        assert_eq!(p.threads.len(), 1);
        assert_eq!(p.threads[0].stack[0].scopes[0].vars["i"], Value::Int(0));
        assert_eq!(p.compute_key(), before);
    }

    #[test]
    fn test_hash_ignores_thread_order_except_current() {
        let mut a = process();
        a.threads = vec![thread("Actions[0].Block", ("i", 0)), thread("Actions[1].Block", ("i", 1))];
        a.current = 0;
        let mut b = process();
        b.threads = vec![thread("Actions[1].Block", ("i", 1)), thread("Actions[0].Block", ("i", 0))];
        b.current = 1;
        assert_eq!(a.compute_key(), b.compute_key());

        b.current = 0;
        assert_ne!(a.compute_key(), b.compute_key());
    }

    #[test]
    fn test_hash_ignores_step_data() {
        let mut a = process();
        a.heap.insert("x", Value::Int(1));
        let mut b = a.fork();
        b.labels.push("l".into());
        b.enable();
        b.name = "yield".into();
        assert_eq!(a.compute_key(), b.compute_key());
        b.heap.insert("x", Value::Int(2));
        assert_ne!(a.compute_key(), b.compute_key());
    }

    #[test]
    fn test_host_resolution_order() {
        let model = model();
        let mut p = process();
        p.heap.insert("x", Value::Int(1));
        let mut t = thread("Actions[0].Block", ("y", 2));
        {
            let mut host = ProcessHost::new(&model, &mut p, Some(&mut t));
            fizz_eval::exec("x = x + y\nz = 5", &mut host).unwrap();
            assert_eq!(host.lookup("Server"), Some(Value::RoleType(Arc::from("Server"))));
            assert_eq!(host.lookup("nope"), None);
        }
        assert_eq!(p.heap.get("x"), Some(&Value::Int(3)));
        assert_eq!(t.stack[0].scopes[0].vars["z"], Value::Int(5));
        assert!(p.heap.get("z").is_none());
    }

    #[test]
    fn test_globals_are_frozen() {
        let model = model();
        let globals = Arc::new(BTreeMap::from([("N".to_string(), Value::Int(3))]));
        let mut p = Process::new(globals, &[]);
        let mut t = thread("Actions[0].Block", ("i", 0));
        let mut host = ProcessHost::new(&model, &mut p, Some(&mut t));
        assert!(matches!(
            fizz_eval::exec("N = 4", &mut host),
            Err(EvalError::ImmutableField { .. })
        ));
    }

    #[test]
    fn test_role_creation_and_fields() {
        let model = model();
        let mut p = process();
        let mut t = thread("Actions[0].Block", ("i", 0));
        {
            let mut host = ProcessHost::new(&model, &mut p, Some(&mut t));
            fizz_eval::exec("s = Server(cap=2)\ns.log.append(1)", &mut host).unwrap();
            assert_eq!(fizz_eval::eval("s.cap", &mut host).unwrap(), Value::Int(2));
            assert!(fizz_eval::exec("s.cap = 3", &mut host).is_err());
        }
        assert_eq!(p.roles.len(), 1);
        assert_eq!(p.roles[0].rref.short(), "Server#0");
        assert_eq!(p.roles[0].fields["log"], Value::list(vec![Value::Int(1)]));
    }

    #[test]
    fn test_channel_stub_enqueues_sorted() {
        let model = model();
        let mut p = process();
        let mut t = thread("Actions[0].Block", ("i", 0));
        {
            let mut host = ProcessHost::new(&model, &mut p, Some(&mut t));
            fizz_eval::exec(
                "s = Server()\nch = Channel()\nst = ch.stub(s)\nst.Put(2)\nst.Put(1)",
                &mut host,
            )
            .unwrap();
        }
        let queue = &p.pending[&0];
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].args, vec![Value::Int(1)]);
        assert_eq!(queue[0].function, "Put");
    }
}
