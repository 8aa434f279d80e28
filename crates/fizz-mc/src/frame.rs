//! Lexical scopes, call frames and threads.
//!
//! A thread is a stack of call frames. Each frame addresses its next
//! statement with a program counter (a path into the AST) and holds a
//! stack of lexical scopes, one per block entered.

use fizz_ast::{FairnessLevel, Flow};
use fizz_eval::{RoleRef, Value};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub flow: Flow,
    pub vars: BTreeMap<String, Value>,
    /// Parallel blocks: statement indices already started.
    pub skip_stmts: BTreeSet<usize>,
    /// `for` loops: the loop variables and the elements not yet visited.
    pub loop_vars: Vec<String>,
    pub loop_range: Vec<Value>,
}

// Flow and loop variable names follow from the program counter.
impl Hash for Scope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vars.hash(state);
        self.skip_stmts.hash(state);
        self.loop_range.hash(state);
    }
}

impl Scope {
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            vars: BTreeMap::new(),
            skip_stmts: BTreeSet::new(),
            loop_vars: Vec::new(),
            loop_range: Vec::new(),
        }
    }

    /// Sets the flow unless `flow` is unspecified, in which case the
    /// inherited one stays.
    pub fn set_flow(&mut self, flow: Flow) {
        if flow != Flow::Unknown {
            self.flow = flow;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    pub file_index: usize,
    pub pc: String,
    pub name: String,
    pub scopes: SmallVec<[Scope; 4]>,
    /// Bound parameters of a function call.
    pub args: BTreeMap<String, Value>,
    /// Caller variables that receive the return value.
    pub caller_assign: Vec<String>,
    /// The role this frame runs on behalf of; bound to `self`.
    pub obj: Option<RoleRef>,
}

/// Frames that resume the same statement with the same bindings hash
/// alike. The display name and the return targets are left out.
impl Hash for CallFrame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file_index.hash(state);
        self.pc.hash(state);
        self.obj.hash(state);
        self.scopes.hash(state);
        self.args.hash(state);
    }
}

impl CallFrame {
    pub fn new(file_index: usize, pc: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            file_index,
            pc: pc.into(),
            name: name.into(),
            scopes: SmallVec::new(),
            args: BTreeMap::new(),
            caller_assign: Vec::new(),
            obj: None,
        }
    }

    /// Enters a new scope inheriting the current flow, then applies `flow`.
    /// A root scope with no flow at all runs atomically.
    pub fn push_scope(&mut self, flow: Flow) -> &mut Scope {
        let inherited = self.scopes.last().map_or(Flow::Unknown, |s| s.flow);
        let mut scope = Scope::new(inherited);
        scope.set_flow(flow);
        if scope.flow == Flow::Unknown {
            scope.flow = Flow::Atomic;
        }
        self.scopes.push(scope);
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Flow of the innermost scope.
    pub fn flow(&self) -> Flow {
        self.scopes.last().map_or(Flow::Atomic, |s| s.flow)
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.vars.get(name))
            .or_else(|| self.args.get(name))
    }

    /// Overwrites `name` in the innermost scope that has it, or in the
    /// bound args. Gives the value back if the name is not bound here.
    pub fn update_if_exists(&mut self, name: &str, value: Value) -> Result<(), Value> {
        if let Some(slot) = self
            .scopes
            .iter_mut()
            .rev()
            .find_map(|s| s.vars.get_mut(name))
        {
            *slot = value;
            return Ok(());
        }
        if let Some(slot) = self.args.get_mut(name) {
            *slot = value;
            return Ok(());
        }
        Err(value)
    }

    /// Declares `name` in the innermost scope.
    pub fn declare(&mut self, name: &str, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.vars.insert(name.to_string(), value);
            }
            None => {
                self.args.insert(name.to_string(), value);
            }
        }
    }

    /// All scope variables, inner scopes shadowing outer ones.
    pub fn visible_vars(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for scope in &self.scopes {
            out.extend(scope.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    /// First segment of the program counter, e.g. `Actions[0]`.
    pub fn root_path(&self) -> &str {
        self.pc.split('.').next().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub stack: Vec<CallFrame>,
    pub fairness: FairnessLevel,
}

impl Hash for Thread {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.stack.hash(state);
    }
}

impl Thread {
    pub fn new(frame: CallFrame) -> Self {
        Self {
            stack: vec![frame],
            fairness: FairnessLevel::Unknown,
        }
    }

    pub fn current_pc(&self) -> &str {
        self.stack.last().map_or("", |f| f.pc.as_str())
    }

    /// Name of the root frame: the action this thread is running.
    pub fn root_name(&self) -> &str {
        self.stack.first().map_or("", |f| f.name.as_str())
    }

    pub fn top(&self) -> Option<&CallFrame> {
        self.stack.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut CallFrame> {
        self.stack.last_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_flow_inheritance() {
        let mut frame = CallFrame::new(0, "Actions[0].Block", "Add");
        assert_eq!(frame.push_scope(Flow::Unknown).flow, Flow::Atomic);
        frame.scopes.clear();
        frame.push_scope(Flow::Serial);
        assert_eq!(frame.push_scope(Flow::Unknown).flow, Flow::Serial);
        assert_eq!(frame.push_scope(Flow::Oneof).flow, Flow::Oneof);
        assert_eq!(frame.flow(), Flow::Oneof);
    }

    #[test]
    fn test_lookup_and_update_order() {
        let mut frame = CallFrame::new(0, "Functions[0].Block", "f");
        frame.args.insert("a".into(), Value::Int(1));
        frame.push_scope(Flow::Atomic).vars.insert("x".into(), Value::Int(1));
        frame.push_scope(Flow::Atomic).vars.insert("x".into(), Value::Int(2));

        assert_eq!(frame.lookup("x"), Some(&Value::Int(2)));
        assert_eq!(frame.lookup("a"), Some(&Value::Int(1)));
        assert!(frame.update_if_exists("x", Value::Int(5)).is_ok());
        assert_eq!(frame.scopes[1].vars["x"], Value::Int(5));
        assert_eq!(frame.scopes[0].vars["x"], Value::Int(1));
        assert!(frame.update_if_exists("a", Value::Int(9)).is_ok());
        assert_eq!(frame.update_if_exists("y", Value::Int(0)), Err(Value::Int(0)));

        frame.declare("y", Value::Int(7));
        assert_eq!(frame.scopes[1].vars["y"], Value::Int(7));
        assert_eq!(frame.visible_vars()["x"], Value::Int(5));
    }

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_hash_ignores_derived_fields() {
        let mut a = CallFrame::new(0, "Actions[0].Block.Stmts[1]", "Add");
        a.push_scope(Flow::Serial).vars.insert("i".into(), Value::Int(1));
        let mut b = a.clone();
        b.name = "Other".into();
        b.caller_assign = vec!["r".into()];
        b.scopes[0].flow = Flow::Atomic;
        b.scopes[0].loop_vars = vec!["i".into()];
        assert_ne!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let mut fair = Thread::new(b.clone());
        fair.fairness = FairnessLevel::Strong;
        assert_eq!(hash_of(&Thread::new(a.clone())), hash_of(&fair));

        b.scopes[0].skip_stmts.insert(0);
        assert_ne!(hash_of(&a), hash_of(&b));
        let mut c = a.clone();
        c.scopes[0].loop_range = vec![Value::Int(2)];
        assert_ne!(hash_of(&a), hash_of(&c));
        c = a.clone();
        c.pc = "Actions[0].Block.Stmts[2]".into();
        assert_ne!(hash_of(&a), hash_of(&c));
        c = a.clone();
        c.obj = Some(RoleRef::new("Node", 0));
        assert_ne!(hash_of(&a), hash_of(&c));
    }

    #[test]
    fn test_thread_accessors() {
        let thread = Thread::new(CallFrame::new(0, "Actions[1].Block.Stmts[0]", "Send"));
        assert_eq!(thread.current_pc(), "Actions[1].Block.Stmts[0]");
        assert_eq!(thread.root_name(), "Send");
        assert_eq!(thread.top().map(|f| f.root_path()), Some("Actions[1]"));
    }
}
