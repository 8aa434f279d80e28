//! Tree-walking interpreter for the Python subset.
//!
//! Names resolve in three layers: comprehension locals, then the
//! [`Host`] (which owns frames, roles and channels), then builtins.
//! Values are immutable and copy-on-write, so a mutating method call
//! such as `xs.append(1)` or an assignment `d[k].v = 2` is written back
//! through its place expression.

use crate::ast::*;
use crate::builtins;
use crate::methods;
use crate::ops;
use crate::parser::{parse_expr, parse_program, ParseError};
use crate::symmetry::SymmetryContext;
use crate::value::{RecordKind, Value};
use ahash::AHashMap;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;

/// Evaluation error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("name '{0}' is not defined")]
    UndefinedName(String),
    #[error("type error: {0}")]
    TypeError(String),
    #[error("unsupported operand type(s) for {op}: '{left}' and '{right}'")]
    UnsupportedOperand {
        op: String,
        left: String,
        right: String,
    },
    #[error("'{type_name}' object has no attribute '{attr}'")]
    AttributeError { type_name: String, attr: String },
    #[error("key not found: {0}")]
    KeyError(String),
    #[error("index {index} out of range for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("unhashable type: '{0}'")]
    Unhashable(String),
    #[error("cannot assign field '{field}' of immutable {type_name}")]
    ImmutableField { type_name: String, field: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
    /// Raised by `fail(...)` in user code.
    #[error("{0}")]
    Fail(String),
    /// The current transition cannot proceed, e.g. a symmetry domain
    /// ran out of fresh values or a `require` did not hold.
    #[error("transition disabled: {0}")]
    DisableTransition(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EvalError {
    pub fn type_error(msg: impl Into<String>) -> Self {
        EvalError::TypeError(msg.into())
    }

    pub fn unsupported(op: &str, left: &Value, right: &Value) -> Self {
        EvalError::UnsupportedOperand {
            op: op.to_string(),
            left: left.type_name().to_string(),
            right: right.type_name().to_string(),
        }
    }

    pub fn no_attr(obj: &Value, attr: &str) -> Self {
        EvalError::AttributeError {
            type_name: obj.type_name().to_string(),
            attr: attr.to_string(),
        }
    }

    /// Whether this error only disables the transition rather than
    /// failing the model.
    pub fn is_disable(&self) -> bool {
        matches!(self, EvalError::DisableTransition(_))
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

/// The environment an expression runs in.
///
/// The model checker implements this over a thread's frame stack and
/// the process heap; [`Env`] is a flat implementation for invariants
/// over plain values and for tests.
pub trait Host {
    /// Resolve a variable name, or `None` to fall through to builtins.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Bind a variable.
    fn assign(&mut self, name: &str, value: Value) -> EvalResult<()>;

    /// Attribute of a host-owned value (role, channel, stub).
    fn get_attr(&self, obj: &Value, name: &str) -> EvalResult<Value> {
        Err(EvalError::no_attr(obj, name))
    }

    fn set_attr(&mut self, obj: &Value, name: &str, _value: Value) -> EvalResult<()> {
        Err(EvalError::no_attr(obj, name))
    }

    /// Call a host-owned callable such as a role constructor or `Channel`.
    fn call(
        &mut self,
        func: &Value,
        _args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> EvalResult<Value> {
        Err(EvalError::type_error(format!(
            "'{}' object is not callable",
            func.type_name()
        )))
    }

    /// Method call on a host-owned value.
    fn call_method(
        &mut self,
        obj: &Value,
        name: &str,
        _args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> EvalResult<Value> {
        Err(EvalError::no_attr(obj, name))
    }

    /// Symmetric ids currently reachable from the state, per domain.
    fn symmetric_ids(&self) -> BTreeMap<Arc<str>, BTreeSet<i64>>;

    fn symmetry(&mut self) -> &mut SymmetryContext;

    fn print(&mut self, text: &str) {
        println!("{}", text);
    }
}

/// Collects the ids of symmetric values reachable from `values`.
pub fn collect_symmetric_ids<'a>(
    values: impl IntoIterator<Item = &'a Value>,
    out: &mut BTreeMap<Arc<str>, BTreeSet<i64>>,
) {
    for value in values {
        value.visit(&mut |v| {
            if let Value::Symmetric(s) = v {
                out.entry(s.domain.clone()).or_default().insert(s.id);
            }
        });
    }
}

/// A flat variable environment.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub vars: BTreeMap<String, Value>,
    symmetry: SymmetryContext,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vars(vars: BTreeMap<String, Value>) -> Self {
        Self {
            vars,
            symmetry: SymmetryContext::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

impl Host for Env {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    fn assign(&mut self, name: &str, value: Value) -> EvalResult<()> {
        self.vars.insert(name.to_string(), value);
        Ok(())
    }

    fn symmetric_ids(&self) -> BTreeMap<Arc<str>, BTreeSet<i64>> {
        let mut out = BTreeMap::new();
        collect_symmetric_ids(self.vars.values(), &mut out);
        out
    }

    fn symmetry(&mut self) -> &mut SymmetryContext {
        &mut self.symmetry
    }
}

thread_local! {
    static EXPR_CACHE: RefCell<AHashMap<String, Rc<Expr>>> = RefCell::new(AHashMap::new());
    static PROGRAM_CACHE: RefCell<AHashMap<String, Rc<Vec<Stmt>>>> = RefCell::new(AHashMap::new());
}

fn cached_expr(source: &str) -> EvalResult<Rc<Expr>> {
    if let Some(hit) = EXPR_CACHE.with(|c| c.borrow().get(source).cloned()) {
        return Ok(hit);
    }
    tracing::trace!(source, "parsing expression");
    let parsed = Rc::new(parse_expr(source)?);
    EXPR_CACHE.with(|c| c.borrow_mut().insert(source.to_string(), parsed.clone()));
    Ok(parsed)
}

fn cached_program(source: &str) -> EvalResult<Rc<Vec<Stmt>>> {
    if let Some(hit) = PROGRAM_CACHE.with(|c| c.borrow().get(source).cloned()) {
        return Ok(hit);
    }
    tracing::trace!(source, "parsing statements");
    let parsed = Rc::new(parse_program(source)?);
    PROGRAM_CACHE.with(|c| c.borrow_mut().insert(source.to_string(), parsed.clone()));
    Ok(parsed)
}

/// Evaluate an expression source string.
pub fn eval(source: &str, host: &mut dyn Host) -> EvalResult<Value> {
    let expr = cached_expr(source)?;
    Interpreter::new(host).eval_expr(&expr)
}

/// Evaluate an expression and take its truth value.
pub fn eval_bool(source: &str, host: &mut dyn Host) -> EvalResult<bool> {
    Ok(eval(source, host)?.truth())
}

/// Execute a block of simple statements.
pub fn exec(source: &str, host: &mut dyn Host) -> EvalResult<()> {
    let program = cached_program(source)?;
    let mut interp = Interpreter::new(host);
    for stmt in program.iter() {
        interp.exec_stmt(stmt)?;
    }
    Ok(())
}

enum CompBody<'e> {
    Elt(&'e Expr),
    Pair(&'e Expr, &'e Expr),
}

pub struct Interpreter<'h> {
    host: &'h mut dyn Host,
    /// Comprehension bindings, innermost last.
    locals: Vec<(String, Value)>,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h mut dyn Host) -> Self {
        Self {
            host,
            locals: Vec::new(),
        }
    }

    pub fn exec_stmt(&mut self, stmt: &Stmt) -> EvalResult<()> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval_expr(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval_expr(value)?;
                for target in targets {
                    self.store(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval_expr(target)?;
                let rhs = self.eval_expr(value)?;
                let updated = ops::binary(*op, &current, &rhs)?;
                self.store(target, updated)?;
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Pass => {}
            StmtKind::Assert { test, msg } => {
                if !self.eval_expr(test)?.truth() {
                    let message = match msg {
                        Some(m) => display_str(&self.eval_expr(m)?),
                        None => format!("assertion at {}", test.span),
                    };
                    return Err(EvalError::AssertionFailed(message));
                }
            }
            StmtKind::If { cond, body, orelse } => {
                let branch = if self.eval_expr(cond)?.truth() {
                    body
                } else {
                    orelse
                };
                for s in branch {
                    self.exec_stmt(s)?;
                }
            }
        }
        Ok(())
    }

    pub fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        match &expr.kind {
            ExprKind::Literal(v) => Ok(v.clone()),
            ExprKind::Name(name) => self.lookup(name),
            ExprKind::List(items) => Ok(Value::list(self.eval_items(items)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_items(items)?)),
            ExprKind::Set(items) => {
                let items = self.eval_items(items)?;
                ops::make_set(items)
            }
            ExprKind::Dict(entries) => {
                let mut pairs = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    pairs.push((self.eval_expr(k)?, self.eval_expr(v)?));
                }
                ops::make_dict(pairs)
            }
            ExprKind::ListComp { elt, clauses } => {
                let mut out = Vec::new();
                self.comprehend(clauses, &CompBody::Elt(elt), &mut out)?;
                Ok(Value::list(out))
            }
            ExprKind::SetComp { elt, clauses } => {
                let mut out = Vec::new();
                self.comprehend(clauses, &CompBody::Elt(elt), &mut out)?;
                ops::make_set(out)
            }
            ExprKind::DictComp {
                key,
                value,
                clauses,
            } => {
                let mut out = Vec::new();
                self.comprehend(clauses, &CompBody::Pair(key, value), &mut out)?;
                let pairs = out
                    .into_iter()
                    .map(|pair| match pair {
                        Value::Tuple(kv) if kv.len() == 2 => Ok((kv[0].clone(), kv[1].clone())),
                        other => Err(EvalError::Internal(format!("bad dict entry {}", other))),
                    })
                    .collect::<EvalResult<Vec<_>>>()?;
                ops::make_dict(pairs)
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval_expr(operand)?;
                ops::unary(*op, &v)
            }
            ExprKind::Binary { op, left, right } => match op {
                BinOp::And => {
                    let l = self.eval_expr(left)?;
                    if !l.truth() {
                        return Ok(l);
                    }
                    self.eval_expr(right)
                }
                BinOp::Or => {
                    let l = self.eval_expr(left)?;
                    if l.truth() {
                        return Ok(l);
                    }
                    self.eval_expr(right)
                }
                _ => {
                    let l = self.eval_expr(left)?;
                    let r = self.eval_expr(right)?;
                    ops::binary(*op, &l, &r)
                }
            },
            ExprKind::Compare { first, rest } => {
                let mut left = self.eval_expr(first)?;
                for (op, right_expr) in rest {
                    let right = self.eval_expr(right_expr)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_expr(cond)?.truth() {
                    self.eval_expr(then)
                } else {
                    self.eval_expr(otherwise)
                }
            }
            ExprKind::Attribute { value, name } => {
                let obj = self.eval_expr(value)?;
                self.get_attr(&obj, name)
            }
            ExprKind::Subscript { value, index } => {
                let obj = self.eval_expr(value)?;
                let idx = self.eval_expr(index)?;
                ops::get_item(&obj, &idx)
            }
            ExprKind::Slice {
                value,
                lower,
                upper,
                step,
            } => {
                let obj = self.eval_expr(value)?;
                let lower = self.eval_opt_int(lower.as_deref())?;
                let upper = self.eval_opt_int(upper.as_deref())?;
                let step = self.eval_opt_int(step.as_deref())?;
                ops::slice(&obj, lower, upper, step)
            }
            ExprKind::Call { func, args } => self.eval_call(func, args),
        }
    }

    fn eval_items(&mut self, items: &[Expr]) -> EvalResult<Vec<Value>> {
        items.iter().map(|e| self.eval_expr(e)).collect()
    }

    fn eval_opt_int(&mut self, expr: Option<&Expr>) -> EvalResult<Option<i64>> {
        match expr {
            None => Ok(None),
            Some(e) => match self.eval_expr(e)? {
                Value::None => Ok(None),
                v => v
                    .as_int()
                    .map(Some)
                    .ok_or_else(|| EvalError::type_error("slice indices must be integers")),
            },
        }
    }

    fn lookup(&self, name: &str) -> EvalResult<Value> {
        if let Some((_, v)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.host.lookup(name) {
            return Ok(v);
        }
        builtins::lookup(name).ok_or_else(|| EvalError::UndefinedName(name.to_string()))
    }

    fn get_attr(&self, obj: &Value, name: &str) -> EvalResult<Value> {
        match obj {
            Value::Record(r) => r
                .fields
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::no_attr(obj, name)),
            Value::Domain(d) => d.attr(name).ok_or_else(|| EvalError::no_attr(obj, name)),
            Value::Module(module) => builtins::module_attr(module, name)
                .map(Value::Builtin)
                .ok_or_else(|| EvalError::no_attr(obj, name)),
            Value::Role(_) | Value::Channel(_) | Value::RoleStub(_) => self.host.get_attr(obj, name),
            _ => Err(EvalError::no_attr(obj, name)),
        }
    }

    fn eval_args(&mut self, args: &[Arg]) -> EvalResult<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        for arg in args {
            match arg {
                Arg::Positional(e) => positional.push(self.eval_expr(e)?),
                Arg::Keyword(name, e) => keywords.push((name.clone(), self.eval_expr(e)?)),
                Arg::Star(e) => {
                    let v = self.eval_expr(e)?;
                    positional.extend(ops::iterate(&v)?);
                }
            }
        }
        Ok((positional, keywords))
    }

    fn eval_call(&mut self, func: &Expr, args: &[Arg]) -> EvalResult<Value> {
        if let ExprKind::Attribute { value, name } = &func.kind {
            let mut recv = self.eval_expr(value)?;
            let (positional, keywords) = self.eval_args(args)?;
            if let Value::Module(module) = recv {
                let f = builtins::module_attr(module, name)
                    .ok_or_else(|| EvalError::no_attr(&recv, name))?;
                return builtins::call(&mut *self.host, f, positional, keywords);
            }
            if let Value::Domain(domain) = &recv {
                let domain = domain.clone();
                if !positional.is_empty() || !keywords.is_empty() {
                    return Err(EvalError::InvalidArgument(format!(
                        "{}.{}() takes no arguments",
                        domain.name, name
                    )));
                }
                self.load_symmetry();
                return self.host.symmetry().call(&domain, name);
            }
            if matches!(recv, Value::Role(_) | Value::Channel(_) | Value::RoleStub(_)) {
                return self.host.call_method(&recv, name, positional, keywords);
            }
            if let Value::Record(r) = &recv {
                if let Some(f) = r.fields.get(name.as_str()).cloned() {
                    return self.call_value(&f, positional, keywords);
                }
            }
            let (result, mutated) = methods::call_method(&mut recv, name, positional, &keywords)?;
            if mutated && is_place(value) {
                self.store(value, recv)?;
            }
            return Ok(result);
        }

        let f = self.eval_expr(func)?;
        let (positional, keywords) = self.eval_args(args)?;
        self.call_value(&f, positional, keywords)
    }

    fn call_value(
        &mut self,
        f: &Value,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> EvalResult<Value> {
        match f {
            Value::Builtin(name) => builtins::call(&mut *self.host, name, positional, keywords),
            _ => self.host.call(f, positional, keywords),
        }
    }

    fn load_symmetry(&mut self) {
        if !self.host.symmetry().is_loaded() {
            let used = self.host.symmetric_ids();
            self.host.symmetry().load(used);
        }
    }

    fn comprehend(
        &mut self,
        clauses: &[CompClause],
        body: &CompBody<'_>,
        out: &mut Vec<Value>,
    ) -> EvalResult<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            out.push(match body {
                CompBody::Elt(e) => self.eval_expr(e)?,
                CompBody::Pair(k, v) => Value::tuple(vec![self.eval_expr(k)?, self.eval_expr(v)?]),
            });
            return Ok(());
        };

        let iterable = self.eval_expr(&clause.iter)?;
        for item in ops::iterate(&iterable)? {
            let mark = self.locals.len();
            let result = self.comprehend_one(clause, rest, body, item, out);
            self.locals.truncate(mark);
            result?;
        }
        Ok(())
    }

    fn comprehend_one(
        &mut self,
        clause: &CompClause,
        rest: &[CompClause],
        body: &CompBody<'_>,
        item: Value,
        out: &mut Vec<Value>,
    ) -> EvalResult<()> {
        self.bind_local(&clause.target, item)?;
        for cond in &clause.conds {
            if !self.eval_expr(cond)?.truth() {
                return Ok(());
            }
        }
        self.comprehend(rest, body, out)
    }

    fn bind_local(&mut self, target: &Expr, value: Value) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.locals.push((name.clone(), value));
                Ok(())
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let values = unpack(value, items.len())?;
                for (t, v) in items.iter().zip(values) {
                    self.bind_local(t, v)?;
                }
                Ok(())
            }
            _ => Err(EvalError::type_error("invalid comprehension target")),
        }
    }

    /// Assign `value` to a place expression, writing modified containers
    /// back up the chain.
    pub fn store(&mut self, target: &Expr, value: Value) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if let Some(slot) = self.locals.iter_mut().rev().find(|(n, _)| n == name) {
                    slot.1 = value;
                    return Ok(());
                }
                self.host.assign(name, value)
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let values = unpack(value, items.len())?;
                for (t, v) in items.iter().zip(values) {
                    self.store(t, v)?;
                }
                Ok(())
            }
            ExprKind::Attribute { value: obj_expr, name } => {
                let obj = self.eval_expr(obj_expr)?;
                match obj {
                    Value::Record(mut record) => {
                        if record.kind != RecordKind::Record {
                            return Err(EvalError::ImmutableField {
                                type_name: Value::Record(record).type_name().to_string(),
                                field: name.clone(),
                            });
                        }
                        Arc::make_mut(&mut record).fields.insert(name.clone(), value);
                        self.store(obj_expr, Value::Record(record))
                    }
                    Value::Role(_) | Value::Channel(_) | Value::RoleStub(_) => {
                        self.host.set_attr(&obj, name, value)
                    }
                    other => Err(EvalError::no_attr(&other, name)),
                }
            }
            ExprKind::Subscript { value: obj_expr, index } => {
                let mut obj = self.eval_expr(obj_expr)?;
                let idx = self.eval_expr(index)?;
                ops::set_item(&mut obj, idx, value)?;
                self.store(obj_expr, obj)
            }
            _ => Err(EvalError::type_error("cannot assign to expression")),
        }
    }

    fn delete(&mut self, target: &Expr) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Subscript { value: obj_expr, index } => {
                let mut obj = self.eval_expr(obj_expr)?;
                let idx = self.eval_expr(index)?;
                ops::del_item(&mut obj, &idx)?;
                self.store(obj_expr, obj)
            }
            _ => Err(EvalError::type_error("del supports only subscripts")),
        }
    }
}

fn is_place(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Name(_) => true,
        ExprKind::Attribute { value, .. } | ExprKind::Subscript { value, .. } => is_place(value),
        _ => false,
    }
}

fn unpack(value: Value, n: usize) -> EvalResult<Vec<Value>> {
    let values = ops::iterate(&value)?;
    if values.len() != n {
        return Err(EvalError::InvalidArgument(format!(
            "cannot unpack {} values into {} targets",
            values.len(),
            n
        )));
    }
    Ok(values)
}

/// `str(v)`: strings print without quotes.
pub fn display_str(v: &Value) -> String {
    match v {
        Value::Str(s) => s.to_string(),
        other => other.to_string(),
    }
}
