//! Statement-level execution of one thread.
//!
//! An [`Executor`] takes the current thread out of a process, runs it until
//! it yields, finishes, or reaches a non-deterministic choice, and puts it
//! back. Choices come back as forked processes in [`Step::forks`]; the
//! caller turns each one into a child state.

use crate::error::{ModelError, ModelResult};
use crate::frame::{CallFrame, Scope, Thread};
use crate::model::Model;
use crate::process::{Process, ProcessHost};
use crate::role::Message;
use fizz_ast::{
    end_of_block, next_stmt_path, parent_block_path, remove_last_block, remove_last_for_stmt,
    remove_last_loop, remove_last_segment, remove_last_while_stmt, resolve, AnyStmt, AstNode,
    Block, CallStmt, File, Flow, IfStmt, ReturnStmt, Statement, StmtKind,
    WhileStmt,
};
use fizz_eval::{display_str, EvalError, Host, RoleRef, Value};
use std::collections::BTreeMap;
use tracing::trace;

/// Outcome of running a thread.
#[derive(Debug, Default)]
pub struct Step {
    /// Alternative continuations. When non-empty, the executing process
    /// itself is not continued.
    pub forks: Vec<Process>,
    /// The thread reached a point where other threads may interleave.
    pub yielded: bool,
}

impl Step {
    fn yielded(yielded: bool) -> Self {
        Step {
            forks: Vec::new(),
            yielded,
        }
    }

    fn forked(forks: Vec<Process>, yielded: bool) -> Self {
        Step { forks, yielded }
    }
}

enum Callee<'m> {
    Function {
        file_index: usize,
        path: String,
        function: &'m fizz_ast::Function,
        obj: Option<RoleRef>,
    },
    Host,
}

pub struct Executor<'a> {
    model: &'a Model,
    process: &'a mut Process,
    thread: Thread,
    index: usize,
}

/// Runs the current thread of `process` until it yields, forks or ends.
/// A thread whose stack empties is removed.
pub fn run(model: &Model, process: &mut Process) -> ModelResult<Step> {
    let mut exec = Executor::new(model, process)?;
    let result = exec.execute();
    exec.finish();
    result
}

/// Runs the current thread to completion, resuming across yields. Used for
/// assertion blocks, which may not fork.
pub fn run_to_completion(model: &Model, process: &mut Process) -> ModelResult<()> {
    let index = process.current;
    let depth = process.threads.len();
    loop {
        let step = run(model, process)?;
        if !step.forks.is_empty() {
            return Err(ModelError::unsupported(
                "",
                "non-deterministic choice inside an assertion",
            ));
        }
        if process.threads.len() < depth {
            return Ok(());
        }
        process.current = index;
    }
}

/// Executes the top-level statements of the main file and returns the
/// variables they define. These become the frozen globals.
pub fn run_preinit(model: &Model, process: &mut Process) -> ModelResult<BTreeMap<String, Value>> {
    let mut frame = CallFrame::new(0, "Stmts[0]", "toplevel");
    frame.push_scope(Flow::Atomic);
    process.new_thread(frame);
    let mut exec = Executor::new(model, process)?;
    for (i, stmt) in model.main().stmts.iter().enumerate() {
        let pc = format!("Stmts[{}]", i);
        if !matches!(stmt.kind(), Some(StmtKind::Py(_)) | Some(StmtKind::Call(_)) | None) {
            return Err(ModelError::unsupported(
                &pc,
                "only simple statements are allowed at the top level",
            ));
        }
        exec.frame_mut()?.pc = pc.clone();
        let step = exec.execute_statement(stmt, &pc)?;
        if !step.forks.is_empty() || step.yielded {
            return Err(ModelError::unsupported(&pc, "top-level statements must be deterministic"));
        }
    }
    let globals = exec.frame()?.visible_vars();
    exec.process.current = 0;
    Ok(globals)
}

impl<'a> Executor<'a> {
    pub fn new(model: &'a Model, process: &'a mut Process) -> ModelResult<Self> {
        let index = process.current;
        if index >= process.threads.len() {
            return Err(ModelError::Internal(format!(
                "no thread {} in process '{}'",
                index, process.name
            )));
        }
        let thread = process.threads.remove(index);
        process.invalidate_key();
        Ok(Self {
            model,
            process,
            thread,
            index,
        })
    }

    /// Puts the thread back in its slot, or drops it when it has ended.
    pub fn finish(self) {
        if self.thread.stack.is_empty() {
            self.process.current = 0;
        } else {
            self.process.threads.insert(self.index, self.thread);
            self.process.current = self.index;
        }
        self.process.invalidate_key();
    }

    fn frame(&self) -> ModelResult<&CallFrame> {
        self.thread
            .stack
            .last()
            .ok_or_else(|| ModelError::Internal("thread has no frames".into()))
    }

    fn frame_mut(&mut self) -> ModelResult<&mut CallFrame> {
        self.thread
            .stack
            .last_mut()
            .ok_or_else(|| ModelError::Internal("thread has no frames".into()))
    }

    fn pc(&self) -> String {
        self.thread.current_pc().to_string()
    }

    fn set_pc(&mut self, pc: String) -> ModelResult<()> {
        self.frame_mut()?.pc = pc;
        Ok(())
    }

    fn file(&self) -> ModelResult<&'a File> {
        let fi = self.frame()?.file_index;
        self.model.file(fi)
    }

    fn at_end_of_block(&self) -> bool {
        match self.thread.stack.last() {
            Some(frame) => frame.pc.is_empty() || frame.pc.ends_with(".Block.$"),
            None => false,
        }
    }

    /// A copy of the process where this thread continues after `edit`.
    fn fork_with(&self, name: String, edit: impl FnOnce(&mut CallFrame)) -> Process {
        let mut thread = self.thread.clone();
        if let Some(frame) = thread.top_mut() {
            edit(frame);
        }
        let mut process = self.process.fork();
        process.threads.insert(self.index, thread);
        process.current = self.index;
        process.name = name;
        process
    }

    fn host(&mut self) -> ProcessHost<'_> {
        self.process.symmetry.reset();
        ProcessHost::new(self.model, self.process, Some(&mut self.thread))
    }

    fn eval(&mut self, code: &str) -> ModelResult<Value> {
        let pc = self.pc();
        fizz_eval::eval(code, &mut self.host()).map_err(|e| context(&pc, code, e))
    }

    fn eval_bool(&mut self, code: &str) -> ModelResult<bool> {
        Ok(self.eval(code)?.truth())
    }

    fn exec(&mut self, code: &str) -> ModelResult<()> {
        let pc = self.pc();
        fizz_eval::exec(code, &mut self.host()).map_err(|e| context(&pc, code, e))
    }

    fn assign(&mut self, name: &str, value: Value) -> ModelResult<()> {
        let pc = self.pc();
        self.host()
            .assign(name, value)
            .map_err(|e| context(&pc, name, e))
    }

    fn iterate(&mut self, code: &str) -> ModelResult<Vec<Value>> {
        let value = self.eval(code)?;
        value.iterate().ok_or_else(|| {
            context(
                &self.pc(),
                code,
                EvalError::type_error(format!("'{}' object is not iterable", value.type_name())),
            )
        })
    }

    pub fn execute(&mut self) -> ModelResult<Step> {
        while !self.thread.stack.is_empty() {
            while self.at_end_of_block() {
                let step = self.end_of_block()?;
                if !step.forks.is_empty() || step.yielded {
                    return Ok(step);
                }
            }
            if self.thread.stack.is_empty() {
                break;
            }

            let pc = self.pc();
            let file = self.file()?;
            let step = match resolve(file, &pc)? {
                AstNode::Action(action) => {
                    self.thread.fairness = action.fairness.level;
                    self.process.fairness = action.fairness.level;
                    self.set_pc(format!("{}.Block", pc))?;
                    Step::default()
                }
                AstNode::Invariant(_) => {
                    self.set_pc(format!("{}.Block", pc))?;
                    Step::default()
                }
                AstNode::Block(block) => self.execute_block(block, &pc)?,
                AstNode::Statement(stmt) => self.execute_statement(stmt, &pc)?,
                AstNode::ForStmt(_) => self.execute_for(&pc)?,
                AstNode::WhileStmt(stmt) => self.execute_while(stmt, &pc)?,
                other => {
                    return Err(ModelError::unsupported(
                        &pc,
                        format!("cannot execute a {}", other.kind_name()),
                    ))
                }
            };
            if !step.forks.is_empty() {
                return Ok(step);
            }
            if step.yielded {
                // advance past finished blocks so the yielded state is canonical
                let mut forks = Vec::new();
                while forks.is_empty() && self.at_end_of_block() {
                    forks = self.end_of_block()?.forks;
                }
                return Ok(Step::forked(forks, true));
            }
        }
        Ok(Step::yielded(true))
    }

    fn execute_block(&mut self, block: &Block, pc: &str) -> ModelResult<Step> {
        let frame = self.frame_mut()?;
        let flow = frame.push_scope(block.flow).flow;
        if block.stmts.is_empty() {
            frame.pc = format!("{}.$", pc);
            return Ok(Step::default());
        }
        match flow {
            Flow::Oneof | Flow::Parallel => {
                let parallel = flow == Flow::Parallel;
                let forks = (0..block.stmts.len())
                    .map(|i| {
                        let mut fork = self.fork_with(format!("Stmt:{}", i), |frame| {
                            frame.pc = format!("{}.Stmts[{}]", pc, i);
                            if parallel {
                                if let Some(scope) = frame.scopes.last_mut() {
                                    scope.skip_stmts.insert(i);
                                }
                            }
                        });
                        // a oneof branch is as fair as the action choosing it
                        if !parallel {
                            fork.choice_fairness = self.thread.fairness;
                        }
                        fork
                    })
                    .collect();
                Ok(Step::forked(forks, false))
            }
            _ => {
                frame.pc = format!("{}.Stmts[0]", pc);
                Ok(Step::default())
            }
        }
    }

    fn execute_statement(&mut self, stmt: &Statement, pc: &str) -> ModelResult<Step> {
        if !stmt.label.is_empty() {
            let label = format!("{}.{}", self.frame()?.name, stmt.label);
            self.process.labels.push(label);
        }
        self.process.fairness = self.thread.fairness;
        let roles_before = self.process.roles.len();

        match stmt.kind() {
            None => {}
            Some(StmtKind::Py(py)) => {
                self.exec(&py.code)?;
                self.process.enable();
            }
            Some(StmtKind::Block(block)) => {
                let path = format!("{}.Block", pc);
                self.set_pc(path.clone())?;
                let step = self.execute_block(block, &path)?;
                return Ok(Step::forked(step.forks, false));
            }
            Some(StmtKind::If(s)) => {
                if self.execute_if(s, pc)? {
                    return Ok(Step::default());
                }
            }
            Some(StmtKind::Any(s)) => {
                let forks = self.execute_any(s, pc)?;
                if !forks.is_empty() {
                    return Ok(Step::forked(forks, false));
                }
            }
            Some(StmtKind::For(s)) => {
                if s.flow == Flow::Oneof {
                    return Err(ModelError::unsupported(pc, "oneof flow in a for loop"));
                }
                let items = self.iterate(&s.py_expr)?;
                let frame = self.frame_mut()?;
                let scope = frame.push_scope(s.flow);
                scope.loop_vars = s.loop_vars.clone();
                scope.loop_range = items;
                frame.pc = format!("{}.ForStmt", pc);
                return Ok(Step::default());
            }
            Some(StmtKind::While(s)) => {
                if matches!(s.flow, Flow::Oneof | Flow::Parallel) {
                    return Err(ModelError::unsupported(
                        pc,
                        format!("{} flow in a while loop", s.flow.as_str()),
                    ));
                }
                let frame = self.frame_mut()?;
                frame.push_scope(s.flow);
                frame.pc = format!("{}.WhileStmt", pc);
                return Ok(Step::default());
            }
            Some(StmtKind::Break) => return self.execute_break(pc),
            Some(StmtKind::Continue) => return self.execute_continue(pc),
            Some(StmtKind::Return(s)) => return self.execute_return(s),
            Some(StmtKind::Call(s)) => {
                if self.execute_call(s, pc)? {
                    return Ok(Step::default());
                }
            }
            Some(StmtKind::Require(s)) => {
                if !self.eval_bool(&s.condition)? {
                    return Err(ModelError::eval(
                        pc,
                        EvalError::DisableTransition(format!("require {}", s.condition)),
                    ));
                }
            }
        }

        if self.process.roles.len() > roles_before && self.enter_role_init(roles_before, pc)? {
            return Ok(Step::default());
        }
        self.end_of_statement()
    }

    /// Moves into the first branch whose condition holds. Returns false
    /// when none does.
    fn execute_if(&mut self, stmt: &IfStmt, pc: &str) -> ModelResult<bool> {
        for (i, branch) in stmt.branches.iter().enumerate() {
            let taken = branch.condition.is_empty() || self.eval_bool(&branch.condition)?;
            if taken {
                self.set_pc(format!("{}.IfStmt.Branches[{}].Block", pc, i))?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// One fork per element satisfying the optional condition. With no
    /// candidates the choice scope is dropped and the statement is a no-op.
    fn execute_any(&mut self, stmt: &AnyStmt, pc: &str) -> ModelResult<Vec<Process>> {
        let items = self.iterate(&stmt.py_expr)?;
        self.frame_mut()?.push_scope(stmt.flow);
        let mut forks = Vec::new();
        for item in items {
            let bindings = bind_loop_vars(&stmt.loop_vars, &item).map_err(|e| context(pc, &stmt.py_expr, e))?;
            if !stmt.condition.is_empty() {
                let scope = self.scope_mut()?;
                scope.vars.extend(bindings.iter().cloned());
                if !self.eval_bool(&stmt.condition)? {
                    continue;
                }
            }
            let mut fork = self.fork_with(format!("Any:{}", display_str(&item)), |frame| {
                frame.pc = format!("{}.AnyStmt.Block", pc);
                if let Some(scope) = frame.scopes.last_mut() {
                    scope.vars.extend(bindings);
                }
            });
            fork.choice_fairness = stmt.fairness.level;
            forks.push(fork);
        }
        if forks.is_empty() {
            self.frame_mut()?.scopes.pop();
        }
        Ok(forks)
    }

    fn scope_mut(&mut self) -> ModelResult<&mut Scope> {
        self.frame_mut()?
            .scopes
            .last_mut()
            .ok_or_else(|| ModelError::Internal("frame has no scopes".into()))
    }

    fn execute_for(&mut self, pc: &str) -> ModelResult<Step> {
        let scope = self.scope_mut()?;
        if scope.loop_range.is_empty() {
            let frame = self.frame_mut()?;
            frame.scopes.pop();
            frame.pc = remove_last_for_stmt(pc);
            return self.end_of_statement();
        }
        let flow = scope.flow;
        let vars = scope.loop_vars.clone();
        let range = scope.loop_range.clone();
        let body = format!("{}.Block", pc);

        if flow != Flow::Parallel {
            let bindings = bind_loop_vars(&vars, &range[0]).map_err(|e| context(pc, "for", e))?;
            let scope = self.scope_mut()?;
            scope.loop_range.remove(0);
            scope.vars.extend(bindings);
            self.set_pc(body)?;
            return Ok(Step::default());
        }

        let mut forks = Vec::with_capacity(range.len());
        for (i, item) in range.iter().enumerate() {
            let bindings = bind_loop_vars(&vars, item).map_err(|e| context(pc, "for", e))?;
            forks.push(self.fork_with(format!("For:{}", display_str(item)), |frame| {
                frame.pc = body.clone();
                if let Some(scope) = frame.scopes.last_mut() {
                    scope.loop_range.remove(i);
                    scope.vars.extend(bindings);
                }
            }));
        }
        Ok(Step::forked(forks, false))
    }

    fn execute_while(&mut self, stmt: &WhileStmt, pc: &str) -> ModelResult<Step> {
        if self.eval_bool(&stmt.py_expr)? {
            self.set_pc(format!("{}.Block", pc))?;
            return Ok(Step::default());
        }
        let frame = self.frame_mut()?;
        frame.scopes.pop();
        frame.pc = remove_last_while_stmt(pc);
        self.end_of_statement()
    }

    fn execute_break(&mut self, pc: &str) -> ModelResult<Step> {
        let frame = self.frame_mut()?;
        while !(frame.pc.ends_with(".ForStmt") || frame.pc.ends_with(".WhileStmt")) {
            frame.pc = remove_last_block(&frame.pc);
            if frame.pc.is_empty() {
                return Err(ModelError::unsupported(pc, "break outside a loop"));
            }
            frame.scopes.pop();
        }
        frame.scopes.pop();
        frame.pc = remove_last_loop(&frame.pc);
        self.end_of_statement()
    }

    fn execute_continue(&mut self, pc: &str) -> ModelResult<Step> {
        let frame = self.frame_mut()?;
        loop {
            frame.pc = remove_last_block(&frame.pc);
            if frame.pc.is_empty() {
                return Err(ModelError::unsupported(pc, "continue outside a loop"));
            }
            if frame.pc.ends_with(".ForStmt") || frame.pc.ends_with(".WhileStmt") {
                break;
            }
            frame.scopes.pop();
        }
        frame.pc.push_str(".Block.$");
        Ok(Step::default())
    }

    fn execute_return(&mut self, stmt: &ReturnStmt) -> ModelResult<Step> {
        let value = if stmt.py_expr.is_empty() {
            Value::None
        } else {
            self.eval(&stmt.py_expr)?
        };
        let old = self
            .thread
            .stack
            .pop()
            .ok_or_else(|| ModelError::Internal("return without a frame".into()))?;
        self.frame_finished(&old, None)?;

        if self.thread.stack.is_empty() {
            if !value.is_none() {
                let name = self.returns_key(&old)?;
                self.process.returns.insert(name, value);
                self.process.enable();
            }
            return Ok(Step::yielded(true));
        }

        self.record_return(&old, &value)?;
        self.assign_caller(&old, value)?;
        self.end_of_statement()
    }

    fn returns_key(&self, frame: &CallFrame) -> ModelResult<String> {
        let file = self.model.file(frame.file_index)?;
        Ok(match resolve(file, frame.root_path()) {
            Ok(AstNode::Action(a)) => a.name.clone(),
            Ok(AstNode::Invariant(i)) => i.name.clone(),
            _ => frame.name.clone(),
        })
    }

    fn assign_caller(&mut self, callee: &CallFrame, value: Value) -> ModelResult<()> {
        if callee.caller_assign.len() > 1 {
            return Err(ModelError::unsupported(
                &callee.pc,
                "a call result can be assigned to one variable only",
            ));
        }
        for name in &callee.caller_assign {
            self.assign(name, value.clone())?;
            self.process.enable();
        }
        Ok(())
    }

    /// Starts a user function call. Returns false when the call was handled
    /// inline as an expression.
    fn execute_call(&mut self, call: &CallStmt, pc: &str) -> ModelResult<bool> {
        let (file_index, path, function, obj) = match self.resolve_callee(call)? {
            Callee::Function {
                file_index,
                path,
                function,
                obj,
            } => (file_index, path, function, obj),
            Callee::Host => {
                self.exec(&synthesize_call(call))?;
                self.process.enable();
                return Ok(false);
            }
        };

        let mut frame = CallFrame::new(file_index, format!("{}.Block", path), call.name.clone());
        frame.obj = obj;
        frame.caller_assign = call.vars.clone();

        let mut named = false;
        for (i, arg) in call.args.iter().enumerate() {
            let name = if arg.name.is_empty() {
                if named {
                    return Err(ModelError::unsupported(
                        pc,
                        "positional argument follows keyword argument",
                    ));
                }
                function
                    .params
                    .get(i)
                    .map(|p| p.name.clone())
                    .ok_or_else(|| {
                        ModelError::unsupported(
                            pc,
                            format!("too many arguments in call to {}", call.name),
                        )
                    })?
            } else {
                named = true;
                arg.name.clone()
            };
            let value = self.eval(&arg.py_expr)?;
            frame.args.insert(name, value);
        }
        for param in &function.params {
            if frame.args.contains_key(&param.name) {
                continue;
            }
            if param.default_py_expr.is_empty() {
                return Err(ModelError::MissingArgument {
                    function: call.name.clone(),
                    param: param.name.clone(),
                });
            }
            let value = self.eval(&param.default_py_expr)?;
            frame.args.insert(param.name.clone(), value);
        }

        self.process.labels.push(format!("{}.call", frame.name));
        self.record_call(&frame)?;
        trace!(function = %frame.name, "call");
        self.thread.stack.push(frame);
        Ok(true)
    }

    fn resolve_callee(&mut self, call: &CallStmt) -> ModelResult<Callee<'a>> {
        let model = self.model;
        let lookup = |name: &str, obj: Option<RoleRef>| {
            model.function(name).map(|(fref, function)| Callee::Function {
                file_index: fref.file_index,
                path: fref.path.clone(),
                function,
                obj,
            })
        };
        if !call.receiver.is_empty() {
            return Ok(match self.eval(&call.receiver)? {
                Value::Role(r) => {
                    let name = format!("{}.{}", r.name, call.name);
                    lookup(&name, Some(r)).unwrap_or(Callee::Host)
                }
                _ => Callee::Host,
            });
        }
        if let Some(callee) = lookup(&call.name, None) {
            return Ok(callee);
        }
        if let Some(obj) = self.frame()?.obj.clone() {
            if let Some(callee) = lookup(&format!("{}.{}", obj.name, call.name), Some(obj)) {
                return Ok(callee);
            }
        }
        Ok(Callee::Host)
    }

    /// A role was created by the last statement: run its `Init` action
    /// before continuing. Returns true when an init frame was pushed.
    fn enter_role_init(&mut self, roles_before: usize, pc: &str) -> ModelResult<bool> {
        if self.process.roles.len() > roles_before + 1 {
            return Err(ModelError::unsupported(
                pc,
                "a statement may create at most one role",
            ));
        }
        let Some(rref) = self.process.roles.last().map(|r| r.rref.clone()) else {
            return Ok(false);
        };
        let Some(decl) = self.model.role(&rref.name) else {
            return Ok(false);
        };
        let Some(init) = decl.role.init_action() else {
            return Ok(false);
        };
        let mut frame = CallFrame::new(
            decl.file_index,
            format!("{}.Actions[{}].Block", decl.path(), init),
            "Init",
        );
        frame.obj = Some(rref);
        self.thread.stack.push(frame);
        Ok(true)
    }

    fn end_of_statement(&mut self) -> ModelResult<Step> {
        let enabled = self.process.enabled;
        let file = self.file()?;
        let frame = self.frame_mut()?;
        let flow = frame.flow();
        if frame.pc.ends_with(".AnyStmt") {
            // leaving an `any` body: its choice scope goes, its flow decides
            frame.scopes.pop();
            frame.pc = remove_last_segment(&frame.pc, ".AnyStmt");
        }

        match flow {
            Flow::Oneof => {
                frame.pc = end_of_block(&frame.pc);
                Ok(Step::default())
            }
            Flow::Parallel => {
                if frame.pc.ends_with(".ForStmt") {
                    return Ok(Step::yielded(enabled));
                }
                let block_path = parent_block_path(&frame.pc);
                let AstNode::Block(block) = resolve(file, &block_path)? else {
                    return Err(ModelError::Internal(format!("{} is not a block", block_path)));
                };
                let skip = frame
                    .scopes
                    .last()
                    .map(|s| s.skip_stmts.clone())
                    .unwrap_or_default();
                if skip.len() >= block.stmts.len() {
                    frame.pc = end_of_block(&frame.pc);
                    return Ok(Step::default());
                }
                frame.pc = String::new();
                let forks = (0..block.stmts.len())
                    .filter(|i| !skip.contains(i))
                    .map(|i| {
                        self.fork_with(format!("Stmt:{}", i), |frame| {
                            frame.pc = format!("{}.Stmts[{}]", block_path, i);
                            if let Some(scope) = frame.scopes.last_mut() {
                                scope.skip_stmts.insert(i);
                            }
                        })
                    })
                    .collect();
                Ok(Step::forked(forks, enabled))
            }
            Flow::Serial => {
                let next = self.find_next_pc()?;
                self.set_pc(next)?;
                Ok(Step::yielded(enabled))
            }
            Flow::Atomic | Flow::Unknown => {
                let next = self.find_next_pc()?;
                self.set_pc(next)?;
                Ok(Step::default())
            }
        }
    }

    fn find_next_pc(&mut self) -> ModelResult<String> {
        let pc = self.pc();
        let file = self.file()?;
        Ok(match resolve(file, &pc)? {
            AstNode::Action(_) => format!("{}.Block", pc),
            AstNode::Block(_) => format!("{}.Stmts[0]", pc),
            AstNode::Statement(_) | AstNode::Branch(_) => next_stmt_path(file, &pc),
            AstNode::AnyStmt(_) => {
                self.frame_mut()?.scopes.pop();
                next_stmt_path(file, &pc)
            }
            AstNode::ForStmt(_) | AstNode::WhileStmt(_) => pc,
            _ => String::new(),
        })
    }

    fn end_of_block(&mut self) -> ModelResult<Step> {
        loop {
            let frame = self.frame_mut()?;
            let old_scope = frame.scopes.pop();
            if frame.scopes.is_empty() {
                let old = self
                    .thread
                    .stack
                    .pop()
                    .ok_or_else(|| ModelError::Internal("no frame to end".into()))?;
                self.frame_finished(&old, old_scope.as_ref())?;
                if self.thread.stack.is_empty() {
                    return Ok(Step::yielded(true));
                }
                self.record_return(&old, &Value::None)?;
                self.assign_caller(&old, Value::None)?;
                return self.end_of_statement();
            }
            frame.pc = remove_last_block(&frame.pc);
            let step = self.end_of_statement()?;
            if !step.forks.is_empty() || step.yielded {
                return Ok(step);
            }
            if !self.pc().is_empty() {
                break;
            }
        }
        let serial = matches!(self.frame()?.flow(), Flow::Serial | Flow::Parallel);
        Ok(Step::yielded(serial && self.process.enabled))
    }

    /// Bookkeeping when a frame is popped: the top-level `Init` action
    /// publishes its root variables as state, and a role's `Init` fixes
    /// its durable snapshot.
    fn frame_finished(&mut self, frame: &CallFrame, root_scope: Option<&Scope>) -> ModelResult<()> {
        if let Some(obj) = &frame.obj {
            if frame.name == "Init" {
                if let (Some(d), Some(role)) = (self.model.durability(&obj.name), self.process.role_mut(obj)) {
                    role.snapshot(d);
                }
            }
            return Ok(());
        }
        let Some(scope) = root_scope else {
            return Ok(());
        };
        if !frame.root_path().starts_with("Actions[") {
            return Ok(());
        }
        let file = self.model.file(frame.file_index)?;
        if let Ok(AstNode::Action(action)) = resolve(file, frame.root_path()) {
            if action.name == "Init" {
                for (k, v) in &scope.vars {
                    if !self.process.heap.is_global(k) {
                        self.process.heap.insert(k, v.clone());
                    }
                }
                self.process.invalidate_key();
            }
        }
        Ok(())
    }

    fn record_call(&mut self, callee: &CallFrame) -> ModelResult<()> {
        let caller = self.frame()?;
        if caller.obj == callee.obj {
            return Ok(());
        }
        let message = Message {
            sender: short_ref(caller.obj.as_ref()),
            receiver: short_ref(callee.obj.as_ref()),
            name: callee.name.clone(),
            args: callee
                .args
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
            lossy: caller.flow() != Flow::Atomic,
            is_return: false,
        };
        self.process.messages.push(message);
        Ok(())
    }

    fn record_return(&mut self, callee: &CallFrame, value: &Value) -> ModelResult<()> {
        let caller = self.frame()?;
        if caller.obj == callee.obj {
            return Ok(());
        }
        let args = if value.is_none() {
            Vec::new()
        } else {
            vec![(String::new(), value.to_string())]
        };
        let message = Message {
            sender: short_ref(callee.obj.as_ref()),
            receiver: short_ref(caller.obj.as_ref()),
            name: callee.name.clone(),
            args,
            lossy: caller.flow() != Flow::Atomic,
            is_return: true,
        };
        self.process.messages.push(message);
        Ok(())
    }
}

fn context(pc: &str, code: &str, source: EvalError) -> ModelError {
    ModelError::eval(format!("{} `{}`", pc, code.trim()), source)
}

fn short_ref(r: Option<&RoleRef>) -> String {
    r.map(RoleRef::short).unwrap_or_default()
}

/// Binds one element to the loop variables, unpacking when there are
/// several.
fn bind_loop_vars(vars: &[String], item: &Value) -> Result<Vec<(String, Value)>, EvalError> {
    match vars {
        [] => Err(EvalError::InvalidArgument("loop without a variable".into())),
        [var] => Ok(vec![(var.clone(), item.clone())]),
        _ => {
            let parts = item.iterate().ok_or_else(|| {
                EvalError::type_error(format!("cannot unpack non-iterable {}", item.type_name()))
            })?;
            if parts.len() != vars.len() {
                return Err(EvalError::InvalidArgument(format!(
                    "expected {} values to unpack, got {}",
                    vars.len(),
                    parts.len()
                )));
            }
            Ok(vars.iter().cloned().zip(parts).collect())
        }
    }
}

/// `x = recv.name(a, k=b)` for calls the expression engine handles.
fn synthesize_call(call: &CallStmt) -> String {
    let args: Vec<String> = call
        .args
        .iter()
        .map(|a| {
            if a.name.is_empty() {
                a.py_expr.clone()
            } else {
                format!("{}={}", a.name, a.py_expr)
            }
        })
        .collect();
    let target = if call.receiver.is_empty() {
        call.name.clone()
    } else {
        format!("{}.{}", call.receiver, call.name)
    };
    let expr = format!("{}({})", target, args.join(", "));
    match call.vars.as_slice() {
        [] => expr,
        vars => format!("{} = {}", vars.join(", "), expr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn model(json: &str) -> Model {
        Model::from_json(json).unwrap()
    }

    fn start(model: &Model, action: usize) -> Process {
        let mut p = Process::new(Arc::new(BTreeMap::new()), &model.invariant_counts());
        let name = model.main().actions[action].name.clone();
        p.new_thread(CallFrame::new(0, format!("Actions[{}]", action), name));
        p
    }

    fn py(code: &str) -> String {
        format!(r#"{{"pyStmt": {{"code": "{}"}}}}"#, code)
    }

    fn action(name: &str, flow: &str, stmts: &[String]) -> String {
        format!(
            r#"{{"name": "{}", "block": {{"flow": "{}", "stmts": [{}]}}}}"#,
            name,
            flow,
            stmts.join(",")
        )
    }

    #[test]
    fn test_atomic_action_runs_to_completion() {
        let m = model(&format!(
            r#"{{"actions": [{}]}}"#,
            action("Add", "FLOW_ATOMIC", &[py("a = 1"), py("b = a + 1")])
        ));
        let mut p = start(&m, 0);
        let step = run(&m, &mut p).unwrap();
        assert!(step.yielded);
        assert!(step.forks.is_empty());
        assert!(p.threads.is_empty());
        assert!(p.enabled);
    }

    #[test]
    fn test_serial_action_yields_between_statements() {
        let m = model(&format!(
            r#"{{"states": {{"code": "a = 0\nb = 0"}}, "actions": [{}]}}"#,
            action("Add", "FLOW_SERIAL", &[py("a += 1"), py("b += 1")])
        ));
        let mut p = start(&m, 0);
        p.heap.insert("a", Value::Int(0));
        p.heap.insert("b", Value::Int(0));

        let step = run(&m, &mut p).unwrap();
        assert!(step.yielded);
        assert_eq!(p.threads.len(), 1);
        assert_eq!(p.threads[0].current_pc(), "Actions[0].Block.Stmts[1]");
        assert_eq!(p.heap.get("a"), Some(&Value::Int(1)));
        assert_eq!(p.heap.get("b"), Some(&Value::Int(0)));

        let step = run(&m, &mut p).unwrap();
        assert!(step.yielded);
        assert!(p.threads.is_empty());
        assert_eq!(p.heap.get("b"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_oneof_block_forks_per_statement() {
        let m = model(&format!(
            r#"{{"actions": [{}]}}"#,
            action("Pick", "FLOW_ONEOF", &[py("a = 1"), py("a = 2")])
        ));
        let mut p = start(&m, 0);
        p.heap.insert("a", Value::Int(0));
        let step = run(&m, &mut p).unwrap();
        assert_eq!(step.forks.len(), 2);
        assert_eq!(step.forks[0].name, "Stmt:0");

        let mut fork = step.forks.into_iter().nth(1).unwrap();
        let step = run(&m, &mut fork).unwrap();
        assert!(step.yielded);
        assert_eq!(fork.heap.get("a"), Some(&Value::Int(2)));
        assert!(fork.threads.is_empty());
    }

    #[test]
    fn test_any_forks_with_bound_variable_and_condition() {
        let any = r#"{"anyStmt": {"loopVars": ["x"], "pyExpr": "[1, 2, 3]", "condition": "x != 2",
            "block": {"stmts": [{"pyStmt": {"code": "a = x"}}]}}}"#;
        let m = model(&format!(
            r#"{{"actions": [{}]}}"#,
            action("Set", "FLOW_ATOMIC", &[any.to_string()])
        ));
        let mut p = start(&m, 0);
        p.heap.insert("a", Value::Int(0));
        let step = run(&m, &mut p).unwrap();
        let names: Vec<_> = step.forks.iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["Any:1", "Any:3"]);

        let mut fork = step.forks.into_iter().nth(1).unwrap();
        run(&m, &mut fork).unwrap();
        assert_eq!(fork.heap.get("a"), Some(&Value::Int(3)));
        assert!(fork.threads.is_empty());
    }

    #[test]
    fn test_any_over_empty_collection_is_a_noop() {
        let any = r#"{"anyStmt": {"loopVars": ["x"], "pyExpr": "[]",
            "block": {"stmts": [{"pyStmt": {"code": "a = x"}}]}}}"#;
        let m = model(&format!(
            r#"{{"actions": [{}]}}"#,
            action("Set", "FLOW_ATOMIC", &[any.to_string(), py("b = 1")])
        ));
        let mut p = start(&m, 0);
        let step = run(&m, &mut p).unwrap();
        assert!(step.forks.is_empty());
        assert!(p.threads.is_empty());
    }

    #[test]
    fn test_for_and_while_loops() {
        let for_stmt = r#"{"forStmt": {"loopVars": ["i"], "pyExpr": "range(4)",
            "block": {"stmts": [
                {"ifStmt": {"branches": [{"condition": "i == 3", "block": {"stmts": [{"breakStmt": {}}]}}]}},
                {"pyStmt": {"code": "total += i"}}
            ]}}}"#;
        let while_stmt = r#"{"whileStmt": {"pyExpr": "n < 5",
            "block": {"stmts": [{"pyStmt": {"code": "n += 2"}}]}}}"#;
        let m = model(&format!(
            r#"{{"actions": [{}]}}"#,
            action("Loop", "FLOW_ATOMIC", &[for_stmt.to_string(), while_stmt.to_string()])
        ));
        let mut p = start(&m, 0);
        p.heap.insert("total", Value::Int(0));
        p.heap.insert("n", Value::Int(0));
        run(&m, &mut p).unwrap();
        assert_eq!(p.heap.get("total"), Some(&Value::Int(3)));
        assert_eq!(p.heap.get("n"), Some(&Value::Int(6)));
        assert!(p.threads.is_empty());
    }

    #[test]
    fn test_function_call_binds_args_and_assigns_result() {
        let m = model(&format!(
            r#"{{
                "functions": [{{"name": "add", "params": [{{"name": "x"}}, {{"name": "y", "defaultPyExpr": "10"}}],
                    "block": {{"stmts": [{{"returnStmt": {{"pyExpr": "x + y"}}}}]}}}}],
                "actions": [{}]
            }}"#,
            action(
                "Call",
                "FLOW_ATOMIC",
                &[r#"{"callStmt": {"vars": ["r"], "name": "add", "args": [{"pyExpr": "1"}]}}"#.to_string(),
                  py("a = r")]
            )
        ));
        let mut p = start(&m, 0);
        p.heap.insert("a", Value::Int(0));
        run(&m, &mut p).unwrap();
        assert_eq!(p.heap.get("a"), Some(&Value::Int(11)));
        assert!(p.labels.contains(&"add.call".to_string()));
    }

    #[test]
    fn test_missing_argument_is_reported() {
        let m = model(&format!(
            r#"{{
                "functions": [{{"name": "f", "params": [{{"name": "x"}}], "block": {{"stmts": [{{"pyStmt": {{"code": "pass"}}}}]}}}}],
                "actions": [{}]
            }}"#,
            action("Call", "FLOW_ATOMIC", &[r#"{"callStmt": {"name": "f"}}"#.to_string()])
        ));
        let mut p = start(&m, 0);
        assert!(matches!(
            run(&m, &mut p),
            Err(ModelError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_require_disables_transition() {
        let m = model(&format!(
            r#"{{"actions": [{}]}}"#,
            action("Guard", "FLOW_ATOMIC", &[r#"{"requireStmt": {"condition": "False"}}"#.to_string()])
        ));
        let mut p = start(&m, 0);
        let err = run(&m, &mut p).unwrap_err();
        assert!(err.is_disable());
    }

    #[test]
    fn test_return_value_recorded_for_action() {
        let m = model(&format!(
            r#"{{"actions": [{}]}}"#,
            action("Get", "FLOW_ATOMIC", &[r#"{"returnStmt": {"pyExpr": "42"}}"#.to_string()])
        ));
        let mut p = start(&m, 0);
        run(&m, &mut p).unwrap();
        assert_eq!(p.returns.get("Get"), Some(&Value::Int(42)));
        assert!(p.threads.is_empty());
    }

    #[test]
    fn test_preinit_collects_globals() {
        let m = model(
            r#"{"stmts": [{"pyStmt": {"code": "N = 3"}}, {"pyStmt": {"code": "ITEMS = list(range(N))"}}]}"#,
        );
        let mut p = Process::new(Arc::new(BTreeMap::new()), &[]);
        let globals = run_preinit(&m, &mut p).unwrap();
        assert_eq!(globals["N"], Value::Int(3));
        assert_eq!(globals["ITEMS"].len(), Some(3));
        assert!(p.threads.is_empty());
    }

    #[test]
    fn test_synthesized_call() {
        let call: CallStmt = serde_json::from_str(
            r#"{"vars": ["x"], "receiver": "stub", "name": "Put", "args": [{"pyExpr": "1"}, {"name": "k", "pyExpr": "v"}]}"#,
        )
        .unwrap();
        assert_eq!(synthesize_call(&call), "x = stub.Put(1, k=v)");
    }
}
