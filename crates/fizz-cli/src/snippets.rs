//! Collects the Python snippets embedded in an AST so syntax errors can be
//! reported against their own source before a run starts.

use fizz_ast::{Block, File, Invariant, Parameter, Statement, StmtKind};
use fizz_eval::{parse_expr, parse_program, ParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetKind {
    /// One or more statements.
    Program,
    Expr,
}

/// One piece of embedded code and the AST path it sits at.
#[derive(Debug, Clone)]
pub struct Snippet<'a> {
    pub path: String,
    pub code: &'a str,
    pub kind: SnippetKind,
}

impl Snippet<'_> {
    pub fn parse(&self) -> Result<(), ParseError> {
        match self.kind {
            SnippetKind::Program => parse_program(self.code).map(drop),
            SnippetKind::Expr => parse_expr(self.code).map(drop),
        }
    }
}

#[derive(Default)]
struct Collector<'a> {
    out: Vec<Snippet<'a>>,
}

impl<'a> Collector<'a> {
    fn push(&mut self, path: String, code: &'a str, kind: SnippetKind) {
        if !code.trim().is_empty() {
            self.out.push(Snippet { path, code, kind });
        }
    }

    fn params(&mut self, path: &str, params: &'a [Parameter]) {
        for (i, p) in params.iter().enumerate() {
            self.push(format!("{}.Params[{}]", path, i), &p.default_py_expr, SnippetKind::Expr);
        }
    }

    fn block(&mut self, path: String, block: &'a Block) {
        for (i, stmt) in block.stmts.iter().enumerate() {
            self.stmt(format!("{}.Stmts[{}]", path, i), stmt);
        }
    }

    fn stmt(&mut self, path: String, stmt: &'a Statement) {
        let Some(kind) = stmt.kind() else { return };
        match kind {
            StmtKind::Py(s) => self.push(format!("{}.PyStmt", path), &s.code, SnippetKind::Program),
            StmtKind::Block(b) => self.block(format!("{}.Block", path), b),
            StmtKind::If(s) => {
                for (i, branch) in s.branches.iter().enumerate() {
                    let at = format!("{}.IfStmt.Branches[{}]", path, i);
                    self.push(at.clone(), &branch.condition, SnippetKind::Expr);
                    self.block(format!("{}.Block", at), &branch.block);
                }
            }
            StmtKind::Any(s) => {
                let at = format!("{}.AnyStmt", path);
                self.push(at.clone(), &s.py_expr, SnippetKind::Expr);
                self.push(at.clone(), &s.condition, SnippetKind::Expr);
                self.block(format!("{}.Block", at), &s.block);
            }
            StmtKind::For(s) => {
                let at = format!("{}.ForStmt", path);
                self.push(at.clone(), &s.py_expr, SnippetKind::Expr);
                self.block(format!("{}.Block", at), &s.block);
            }
            StmtKind::While(s) => {
                let at = format!("{}.WhileStmt", path);
                self.push(at.clone(), &s.py_expr, SnippetKind::Expr);
                self.block(format!("{}.Block", at), &s.block);
            }
            StmtKind::Return(s) => {
                self.push(format!("{}.ReturnStmt", path), &s.py_expr, SnippetKind::Expr)
            }
            StmtKind::Call(s) => {
                for (i, arg) in s.args.iter().enumerate() {
                    let at = format!("{}.CallStmt.Args[{}]", path, i);
                    self.push(at, &arg.py_expr, SnippetKind::Expr);
                }
            }
            StmtKind::Require(s) => {
                self.push(format!("{}.RequireStmt", path), &s.condition, SnippetKind::Expr)
            }
            StmtKind::Break | StmtKind::Continue => {}
        }
    }

    fn invariant(&mut self, path: String, inv: &'a Invariant) {
        self.push(path.clone(), &inv.py_expr, SnippetKind::Expr);
        self.push(path.clone(), &inv.py_code, SnippetKind::Program);
        self.params(&path, &inv.params);
        if let Some(block) = &inv.block {
            self.block(format!("{}.Block", path), block);
        }
        if let Some(nested) = &inv.nested {
            self.invariant(format!("{}.Nested", path), nested);
        }
    }
}

/// Every non-empty snippet in `file`, in document order.
pub fn collect(file: &File) -> Vec<Snippet<'_>> {
    let mut c = Collector::default();
    for (i, stmt) in file.stmts.iter().enumerate() {
        c.stmt(format!("Stmts[{}]", i), stmt);
    }
    if let Some(states) = &file.states {
        c.push("States".into(), &states.code, SnippetKind::Program);
    }
    for (i, action) in file.actions.iter().enumerate() {
        c.block(format!("Actions[{}].Block", i), &action.block);
    }
    for (i, f) in file.functions.iter().enumerate() {
        let path = format!("Functions[{}]", i);
        c.params(&path, &f.params);
        c.block(format!("{}.Block", path), &f.block);
    }
    for (i, inv) in file.invariants.iter().enumerate() {
        c.invariant(format!("Invariants[{}]", i), inv);
    }
    for (r, role) in file.roles.iter().enumerate() {
        let base = format!("Roles[{}]", r);
        for (i, stmt) in role.stmts.iter().enumerate() {
            c.stmt(format!("{}.Stmts[{}]", base, i), stmt);
        }
        if let Some(states) = &role.states {
            c.push(format!("{}.States", base), &states.code, SnippetKind::Program);
        }
        for (d, decorator) in role.decorators.iter().enumerate() {
            for (a, arg) in decorator.args.iter().enumerate() {
                let path = format!("{}.Decorators[{}].Args[{}]", base, d, a);
                c.push(path, &arg.py_expr, SnippetKind::Expr);
            }
        }
        for (i, action) in role.actions.iter().enumerate() {
            c.block(format!("{}.Actions[{}].Block", base, i), &action.block);
        }
        for (i, f) in role.functions.iter().enumerate() {
            let path = format!("{}.Functions[{}]", base, i);
            c.params(&path, &f.params);
            c.block(format!("{}.Block", path), &f.block);
        }
        for (i, inv) in role.invariants.iter().enumerate() {
            c.invariant(format!("{}.Invariants[{}]", base, i), inv);
        }
    }
    c.out
}

/// Parses every snippet; stops at the first syntax error.
pub fn validate(file: &File) -> Result<usize, (Snippet<'_>, ParseError)> {
    let snippets = collect(file);
    let count = snippets.len();
    for snippet in snippets {
        if let Err(e) = snippet.parse() {
            return Err((snippet, e));
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(json: &str) -> File {
        File::from_json(json).unwrap()
    }

    #[test]
    fn test_collect_paths() {
        let f = file(
            r#"{
                "states": {"code": "x = 0"},
                "actions": [{"name": "A", "block": {"stmts": [
                    {"ifStmt": {"branches": [
                        {"condition": "x < 2", "block": {"stmts": [{"pyStmt": {"code": "x += 1"}}]}},
                        {"condition": "", "block": {"stmts": [{"requireStmt": {"condition": "False"}}]}}
                    ]}}
                ]}}],
                "invariants": [{"name": "Small", "always": true, "pyExpr": "x < 5"}]
            }"#,
        );
        let paths: Vec<_> = collect(&f).into_iter().map(|s| s.path).collect();
        assert_eq!(
            paths,
            vec![
                "States",
                "Actions[0].Block.Stmts[0].IfStmt.Branches[0]",
                "Actions[0].Block.Stmts[0].IfStmt.Branches[0].Block.Stmts[0].PyStmt",
                "Actions[0].Block.Stmts[0].IfStmt.Branches[1].Block.Stmts[0].RequireStmt",
                "Invariants[0]",
            ]
        );
    }

    #[test]
    fn test_validate_reports_first_error() {
        let f = file(
            r#"{
                "states": {"code": "x = 0"},
                "actions": [{"name": "A", "block": {"stmts": [{"pyStmt": {"code": "x = (1 +"}}]}}]
            }"#,
        );
        let (snippet, _) = validate(&f).unwrap_err();
        assert_eq!(snippet.path, "Actions[0].Block.Stmts[0].PyStmt");
        assert_eq!(snippet.kind, SnippetKind::Program);
    }

    #[test]
    fn test_validate_counts_snippets() {
        let f = file(r#"{"states": {"code": "x = 0\ny = [1, 2]"}}"#);
        assert_eq!(validate(&f).unwrap(), 1);
    }
}
