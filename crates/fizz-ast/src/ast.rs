//! Serde model of the specification AST.
//!
//! Field names follow the proto-JSON encoding produced by the parser:
//! camelCase keys, enum values spelled as their proto identifiers, and
//! absent fields meaning "default".

use serde::{Deserialize, Serialize};

/// Scheduling discipline of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Flow {
    /// Inherit the flow of the enclosing scope.
    #[default]
    #[serde(rename = "FLOW_UNKNOWN")]
    Unknown,
    /// Run every statement without yielding.
    #[serde(rename = "FLOW_ATOMIC")]
    Atomic,
    /// Yield between statements.
    #[serde(rename = "FLOW_SERIAL")]
    Serial,
    /// Run exactly one statement, chosen non-deterministically.
    #[serde(rename = "FLOW_ONEOF")]
    Oneof,
    /// Run every statement in every interleaving.
    #[serde(rename = "FLOW_PARALLEL")]
    Parallel,
}

impl Flow {
    /// Returns `self`, or `inherited` if this flow is unspecified.
    pub fn or(self, inherited: Flow) -> Flow {
        match self {
            Flow::Unknown => inherited,
            flow => flow,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Flow::Unknown => "unknown",
            Flow::Atomic => "atomic",
            Flow::Serial => "serial",
            Flow::Oneof => "oneof",
            Flow::Parallel => "parallel",
        }
    }
}

/// Fairness level of an action or choice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum FairnessLevel {
    #[default]
    #[serde(rename = "FAIRNESS_LEVEL_UNKNOWN")]
    Unknown,
    #[serde(rename = "FAIRNESS_LEVEL_UNFAIR")]
    Unfair,
    #[serde(rename = "FAIRNESS_LEVEL_WEAK")]
    Weak,
    #[serde(rename = "FAIRNESS_LEVEL_STRONG")]
    Strong,
}

impl FairnessLevel {
    /// Weak and strong fairness both count as fair.
    pub fn is_fair(self) -> bool {
        matches!(self, FairnessLevel::Weak | FairnessLevel::Strong)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FairnessLevel::Unknown => "unknown",
            FairnessLevel::Unfair => "unfair",
            FairnessLevel::Weak => "weak",
            FairnessLevel::Strong => "strong",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fairness {
    pub level: FairnessLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// Location of a node in the `.fizz` source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceInfo {
    pub file_name: String,
    pub start: Position,
    pub end: Position,
}

/// A compilation unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct File {
    pub source_info: Option<SourceInfo>,
    /// State variable initialisation, run when the file has no `Init` action.
    pub states: Option<StateVars>,
    pub actions: Vec<Action>,
    pub functions: Vec<Function>,
    pub invariants: Vec<Invariant>,
    pub roles: Vec<Role>,
    /// Top-level statements, run once before exploration.
    pub stmts: Vec<Statement>,
}

impl File {
    /// Parses a file from its proto-JSON encoding.
    pub fn from_json(json: &str) -> serde_json::Result<File> {
        serde_json::from_str(json)
    }

    pub fn role(&self, name: &str) -> Option<(usize, &Role)> {
        self.roles.iter().enumerate().find(|(_, r)| r.name == name)
    }

    pub fn has_init_action(&self) -> bool {
        self.actions.first().is_some_and(|a| a.name == "Init")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateVars {
    pub source_info: Option<SourceInfo>,
    pub code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Action {
    pub source_info: Option<SourceInfo>,
    pub name: String,
    pub flow: Flow,
    pub block: Block,
    pub fairness: Fairness,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    /// Expression for the default value; empty when the parameter is required.
    pub default_py_expr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Function {
    pub source_info: Option<SourceInfo>,
    pub name: String,
    pub params: Vec<Parameter>,
    pub flow: Flow,
    pub block: Block,
}

/// A safety, liveness, existence or transition assertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Invariant {
    pub source_info: Option<SourceInfo>,
    pub name: String,
    pub always: bool,
    pub eventually: bool,
    pub py_expr: String,
    pub block: Option<Block>,
    pub temporal_operators: Vec<String>,
    pub nested: Option<Box<Invariant>>,
    pub params: Vec<Parameter>,
    pub py_code: String,
}

impl Invariant {
    pub fn has_operator(&self, op: &str) -> bool {
        self.temporal_operators.iter().any(|o| o == op)
    }

    /// True for invariants that contribute to liveness checking.
    pub fn is_eventually(&self) -> bool {
        self.eventually || self.has_operator("eventually")
    }

    pub fn is_exists(&self) -> bool {
        self.has_operator("exists")
    }

    pub fn is_transition(&self) -> bool {
        self.block.is_some() && self.has_operator("transition")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Argument {
    pub name: String,
    pub py_expr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Decorator {
    pub source_info: Option<SourceInfo>,
    pub name: String,
    pub args: Vec<Argument>,
}

/// A state-bearing actor type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Role {
    pub source_info: Option<SourceInfo>,
    pub name: String,
    pub modifiers: Vec<String>,
    pub states: Option<StateVars>,
    pub actions: Vec<Action>,
    pub functions: Vec<Function>,
    pub invariants: Vec<Invariant>,
    pub decorators: Vec<Decorator>,
    pub stmts: Vec<Statement>,
}

impl Role {
    pub fn is_symmetric(&self) -> bool {
        self.modifiers.iter().any(|m| m == "symmetric")
    }

    pub fn init_action(&self) -> Option<usize> {
        self.actions.iter().position(|a| a.name == "Init")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Block {
    pub source_info: Option<SourceInfo>,
    pub flow: Flow,
    pub stmts: Vec<Statement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PyStmt {
    pub source_info: Option<SourceInfo>,
    pub code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Branch {
    pub source_info: Option<SourceInfo>,
    pub condition: String,
    pub block: Block,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IfStmt {
    pub source_info: Option<SourceInfo>,
    pub branches: Vec<Branch>,
}

/// Non-deterministic choice over the elements of an iterable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnyStmt {
    pub source_info: Option<SourceInfo>,
    pub loop_vars: Vec<String>,
    pub py_expr: String,
    pub block: Block,
    pub flow: Flow,
    pub fairness: Fairness,
    /// Optional filter; elements for which it is false are not offered.
    pub condition: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ForStmt {
    pub source_info: Option<SourceInfo>,
    pub loop_vars: Vec<String>,
    pub py_expr: String,
    pub block: Block,
    pub flow: Flow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WhileStmt {
    pub source_info: Option<SourceInfo>,
    pub py_expr: String,
    pub block: Block,
    pub flow: Flow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReturnStmt {
    pub source_info: Option<SourceInfo>,
    pub py_expr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallStmt {
    pub source_info: Option<SourceInfo>,
    /// Assignment targets for the returned value.
    pub vars: Vec<String>,
    /// Expression naming the callee's owner, e.g. `self` or a role variable.
    pub receiver: String,
    pub name: String,
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequireStmt {
    pub source_info: Option<SourceInfo>,
    pub condition: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

/// A statement: exactly one of the variant fields is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Statement {
    pub source_info: Option<SourceInfo>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub py_stmt: Option<PyStmt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_stmt: Option<IfStmt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub any_stmt: Option<AnyStmt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_stmt: Option<ForStmt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub while_stmt: Option<WhileStmt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_stmt: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_stmt: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_stmt: Option<ReturnStmt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_stmt: Option<CallStmt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_stmt: Option<RequireStmt>,
}

/// Borrowed view of the variant a statement carries.
#[derive(Debug, Clone, Copy)]
pub enum StmtKind<'a> {
    Py(&'a PyStmt),
    Block(&'a Block),
    If(&'a IfStmt),
    Any(&'a AnyStmt),
    For(&'a ForStmt),
    While(&'a WhileStmt),
    Break,
    Continue,
    Return(&'a ReturnStmt),
    Call(&'a CallStmt),
    Require(&'a RequireStmt),
}

impl Statement {
    /// Returns the variant this statement carries, or `None` for an empty statement.
    pub fn kind(&self) -> Option<StmtKind<'_>> {
        if let Some(s) = &self.py_stmt {
            return Some(StmtKind::Py(s));
        }
        if let Some(b) = &self.block {
            return Some(StmtKind::Block(b));
        }
        if let Some(s) = &self.if_stmt {
            return Some(StmtKind::If(s));
        }
        if let Some(s) = &self.any_stmt {
            return Some(StmtKind::Any(s));
        }
        if let Some(s) = &self.for_stmt {
            return Some(StmtKind::For(s));
        }
        if let Some(s) = &self.while_stmt {
            return Some(StmtKind::While(s));
        }
        if self.break_stmt.is_some() {
            return Some(StmtKind::Break);
        }
        if self.continue_stmt.is_some() {
            return Some(StmtKind::Continue);
        }
        if let Some(s) = &self.return_stmt {
            return Some(StmtKind::Return(s));
        }
        if let Some(s) = &self.call_stmt {
            return Some(StmtKind::Call(s));
        }
        self.require_stmt.as_ref().map(StmtKind::Require)
    }

    pub fn py(code: impl Into<String>) -> Statement {
        Statement {
            py_stmt: Some(PyStmt {
                source_info: None,
                code: code.into(),
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_file() {
        let json = r#"{
            "states": {"code": "a = 0"},
            "actions": [{
                "name": "Add",
                "fairness": {"level": "FAIRNESS_LEVEL_STRONG"},
                "block": {"flow": "FLOW_ATOMIC", "stmts": [{"pyStmt": {"code": "a += 1"}}]}
            }]
        }"#;
        let file = File::from_json(json).unwrap();
        assert_eq!(file.states.as_ref().unwrap().code, "a = 0");
        let action = &file.actions[0];
        assert_eq!(action.name, "Add");
        assert_eq!(action.fairness.level, FairnessLevel::Strong);
        assert_eq!(action.block.flow, Flow::Atomic);
        match action.block.stmts[0].kind() {
            Some(StmtKind::Py(s)) => assert_eq!(s.code, "a += 1"),
            other => panic!("expected py stmt, got {:?}", other),
        }
        assert!(!file.has_init_action());
    }

    #[test]
    fn test_parse_statement_variants() {
        let json = r#"[
            {"label": "l1", "ifStmt": {"branches": [{"condition": "x", "block": {}}]}},
            {"anyStmt": {"loopVars": ["i"], "pyExpr": "range(3)", "block": {}}},
            {"breakStmt": {}},
            {"continueStmt": {}},
            {"returnStmt": {"pyExpr": "1"}},
            {"callStmt": {"vars": ["r"], "receiver": "self", "name": "f", "args": [{"pyExpr": "1"}]}},
            {"requireStmt": {"condition": "x > 0"}},
            {"whileStmt": {"pyExpr": "True", "block": {}}}
        ]"#;
        let stmts: Vec<Statement> = serde_json::from_str(json).unwrap();
        assert_eq!(stmts[0].label, "l1");
        assert!(matches!(stmts[0].kind(), Some(StmtKind::If(_))));
        assert!(matches!(stmts[1].kind(), Some(StmtKind::Any(_))));
        assert!(matches!(stmts[2].kind(), Some(StmtKind::Break)));
        assert!(matches!(stmts[3].kind(), Some(StmtKind::Continue)));
        assert!(matches!(stmts[4].kind(), Some(StmtKind::Return(_))));
        match stmts[5].kind() {
            Some(StmtKind::Call(c)) => {
                assert_eq!(c.receiver, "self");
                assert_eq!(c.vars, vec!["r".to_string()]);
            }
            other => panic!("expected call, got {:?}", other),
        }
        assert!(matches!(stmts[6].kind(), Some(StmtKind::Require(_))));
        assert!(matches!(stmts[7].kind(), Some(StmtKind::While(_))));
    }

    #[test]
    fn test_flow_inheritance() {
        assert_eq!(Flow::Unknown.or(Flow::Serial), Flow::Serial);
        assert_eq!(Flow::Atomic.or(Flow::Serial), Flow::Atomic);
    }

    #[test]
    fn test_invariant_operators() {
        let json = r#"{"name": "Live", "block": {}, "temporalOperators": ["always", "eventually"]}"#;
        let inv: Invariant = serde_json::from_str(json).unwrap();
        assert!(inv.is_eventually());
        assert!(!inv.is_exists());
        assert!(!inv.is_transition());
    }

    #[test]
    fn test_role_modifiers() {
        let json = r#"{"name": "Node", "modifiers": ["symmetric"], "actions": [{"name": "Init"}]}"#;
        let role: Role = serde_json::from_str(json).unwrap();
        assert!(role.is_symmetric());
        assert_eq!(role.init_action(), Some(0));
    }
}
