//! Program-counter paths into the AST.
//!
//! A path is a dot-separated list of segments naming fields of the AST,
//! with `[i]` indexing repeated fields: `Roles[0].Actions[1].Block.Stmts[2]`.
//! The final segment `$` marks the end of the enclosing block.

use crate::ast::*;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("malformed path segment '{segment}' in '{path}'")]
    Malformed { segment: String, path: String },

    #[error("no AST node at '{0}'")]
    NotFound(String),
}

/// A node addressed by a program counter.
#[derive(Debug, Clone, Copy)]
pub enum AstNode<'a> {
    File(&'a File),
    Role(&'a Role),
    Action(&'a Action),
    Function(&'a Function),
    Invariant(&'a Invariant),
    Block(&'a Block),
    Statement(&'a Statement),
    PyStmt(&'a PyStmt),
    IfStmt(&'a IfStmt),
    Branch(&'a Branch),
    AnyStmt(&'a AnyStmt),
    ForStmt(&'a ForStmt),
    WhileStmt(&'a WhileStmt),
    ReturnStmt(&'a ReturnStmt),
    CallStmt(&'a CallStmt),
    RequireStmt(&'a RequireStmt),
    /// The `$` end-of-block marker.
    End,
}

impl<'a> AstNode<'a> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            AstNode::File(_) => "File",
            AstNode::Role(_) => "Role",
            AstNode::Action(_) => "Action",
            AstNode::Function(_) => "Function",
            AstNode::Invariant(_) => "Invariant",
            AstNode::Block(_) => "Block",
            AstNode::Statement(_) => "Statement",
            AstNode::PyStmt(_) => "PyStmt",
            AstNode::IfStmt(_) => "IfStmt",
            AstNode::Branch(_) => "Branch",
            AstNode::AnyStmt(_) => "AnyStmt",
            AstNode::ForStmt(_) => "ForStmt",
            AstNode::WhileStmt(_) => "WhileStmt",
            AstNode::ReturnStmt(_) => "ReturnStmt",
            AstNode::CallStmt(_) => "CallStmt",
            AstNode::RequireStmt(_) => "RequireStmt",
            AstNode::End => "$",
        }
    }
}

fn parse_segment<'p>(segment: &'p str, path: &str) -> Result<(&'p str, Option<usize>), PathError> {
    let malformed = || PathError::Malformed {
        segment: segment.to_string(),
        path: path.to_string(),
    };
    match segment.find('[') {
        None => Ok((segment, None)),
        Some(open) => {
            let close = segment.rfind(']').ok_or_else(malformed)?;
            if close != segment.len() - 1 || close < open {
                return Err(malformed());
            }
            let index = segment[open + 1..close]
                .parse::<usize>()
                .map_err(|_| malformed())?;
            Ok((&segment[..open], Some(index)))
        }
    }
}

fn step<'a>(node: AstNode<'a>, field: &str, index: Option<usize>) -> Option<AstNode<'a>> {
    match (node, field, index) {
        (_, "$", None) => Some(AstNode::End),
        (AstNode::File(f), "Actions", Some(i)) => f.actions.get(i).map(AstNode::Action),
        (AstNode::File(f), "Functions", Some(i)) => f.functions.get(i).map(AstNode::Function),
        (AstNode::File(f), "Invariants", Some(i)) => f.invariants.get(i).map(AstNode::Invariant),
        (AstNode::File(f), "Roles", Some(i)) => f.roles.get(i).map(AstNode::Role),
        (AstNode::File(f), "Stmts", Some(i)) => f.stmts.get(i).map(AstNode::Statement),
        (AstNode::Role(r), "Actions", Some(i)) => r.actions.get(i).map(AstNode::Action),
        (AstNode::Role(r), "Functions", Some(i)) => r.functions.get(i).map(AstNode::Function),
        (AstNode::Role(r), "Invariants", Some(i)) => r.invariants.get(i).map(AstNode::Invariant),
        (AstNode::Role(r), "Stmts", Some(i)) => r.stmts.get(i).map(AstNode::Statement),
        (AstNode::Action(a), "Block", None) => Some(AstNode::Block(&a.block)),
        (AstNode::Function(f), "Block", None) => Some(AstNode::Block(&f.block)),
        (AstNode::Invariant(inv), "Block", None) => inv.block.as_ref().map(AstNode::Block),
        (AstNode::Block(b), "Stmts", Some(i)) => b.stmts.get(i).map(AstNode::Statement),
        (AstNode::Statement(s), "PyStmt", None) => s.py_stmt.as_ref().map(AstNode::PyStmt),
        (AstNode::Statement(s), "Block", None) => s.block.as_ref().map(AstNode::Block),
        (AstNode::Statement(s), "IfStmt", None) => s.if_stmt.as_ref().map(AstNode::IfStmt),
        (AstNode::Statement(s), "AnyStmt", None) => s.any_stmt.as_ref().map(AstNode::AnyStmt),
        (AstNode::Statement(s), "ForStmt", None) => s.for_stmt.as_ref().map(AstNode::ForStmt),
        (AstNode::Statement(s), "WhileStmt", None) => {
            s.while_stmt.as_ref().map(AstNode::WhileStmt)
        }
        (AstNode::Statement(s), "ReturnStmt", None) => {
            s.return_stmt.as_ref().map(AstNode::ReturnStmt)
        }
        (AstNode::Statement(s), "CallStmt", None) => s.call_stmt.as_ref().map(AstNode::CallStmt),
        (AstNode::Statement(s), "RequireStmt", None) => {
            s.require_stmt.as_ref().map(AstNode::RequireStmt)
        }
        (AstNode::IfStmt(s), "Branches", Some(i)) => s.branches.get(i).map(AstNode::Branch),
        (AstNode::Branch(b), "Block", None) => Some(AstNode::Block(&b.block)),
        (AstNode::AnyStmt(s), "Block", None) => Some(AstNode::Block(&s.block)),
        (AstNode::ForStmt(s), "Block", None) => Some(AstNode::Block(&s.block)),
        (AstNode::WhileStmt(s), "Block", None) => Some(AstNode::Block(&s.block)),
        _ => None,
    }
}

/// Resolves a program counter to the AST node it addresses.
pub fn resolve<'a>(file: &'a File, path: &str) -> Result<AstNode<'a>, PathError> {
    let mut node = AstNode::File(file);
    if path.is_empty() {
        return Ok(node);
    }
    for segment in path.split('.') {
        let (field, index) = parse_segment(segment, path)?;
        node = step(node, field, index).ok_or_else(|| PathError::NotFound(path.to_string()))?;
    }
    Ok(node)
}

/// Path of the statement following the last `Stmts[i]` segment, or the
/// end-of-block marker when it was the last statement of its block.
///
/// Top-level statements have no enclosing block, so the next index is
/// returned even when out of range.
pub fn next_stmt_path(file: &File, path: &str) -> String {
    let parts: Vec<&str> = path.split('.').collect();
    for i in (0..parts.len()).rev() {
        let Ok((field, Some(index))) = parse_segment(parts[i], path) else {
            continue;
        };
        if field != "Stmts" {
            continue;
        }
        if i == 0 {
            return format!("Stmts[{}]", index + 1);
        }
        let prefix = parts[..i].join(".");
        let next = format!("{}.Stmts[{}]", prefix, index + 1);
        if resolve(file, &next).is_ok() {
            return next;
        }
        return format!("{}.$", prefix);
    }
    String::new()
}

/// Prefix of `path` up to and including its last `.Block` segment.
pub fn parent_block_path(path: &str) -> String {
    match path.rfind(".Block") {
        Some(idx) => format!("{}.Block", &path[..idx]),
        None => String::new(),
    }
}

/// Prefix of `path` before the last occurrence of `segment`, or empty when absent.
pub fn remove_last_segment(path: &str, segment: &str) -> String {
    match path.rfind(segment) {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

pub fn remove_last_block(path: &str) -> String {
    remove_last_segment(path, ".Block")
}

pub fn remove_last_for_stmt(path: &str) -> String {
    remove_last_segment(path, ".ForStmt")
}

pub fn remove_last_while_stmt(path: &str) -> String {
    remove_last_segment(path, ".WhileStmt")
}

/// Strips the innermost `for` or `while` loop, whichever is nested deeper.
pub fn remove_last_loop(path: &str) -> String {
    let for_idx = path.rfind(".ForStmt");
    let while_idx = path.rfind(".WhileStmt");
    if for_idx > while_idx {
        remove_last_for_stmt(path)
    } else {
        remove_last_while_stmt(path)
    }
}

/// Replaces the last `Stmts[i]` segment (and anything after it) with `$`.
pub fn end_of_block(path: &str) -> String {
    let mut search_end = path.len();
    while let Some(idx) = path[..search_end].rfind("Stmts[") {
        let rest = &path[idx + "Stmts[".len()..];
        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits > 0 && rest.as_bytes().get(digits) == Some(&b']') {
            return format!("{}$", &path[..idx]);
        }
        search_end = idx;
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> File {
        let json = r#"{
            "actions": [{
                "name": "Add",
                "block": {"flow": "FLOW_ATOMIC", "stmts": [
                    {"anyStmt": {"loopVars": ["x"], "pyExpr": "range(2)", "block": {"stmts": [
                        {"ifStmt": {"branches": [{"condition": "x", "block": {"stmts": [
                            {"pyStmt": {"code": "a = 1"}},
                            {"pyStmt": {"code": "a = 2"}}
                        ]}}]}}
                    ]}}},
                    {"pyStmt": {"code": "b = 1"}}
                ]}
            }],
            "stmts": [{"pyStmt": {"code": "N = 3"}}]
        }"#;
        File::from_json(json).unwrap()
    }

    #[test]
    fn test_resolve() {
        let file = sample_file();
        assert!(matches!(resolve(&file, "Actions[0]"), Ok(AstNode::Action(_))));
        assert!(matches!(
            resolve(&file, "Actions[0].Block"),
            Ok(AstNode::Block(_))
        ));
        match resolve(
            &file,
            "Actions[0].Block.Stmts[0].AnyStmt.Block.Stmts[0].IfStmt.Branches[0].Block.Stmts[1]",
        ) {
            Ok(AstNode::Statement(s)) => {
                assert_eq!(s.py_stmt.as_ref().unwrap().code, "a = 2")
            }
            other => panic!("expected statement, got {:?}", other),
        }
        assert!(matches!(
            resolve(&file, "Actions[0].Block.$"),
            Ok(AstNode::End)
        ));
        assert_eq!(
            resolve(&file, "Actions[3]").unwrap_err(),
            PathError::NotFound("Actions[3]".to_string())
        );
        assert!(matches!(
            resolve(&file, "Actions[x]"),
            Err(PathError::Malformed { .. })
        ));
    }

    #[test]
    fn test_end_of_block() {
        assert_eq!(
            end_of_block(
                "Actions[0].Block.Stmts[0].AnyStmt.Block.Stmts[0].IfStmt.Branches[0].Block.Stmts[0]"
            ),
            "Actions[0].Block.Stmts[0].AnyStmt.Block.Stmts[0].IfStmt.Branches[0].Block.$"
        );
        assert_eq!(end_of_block("Actions[0].Block.Stmts[12]"), "Actions[0].Block.$");
        assert_eq!(end_of_block("Actions[0].Block"), "Actions[0].Block");
    }

    #[test]
    fn test_next_stmt_path() {
        let file = sample_file();
        let base = "Actions[0].Block.Stmts[0].AnyStmt.Block.Stmts[0].IfStmt.Branches[0].Block";
        assert_eq!(
            next_stmt_path(&file, &format!("{}.Stmts[0].PyStmt.Code", base)),
            format!("{}.Stmts[1]", base)
        );
        assert_eq!(
            next_stmt_path(&file, &format!("{}.Stmts[1]", base)),
            format!("{}.$", base)
        );
        assert_eq!(
            next_stmt_path(&file, "Actions[0].Block.Stmts[0]"),
            "Actions[0].Block.Stmts[1]"
        );
        assert_eq!(next_stmt_path(&file, "Stmts[0]"), "Stmts[1]");
        assert_eq!(next_stmt_path(&file, "Actions[0]"), "");
    }

    #[test]
    fn test_parent_block_path() {
        assert_eq!(
            parent_block_path("Actions[0].Block.Stmts[0].AnyStmt.Block.Stmts[1]"),
            "Actions[0].Block.Stmts[0].AnyStmt.Block"
        );
        assert_eq!(parent_block_path("Actions[0]"), "");
    }

    #[test]
    fn test_remove_last_helpers() {
        let path = "Actions[0].Block.Stmts[0].ForStmt.Block.Stmts[0].WhileStmt.Block.Stmts[2]";
        assert_eq!(
            remove_last_block(path),
            "Actions[0].Block.Stmts[0].ForStmt.Block.Stmts[0].WhileStmt"
        );
        assert_eq!(
            remove_last_loop(path),
            "Actions[0].Block.Stmts[0].ForStmt.Block.Stmts[0]"
        );
        assert_eq!(remove_last_for_stmt(path), "Actions[0].Block.Stmts[0]");
        assert_eq!(
            remove_last_while_stmt("Actions[0].Block.Stmts[1].WhileStmt"),
            "Actions[0].Block.Stmts[1]"
        );
        assert_eq!(remove_last_segment("Actions[0]", ".Block"), "");
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn end_of_block_is_idempotent(indices in proptest::collection::vec(0usize..20, 1..6)) {
                let mut path = String::from("Actions[0].Block");
                for i in &indices {
                    path.push_str(&format!(".Stmts[{}].AnyStmt.Block", i));
                }
                path.push_str(".Stmts[0]");
                let end = end_of_block(&path);
                prop_assert!(end.ends_with(".Block.$"));
                prop_assert_eq!(parent_block_path(&end), parent_block_path(&path));
            }
        }
    }
}
