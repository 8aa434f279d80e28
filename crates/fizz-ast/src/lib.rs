//! AST model and program-counter paths for FizzBee specifications.
//!
//! The AST is produced by an external parser and arrives as proto-style
//! JSON. Execution state refers into it by dotted paths such as
//! `Actions[0].Block.Stmts[2].IfStmt.Branches[1].Block.Stmts[0]`.

pub mod ast;
pub mod path;

pub use ast::*;
pub use path::{
    end_of_block, next_stmt_path, parent_block_path, remove_last_block, remove_last_for_stmt,
    remove_last_loop, remove_last_segment, remove_last_while_stmt, resolve, AstNode, PathError,
};
