//! Expression engine for the Python subset used in FizzBee models.
//!
//! Statements inside actions and functions are small Python snippets:
//! assignments, method calls, comprehensions and the like. This crate
//! lexes, parses and evaluates them against a [`Host`] that owns the
//! variables, and defines the [`Value`] type that model states are made
//! of.

pub mod ast;
pub mod builtins;
pub mod eval;
pub mod itertools;
pub mod lexer;
pub mod methods;
pub mod ops;
pub mod parser;
pub mod symmetry;
pub mod token;
pub mod value;

pub use eval::{
    collect_symmetric_ids, display_str, eval, eval_bool, exec, Env, EvalError, EvalResult, Host,
    Interpreter,
};
pub use parser::{parse_expr, parse_program, ParseError};
pub use symmetry::{DomainDef, DomainKind, SymmetryContext};
pub use value::{
    ChannelSpec, ModelValue, RangeValue, Record, RecordKind, RoleRef, RoleStub, SymmetricValue,
    Value,
};
