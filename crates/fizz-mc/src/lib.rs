//! Explicit-state model checker for FizzBee models.
//!
//! A [`Model`] is loaded from the JSON AST, and a [`Processor`] explores
//! every state it can reach: actions are interpreted statement by statement
//! on per-process threads, non-deterministic choices fork, and states are
//! deduplicated by fingerprint (optionally modulo symmetry). Safety,
//! transition, `exists` and liveness invariants are checked along the way
//! or over the finished graph; [`markov`] prices the graph with a perf
//! model.

pub mod channel;
pub mod collection;
pub mod config;
pub mod durability;
pub mod error;
pub mod frame;
pub mod graph;
pub mod heap;
pub mod invariants;
pub mod liveness;
pub mod markov;
pub mod model;
pub mod output;
pub mod process;
pub mod processor;
pub mod role;
pub mod state;
pub mod store;
pub mod symmetry;
pub mod thread;

pub use config::{
    ActionOptions, CheckConfig, LivenessMode, Options, PerfModel, StateSpaceOptions, Strategy,
};
pub use error::{CheckError, CheckResult, ConfigError, ModelError, ModelResult};
pub use graph::{Graph, Link, LinkKind, Node, NodeId, TraceStep};
pub use markov::{Analysis, Histogram, MarkovChain};
pub use model::Model;
pub use output::OutputWriter;
pub use process::{InvariantPosition, Process};
pub use processor::{CheckOutcome, Processor};
pub use state::Fingerprint;
pub use store::VisitedStore;
