//! Error types for the model checker.

use fizz_ast::PathError;
use fizz_eval::EvalError;
use std::path::PathBuf;
use thiserror::Error;

/// A defect in the model itself, raised while interpreting it.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{context}: {source}")]
    Eval {
        context: String,
        #[source]
        source: EvalError,
    },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("unsupported construct at {pc}: {message}")]
    Unsupported { pc: String, message: String },

    #[error("missing argument '{param}' in call to {function}")]
    MissingArgument { function: String, param: String },

    #[error("invalid @state decorator on role {role}: {message}")]
    Durability { role: String, message: String },

    #[error("{0}")]
    Invalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ModelError {
    pub fn eval(context: impl Into<String>, source: EvalError) -> Self {
        ModelError::Eval {
            context: context.into(),
            source,
        }
    }

    pub fn unsupported(pc: &str, message: impl Into<String>) -> Self {
        ModelError::Unsupported {
            pc: pc.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error only prunes the current transition.
    pub fn is_disable(&self) -> bool {
        matches!(self, ModelError::Eval { source, .. } if source.is_disable())
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Errors loading `fizz.yaml` or a perf model.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("invalid option: {0}")]
    Invalid(String),
}

/// Top-level error of a checker run.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse AST {path}: {source}")]
    Ast {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write output: {0}")]
    Output(String),

    #[error("deadlock reached while checking liveness at node {0}")]
    LivenessDeadlock(usize),
}

impl CheckError {
    pub fn is_disable(&self) -> bool {
        match self {
            CheckError::Eval(e) => e.is_disable(),
            CheckError::Model(e) => e.is_disable(),
            _ => false,
        }
    }
}

pub type CheckResult<T> = Result<T, CheckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_detection() {
        let err = ModelError::eval("Actions[0]", EvalError::DisableTransition("full".into()));
        assert!(err.is_disable());
        assert!(CheckError::from(err).is_disable());

        let err = ModelError::eval("Actions[0]", EvalError::DivisionByZero);
        assert!(!err.is_disable());
        assert_eq!(err.to_string(), "Actions[0]: division by zero");
    }
}
