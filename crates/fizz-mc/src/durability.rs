//! `@state(durable=[...])` / `@state(ephemeral=[...])` role decorators.

use crate::error::{ModelError, ModelResult};
use fizz_ast::Role;
use fizz_eval::{Env, Value};
use std::collections::BTreeSet;

const STATE_DECORATOR: &str = "state";

/// Which role fields survive a crash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Durability {
    pub durable: Option<BTreeSet<String>>,
    pub ephemeral: Option<BTreeSet<String>>,
}

impl Durability {
    /// Reads the role's `@state` decorator, if any.
    pub fn from_role(role: &Role) -> ModelResult<Option<Durability>> {
        let decorators: Vec<_> = role
            .decorators
            .iter()
            .filter(|d| d.name == STATE_DECORATOR)
            .collect();
        let invalid = |message: String| ModelError::Durability {
            role: role.name.clone(),
            message,
        };
        let decorator = match decorators.as_slice() {
            [] => return Ok(None),
            [d] => d,
            _ => return Err(invalid("at most one @state decorator is allowed".into())),
        };
        let [arg] = decorator.args.as_slice() else {
            return Err(invalid(format!(
                "expected exactly one argument, got {}",
                decorator.args.len()
            )));
        };

        let value = fizz_eval::eval(&arg.py_expr, &mut Env::new())
            .map_err(|e| ModelError::eval(format!("@state({})", arg.name), e))?;
        let fields = string_list(&value)
            .ok_or_else(|| invalid(format!("{} must be a list of strings", arg.name)))?;

        match arg.name.as_str() {
            "durable" => Ok(Some(Durability {
                durable: Some(fields),
                ephemeral: None,
            })),
            "ephemeral" => Ok(Some(Durability {
                durable: None,
                ephemeral: Some(fields),
            })),
            other => Err(invalid(format!(
                "unknown argument '{}', expected durable or ephemeral",
                other
            ))),
        }
    }

    pub fn is_ephemeral(&self, field: &str) -> bool {
        if let Some(ephemeral) = &self.ephemeral {
            return ephemeral.contains(field);
        }
        match &self.durable {
            Some(durable) => !durable.contains(field),
            None => false,
        }
    }
}

fn string_list(value: &Value) -> Option<BTreeSet<String>> {
    match value {
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(json: &str) -> Role {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_no_decorator() {
        let r = role(r#"{"name": "Server"}"#);
        assert_eq!(Durability::from_role(&r).unwrap(), None);
    }

    #[test]
    fn test_ephemeral_list() {
        let r = role(
            r#"{"name": "Cache", "decorators": [
                {"name": "state", "args": [{"name": "ephemeral", "pyExpr": "[\"cache\"]"}]}
            ]}"#,
        );
        let d = Durability::from_role(&r).unwrap().unwrap();
        assert!(d.is_ephemeral("cache"));
        assert!(!d.is_ephemeral("durable"));
    }

    #[test]
    fn test_durable_list_makes_the_rest_ephemeral() {
        let r = role(
            r#"{"name": "Db", "decorators": [
                {"name": "state", "args": [{"name": "durable", "pyExpr": "['log']"}]}
            ]}"#,
        );
        let d = Durability::from_role(&r).unwrap().unwrap();
        assert!(!d.is_ephemeral("log"));
        assert!(d.is_ephemeral("memtable"));
    }

    #[test]
    fn test_invalid_decorators() {
        for json in [
            r#"{"name": "R", "decorators": [{"name": "state", "args": []}]}"#,
            r#"{"name": "R", "decorators": [{"name": "state", "args": [{"name": "volatile", "pyExpr": "['a']"}]}]}"#,
            r#"{"name": "R", "decorators": [{"name": "state", "args": [{"name": "durable", "pyExpr": "[1]"}]}]}"#,
            r#"{"name": "R", "decorators": [
                {"name": "state", "args": [{"name": "durable", "pyExpr": "['a']"}]},
                {"name": "state", "args": [{"name": "ephemeral", "pyExpr": "['b']"}]}
            ]}"#,
        ] {
            assert!(
                matches!(Durability::from_role(&role(json)), Err(ModelError::Durability { .. })),
                "{}",
                json
            );
        }
    }
}
