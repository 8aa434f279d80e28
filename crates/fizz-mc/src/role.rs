//! Role instances and inter-role messages.

use crate::durability::Durability;
use fizz_eval::{DomainKind, EvalError, EvalResult, ModelValue, RoleRef, SymmetricValue, Value};
use serde::Serialize;
use std::collections::BTreeMap;

/// State of one role instance. Roles are stored in the owning process and
/// referenced from values by [`RoleRef`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleInstance {
    pub rref: RoleRef,
    pub symmetric: bool,
    /// Constructor arguments; immutable.
    pub params: BTreeMap<String, Value>,
    pub fields: BTreeMap<String, Value>,
    /// Ephemeral fields as they were when `Init` finished.
    pub init_fields: Option<BTreeMap<String, Value>>,
}

impl RoleInstance {
    pub fn new(rref: RoleRef, symmetric: bool, params: BTreeMap<String, Value>) -> Self {
        Self {
            rref,
            symmetric,
            params,
            fields: BTreeMap::new(),
            init_fields: None,
        }
    }

    /// `__id__`: interchangeable for symmetric roles, distinguished otherwise.
    pub fn id_value(&self) -> Value {
        if self.symmetric {
            Value::Symmetric(SymmetricValue {
                domain: self.rref.name.clone(),
                kind: DomainKind::Nominal,
                id: self.rref.id as i64,
            })
        } else {
            Value::Model(ModelValue {
                prefix: self.rref.name.clone(),
                id: self.rref.id as i64,
            })
        }
    }

    pub fn attr(&self, name: &str) -> EvalResult<Value> {
        if name == "__id__" {
            return Ok(self.id_value());
        }
        self.fields
            .get(name)
            .or_else(|| self.params.get(name))
            .cloned()
            .ok_or_else(|| EvalError::AttributeError {
                type_name: self.rref.name.to_string(),
                attr: name.to_string(),
            })
    }

    pub fn set_field(&mut self, name: &str, value: Value) -> EvalResult<()> {
        if self.params.contains_key(name) || name == "__id__" {
            return Err(EvalError::ImmutableField {
                type_name: self.rref.name.to_string(),
                field: name.to_string(),
            });
        }
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    /// Records the ephemeral fields so a crash can restore them.
    pub fn snapshot(&mut self, durability: &Durability) {
        let snapshot = self
            .fields
            .iter()
            .filter(|(name, _)| durability.is_ephemeral(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.init_fields = Some(snapshot);
    }

    /// Resets ephemeral fields to their post-`Init` values; fields with no
    /// snapshot are dropped. Durable fields survive.
    pub fn crash(&mut self, durability: &Durability) {
        let empty = BTreeMap::new();
        let snapshot = self.init_fields.as_ref().unwrap_or(&empty);
        let ephemeral: Vec<String> = self
            .fields
            .keys()
            .filter(|name| durability.is_ephemeral(name))
            .cloned()
            .collect();
        for name in ephemeral {
            self.fields.remove(&name);
        }
        for (name, value) in snapshot {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    /// Applies `f` to every value the role holds.
    pub fn map_values(&self, f: &mut dyn FnMut(&Value) -> Value) -> RoleInstance {
        let map = |m: &BTreeMap<String, Value>, f: &mut dyn FnMut(&Value) -> Value| {
            m.iter().map(|(k, v)| (k.clone(), f(v))).collect::<BTreeMap<_, _>>()
        };
        RoleInstance {
            rref: self.rref.clone(),
            symmetric: self.symmetric,
            params: map(&self.params, f),
            fields: map(&self.fields, f),
            init_fields: self.init_fields.as_ref().map(|m| map(m, f)),
        }
    }
}

/// A call or return between roles, shown on the link that carried it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Message {
    pub sender: String,
    pub receiver: String,
    pub name: String,
    pub args: Vec<(String, String)>,
    /// Set when the caller was not atomic, so the call may be lost.
    pub lossy: bool,
    pub is_return: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn cache_role() -> RoleInstance {
        let mut role = RoleInstance::new(
            RoleRef::new("Cache", 0),
            false,
            BTreeMap::from([("size".to_string(), Value::Int(4))]),
        );
        role.fields.insert("durable".into(), Value::Int(0));
        role.fields.insert("cache".into(), Value::Int(0));
        role
    }

    #[test]
    fn test_params_are_immutable() {
        let mut role = cache_role();
        assert_eq!(role.attr("size").unwrap(), Value::Int(4));
        assert!(matches!(
            role.set_field("size", Value::Int(1)),
            Err(EvalError::ImmutableField { .. })
        ));
        role.set_field("cache", Value::Int(2)).unwrap();
        assert_eq!(role.attr("cache").unwrap(), Value::Int(2));
        assert!(role.attr("missing").is_err());
    }

    #[test]
    fn test_id_value_kind() {
        let role = cache_role();
        assert_eq!(role.id_value().to_string(), "Cache0");
        assert!(matches!(role.id_value(), Value::Model(_)));
        let sym = RoleInstance::new(RoleRef::new("Node", 1), true, BTreeMap::new());
        assert!(matches!(sym.id_value(), Value::Symmetric(_)));
    }

    #[test]
    fn test_crash_restores_ephemeral_snapshot() {
        let durability = Durability {
            durable: None,
            ephemeral: Some(BTreeSet::from(["cache".to_string(), "tmp".to_string()])),
        };
        let mut role = cache_role();
        role.snapshot(&durability);
        role.fields.insert("durable".into(), Value::Int(1));
        role.fields.insert("cache".into(), Value::Int(1));
        role.fields.insert("tmp".into(), Value::Int(9));

        role.crash(&durability);
        assert_eq!(role.fields["durable"], Value::Int(1));
        assert_eq!(role.fields["cache"], Value::Int(0));
        assert!(!role.fields.contains_key("tmp"));
    }
}
