//! Model variables shared by every thread of a process.

use fizz_eval::Value;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Heap {
    /// State variables. Part of the state fingerprint.
    pub state: BTreeMap<String, Value>,
    /// Frozen results of pre-init, shared by every process of a run.
    pub globals: Arc<BTreeMap<String, Value>>,
}

impl Heap {
    pub fn new(globals: Arc<BTreeMap<String, Value>>) -> Self {
        Self {
            state: BTreeMap::new(),
            globals,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.state.get(name).or_else(|| self.globals.get(name))
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    /// Overwrites a state variable if it exists. Returns whether it did.
    pub fn update_if_exists(&mut self, name: &str, value: Value) -> bool {
        match self.state.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.state.insert(name.into(), value);
    }
}

// Globals are identical across a run, so only the state is hashed.
impl Hash for Heap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.state.hash(state);
    }
}

impl PartialEq for Heap {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}

impl Eq for Heap {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_shadows_globals() {
        let globals = Arc::new(BTreeMap::from([("N".to_string(), Value::Int(3))]));
        let mut heap = Heap::new(globals);
        assert_eq!(heap.get("N"), Some(&Value::Int(3)));
        assert!(heap.is_global("N"));

        assert!(!heap.update_if_exists("x", Value::Int(1)));
        heap.insert("x", Value::Int(1));
        assert!(heap.update_if_exists("x", Value::Int(2)));
        assert_eq!(heap.get("x"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_globals_not_hashed() {
        let a = Heap::new(Arc::new(BTreeMap::from([("N".to_string(), Value::Int(3))])));
        let b = Heap::default();
        assert_eq!(
            crate::state::fingerprint_of(&a),
            crate::state::fingerprint_of(&b)
        );
        assert_eq!(a, b);
    }
}
