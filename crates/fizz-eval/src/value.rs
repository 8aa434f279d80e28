//! Runtime values for the expression engine.
//!
//! Containers are reference counted and copy-on-write: cloning a `Value`
//! is O(1), and mutation goes through `Arc::make_mut`, so a clone taken
//! before a mutation never observes it. `Value` has a total order that
//! doubles as the canonical order of sets, dict keys and bags.
//!
//! Host-owned entities (roles, channels) are stored by reference; the
//! host keeps their state in its own arena.

use crate::symmetry::{DomainDef, DomainKind};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Reference to a role instance: `(role name, per-name reference number)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoleRef {
    pub name: Arc<str>,
    pub id: u32,
}

impl RoleRef {
    pub fn new(name: impl Into<Arc<str>>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    /// Short reference string, e.g. `Server#0`.
    pub fn short(&self) -> String {
        format!("{}#{}", self.name, self.id)
    }
}

/// A channel created with `Channel(...)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelSpec {
    pub id: u32,
    pub ordering: Arc<str>,
    pub delivery: Arc<str>,
    pub blocking: Arc<str>,
}

/// A role bound to a channel; calls on it become channel messages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoleStub {
    pub role: RoleRef,
    pub channel: u32,
}

/// An interchangeable identifier drawn from a symmetry domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymmetricValue {
    pub domain: Arc<str>,
    pub kind: DomainKind,
    pub id: i64,
}

/// A distinguished, non-interchangeable identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelValue {
    pub prefix: Arc<str>,
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKind {
    /// `record(...)`: fields may be reassigned.
    Record,
    /// `struct(...)`: frozen.
    Struct,
    /// `enum(...)`: frozen, each field holds its own name.
    Enum,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Record {
    pub kind: RecordKind,
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        if self.step > 0 && self.start < self.stop {
            ((self.stop - self.start - 1) / self.step + 1) as usize
        } else if self.step < 0 && self.start > self.stop {
            ((self.start - self.stop - 1) / (-self.step) + 1) as usize
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len() as i64).map(move |i| self.start + i * self.step)
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Range(RangeValue),
    List(Arc<Vec<Value>>),
    Tuple(Arc<Vec<Value>>),
    Set(Arc<BTreeSet<Value>>),
    Dict(Arc<BTreeMap<Value, Value>>),
    /// Multiset kept in canonical (sorted) order.
    Bag(Arc<Vec<Value>>),
    /// Insertion-ordered set that compares as unordered and admits unhashable elements.
    GenericSet(Arc<Vec<Value>>),
    /// Insertion-ordered map that compares as unordered and admits unhashable keys.
    GenericMap(Arc<Vec<(Value, Value)>>),
    Record(Arc<Record>),
    Role(RoleRef),
    /// Constructor for a declared role.
    RoleType(Arc<str>),
    Channel(Arc<ChannelSpec>),
    RoleStub(RoleStub),
    Symmetric(SymmetricValue),
    Model(ModelValue),
    Domain(Arc<DomainDef>),
    /// A built-in function, e.g. `len` or `itertools.product`.
    Builtin(&'static str),
    Module(&'static str),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Arc::new(items))
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Set(Arc::new(items.into_iter().collect()))
    }

    pub fn dict(items: impl IntoIterator<Item = (Value, Value)>) -> Value {
        Value::Dict(Arc::new(items.into_iter().collect()))
    }

    pub fn bag(items: impl IntoIterator<Item = Value>) -> Value {
        let mut items: Vec<Value> = items.into_iter().collect();
        items.sort();
        Value::Bag(Arc::new(items))
    }

    pub fn generic_set(items: impl IntoIterator<Item = Value>) -> Value {
        let mut out: Vec<Value> = Vec::new();
        for item in items {
            if !out.contains(&item) {
                out.push(item);
            }
        }
        Value::GenericSet(Arc::new(out))
    }

    pub fn generic_map(items: impl IntoIterator<Item = (Value, Value)>) -> Value {
        let mut out: Vec<(Value, Value)> = Vec::new();
        for (k, v) in items {
            match out.iter_mut().find(|(existing, _)| *existing == k) {
                Some(entry) => entry.1 = v,
                None => out.push((k, v)),
            }
        }
        Value::GenericMap(Arc::new(out))
    }

    pub fn record(kind: RecordKind, fields: BTreeMap<String, Value>) -> Value {
        Value::Record(Arc::new(Record { kind, fields }))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Range(_) => "range",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::Dict(_) => "dict",
            Value::Bag(_) => "bag",
            Value::GenericSet(_) => "genericset",
            Value::GenericMap(_) => "genericmap",
            Value::Record(r) => match r.kind {
                RecordKind::Record => "record",
                RecordKind::Struct => "struct",
                RecordKind::Enum => "enum",
            },
            Value::Role(_) => "role",
            Value::RoleType(_) => "role_type",
            Value::Channel(_) => "channel",
            Value::RoleStub(_) => "role_stub",
            Value::Symmetric(_) => "symmetric_value",
            Value::Model(_) => "model_value",
            Value::Domain(_) => "symmetry_domain",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
        }
    }

    /// Python truthiness.
    pub fn truth(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Range(r) => !r.is_empty(),
            Value::List(items) | Value::Tuple(items) | Value::Bag(items) => !items.is_empty(),
            Value::GenericSet(items) => !items.is_empty(),
            Value::Set(items) => !items.is_empty(),
            Value::Dict(items) => !items.is_empty(),
            Value::GenericMap(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// Whether the value may be a `set` element or `dict` key.
    pub fn is_hashable(&self) -> bool {
        match self {
            Value::List(_)
            | Value::Set(_)
            | Value::Dict(_)
            | Value::Bag(_)
            | Value::GenericSet(_)
            | Value::GenericMap(_)
            | Value::Role(_) => false,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            Value::Record(r) => {
                r.kind != RecordKind::Record && r.fields.values().all(Value::is_hashable)
            }
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Number of elements, for values that have a length.
    pub fn len(&self) -> Option<usize> {
        Some(match self {
            Value::Str(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::Range(r) => r.len(),
            Value::List(items) | Value::Tuple(items) | Value::Bag(items) => items.len(),
            Value::GenericSet(items) => items.len(),
            Value::Set(items) => items.len(),
            Value::Dict(items) => items.len(),
            Value::GenericMap(items) => items.len(),
            Value::Record(r) => r.fields.len(),
            _ => return None,
        })
    }

    /// Materialises the elements produced by iterating the value, or
    /// `None` if it is not iterable. Maps iterate over their keys.
    pub fn iterate(&self) -> Option<Vec<Value>> {
        Some(match self {
            Value::Str(s) => s.chars().map(|c| Value::str(&c.to_string())).collect(),
            Value::Bytes(b) => b.iter().map(|x| Value::Int(*x as i64)).collect(),
            Value::Range(r) => r.iter().map(Value::Int).collect(),
            Value::List(items) | Value::Tuple(items) | Value::Bag(items) => (**items).clone(),
            Value::GenericSet(items) => (**items).clone(),
            Value::Set(items) => items.iter().cloned().collect(),
            Value::Dict(items) => items.keys().cloned().collect(),
            Value::GenericMap(items) => items.iter().map(|(k, _)| k.clone()).collect(),
            _ => return None,
        })
    }

    fn rank(&self) -> u8 {
        match self {
            Value::None => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Str(_) => 4,
            Value::Bytes(_) => 5,
            Value::Range(_) => 6,
            Value::List(_) => 7,
            Value::Tuple(_) => 8,
            Value::Set(_) => 9,
            Value::Dict(_) => 10,
            Value::Bag(_) => 11,
            Value::GenericSet(_) => 12,
            Value::GenericMap(_) => 13,
            Value::Record(_) => 14,
            Value::Role(_) => 15,
            Value::RoleType(_) => 16,
            Value::Channel(_) => 17,
            Value::RoleStub(_) => 18,
            Value::Symmetric(_) => 19,
            Value::Model(_) => 20,
            Value::Domain(_) => 21,
            Value::Builtin(_) => 22,
            Value::Module(_) => 23,
        }
    }

    /// Rebuilds the value top-down, replacing every node for which `f`
    /// returns `Some` and recursing into the rest.
    pub fn map_leaves(&self, f: &mut dyn FnMut(&Value) -> Option<Value>) -> Value {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        match self {
            Value::List(items) => Value::List(Arc::new(map_vec(items, f))),
            Value::Tuple(items) => Value::Tuple(Arc::new(map_vec(items, f))),
            Value::Bag(items) => {
                let mut items = map_vec(items, f);
                items.sort();
                Value::Bag(Arc::new(items))
            }
            Value::GenericSet(items) => Value::GenericSet(Arc::new(map_vec(items, f))),
            Value::Set(items) => Value::Set(Arc::new(items.iter().map(|v| v.map_leaves(f)).collect())),
            Value::Dict(items) => Value::Dict(Arc::new(
                items
                    .iter()
                    .map(|(k, v)| (k.map_leaves(f), v.map_leaves(f)))
                    .collect(),
            )),
            Value::GenericMap(items) => Value::GenericMap(Arc::new(
                items
                    .iter()
                    .map(|(k, v)| (k.map_leaves(f), v.map_leaves(f)))
                    .collect(),
            )),
            Value::Record(r) => Value::Record(Arc::new(Record {
                kind: r.kind,
                fields: r
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.map_leaves(f)))
                    .collect(),
            })),
            other => other.clone(),
        }
    }

    /// Visits every value reachable from `self`, containers included.
    pub fn visit(&self, f: &mut dyn FnMut(&Value)) {
        f(self);
        match self {
            Value::List(items) | Value::Tuple(items) | Value::Bag(items) => {
                items.iter().for_each(|v| v.visit(f))
            }
            Value::GenericSet(items) => items.iter().for_each(|v| v.visit(f)),
            Value::Set(items) => items.iter().for_each(|v| v.visit(f)),
            Value::Dict(items) => items.iter().for_each(|(k, v)| {
                k.visit(f);
                v.visit(f);
            }),
            Value::GenericMap(items) => items.iter().for_each(|(k, v)| {
                k.visit(f);
                v.visit(f);
            }),
            Value::Record(r) => r.fields.values().for_each(|v| v.visit(f)),
            _ => {}
        }
    }
}

fn map_vec(items: &[Value], f: &mut dyn FnMut(&Value) -> Option<Value>) -> Vec<Value> {
    items.iter().map(|v| v.map_leaves(f)).collect()
}

fn sorted<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    let mut out = items.to_vec();
    out.sort();
    out
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (None, None) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Range(a), Range(b)) => a.cmp(b),
            (List(a), List(b)) | (Tuple(a), Tuple(b)) | (Bag(a), Bag(b)) => a.cmp(b),
            (Set(a), Set(b)) => a.cmp(b),
            (Dict(a), Dict(b)) => a.cmp(b),
            (GenericSet(a), GenericSet(b)) => sorted(a).cmp(&sorted(b)),
            (GenericMap(a), GenericMap(b)) => sorted(a).cmp(&sorted(b)),
            (Record(a), Record(b)) => a.cmp(b),
            (Role(a), Role(b)) => a.cmp(b),
            (RoleType(a), RoleType(b)) => a.cmp(b),
            (Channel(a), Channel(b)) => a.cmp(b),
            (RoleStub(a), RoleStub(b)) => a.cmp(b),
            (Symmetric(a), Symmetric(b)) => a.cmp(b),
            (Model(a), Model(b)) => a.cmp(b),
            (Domain(a), Domain(b)) => a.cmp(b),
            (Builtin(a), Builtin(b)) => a.cmp(b),
            (Module(a), Module(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::None => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(n) => n.hash(state),
            Value::Float(x) => x.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Range(r) => r.hash(state),
            Value::List(items) | Value::Tuple(items) | Value::Bag(items) => items.hash(state),
            Value::Set(items) => items.hash(state),
            Value::Dict(items) => items.hash(state),
            Value::GenericSet(items) => sorted(items).hash(state),
            Value::GenericMap(items) => sorted(items).hash(state),
            Value::Record(r) => r.hash(state),
            Value::Role(r) => r.hash(state),
            Value::RoleType(n) => n.hash(state),
            Value::Channel(c) => c.hash(state),
            Value::RoleStub(s) => s.hash(state),
            Value::Symmetric(s) => s.hash(state),
            Value::Model(m) => m.hash(state),
            Value::Domain(d) => d.hash(state),
            Value::Builtin(name) | Value::Module(name) => name.hash(state),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: impl IntoIterator<Item = impl fmt::Display>) -> fmt::Result {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        write!(f, "{:.1}", x)
    } else {
        write!(f, "{}", x)
    }
}

/// Canonical string form, close to Python's `repr`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write_float(f, *x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            Value::Range(r) if r.step == 1 => write!(f, "range({}, {})", r.start, r.stop),
            Value::Range(r) => write!(f, "range({}, {}, {})", r.start, r.stop, r.step),
            Value::List(items) => {
                write!(f, "[")?;
                write_seq(f, items.iter())?;
                write!(f, "]")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                write_seq(f, items.iter())?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::Set(items) => {
                write!(f, "set([")?;
                write_seq(f, items.iter())?;
                write!(f, "])")
            }
            Value::Dict(items) => {
                write!(f, "{{")?;
                write_seq(f, items.iter().map(|(k, v)| format!("{}: {}", k, v)))?;
                write!(f, "}}")
            }
            Value::Bag(items) => {
                write!(f, "bag([")?;
                write_seq(f, items.iter())?;
                write!(f, "])")
            }
            Value::GenericSet(items) => {
                write!(f, "genericset([")?;
                write_seq(f, sorted(items).iter())?;
                write!(f, "])")
            }
            Value::GenericMap(items) => {
                write!(f, "genericmap({{")?;
                write_seq(f, sorted(items).iter().map(|(k, v)| format!("{}: {}", k, v)))?;
                write!(f, "}})")
            }
            Value::Record(r) => {
                let name = match r.kind {
                    RecordKind::Record => "record",
                    RecordKind::Struct => "struct",
                    RecordKind::Enum => "enum",
                };
                write!(f, "{}(", name)?;
                write_seq(f, r.fields.iter().map(|(k, v)| format!("{} = {}", k, v)))?;
                write!(f, ")")
            }
            Value::Role(r) => write!(f, "{}#{}", r.name, r.id),
            Value::RoleType(name) => write!(f, "<role {}>", name),
            Value::Channel(c) => write!(
                f,
                "Channel(ordering={:?}, delivery={:?}, blocking={:?})",
                c.ordering, c.delivery, c.blocking
            ),
            Value::RoleStub(s) => write!(f, "stub({}#{})", s.role.name, s.role.id),
            Value::Symmetric(s) => write!(f, "{}{}", s.domain, s.id),
            Value::Model(m) => write!(f, "{}{}", m.prefix, m.id),
            Value::Domain(d) => write!(f, "{}", d),
            Value::Builtin(name) => write!(f, "<built-in function {}>", name),
            Value::Module(name) => write!(f, "<module {}>", name),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::str("a").to_string(), "\"a\"");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).to_string(), "(1,)");
        assert_eq!(
            Value::set(vec![Value::Int(2), Value::Int(1)]).to_string(),
            "set([1, 2])"
        );
        assert_eq!(
            Value::dict(vec![(Value::str("b"), Value::Int(1)), (Value::str("a"), Value::None)])
                .to_string(),
            "{\"a\": None, \"b\": 1}"
        );
    }

    #[test]
    fn test_bag_is_canonical() {
        let a = Value::bag(vec![Value::Int(2), Value::Int(1), Value::Int(2)]);
        let b = Value::bag(vec![Value::Int(2), Value::Int(2), Value::Int(1)]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "bag([1, 2, 2])");
    }

    #[test]
    fn test_generic_collections_compare_unordered() {
        let a = Value::generic_set(vec![Value::list(vec![]), Value::Int(1)]);
        let b = Value::generic_set(vec![Value::Int(1), Value::list(vec![])]);
        assert_eq!(a, b);
        let m1 = Value::generic_map(vec![(Value::Int(1), Value::Int(2)), (Value::Int(3), Value::Int(4))]);
        let m2 = Value::generic_map(vec![(Value::Int(3), Value::Int(4)), (Value::Int(1), Value::Int(2))]);
        assert_eq!(m1, m2);
        assert_eq!(m1.len(), Some(2));
    }

    #[test]
    fn test_generic_set_dedups() {
        let s = Value::generic_set(vec![Value::Int(1), Value::Int(1)]);
        assert_eq!(s.len(), Some(1));
    }

    #[test]
    fn test_hashability() {
        assert!(Value::Int(1).is_hashable());
        assert!(Value::tuple(vec![Value::Int(1), Value::str("x")]).is_hashable());
        assert!(!Value::tuple(vec![Value::list(vec![])]).is_hashable());
        assert!(!Value::list(vec![]).is_hashable());
        assert!(!Value::Role(RoleRef::new("A", 0)).is_hashable());
    }

    #[test]
    fn test_truth() {
        assert!(!Value::None.truth());
        assert!(!Value::Int(0).truth());
        assert!(Value::str("x").truth());
        assert!(!Value::list(vec![]).truth());
        assert!(!Value::Range(RangeValue { start: 3, stop: 3, step: 1 }).truth());
    }

    #[test]
    fn test_range_len() {
        let r = RangeValue { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![0, 3, 6, 9]);
        let r = RangeValue { start: 5, stop: 0, step: -2 };
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![5, 3, 1]);
    }

    #[test]
    fn test_map_leaves_rewrites_nested_values() {
        let v = Value::list(vec![Value::Int(1), Value::tuple(vec![Value::Int(2)])]);
        let doubled = v.map_leaves(&mut |leaf| match leaf {
            Value::Int(n) => Some(Value::Int(n * 2)),
            _ => None,
        });
        assert_eq!(doubled.to_string(), "[2, (4,)]");
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;
        use std::collections::hash_map::DefaultHasher;

        fn arb_value() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::None),
                any::<bool>().prop_map(Value::Bool),
                (-50i64..50).prop_map(Value::Int),
                "[a-c]{0,3}".prop_map(|s| Value::str(&s)),
            ];
            leaf.prop_recursive(3, 16, 4, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::list),
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::tuple),
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::bag),
                    proptest::collection::vec(inner, 0..4).prop_map(Value::generic_set),
                ]
            })
        }

        fn hash_of(v: &Value) -> u64 {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        }

        proptest! {
            #[test]
            fn ordering_is_antisymmetric(a in arb_value(), b in arb_value()) {
                prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            }

            #[test]
            fn equal_values_hash_equally(a in arb_value()) {
                let b = a.map_leaves(&mut |_| None);
                prop_assert_eq!(&a, &b);
                prop_assert_eq!(hash_of(&a), hash_of(&b));
            }

            #[test]
            fn generic_set_order_is_irrelevant(items in proptest::collection::vec(arb_value(), 0..5)) {
                let forward = Value::generic_set(items.clone());
                let backward = Value::generic_set(items.into_iter().rev());
                prop_assert_eq!(hash_of(&forward), hash_of(&backward));
                prop_assert_eq!(forward, backward);
            }
        }
    }
}
