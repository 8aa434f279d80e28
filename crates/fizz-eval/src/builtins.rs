//! Built-in functions and the `symmetry` and `itertools` modules.

use crate::eval::{display_str, EvalError, EvalResult, Host};
use crate::itertools;
use crate::methods::{pairs_of, sort_values};
use crate::ops::{self, py_cmp};
use crate::symmetry::DomainDef;
use crate::value::{RangeValue, RecordKind, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

pub const BUILTINS: &[&str] = &[
    "abs", "all", "any", "bag", "bool", "deepcopy", "dict", "enum", "enumerate", "fail", "float",
    "genericmap", "genericset", "hash", "int", "isinstance", "len", "list", "max", "min", "print",
    "range", "record", "repr", "reversed", "set", "sorted", "str", "struct", "sum", "tuple",
    "type", "zip",
];

pub const MODULES: &[&str] = &["symmetry", "itertools"];

const MODULE_FUNCTIONS: &[&str] = &[
    "symmetry.nominal",
    "symmetry.ordinal",
    "symmetry.interval",
    "itertools.permutations",
    "itertools.combinations",
    "itertools.product",
];

pub fn lookup(name: &str) -> Option<Value> {
    if let Some(m) = MODULES.iter().find(|m| **m == name) {
        return Some(Value::Module(*m));
    }
    BUILTINS
        .iter()
        .find(|b| **b == name)
        .map(|b| Value::Builtin(*b))
}

pub fn module_attr(module: &str, attr: &str) -> Option<&'static str> {
    MODULE_FUNCTIONS
        .iter()
        .find(|f| {
            f.split_once('.')
                .map_or(false, |(m, a)| m == module && a == attr)
        })
        .copied()
}

/// Positional and keyword arguments of one builtin call.
struct Args<'a> {
    func: &'a str,
    positional: Vec<Value>,
    kwargs: Vec<(String, Value)>,
}

impl<'a> Args<'a> {
    fn get(&self, idx: usize, key: &str) -> Option<&Value> {
        self.positional.get(idx).or_else(|| {
            self.kwargs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v)
        })
    }

    fn required(&self, idx: usize, key: &str) -> EvalResult<&Value> {
        self.get(idx, key).ok_or_else(|| {
            EvalError::InvalidArgument(format!("{}() missing required argument '{}'", self.func, key))
        })
    }

    fn int(&self, idx: usize, key: &str) -> EvalResult<Option<i64>> {
        match self.get(idx, key) {
            None | Some(Value::None) => Ok(None),
            Some(v) => v.as_int().map(Some).ok_or_else(|| {
                EvalError::type_error(format!(
                    "{}() argument '{}' must be int, not {}",
                    self.func,
                    key,
                    v.type_name()
                ))
            }),
        }
    }

    fn string(&self, idx: usize, key: &str) -> EvalResult<String> {
        match self.required(idx, key)? {
            Value::Str(s) => Ok(s.to_string()),
            v => Err(EvalError::type_error(format!(
                "{}() argument '{}' must be str, not {}",
                self.func,
                key,
                v.type_name()
            ))),
        }
    }

    fn at_most(&self, n: usize) -> EvalResult<()> {
        if self.positional.len() > n {
            return Err(EvalError::InvalidArgument(format!(
                "{}() takes at most {} positional arguments ({} given)",
                self.func,
                n,
                self.positional.len()
            )));
        }
        Ok(())
    }

    fn no_kwargs(&self) -> EvalResult<()> {
        match self.kwargs.first() {
            Some((k, _)) => Err(EvalError::InvalidArgument(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.func, k
            ))),
            None => Ok(()),
        }
    }

    /// Single-iterable form `f(xs)` or variadic form `f(a, b, ...)`.
    fn items_or_varargs(&self) -> EvalResult<Vec<Value>> {
        match self.positional.as_slice() {
            [single] => ops::iterate(single),
            many => Ok(many.to_vec()),
        }
    }

    fn iterable_or_empty(&self, idx: usize, key: &str) -> EvalResult<Vec<Value>> {
        match self.get(idx, key) {
            None => Ok(Vec::new()),
            Some(v) => ops::iterate(v),
        }
    }
}

pub fn call(
    host: &mut dyn Host,
    name: &str,
    positional: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> EvalResult<Value> {
    let args = Args {
        func: name,
        positional,
        kwargs,
    };
    match name {
        "len" => {
            let v = args.required(0, "obj")?;
            v.len().map(|n| Value::Int(n as i64)).ok_or_else(|| {
                EvalError::type_error(format!("object of type '{}' has no len()", v.type_name()))
            })
        }
        "range" => builtin_range(&args),
        "list" => Ok(Value::list(args.iterable_or_empty(0, "iterable")?)),
        "tuple" => Ok(Value::tuple(args.iterable_or_empty(0, "iterable")?)),
        "set" => ops::make_set(args.iterable_or_empty(0, "iterable")?),
        "bag" => Ok(Value::bag(args.iterable_or_empty(0, "iterable")?)),
        "genericset" => Ok(Value::generic_set(args.iterable_or_empty(0, "iterable")?)),
        "dict" | "genericmap" => {
            let mut pairs = match args.positional.first() {
                Some(v) => pairs_of(v)?,
                None => Vec::new(),
            };
            pairs.extend(
                args.kwargs
                    .iter()
                    .map(|(k, v)| (Value::str(k), v.clone())),
            );
            if name == "dict" {
                ops::make_dict(pairs)
            } else {
                Ok(Value::generic_map(pairs))
            }
        }
        "record" | "struct" => {
            if !args.positional.is_empty() {
                return Err(EvalError::InvalidArgument(format!(
                    "{}() takes only keyword arguments",
                    name
                )));
            }
            let kind = if name == "record" {
                RecordKind::Record
            } else {
                RecordKind::Struct
            };
            Ok(Value::record(kind, args.kwargs.into_iter().collect()))
        }
        "enum" => {
            args.no_kwargs()?;
            let mut fields = BTreeMap::new();
            for v in &args.positional {
                let label = v
                    .as_str()
                    .ok_or_else(|| EvalError::type_error("enum() members must be strings"))?;
                fields.insert(label.to_string(), Value::str(label));
            }
            Ok(Value::record(RecordKind::Enum, fields))
        }
        "min" | "max" => builtin_extreme(&args, name == "max"),
        "sum" => {
            let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
            for item in ops::iterate(args.required(0, "iterable")?)? {
                total = ops::binary(crate::ast::BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        "abs" => match args.required(0, "x")? {
            Value::Int(n) => n.checked_abs().map(Value::Int).ok_or(EvalError::Overflow),
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            Value::Float(x) => Ok(Value::Float(x.abs())),
            v => Err(EvalError::type_error(format!(
                "bad operand type for abs(): '{}'",
                v.type_name()
            ))),
        },
        "sorted" => {
            let mut items = sort_values(ops::iterate(args.required(0, "iterable")?)?)?;
            if args.get(usize::MAX, "reverse").map_or(false, Value::truth) {
                items.reverse();
            }
            Ok(Value::list(items))
        }
        "reversed" => {
            let mut items = ops::iterate(args.required(0, "seq")?)?;
            items.reverse();
            Ok(Value::list(items))
        }
        "any" => Ok(Value::Bool(
            ops::iterate(args.required(0, "iterable")?)?
                .iter()
                .any(Value::truth),
        )),
        "all" => Ok(Value::Bool(
            ops::iterate(args.required(0, "iterable")?)?
                .iter()
                .all(Value::truth),
        )),
        "enumerate" => {
            let start = args.int(1, "start")?.unwrap_or(0);
            let items = ops::iterate(args.required(0, "iterable")?)?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            ))
        }
        "zip" => {
            let columns = args
                .positional
                .iter()
                .map(ops::iterate)
                .collect::<EvalResult<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..rows)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        "str" => Ok(match args.get(0, "object") {
            Some(v) => Value::str(&display_str(v)),
            None => Value::str(""),
        }),
        "repr" => Ok(Value::str(&args.required(0, "object")?.to_string())),
        "int" => builtin_int(&args),
        "float" => match args.get(0, "x") {
            None => Ok(Value::Float(0.0)),
            Some(Value::Int(n)) => Ok(Value::Float(*n as f64)),
            Some(Value::Bool(b)) => Ok(Value::Float(*b as i64 as f64)),
            Some(Value::Float(x)) => Ok(Value::Float(*x)),
            Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                EvalError::InvalidArgument(format!("could not convert string to float: {:?}", s))
            }),
            Some(v) => Err(EvalError::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                v.type_name()
            ))),
        },
        "bool" => Ok(Value::Bool(args.get(0, "x").map_or(false, Value::truth))),
        "hash" => {
            let v = args.required(0, "object")?;
            if !v.is_hashable() {
                return Err(EvalError::Unhashable(v.type_name().to_string()));
            }
            Ok(Value::Int(stable_hash(v) as i64))
        }
        "type" => Ok(Value::str(args.required(0, "object")?.type_name())),
        "isinstance" => {
            let v = args.required(0, "obj")?;
            let types = match args.required(1, "class")? {
                Value::Tuple(items) => (**items).clone(),
                other => vec![other.clone()],
            };
            Ok(Value::Bool(types.iter().any(|t| is_instance(v, t))))
        }
        "print" => {
            let text = args
                .positional
                .iter()
                .map(display_str)
                .collect::<Vec<_>>()
                .join(" ");
            host.print(&text);
            Ok(Value::None)
        }
        "deepcopy" => Ok(args.required(0, "x")?.clone()),
        "fail" => {
            let msg = args.get(0, "msg").map(display_str).unwrap_or_default();
            Err(EvalError::Fail(msg))
        }
        "symmetry.nominal" | "symmetry.ordinal" => {
            args.at_most(2)?;
            let domain_name = args.string(0, "name")?;
            let limit = args.int(1, "limit")?.ok_or_else(|| {
                EvalError::InvalidArgument(format!("{}() missing required argument 'limit'", name))
            })?;
            let domain = if name == "symmetry.nominal" {
                DomainDef::nominal(&domain_name, limit)?
            } else {
                DomainDef::ordinal(&domain_name, limit)?
            };
            Ok(Value::Domain(Arc::new(domain)))
        }
        "symmetry.interval" => {
            args.at_most(4)?;
            let domain_name = args.string(0, "name")?;
            let limit = args.int(1, "limit")?;
            let divergence = args.int(2, "divergence")?;
            let start = args.int(3, "start")?.unwrap_or(0);
            Ok(Value::Domain(Arc::new(DomainDef::interval(
                &domain_name,
                limit,
                divergence,
                start,
            )?)))
        }
        "itertools.permutations" => {
            let pool = ops::iterate(args.required(0, "iterable")?)?;
            let r = args.int(1, "r")?.map_or(pool.len(), |r| r.max(0) as usize);
            Ok(Value::list(itertools::permutations(&pool, r)))
        }
        "itertools.combinations" => {
            let pool = ops::iterate(args.required(0, "iterable")?)?;
            let r = args
                .int(1, "r")?
                .ok_or_else(|| EvalError::InvalidArgument("combinations() missing 'r'".into()))?;
            Ok(Value::list(itertools::combinations(&pool, r.max(0) as usize)))
        }
        "itertools.product" => {
            let repeat = args.int(usize::MAX, "repeat")?.unwrap_or(1).max(0) as usize;
            let pools = args
                .positional
                .iter()
                .map(ops::iterate)
                .collect::<EvalResult<Vec<_>>>()?;
            let mut repeated = Vec::with_capacity(pools.len() * repeat);
            for _ in 0..repeat {
                repeated.extend(pools.iter().cloned());
            }
            Ok(Value::list(itertools::product(&repeated)))
        }
        _ => Err(EvalError::UndefinedName(name.to_string())),
    }
}

fn builtin_range(args: &Args<'_>) -> EvalResult<Value> {
    args.no_kwargs()?;
    let ints = args
        .positional
        .iter()
        .map(|v| {
            v.as_int().ok_or_else(|| {
                EvalError::type_error(format!(
                    "range() arguments must be int, not {}",
                    v.type_name()
                ))
            })
        })
        .collect::<EvalResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(EvalError::InvalidArgument(format!(
                "range() takes 1 to 3 arguments ({} given)",
                ints.len()
            )))
        }
    };
    if step == 0 {
        return Err(EvalError::InvalidArgument("range() arg 3 must not be zero".into()));
    }
    Ok(Value::Range(RangeValue { start, stop, step }))
}

fn builtin_extreme(args: &Args<'_>, max: bool) -> EvalResult<Value> {
    let items = args.items_or_varargs()?;
    let mut best: Option<Value> = None;
    for item in items {
        best = Some(match best {
            None => item,
            Some(current) => {
                let ord = py_cmp(&item, &current)?;
                let better = if max {
                    ord == Ordering::Greater
                } else {
                    ord == Ordering::Less
                };
                if better {
                    item
                } else {
                    current
                }
            }
        });
    }
    match best {
        Some(v) => Ok(v),
        None => args.kwargs.iter().find(|(k, _)| k == "default").map(|(_, v)| v.clone()).ok_or_else(|| {
            EvalError::InvalidArgument(format!(
                "{}() arg is an empty sequence",
                if max { "max" } else { "min" }
            ))
        }),
    }
}

fn builtin_int(args: &Args<'_>) -> EvalResult<Value> {
    match args.get(0, "x") {
        None => Ok(Value::Int(0)),
        Some(Value::Int(n)) => Ok(Value::Int(*n)),
        Some(Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        Some(Value::Float(x)) => {
            if x.is_finite() && x.abs() < i64::MAX as f64 {
                Ok(Value::Int(x.trunc() as i64))
            } else {
                Err(EvalError::Overflow)
            }
        }
        Some(Value::Str(s)) => {
            let base = args.int(1, "base")?.unwrap_or(10);
            let base = u32::try_from(base)
                .ok()
                .filter(|b| (2..=36).contains(b))
                .ok_or_else(|| EvalError::InvalidArgument("int() base must be >= 2 and <= 36".into()))?;
            let text = s.trim().replace('_', "");
            i64::from_str_radix(&text, base).map(Value::Int).map_err(|_| {
                EvalError::InvalidArgument(format!(
                    "invalid literal for int() with base {}: {:?}",
                    base, s
                ))
            })
        }
        Some(v) => Err(EvalError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            v.type_name()
        ))),
    }
}

fn is_instance(v: &Value, t: &Value) -> bool {
    match t {
        Value::Builtin(name) => match *name {
            "int" => matches!(v, Value::Int(_) | Value::Bool(_)),
            "str" => matches!(v, Value::Str(_)),
            "dict" => matches!(v, Value::Dict(_)),
            "record" => matches!(v, Value::Record(r) if r.kind == RecordKind::Record),
            "struct" => matches!(v, Value::Record(r) if r.kind == RecordKind::Struct),
            other => v.type_name() == other,
        },
        Value::RoleType(role) => matches!(v, Value::Role(r) if r.name == *role),
        _ => false,
    }
}

/// Hash that is stable across runs, so `hash(x)` is part of the state.
pub fn stable_hash(v: &Value) -> u64 {
    let state = ahash::RandomState::with_seeds(0x243f_6a88, 0x85a3_08d3, 0x1319_8a2e, 0x0370_7344);
    let mut hasher = state.build_hasher();
    v.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{eval, Env};

    fn val(src: &str) -> Value {
        eval(src, &mut Env::new()).unwrap_or_else(|e| panic!("eval {:?} failed: {}", src, e))
    }

    fn err(src: &str) -> EvalError {
        eval(src, &mut Env::new()).unwrap_err()
    }

    #[test]
    fn test_collection_constructors() {
        assert_eq!(val("len(range(2, 10, 3))"), Value::Int(3));
        assert_eq!(val("list(range(3))").to_string(), "[0, 1, 2]");
        assert_eq!(val("set([3, 1, 3])").to_string(), "set([1, 3])");
        assert_eq!(val("dict([(1, 2)], a=3)").to_string(), "{1: 2, \"a\": 3}");
        assert_eq!(val("bag([2, 1, 2])").to_string(), "bag([1, 2, 2])");
        assert_eq!(val("len(genericset([[1], [1], [2]]))"), Value::Int(2));
        assert!(matches!(err("set([[1]])"), EvalError::Unhashable(_)));
    }

    #[test]
    fn test_records_and_enums() {
        assert_eq!(val("record(b=1, a=2).a"), Value::Int(2));
        assert_eq!(val("struct(x=1)").to_string(), "struct(x = 1)");
        assert_eq!(val("enum('RED', 'GREEN').GREEN"), Value::str("GREEN"));
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(val("min([3, 1, 2])"), Value::Int(1));
        assert_eq!(val("max(3, 7, 5)"), Value::Int(7));
        assert_eq!(val("max([], default=0)"), Value::Int(0));
        assert_eq!(val("sum([1, 2, 3])"), Value::Int(6));
        assert_eq!(val("sorted([3, 1, 2], reverse=True)").to_string(), "[3, 2, 1]");
        assert_eq!(val("all([]) and not any([])"), Value::Bool(true));
        assert_eq!(val("list(zip([1, 2], 'ab'))").to_string(), "[(1, \"a\"), (2, \"b\")]");
        assert_eq!(val("enumerate(['x'], 1)").to_string(), "[(1, \"x\")]");
        assert!(matches!(err("min([])"), EvalError::InvalidArgument(_)));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(val("int('42')"), Value::Int(42));
        assert_eq!(val("int(3.9)"), Value::Int(3));
        assert_eq!(val("int('ff', 16)"), Value::Int(255));
        assert_eq!(val("str(12)"), Value::str("12"));
        assert_eq!(val("str('x')"), Value::str("x"));
        assert_eq!(val("repr('x')"), Value::str("\"x\""));
        assert_eq!(val("type([])"), Value::str("list"));
        assert_eq!(val("isinstance(1, (str, int))"), Value::Bool(true));
        assert_eq!(val("bool([])"), Value::Bool(false));
    }

    #[test]
    fn test_hash_is_stable_and_rejects_unhashable() {
        assert_eq!(val("hash((1, 'a'))"), val("hash((1, 'a'))"));
        assert!(matches!(err("hash([1])"), EvalError::Unhashable(_)));
    }

    #[test]
    fn test_fail_reports_message() {
        assert_eq!(err("fail('boom')"), EvalError::Fail("boom".to_string()));
    }

    #[test]
    fn test_symmetry_constructors() {
        assert_eq!(val("symmetry.nominal(name='n', limit=3).limit"), Value::Int(3));
        assert_eq!(val("symmetry.interval(name='t', divergence=4).limit"), Value::Int(5));
        assert!(matches!(
            err("symmetry.interval(name='t', limit=5, divergence=2)"),
            EvalError::InvalidArgument(_)
        ));
        assert!(matches!(err("symmetry.nominal(name='n', limit=0)"), EvalError::InvalidArgument(_)));
    }

    #[test]
    fn test_itertools() {
        assert_eq!(val("len(itertools.permutations([1, 2, 3]))"), Value::Int(6));
        assert_eq!(val("itertools.combinations([1, 2, 3], 2)").to_string(), "[(1, 2), (1, 3), (2, 3)]");
        assert_eq!(val("len(itertools.product([0, 1], repeat=3))"), Value::Int(8));
    }
}
