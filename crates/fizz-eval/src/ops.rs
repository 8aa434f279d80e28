//! Operators, comparisons and indexing over [`Value`]s.
//!
//! Equality follows Python: `1 == 1.0` and `True == 1` hold even though
//! the values are structurally distinct.

use crate::ast::{BinOp, CmpOp, UnaryOp};
use crate::eval::{EvalError, EvalResult};
use crate::symmetry::DomainKind;
use crate::value::{SymmetricValue, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub fn iterate(v: &Value) -> EvalResult<Vec<Value>> {
    v.iterate()
        .ok_or_else(|| EvalError::type_error(format!("'{}' object is not iterable", v.type_name())))
}

fn check_hashable(v: &Value) -> EvalResult<()> {
    if v.is_hashable() {
        Ok(())
    } else {
        Err(EvalError::Unhashable(v.type_name().to_string()))
    }
}

pub fn make_set(items: Vec<Value>) -> EvalResult<Value> {
    let mut set = BTreeSet::new();
    for item in items {
        check_hashable(&item)?;
        set.insert(item);
    }
    Ok(Value::Set(Arc::new(set)))
}

pub fn make_dict(pairs: Vec<(Value, Value)>) -> EvalResult<Value> {
    let mut map = BTreeMap::new();
    for (k, v) in pairs {
        check_hashable(&k)?;
        map.insert(k, v);
    }
    Ok(Value::Dict(Arc::new(map)))
}

enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(v: &Value) -> Option<Num> {
    match v {
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Float(x) => Some(Num::Float(*x)),
        _ => None,
    }
}

fn to_f64(n: &Num) -> f64 {
    match n {
        Num::Int(i) => *i as f64,
        Num::Float(x) => *x,
    }
}

/// Python `==`.
pub fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| py_eq(p, q))
        }
        _ => match (as_num(a), as_num(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => x == y,
            (Some(x), Some(y)) => to_f64(&x) == to_f64(&y),
            _ => a == b,
        },
    }
}

/// Python ordering, for `<` and friends and for `sorted`/`min`/`max`.
pub fn py_cmp(a: &Value, b: &Value) -> EvalResult<Ordering> {
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return Ok(match (x, y) {
            (Num::Int(x), Num::Int(y)) => x.cmp(&y),
            (x, y) => to_f64(&x).total_cmp(&to_f64(&y)),
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (p, q) in x.iter().zip(y.iter()) {
                match py_cmp(p, q)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        (Value::Symmetric(x), Value::Symmetric(y)) if x.domain == y.domain => {
            if x.kind.is_ordered() {
                Ok(x.id.cmp(&y.id))
            } else {
                Err(EvalError::type_error(format!(
                    "values of nominal domain '{}' are not ordered",
                    x.domain
                )))
            }
        }
        (Value::Model(x), Value::Model(y)) => Ok(x.cmp(y)),
        _ => Err(EvalError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> EvalResult<bool> {
    match op {
        CmpOp::Eq => Ok(py_eq(a, b)),
        CmpOp::Ne => Ok(!py_eq(a, b)),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|found| !found),
        CmpOp::Is => Ok(a == b),
        CmpOp::IsNot => Ok(a != b),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            if let (Some(x), Some(y)) = (set_elems(a), set_elems(b)) {
                let sub = |p: &[Value], q: &[Value]| p.iter().all(|e| q.contains(e));
                return Ok(match op {
                    CmpOp::Le => sub(&x, &y),
                    CmpOp::Lt => sub(&x, &y) && x.len() < y.len(),
                    CmpOp::Ge => sub(&y, &x),
                    _ => sub(&y, &x) && y.len() < x.len(),
                });
            }
            let ord = py_cmp(a, b)?;
            Ok(match op {
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
    }
}

fn set_elems(v: &Value) -> Option<Vec<Value>> {
    match v {
        Value::Set(items) => Some(items.iter().cloned().collect()),
        Value::GenericSet(items) => Some((**items).clone()),
        _ => None,
    }
}

fn is_number(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_) | Value::Bool(_))
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> EvalResult<bool> {
    Ok(match container {
        Value::Str(s) => match item {
            Value::Str(sub) => s.contains(&**sub),
            _ => {
                return Err(EvalError::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    item.type_name()
                )))
            }
        },
        Value::List(items) | Value::Tuple(items) | Value::Bag(items) => {
            items.iter().any(|x| py_eq(x, item))
        }
        Value::GenericSet(items) => items.iter().any(|x| py_eq(x, item)),
        Value::Set(items) => {
            items.contains(item) || (is_number(item) && items.iter().any(|x| py_eq(x, item)))
        }
        Value::Dict(map) => {
            map.contains_key(item) || (is_number(item) && map.keys().any(|x| py_eq(x, item)))
        }
        Value::GenericMap(entries) => entries.iter().any(|(k, _)| py_eq(k, item)),
        Value::Range(r) => match item.as_int() {
            Some(n) => r.iter().any(|x| x == n),
            None => false,
        },
        _ => {
            return Err(EvalError::type_error(format!(
                "argument of type '{}' is not iterable",
                container.type_name()
            )))
        }
    })
}

pub fn unary(op: UnaryOp, v: &Value) -> EvalResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.truth())),
        UnaryOp::Neg => match as_num(v) {
            Some(Num::Int(n)) => n.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
            Some(Num::Float(x)) => Ok(Value::Float(-x)),
            None => Err(bad_unary("-", v)),
        },
        UnaryOp::Pos => match as_num(v) {
            Some(Num::Int(n)) => Ok(Value::Int(n)),
            Some(Num::Float(x)) => Ok(Value::Float(x)),
            None => Err(bad_unary("+", v)),
        },
        UnaryOp::Invert => match v.as_int() {
            Some(n) => Ok(Value::Int(!n)),
            None => Err(bad_unary("~", v)),
        },
    }
}

fn bad_unary(op: &str, v: &Value) -> EvalError {
    EvalError::type_error(format!("bad operand type for unary {}: '{}'", op, v.type_name()))
}

fn floor_div(a: i64, b: i64) -> EvalResult<i64> {
    if b == 0 {
        return Err(EvalError::DivisionByZero);
    }
    let q = a.checked_div(b).ok_or(EvalError::Overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floor_mod(a: i64, b: i64) -> EvalResult<i64> {
    if b == 0 {
        return Err(EvalError::DivisionByZero);
    }
    let r = a.checked_rem(b).ok_or(EvalError::Overflow)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> EvalResult<Value> {
    let checked = |r: Option<i64>| r.map(Value::Int).ok_or(EvalError::Overflow);
    match op {
        BinOp::Add => checked(a.checked_add(b)),
        BinOp::Sub => checked(a.checked_sub(b)),
        BinOp::Mul => checked(a.checked_mul(b)),
        BinOp::Div => {
            if b == 0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        BinOp::FloorDiv => floor_div(a, b).map(Value::Int),
        BinOp::Mod => floor_mod(a, b).map(Value::Int),
        BinOp::Pow => {
            if b < 0 {
                Ok(Value::Float((a as f64).powf(b as f64)))
            } else {
                let exp = u32::try_from(b).map_err(|_| EvalError::Overflow)?;
                checked(a.checked_pow(exp))
            }
        }
        BinOp::BitOr => Ok(Value::Int(a | b)),
        BinOp::BitXor => Ok(Value::Int(a ^ b)),
        BinOp::BitAnd => Ok(Value::Int(a & b)),
        BinOp::And | BinOp::Or => Err(EvalError::Internal("logical operator in int_op".into())),
    }
}

fn float_op(op: BinOp, a: f64, b: f64) -> EvalResult<Value> {
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
            return Err(EvalError::DivisionByZero)
        }
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a - b * (a / b).floor(),
        BinOp::Pow => a.powf(b),
        _ => return Err(EvalError::unsupported(op.symbol(), &Value::Float(a), &Value::Float(b))),
    }))
}

fn repeat(items: &[Value], n: i64) -> Vec<Value> {
    let n = n.max(0) as usize;
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    out
}

fn shift_symmetric(s: &SymmetricValue, delta: i64) -> EvalResult<Value> {
    if s.kind != DomainKind::Interval {
        return Err(EvalError::type_error(format!(
            "arithmetic is only defined on interval domains, not '{}'",
            s.domain
        )));
    }
    Ok(Value::Symmetric(SymmetricValue {
        domain: s.domain.clone(),
        kind: s.kind,
        id: s.id.checked_add(delta).ok_or(EvalError::Overflow)?,
    }))
}

pub fn binary(op: BinOp, a: &Value, b: &Value) -> EvalResult<Value> {
    if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
        match op {
            BinOp::BitOr => return Ok(Value::Bool(x | y)),
            BinOp::BitAnd => return Ok(Value::Bool(x & y)),
            BinOp::BitXor => return Ok(Value::Bool(x ^ y)),
            _ => {}
        }
    }
    match (as_num(a), as_num(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => return int_op(op, x, y),
        (Some(x), Some(y)) => return float_op(op, to_f64(&x), to_f64(&y)),
        _ => {}
    }

    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => Ok(Value::str(&format!("{}{}", x, y))),
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let count = n.as_int().unwrap_or(0).max(0) as usize;
            Ok(Value::str(&s.repeat(count)))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            Ok(Value::list(x.iter().chain(y.iter()).cloned().collect()))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            Ok(Value::list(repeat(items, n.as_int().unwrap_or(0))))
        }
        (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items))
            if n.as_int().is_some() =>
        {
            Ok(Value::tuple(repeat(items, n.as_int().unwrap_or(0))))
        }
        (BinOp::Add, Value::Bag(x), Value::Bag(y)) => {
            Ok(Value::bag(x.iter().chain(y.iter()).cloned()))
        }
        (_, Value::Set(x), Value::Set(y)) => {
            let out: BTreeSet<Value> = match op {
                BinOp::BitOr => x.union(y).cloned().collect(),
                BinOp::BitAnd => x.intersection(y).cloned().collect(),
                BinOp::Sub => x.difference(y).cloned().collect(),
                BinOp::BitXor => x.symmetric_difference(y).cloned().collect(),
                _ => return Err(EvalError::unsupported(op.symbol(), a, b)),
            };
            Ok(Value::Set(Arc::new(out)))
        }
        (_, Value::GenericSet(x), Value::GenericSet(y)) => {
            let out: Vec<Value> = match op {
                BinOp::BitOr => x.iter().chain(y.iter()).cloned().collect(),
                BinOp::BitAnd => x.iter().filter(|e| y.contains(e)).cloned().collect(),
                BinOp::Sub => x.iter().filter(|e| !y.contains(e)).cloned().collect(),
                BinOp::BitXor => x
                    .iter()
                    .filter(|e| !y.contains(e))
                    .chain(y.iter().filter(|e| !x.contains(e)))
                    .cloned()
                    .collect(),
                _ => return Err(EvalError::unsupported(op.symbol(), a, b)),
            };
            Ok(Value::generic_set(out))
        }
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut out = (**x).clone();
            out.extend(y.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::Dict(Arc::new(out)))
        }
        (BinOp::Add, Value::Symmetric(s), n) | (BinOp::Add, n, Value::Symmetric(s))
            if n.as_int().is_some() =>
        {
            shift_symmetric(s, n.as_int().unwrap_or(0))
        }
        (BinOp::Sub, Value::Symmetric(s), n) if n.as_int().is_some() => {
            let delta = n.as_int().unwrap_or(0).checked_neg().ok_or(EvalError::Overflow)?;
            shift_symmetric(s, delta)
        }
        (BinOp::Sub, Value::Symmetric(x), Value::Symmetric(y))
            if x.domain == y.domain && x.kind == DomainKind::Interval =>
        {
            x.id.checked_sub(y.id).map(Value::Int).ok_or(EvalError::Overflow)
        }
        _ => Err(EvalError::unsupported(op.symbol(), a, b)),
    }
}

fn normalize_index(index: i64, len: usize) -> EvalResult<usize> {
    let adjusted = if index < 0 { index + len as i64 } else { index };
    if adjusted < 0 || adjusted >= len as i64 {
        Err(EvalError::IndexOutOfBounds { index, len })
    } else {
        Ok(adjusted as usize)
    }
}

fn int_index(idx: &Value, container: &Value) -> EvalResult<i64> {
    idx.as_int().ok_or_else(|| {
        EvalError::type_error(format!(
            "{} indices must be integers, not {}",
            container.type_name(),
            idx.type_name()
        ))
    })
}

/// `obj[idx]`.
pub fn get_item(obj: &Value, idx: &Value) -> EvalResult<Value> {
    match obj {
        Value::List(items) | Value::Tuple(items) | Value::Bag(items) => {
            let i = normalize_index(int_index(idx, obj)?, items.len())?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(int_index(idx, obj)?, chars.len())?;
            Ok(Value::str(&chars[i].to_string()))
        }
        Value::Range(r) => {
            let i = normalize_index(int_index(idx, obj)?, r.len())?;
            Ok(Value::Int(r.start + i as i64 * r.step))
        }
        Value::Dict(map) => map
            .get(idx)
            .or_else(|| {
                // numeric keys compare by value: d[1.0] finds d[1]
                if is_number(idx) {
                    map.iter().find(|(k, _)| py_eq(k, idx)).map(|(_, v)| v)
                } else {
                    None
                }
            })
            .cloned()
            .ok_or_else(|| EvalError::KeyError(idx.to_string())),
        Value::GenericMap(entries) => entries
            .iter()
            .find(|(k, _)| py_eq(k, idx))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| EvalError::KeyError(idx.to_string())),
        _ => Err(EvalError::type_error(format!(
            "'{}' object is not subscriptable",
            obj.type_name()
        ))),
    }
}

/// `obj[idx] = value`.
pub fn set_item(obj: &mut Value, idx: Value, value: Value) -> EvalResult<()> {
    match obj {
        Value::List(items) => {
            let i = normalize_index(int_index(&idx, &Value::list(Vec::new()))?, items.len())?;
            Arc::make_mut(items)[i] = value;
            Ok(())
        }
        Value::Dict(map) => {
            check_hashable(&idx)?;
            Arc::make_mut(map).insert(idx, value);
            Ok(())
        }
        Value::GenericMap(entries) => {
            let entries = Arc::make_mut(entries);
            match entries.iter_mut().find(|(k, _)| *k == idx) {
                Some(entry) => entry.1 = value,
                None => entries.push((idx, value)),
            }
            Ok(())
        }
        _ => Err(EvalError::type_error(format!(
            "'{}' object does not support item assignment",
            obj.type_name()
        ))),
    }
}

/// `del obj[idx]`.
pub fn del_item(obj: &mut Value, idx: &Value) -> EvalResult<()> {
    match obj {
        Value::List(items) => {
            let i = normalize_index(int_index(idx, &Value::list(Vec::new()))?, items.len())?;
            Arc::make_mut(items).remove(i);
            Ok(())
        }
        Value::Dict(map) => {
            if !map.contains_key(idx) {
                return Err(EvalError::KeyError(idx.to_string()));
            }
            Arc::make_mut(map).remove(idx);
            Ok(())
        }
        Value::GenericMap(entries) => {
            let pos = entries
                .iter()
                .position(|(k, _)| k == idx)
                .ok_or_else(|| EvalError::KeyError(idx.to_string()))?;
            Arc::make_mut(entries).remove(pos);
            Ok(())
        }
        _ => Err(EvalError::type_error(format!(
            "'{}' object does not support item deletion",
            obj.type_name()
        ))),
    }
}

/// Indices selected by `[lower:upper:step]` over a sequence of length `len`.
fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> EvalResult<Vec<usize>> {
    let n = len as i64;
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(EvalError::InvalidArgument("slice step cannot be zero".to_string()));
    }
    let adjust = |x: i64, lo: i64, hi: i64| {
        let x = if x < 0 { x + n } else { x };
        x.clamp(lo, hi)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |x| adjust(x, 0, n));
        let stop = upper.map_or(n, |x| adjust(x, 0, n));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map_or(n - 1, |x| adjust(x, -1, n - 1));
        let stop = upper.map_or(-1, |x| adjust(x, -1, n - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

pub fn slice(
    obj: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> EvalResult<Value> {
    match obj {
        Value::List(items) | Value::Tuple(items) => {
            let picked = slice_indices(items.len(), lower, upper, step)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(if matches!(obj, Value::List(_)) {
                Value::list(picked)
            } else {
                Value::tuple(picked)
            })
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked: String = slice_indices(chars.len(), lower, upper, step)?
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::str(&picked))
        }
        Value::Range(_) => {
            let items = iterate(obj)?;
            slice(&Value::list(items), lower, upper, step)
        }
        _ => Err(EvalError::type_error(format!(
            "'{}' object is not sliceable",
            obj.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(xs: &[i64]) -> Value {
        Value::list(xs.iter().map(|x| Value::Int(*x)).collect())
    }

    #[test]
    fn test_python_division_semantics() {
        assert_eq!(binary(BinOp::FloorDiv, &Value::Int(7), &Value::Int(-2)), Ok(Value::Int(-4)));
        assert_eq!(binary(BinOp::Mod, &Value::Int(7), &Value::Int(-2)), Ok(Value::Int(-1)));
        assert_eq!(binary(BinOp::Mod, &Value::Int(-1), &Value::Int(5)), Ok(Value::Int(4)));
        assert_eq!(binary(BinOp::Div, &Value::Int(1), &Value::Int(0)), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_overflow_is_an_error() {
        assert_eq!(
            binary(BinOp::Add, &Value::Int(i64::MAX), &Value::Int(1)),
            Err(EvalError::Overflow)
        );
    }

    #[test]
    fn test_set_algebra() {
        let a = Value::set(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::set(vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(binary(BinOp::BitOr, &a, &b).map(|v| v.to_string()), Ok("set([1, 2, 3])".into()));
        assert_eq!(binary(BinOp::BitAnd, &a, &b).map(|v| v.to_string()), Ok("set([2])".into()));
        assert_eq!(binary(BinOp::Sub, &a, &b).map(|v| v.to_string()), Ok("set([1])".into()));
        assert_eq!(compare(CmpOp::Le, &Value::set(vec![Value::Int(2)]), &a), Ok(true));
        assert_eq!(compare(CmpOp::Lt, &a, &a), Ok(false));
    }

    #[test]
    fn test_sequence_ops() {
        assert_eq!(binary(BinOp::Mul, &ints(&[1]), &Value::Int(3)), Ok(ints(&[1, 1, 1])));
        assert_eq!(binary(BinOp::Add, &ints(&[1]), &ints(&[2])), Ok(ints(&[1, 2])));
        assert_eq!(
            binary(BinOp::Add, &Value::str("ab"), &Value::str("c")),
            Ok(Value::str("abc"))
        );
        assert!(binary(BinOp::Add, &ints(&[1]), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_get_item_negative_and_errors() {
        assert_eq!(get_item(&ints(&[1, 2, 3]), &Value::Int(-1)), Ok(Value::Int(3)));
        assert!(matches!(
            get_item(&ints(&[1]), &Value::Int(5)),
            Err(EvalError::IndexOutOfBounds { index: 5, len: 1 })
        ));
        let d = Value::dict(vec![(Value::Int(1), Value::str("x"))]);
        assert_eq!(get_item(&d, &Value::Float(1.0)), Ok(Value::str("x")));
        assert!(matches!(get_item(&d, &Value::Int(2)), Err(EvalError::KeyError(_))));
    }

    #[test]
    fn test_set_item_rejects_unhashable_keys() {
        let mut d = Value::dict(Vec::new());
        assert_eq!(
            set_item(&mut d, Value::list(Vec::new()), Value::Int(1)),
            Err(EvalError::Unhashable("list".into()))
        );
        let mut t = Value::tuple(vec![Value::Int(1)]);
        assert!(set_item(&mut t, Value::Int(0), Value::Int(2)).is_err());
    }

    #[test]
    fn test_slices() {
        let xs = ints(&[0, 1, 2, 3, 4]);
        assert_eq!(slice(&xs, Some(1), Some(-1), None), Ok(ints(&[1, 2, 3])));
        assert_eq!(slice(&xs, None, None, Some(2)), Ok(ints(&[0, 2, 4])));
        assert_eq!(slice(&xs, None, None, Some(-2)), Ok(ints(&[4, 2, 0])));
        assert_eq!(slice(&xs, Some(10), None, None), Ok(ints(&[])));
        assert_eq!(slice(&Value::str("hello"), Some(1), Some(3), None), Ok(Value::str("el")));
    }

    #[test]
    fn test_interval_arithmetic() {
        let s = SymmetricValue {
            domain: Arc::from("t"),
            kind: DomainKind::Interval,
            id: 5,
        };
        let v = Value::Symmetric(s.clone());
        assert!(matches!(binary(BinOp::Add, &v, &Value::Int(2)), Ok(Value::Symmetric(ref x)) if x.id == 7));
        let earlier = Value::Symmetric(SymmetricValue { id: 2, ..s.clone() });
        assert_eq!(binary(BinOp::Sub, &v, &earlier), Ok(Value::Int(3)));
        let nominal = Value::Symmetric(SymmetricValue {
            kind: DomainKind::Nominal,
            ..s
        });
        assert!(binary(BinOp::Add, &nominal, &Value::Int(1)).is_err());
        assert!(py_cmp(&nominal, &nominal).is_err());
    }

    #[test]
    fn test_contains() {
        assert_eq!(contains(&Value::str("hello"), &Value::str("ell")), Ok(true));
        assert_eq!(contains(&Value::set(vec![Value::Int(1)]), &Value::Float(1.0)), Ok(true));
        assert!(contains(&Value::Int(1), &Value::Int(1)).is_err());
    }
}
