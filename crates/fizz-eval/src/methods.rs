//! Methods on built-in collection and string values.
//!
//! [`call_method`] reports whether the receiver was mutated so the
//! interpreter can write it back to its place.

use crate::eval::{display_str, EvalError, EvalResult};
use crate::ops::{self, py_eq};
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> EvalResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(EvalError::InvalidArgument(format!(
            "{}() takes {} arguments ({} given)",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn no_method(recv: &Value, name: &str) -> EvalError {
    EvalError::no_attr(recv, name)
}

fn str_arg<'a>(v: &'a Value, method: &str) -> EvalResult<&'a str> {
    v.as_str().ok_or_else(|| {
        EvalError::type_error(format!(
            "{}() argument must be str, not {}",
            method,
            v.type_name()
        ))
    })
}

/// Call `recv.name(args...)`. Returns the result and whether `recv` changed.
pub fn call_method(
    recv: &mut Value,
    name: &str,
    args: Vec<Value>,
    kwargs: &[(String, Value)],
) -> EvalResult<(Value, bool)> {
    if let Some((key, _)) = kwargs.first() {
        return Err(EvalError::InvalidArgument(format!(
            "{}() got an unexpected keyword argument '{}'",
            name, key
        )));
    }
    match recv {
        Value::List(_) => list_method(recv, name, args),
        Value::Tuple(_) => tuple_method(recv, name, args).map(|v| (v, false)),
        Value::Dict(_) => dict_method(recv, name, args),
        Value::Set(_) => set_method(recv, name, args),
        Value::Bag(_) => bag_method(recv, name, args),
        Value::GenericSet(_) => generic_set_method(recv, name, args),
        Value::GenericMap(_) => generic_map_method(recv, name, args),
        Value::Str(_) => str_method(recv, name, args).map(|v| (v, false)),
        _ => Err(no_method(recv, name)),
    }
}

fn list_method(recv: &mut Value, name: &str, mut args: Vec<Value>) -> EvalResult<(Value, bool)> {
    let Value::List(items) = recv else {
        return Err(no_method(recv, name));
    };
    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            Arc::make_mut(items).extend(args.pop());
            Ok((Value::None, true))
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let more = ops::iterate(&args[0])?;
            Arc::make_mut(items).extend(more);
            Ok((Value::None, true))
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let len = items.len() as i64;
            let idx = args[0]
                .as_int()
                .ok_or_else(|| EvalError::type_error("insert() index must be an integer"))?;
            let pos = if idx < 0 { (idx + len).max(0) } else { idx.min(len) } as usize;
            let value = args.pop().unwrap_or(Value::None);
            Arc::make_mut(items).insert(pos, value);
            Ok((Value::None, true))
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            if items.is_empty() {
                return Err(EvalError::IndexOutOfBounds { index: 0, len: 0 });
            }
            let len = items.len() as i64;
            let idx = match args.first() {
                Some(v) => v
                    .as_int()
                    .ok_or_else(|| EvalError::type_error("pop() index must be an integer"))?,
                None => len - 1,
            };
            let adjusted = if idx < 0 { idx + len } else { idx };
            if adjusted < 0 || adjusted >= len {
                return Err(EvalError::IndexOutOfBounds {
                    index: idx,
                    len: items.len(),
                });
            }
            let removed = Arc::make_mut(items).remove(adjusted as usize);
            Ok((removed, true))
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            let pos = items
                .iter()
                .position(|x| py_eq(x, &args[0]))
                .ok_or_else(|| EvalError::InvalidArgument(format!("{} not in list", args[0])))?;
            Arc::make_mut(items).remove(pos);
            Ok((Value::None, true))
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            Arc::make_mut(items).clear();
            Ok((Value::None, true))
        }
        "reverse" => {
            arity(name, &args, 0, 0)?;
            Arc::make_mut(items).reverse();
            Ok((Value::None, true))
        }
        "sort" => {
            arity(name, &args, 0, 0)?;
            let sorted = sort_values((**items).clone())?;
            *Arc::make_mut(items) = sorted;
            Ok((Value::None, true))
        }
        "index" | "count" | "copy" => tuple_like(recv, name, &args).map(|v| (v, false)),
        _ => Err(no_method(recv, name)),
    }
}

/// Stable sort using Python ordering.
pub fn sort_values(mut items: Vec<Value>) -> EvalResult<Vec<Value>> {
    let mut err = None;
    items.sort_by(|a, b| match ops::py_cmp(a, b) {
        Ok(ord) => ord,
        Err(e) => {
            err.get_or_insert(e);
            std::cmp::Ordering::Equal
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(items),
    }
}

fn tuple_like(recv: &Value, name: &str, args: &[Value]) -> EvalResult<Value> {
    let items = match recv {
        Value::List(items) | Value::Tuple(items) => items,
        _ => return Err(no_method(recv, name)),
    };
    match name {
        "index" => {
            arity(name, args, 1, 1)?;
            items
                .iter()
                .position(|x| py_eq(x, &args[0]))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| EvalError::InvalidArgument(format!("{} is not in {}", args[0], recv.type_name())))
        }
        "count" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Int(items.iter().filter(|x| py_eq(x, &args[0])).count() as i64))
        }
        "copy" => {
            arity(name, args, 0, 0)?;
            Ok(recv.clone())
        }
        _ => Err(no_method(recv, name)),
    }
}

fn tuple_method(recv: &Value, name: &str, args: Vec<Value>) -> EvalResult<Value> {
    match name {
        "index" | "count" => tuple_like(recv, name, &args),
        _ => Err(no_method(recv, name)),
    }
}

fn dict_method(recv: &mut Value, name: &str, mut args: Vec<Value>) -> EvalResult<(Value, bool)> {
    let Value::Dict(map) = recv else {
        return Err(no_method(recv, name));
    };
    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            Ok((map.get(&args[0]).cloned().unwrap_or(default), false))
        }
        "keys" => {
            arity(name, &args, 0, 0)?;
            Ok((Value::list(map.keys().cloned().collect()), false))
        }
        "values" => {
            arity(name, &args, 0, 0)?;
            Ok((Value::list(map.values().cloned().collect()), false))
        }
        "items" => {
            arity(name, &args, 0, 0)?;
            Ok((
                Value::list(
                    map.iter()
                        .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                        .collect(),
                ),
                false,
            ))
        }
        "pop" => {
            arity(name, &args, 1, 2)?;
            let key = args.remove(0);
            if map.contains_key(&key) {
                let removed = Arc::make_mut(map).remove(&key).unwrap_or(Value::None);
                Ok((removed, true))
            } else if let Some(default) = args.pop() {
                Ok((default, false))
            } else {
                Err(EvalError::KeyError(key.to_string()))
            }
        }
        "popitem" => {
            arity(name, &args, 0, 0)?;
            let last = Arc::make_mut(map).pop_last();
            match last {
                Some((k, v)) => Ok((Value::tuple(vec![k, v]), true)),
                None => Err(EvalError::KeyError("popitem(): dictionary is empty".to_string())),
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            let key = args.swap_remove(0);
            if let Some(existing) = map.get(&key) {
                return Ok((existing.clone(), false));
            }
            if !key.is_hashable() {
                return Err(EvalError::Unhashable(key.type_name().to_string()));
            }
            Arc::make_mut(map).insert(key, default.clone());
            Ok((default, true))
        }
        "update" => {
            arity(name, &args, 1, 1)?;
            let pairs = pairs_of(&args[0])?;
            let target = Arc::make_mut(map);
            for (k, v) in pairs {
                if !k.is_hashable() {
                    return Err(EvalError::Unhashable(k.type_name().to_string()));
                }
                target.insert(k, v);
            }
            Ok((Value::None, true))
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            Arc::make_mut(map).clear();
            Ok((Value::None, true))
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok((recv.clone(), false))
        }
        _ => Err(no_method(recv, name)),
    }
}

/// Key/value pairs from a mapping or an iterable of 2-sequences.
pub fn pairs_of(v: &Value) -> EvalResult<Vec<(Value, Value)>> {
    match v {
        Value::Dict(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::GenericMap(entries) => Ok((**entries).clone()),
        other => ops::iterate(other)?
            .into_iter()
            .map(|item| match ops::iterate(&item)?.as_slice() {
                [k, v] => Ok((k.clone(), v.clone())),
                _ => Err(EvalError::InvalidArgument(format!(
                    "dictionary update sequence element {} is not a pair",
                    item
                ))),
            })
            .collect(),
    }
}

fn set_method(recv: &mut Value, name: &str, args: Vec<Value>) -> EvalResult<(Value, bool)> {
    let Value::Set(set) = recv else {
        return Err(no_method(recv, name));
    };
    match name {
        "add" => {
            arity(name, &args, 1, 1)?;
            if !args[0].is_hashable() {
                return Err(EvalError::Unhashable(args[0].type_name().to_string()));
            }
            let changed = !set.contains(&args[0]);
            if changed {
                Arc::make_mut(set).insert(args[0].clone());
            }
            Ok((Value::None, changed))
        }
        "remove" | "discard" => {
            arity(name, &args, 1, 1)?;
            if !set.contains(&args[0]) {
                if name == "remove" {
                    return Err(EvalError::KeyError(args[0].to_string()));
                }
                return Ok((Value::None, false));
            }
            Arc::make_mut(set).remove(&args[0]);
            Ok((Value::None, true))
        }
        "pop" => {
            arity(name, &args, 0, 0)?;
            match Arc::make_mut(set).pop_first() {
                Some(v) => Ok((v, true)),
                None => Err(EvalError::KeyError("pop from an empty set".to_string())),
            }
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            Arc::make_mut(set).clear();
            Ok((Value::None, true))
        }
        "update" => {
            arity(name, &args, 1, usize::MAX)?;
            let target = Arc::make_mut(set);
            for arg in &args {
                for item in ops::iterate(arg)? {
                    if !item.is_hashable() {
                        return Err(EvalError::Unhashable(item.type_name().to_string()));
                    }
                    target.insert(item);
                }
            }
            Ok((Value::None, true))
        }
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            let mut acc = recv.clone();
            for arg in &args {
                let other = ops::make_set(ops::iterate(arg)?)?;
                let op = match name {
                    "union" => crate::ast::BinOp::BitOr,
                    "intersection" => crate::ast::BinOp::BitAnd,
                    "difference" => crate::ast::BinOp::Sub,
                    _ => crate::ast::BinOp::BitXor,
                };
                acc = ops::binary(op, &acc, &other)?;
            }
            Ok((acc, false))
        }
        "issubset" | "issuperset" => {
            arity(name, &args, 1, 1)?;
            let other = ops::make_set(ops::iterate(&args[0])?)?;
            let op = if name == "issubset" {
                crate::ast::CmpOp::Le
            } else {
                crate::ast::CmpOp::Ge
            };
            Ok((Value::Bool(ops::compare(op, recv, &other)?), false))
        }
        "copy" => Ok((recv.clone(), false)),
        _ => Err(no_method(recv, name)),
    }
}

fn bag_method(recv: &mut Value, name: &str, args: Vec<Value>) -> EvalResult<(Value, bool)> {
    let Value::Bag(items) = recv else {
        return Err(no_method(recv, name));
    };
    match name {
        "add" => {
            arity(name, &args, 1, 1)?;
            let target = Arc::make_mut(items);
            let pos = target.partition_point(|x| *x <= args[0]);
            target.insert(pos, args[0].clone());
            Ok((Value::None, true))
        }
        "add_all" => {
            arity(name, &args, 1, 1)?;
            let target = Arc::make_mut(items);
            target.extend(ops::iterate(&args[0])?);
            target.sort();
            Ok((Value::None, true))
        }
        "remove" | "discard" => {
            arity(name, &args, 1, 1)?;
            match items.iter().position(|x| *x == args[0]) {
                Some(pos) => {
                    Arc::make_mut(items).remove(pos);
                    Ok((Value::None, true))
                }
                None if name == "remove" => Err(EvalError::KeyError(args[0].to_string())),
                None => Ok((Value::None, false)),
            }
        }
        "pop" => {
            arity(name, &args, 0, 0)?;
            if items.is_empty() {
                return Err(EvalError::KeyError("pop from an empty bag".to_string()));
            }
            let v = Arc::make_mut(items).remove(0);
            Ok((v, true))
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            Arc::make_mut(items).clear();
            Ok((Value::None, true))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            Ok((
                Value::Int(items.iter().filter(|x| **x == args[0]).count() as i64),
                false,
            ))
        }
        _ => Err(no_method(recv, name)),
    }
}

fn generic_set_method(recv: &mut Value, name: &str, args: Vec<Value>) -> EvalResult<(Value, bool)> {
    let Value::GenericSet(items) = recv else {
        return Err(no_method(recv, name));
    };
    match name {
        "add" => {
            arity(name, &args, 1, 1)?;
            if items.contains(&args[0]) {
                return Ok((Value::None, false));
            }
            Arc::make_mut(items).push(args[0].clone());
            Ok((Value::None, true))
        }
        "remove" | "discard" => {
            arity(name, &args, 1, 1)?;
            match items.iter().position(|x| *x == args[0]) {
                Some(pos) => {
                    Arc::make_mut(items).remove(pos);
                    Ok((Value::None, true))
                }
                None if name == "remove" => Err(EvalError::KeyError(args[0].to_string())),
                None => Ok((Value::None, false)),
            }
        }
        "pop" => {
            arity(name, &args, 0, 0)?;
            if items.is_empty() {
                return Err(EvalError::KeyError("pop from an empty genericset".to_string()));
            }
            let v = Arc::make_mut(items).remove(0);
            Ok((v, true))
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            Arc::make_mut(items).clear();
            Ok((Value::None, true))
        }
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            let mut acc = recv.clone();
            for arg in &args {
                let other = Value::generic_set(ops::iterate(arg)?);
                let op = match name {
                    "union" => crate::ast::BinOp::BitOr,
                    "intersection" => crate::ast::BinOp::BitAnd,
                    "difference" => crate::ast::BinOp::Sub,
                    _ => crate::ast::BinOp::BitXor,
                };
                acc = ops::binary(op, &acc, &other)?;
            }
            Ok((acc, false))
        }
        "issubset" | "issuperset" => {
            arity(name, &args, 1, 1)?;
            let other = Value::generic_set(ops::iterate(&args[0])?);
            let op = if name == "issubset" {
                crate::ast::CmpOp::Le
            } else {
                crate::ast::CmpOp::Ge
            };
            Ok((Value::Bool(ops::compare(op, recv, &other)?), false))
        }
        _ => Err(no_method(recv, name)),
    }
}

fn position_of(entries: &[(Value, Value)], key: &Value) -> Option<usize> {
    entries.iter().position(|(k, _)| k == key)
}

fn generic_map_method(recv: &mut Value, name: &str, mut args: Vec<Value>) -> EvalResult<(Value, bool)> {
    let Value::GenericMap(entries) = recv else {
        return Err(no_method(recv, name));
    };
    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            Ok((
                position_of(entries, &args[0]).map_or(default, |i| entries[i].1.clone()),
                false,
            ))
        }
        "keys" => Ok((Value::list(entries.iter().map(|(k, _)| k.clone()).collect()), false)),
        "values" => Ok((Value::list(entries.iter().map(|(_, v)| v.clone()).collect()), false)),
        "items" => Ok((
            Value::list(
                entries
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ),
            false,
        )),
        "pop" => {
            arity(name, &args, 1, 2)?;
            let key = args.remove(0);
            match position_of(entries, &key) {
                Some(i) => Ok((Arc::make_mut(entries).remove(i).1, true)),
                None => match args.pop() {
                    Some(default) => Ok((default, false)),
                    None => Err(EvalError::KeyError(key.to_string())),
                },
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            match position_of(entries, &args[0]) {
                Some(i) => Ok((entries[i].1.clone(), false)),
                None => {
                    Arc::make_mut(entries).push((args[0].clone(), default.clone()));
                    Ok((default, true))
                }
            }
        }
        "update" => {
            arity(name, &args, 1, 1)?;
            let pairs = pairs_of(&args[0])?;
            let target = Arc::make_mut(entries);
            for (k, v) in pairs {
                match target.iter_mut().find(|(existing, _)| *existing == k) {
                    Some(entry) => entry.1 = v,
                    None => target.push((k, v)),
                }
            }
            Ok((Value::None, true))
        }
        "clear" => {
            Arc::make_mut(entries).clear();
            Ok((Value::None, true))
        }
        _ => Err(no_method(recv, name)),
    }
}

fn str_method(recv: &Value, name: &str, args: Vec<Value>) -> EvalResult<Value> {
    let Value::Str(s) = recv else {
        return Err(no_method(recv, name));
    };
    match name {
        "upper" => Ok(Value::str(&s.to_uppercase())),
        "lower" => Ok(Value::str(&s.to_lowercase())),
        "strip" => Ok(Value::str(s.trim())),
        "startswith" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(s.starts_with(str_arg(&args[0], name)?)))
        }
        "endswith" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(s.ends_with(str_arg(&args[0], name)?)))
        }
        "find" => {
            arity(name, &args, 1, 1)?;
            let needle = str_arg(&args[0], name)?;
            Ok(Value::Int(
                s.find(needle)
                    .map(|byte| s[..byte].chars().count() as i64)
                    .unwrap_or(-1),
            ))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Int(s.matches(str_arg(&args[0], name)?).count() as i64))
        }
        "replace" => {
            arity(name, &args, 2, 2)?;
            Ok(Value::str(
                &s.replace(str_arg(&args[0], name)?, str_arg(&args[1], name)?),
            ))
        }
        "split" => {
            arity(name, &args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                Some(sep) => s.split(str_arg(sep, name)?).map(Value::str).collect(),
                None => s.split_whitespace().map(Value::str).collect(),
            };
            Ok(Value::list(parts))
        }
        "join" => {
            arity(name, &args, 1, 1)?;
            let parts = ops::iterate(&args[0])?
                .iter()
                .map(|v| match v {
                    Value::Str(p) => Ok(p.to_string()),
                    other => Err(EvalError::type_error(format!(
                        "sequence item: expected str instance, {} found",
                        other.type_name()
                    ))),
                })
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(Value::str(&parts.join(&**s)))
        }
        "format" => {
            let mut out = String::new();
            let mut next = args.iter();
            let mut rest = &s[..];
            while let Some(pos) = rest.find("{}") {
                out.push_str(&rest[..pos]);
                let arg = next.next().ok_or_else(|| {
                    EvalError::InvalidArgument("not enough arguments for format string".into())
                })?;
                out.push_str(&display_str(arg));
                rest = &rest[pos + 2..];
            }
            out.push_str(rest);
            Ok(Value::str(&out))
        }
        _ => Err(no_method(recv, name)),
    }
}

/// Keyword arguments as an ordered map, for builtins that accept `**kwargs`.
pub fn kwargs_map(kwargs: &[(String, Value)]) -> BTreeMap<String, Value> {
    kwargs.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(recv: &mut Value, name: &str, args: Vec<Value>) -> EvalResult<(Value, bool)> {
        call_method(recv, name, args, &[])
    }

    #[test]
    fn test_list_methods() {
        let mut xs = Value::list(vec![Value::Int(3), Value::Int(1)]);
        assert_eq!(call(&mut xs, "append", vec![Value::Int(2)]), Ok((Value::None, true)));
        assert_eq!(call(&mut xs, "pop", vec![]), Ok((Value::Int(2), true)));
        call(&mut xs, "sort", vec![]).unwrap();
        assert_eq!(xs.to_string(), "[1, 3]");
        assert_eq!(call(&mut xs, "index", vec![Value::Int(3)]), Ok((Value::Int(1), false)));
        call(&mut xs, "insert", vec![Value::Int(0), Value::Int(9)]).unwrap();
        assert_eq!(xs.to_string(), "[9, 1, 3]");
        assert!(call(&mut xs, "remove", vec![Value::Int(42)]).is_err());
    }

    #[test]
    fn test_dict_methods() {
        let mut d = Value::dict(vec![(Value::str("a"), Value::Int(1))]);
        assert_eq!(call(&mut d, "get", vec![Value::str("b"), Value::Int(0)]), Ok((Value::Int(0), false)));
        assert_eq!(
            call(&mut d, "setdefault", vec![Value::str("b"), Value::Int(2)]),
            Ok((Value::Int(2), true))
        );
        assert_eq!(call(&mut d, "pop", vec![Value::str("a")]), Ok((Value::Int(1), true)));
        assert_eq!(call(&mut d, "items", vec![]).map(|r| r.0.to_string()), Ok("[(\"b\", 2)]".to_string()));
        assert!(matches!(call(&mut d, "pop", vec![Value::str("zz")]), Err(EvalError::KeyError(_))));
    }

    #[test]
    fn test_set_add_reports_change() {
        let mut s = Value::set(vec![Value::Int(1)]);
        assert_eq!(call(&mut s, "add", vec![Value::Int(1)]), Ok((Value::None, false)));
        assert_eq!(call(&mut s, "add", vec![Value::Int(2)]), Ok((Value::None, true)));
        let (u, _) = call(&mut s, "union", vec![Value::list(vec![Value::Int(5)])]).unwrap();
        assert_eq!(u.to_string(), "set([1, 2, 5])");
        assert_eq!(
            call(&mut s, "issubset", vec![Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])]),
            Ok((Value::Bool(true), false))
        );
    }

    #[test]
    fn test_bag_keeps_duplicates_sorted() {
        let mut b = Value::bag(vec![]);
        call(&mut b, "add", vec![Value::Int(2)]).unwrap();
        call(&mut b, "add", vec![Value::Int(1)]).unwrap();
        call(&mut b, "add", vec![Value::Int(2)]).unwrap();
        assert_eq!(b.to_string(), "bag([1, 2, 2])");
        call(&mut b, "remove", vec![Value::Int(2)]).unwrap();
        assert_eq!(b.to_string(), "bag([1, 2])");
    }

    #[test]
    fn test_generic_map_accepts_unhashable_keys() {
        let mut m = Value::generic_map(vec![]);
        let key = Value::list(vec![Value::Int(1)]);
        call(&mut m, "setdefault", vec![key.clone(), Value::Int(7)]).unwrap();
        assert_eq!(call(&mut m, "get", vec![key]), Ok((Value::Int(7), false)));
    }

    #[test]
    fn test_string_methods() {
        let mut s = Value::str("a,b,c");
        assert_eq!(
            call(&mut s, "split", vec![Value::str(",")]).map(|r| r.0.to_string()),
            Ok("[\"a\", \"b\", \"c\"]".to_string())
        );
        let mut sep = Value::str("-");
        assert_eq!(
            call(&mut sep, "join", vec![Value::list(vec![Value::str("x"), Value::str("y")])]),
            Ok((Value::str("x-y"), false))
        );
        let mut fmt = Value::str("{} + {}");
        assert_eq!(
            call(&mut fmt, "format", vec![Value::Int(1), Value::str("two")]),
            Ok((Value::str("1 + two"), false))
        );
    }

    #[test]
    fn test_unknown_method() {
        let mut v = Value::Int(1);
        assert!(matches!(call(&mut v, "append", vec![]), Err(EvalError::AttributeError { .. })));
    }
}
