//! Symmetry domains: pools of interchangeable identifiers.
//!
//! A domain is pure configuration. Which ids are in use is a property of
//! the checker's state, so allocation goes through a [`SymmetryContext`]
//! that is seeded from the host's scan of the state and then tracks ids
//! handed out during the current statement.

use crate::eval::{EvalError, EvalResult};
use crate::value::{SymmetricValue, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Upper bound for ordinal ids; half the `i64` range keeps midpoints positive.
pub const ORDINAL_MAX: i64 = i64::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DomainKind {
    /// Equality only.
    Nominal,
    /// Equality and ordering; only relative order matters.
    Ordinal,
    /// Ordering plus distance; canonicalised by shifting to zero.
    Interval,
}

impl DomainKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DomainKind::Nominal => "nominal",
            DomainKind::Ordinal => "ordinal",
            DomainKind::Interval => "interval",
        }
    }

    pub fn is_ordered(self) -> bool {
        !matches!(self, DomainKind::Nominal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainDef {
    pub name: Arc<str>,
    pub kind: DomainKind,
    /// Maximum number of distinct ids alive at once.
    pub limit: i64,
    /// Interval domains: maximum `max - min` across live ids.
    pub divergence: i64,
    /// Interval domains: first id handed out.
    pub start: i64,
}

impl fmt::Display for DomainDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DomainKind::Interval => write!(
                f,
                "symmetry.interval(name={:?}, limit={}, divergence={}, start={})",
                self.name, self.limit, self.divergence, self.start
            ),
            kind => write!(
                f,
                "symmetry.{}(name={:?}, limit={})",
                kind.as_str(),
                self.name,
                self.limit
            ),
        }
    }
}

impl DomainDef {
    pub fn nominal(name: &str, limit: i64) -> EvalResult<DomainDef> {
        Self::checked(name, DomainKind::Nominal, limit, 0, 0)
    }

    pub fn ordinal(name: &str, limit: i64) -> EvalResult<DomainDef> {
        Self::checked(name, DomainKind::Ordinal, limit, 0, 0)
    }

    /// At least one of `limit` and `divergence` must be given; the other
    /// is derived so that `limit <= divergence + 1`.
    pub fn interval(
        name: &str,
        limit: Option<i64>,
        divergence: Option<i64>,
        start: i64,
    ) -> EvalResult<DomainDef> {
        let (limit, divergence) = match (limit, divergence) {
            (None, None) => {
                return Err(EvalError::InvalidArgument(
                    "interval: at least one of divergence or limit must be provided".into(),
                ))
            }
            (None, Some(d)) => (d + 1, d),
            (Some(l), None) => (l, l - 1),
            (Some(l), Some(d)) => (l, d),
        };
        if limit > divergence + 1 {
            return Err(EvalError::InvalidArgument(format!(
                "interval: limit {} cannot fit in divergence {}",
                limit, divergence
            )));
        }
        if divergence < 0 {
            return Err(EvalError::InvalidArgument(format!(
                "interval: divergence must be >= 0, got {}",
                divergence
            )));
        }
        Self::checked(name, DomainKind::Interval, limit, divergence, start)
    }

    fn checked(
        name: &str,
        kind: DomainKind,
        limit: i64,
        divergence: i64,
        start: i64,
    ) -> EvalResult<DomainDef> {
        if limit <= 0 {
            return Err(EvalError::InvalidArgument(format!(
                "{}: limit must be positive, got {}",
                kind.as_str(),
                limit
            )));
        }
        if name.is_empty() {
            return Err(EvalError::InvalidArgument(format!(
                "{}: name cannot be empty",
                kind.as_str()
            )));
        }
        Ok(DomainDef {
            name: Arc::from(name),
            kind,
            limit,
            divergence,
            start,
        })
    }

    pub fn value(&self, id: i64) -> Value {
        Value::Symmetric(SymmetricValue {
            domain: self.name.clone(),
            kind: self.kind,
            id,
        })
    }

    /// Whether `name` is a method available on this domain's kind.
    pub fn has_method(&self, name: &str) -> bool {
        match name {
            "fresh" | "values" => true,
            "choices" | "choose" => self.kind == DomainKind::Nominal,
            "min" | "max" => self.kind.is_ordered(),
            _ => false,
        }
    }

    /// Plain attributes: `name`, `limit`, and for interval domains
    /// `divergence` and `start`.
    pub fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::Str(self.name.clone())),
            "limit" => Some(Value::Int(self.limit)),
            "divergence" if self.kind == DomainKind::Interval => Some(Value::Int(self.divergence)),
            "start" if self.kind == DomainKind::Interval => Some(Value::Int(self.start)),
            _ => None,
        }
    }
}

fn midpoint(lo: i64, hi: i64) -> EvalResult<i64> {
    if hi <= lo || hi - lo < 2 {
        return Err(EvalError::InvalidArgument(format!(
            "ordinal symmetry overflow: no space between {} and {}",
            lo, hi
        )));
    }
    Ok(lo + (hi - lo) / 2)
}

/// Ids in use per domain during one statement's execution.
#[derive(Debug, Clone, Default)]
pub struct SymmetryContext {
    loaded: bool,
    cache: BTreeMap<Arc<str>, BTreeSet<i64>>,
}

impl SymmetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Seeds the context with the ids currently present in the state.
    pub fn load(&mut self, used: BTreeMap<Arc<str>, BTreeSet<i64>>) {
        for (name, ids) in used {
            self.cache.entry(name).or_default().extend(ids);
        }
        self.loaded = true;
    }

    /// Forgets everything; the next allocation rescans the state.
    pub fn reset(&mut self) {
        self.loaded = false;
        self.cache.clear();
    }

    fn used(&mut self, domain: &DomainDef) -> &mut BTreeSet<i64> {
        self.cache.entry(domain.name.clone()).or_default()
    }

    /// Allocates a new id, or `DisableTransition` when the domain is full.
    pub fn fresh(&mut self, domain: &DomainDef) -> EvalResult<Value> {
        let used = self.used(domain);
        if used.len() as i64 >= domain.limit {
            return Err(EvalError::DisableTransition(format!(
                "symmetry limit reached for domain {:?} (limit {})",
                domain.name, domain.limit
            )));
        }
        let next = match domain.kind {
            DomainKind::Nominal => {
                let mut next = 0;
                while used.contains(&next) {
                    next += 1;
                }
                next
            }
            DomainKind::Interval => match (used.first(), used.last()) {
                (Some(&min), Some(&max)) => {
                    let next = max + 1;
                    if domain.divergence > 0 && next - min > domain.divergence {
                        return Err(EvalError::DisableTransition(format!(
                            "symmetry divergence reached for domain {:?} (divergence {}, spread {})",
                            domain.name,
                            domain.divergence,
                            next - min
                        )));
                    }
                    next
                }
                _ => domain.start,
            },
            DomainKind::Ordinal => midpoint(used.last().copied().unwrap_or(0), ORDINAL_MAX)?,
        };
        used.insert(next);
        Ok(domain.value(next))
    }

    /// All ids in use, ascending.
    pub fn values(&mut self, domain: &DomainDef) -> Value {
        let ids: Vec<i64> = self.used(domain).iter().copied().collect();
        Value::list(ids.into_iter().map(|id| domain.value(id)).collect())
    }

    /// `values()` plus one fresh id when the limit allows.
    pub fn choices(&mut self, domain: &DomainDef) -> EvalResult<Value> {
        match self.fresh(domain) {
            Ok(_) | Err(EvalError::DisableTransition(_)) => Ok(self.values(domain)),
            Err(e) => Err(e),
        }
    }

    /// The smallest (or largest) id in use, or a fresh one if none are.
    pub fn extreme_or_fresh(&mut self, domain: &DomainDef, max: bool) -> EvalResult<Value> {
        let used = self.used(domain);
        let id = if max { used.last() } else { used.first() };
        match id {
            Some(&id) => Ok(domain.value(id)),
            None => self.fresh(domain),
        }
    }

    /// Dispatches a domain method call.
    pub fn call(&mut self, domain: &DomainDef, method: &str) -> EvalResult<Value> {
        if !domain.has_method(method) {
            return Err(EvalError::AttributeError {
                type_name: format!("symmetry_domain({})", domain.kind.as_str()),
                attr: method.to_string(),
            });
        }
        match method {
            "fresh" => self.fresh(domain),
            "values" => Ok(self.values(domain)),
            "choices" => self.choices(domain),
            "choose" | "min" => self.extreme_or_fresh(domain, false),
            "max" => self.extreme_or_fresh(domain, true),
            _ => Err(EvalError::AttributeError {
                type_name: "symmetry_domain".into(),
                attr: method.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &Value) -> Vec<i64> {
        match v {
            Value::List(items) => items
                .iter()
                .map(|x| match x {
                    Value::Symmetric(s) => s.id,
                    other => panic!("expected symmetric value, got {}", other),
                })
                .collect(),
            other => panic!("expected list, got {}", other),
        }
    }

    #[test]
    fn test_nominal_fresh_fills_gaps() {
        let d = DomainDef::nominal("key", 3).unwrap();
        let mut ctx = SymmetryContext::new();
        ctx.load(BTreeMap::from([(Arc::from("key"), BTreeSet::from([0, 2]))]));
        assert_eq!(ctx.fresh(&d).unwrap(), d.value(1));
        assert!(matches!(
            ctx.fresh(&d),
            Err(EvalError::DisableTransition(_))
        ));
    }

    #[test]
    fn test_interval_divergence() {
        let d = DomainDef::interval("seq", Some(3), Some(2), 10).unwrap();
        let mut ctx = SymmetryContext::new();
        assert_eq!(ctx.fresh(&d).unwrap(), d.value(10));
        assert_eq!(ctx.fresh(&d).unwrap(), d.value(11));
        assert_eq!(ctx.fresh(&d).unwrap(), d.value(12));
        assert!(matches!(
            ctx.fresh(&d),
            Err(EvalError::DisableTransition(_))
        ));
    }

    #[test]
    fn test_interval_derivation() {
        let d = DomainDef::interval("s", None, Some(4), 0).unwrap();
        assert_eq!(d.limit, 5);
        let d = DomainDef::interval("s", Some(2), None, 0).unwrap();
        assert_eq!(d.divergence, 1);
        assert!(DomainDef::interval("s", Some(5), Some(1), 0).is_err());
        assert!(DomainDef::interval("s", None, None, 0).is_err());
    }

    #[test]
    fn test_ordinal_midpoints_increase() {
        let d = DomainDef::ordinal("ts", 3).unwrap();
        let mut ctx = SymmetryContext::new();
        let a = ctx.fresh(&d).unwrap();
        let b = ctx.fresh(&d).unwrap();
        assert!(a < b);
        assert_eq!(ids(&ctx.values(&d)).len(), 2);
    }

    #[test]
    fn test_choices_adds_one_fresh_value() {
        let d = DomainDef::nominal("k", 2).unwrap();
        let mut ctx = SymmetryContext::new();
        assert_eq!(ids(&ctx.choices(&d).unwrap()), vec![0]);
        assert_eq!(ids(&ctx.choices(&d).unwrap()), vec![0, 1]);
        assert_eq!(ids(&ctx.choices(&d).unwrap()), vec![0, 1]);
    }

    #[test]
    fn test_method_availability() {
        let nominal = DomainDef::nominal("k", 2).unwrap();
        let ordinal = DomainDef::ordinal("t", 2).unwrap();
        assert!(nominal.has_method("choose"));
        assert!(!nominal.has_method("max"));
        assert!(ordinal.has_method("max"));
        assert!(!ordinal.has_method("choices"));
        let mut ctx = SymmetryContext::new();
        assert!(ctx.call(&nominal, "max").is_err());
    }
}
