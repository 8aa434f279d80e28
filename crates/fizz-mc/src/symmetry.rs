//! Symmetry reduction.
//!
//! Ids drawn from a symmetry domain carry no identity beyond what the
//! domain's kind allows, so two processes that differ only by a renaming
//! of those ids are the same state. For a new process we enumerate the
//! renamings that bring its ids into canonical position and look each
//! renamed fingerprint up in the visited set.
//!
//! - nominal domains (and `symmetric` roles): every bijection of the used
//!   ids onto `0..n`
//! - ordinal domains: rank-preserving map onto the ids `fresh()` would hand
//!   out from an empty domain
//! - interval domains: shift so the smallest used id lands on `start`

use crate::model::Model;
use crate::process::Process;
use fizz_eval::symmetry::ORDINAL_MAX;
use fizz_eval::{DomainDef, DomainKind, RoleRef, SymmetricValue, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on renamings tried per process.
const MAX_RENAMINGS: usize = 40_320;

/// Ids in use for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedIds {
    pub kind: DomainKind,
    pub ids: BTreeSet<i64>,
}

/// A renaming of symmetric ids, per domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Renaming {
    ids: BTreeMap<Arc<str>, BTreeMap<i64, i64>>,
    roles: BTreeSet<Arc<str>>,
}

impl Renaming {
    pub fn is_identity(&self) -> bool {
        self.ids.values().flatten().all(|(from, to)| from == to)
    }

    fn id(&self, domain: &str, id: i64) -> Option<i64> {
        self.ids.get(domain)?.get(&id).copied()
    }

    fn role(&self, rref: &RoleRef) -> Option<RoleRef> {
        if !self.roles.contains(&rref.name) {
            return None;
        }
        let id = self.id(&rref.name, rref.id as i64)?;
        Some(RoleRef::new(rref.name.clone(), id as u32))
    }

    pub fn value(&self, value: &Value) -> Value {
        value.map_leaves(&mut |leaf| match leaf {
            Value::Symmetric(s) => self.id(&s.domain, s.id).map(|id| {
                Value::Symmetric(SymmetricValue {
                    domain: s.domain.clone(),
                    kind: s.kind,
                    id,
                })
            }),
            Value::Role(r) => self.role(r).map(Value::Role),
            Value::RoleStub(stub) => self.role(&stub.role).map(|role| {
                let mut stub = stub.clone();
                stub.role = role;
                Value::RoleStub(stub)
            }),
            _ => None,
        })
    }

    fn values(&self, map: &mut BTreeMap<String, Value>) {
        for v in map.values_mut() {
            *v = self.value(v);
        }
    }

    /// A copy of `process` with every symmetric id renamed.
    pub fn apply(&self, process: &Process) -> Process {
        let mut out = process.clone();
        self.values(&mut out.heap.state);
        self.values(&mut out.returns);
        for frame in out.threads.iter_mut().flat_map(|t| t.stack.iter_mut()) {
            for scope in frame.scopes.iter_mut() {
                self.values(&mut scope.vars);
                for v in scope.loop_range.iter_mut() {
                    *v = self.value(v);
                }
            }
            self.values(&mut frame.args);
            if let Some(obj) = frame.obj.as_ref().and_then(|r| self.role(r)) {
                frame.obj = Some(obj);
            }
        }
        for role in out.roles.iter_mut() {
            let mut renamed = role.map_values(&mut |v| self.value(v));
            if let Some(rref) = self.role(&role.rref) {
                renamed.rref = rref;
            }
            *role = renamed;
        }
        for queue in out.pending.values_mut() {
            for msg in queue.iter_mut() {
                if let Some(r) = self.role(&msg.receiver) {
                    msg.receiver = r;
                }
                for v in msg.args.iter_mut() {
                    *v = self.value(v);
                }
                for (_, v) in msg.kwargs.iter_mut() {
                    *v = self.value(v);
                }
            }
            queue.sort();
        }
        out.invalidate_key();
        out
    }
}

/// Domains declared by the model, plus roles marked `symmetric`.
#[derive(Debug, Clone, Default)]
pub struct Symmetry {
    domains: BTreeMap<Arc<str>, DomainDef>,
    roles: BTreeSet<Arc<str>>,
}

impl Symmetry {
    /// Collects domain definitions from the frozen globals.
    pub fn new(model: &Model, globals: &BTreeMap<String, Value>) -> Self {
        let mut domains = BTreeMap::new();
        for value in globals.values() {
            value.visit(&mut |v| {
                if let Value::Domain(def) = v {
                    domains.insert(def.name.clone(), (**def).clone());
                }
            });
        }
        let roles = model
            .files
            .iter()
            .flat_map(|f| f.roles.iter())
            .filter(|r| r.is_symmetric())
            .map(|r| Arc::from(r.name.as_str()))
            .collect();
        Self { domains, roles }
    }

    pub fn is_active(&self) -> bool {
        !self.domains.is_empty() || !self.roles.is_empty()
    }

    pub fn domain(&self, name: &str) -> Option<&DomainDef> {
        self.domains.get(name)
    }

    /// Ids in use per domain. Symmetric roles count as nominal domains
    /// named after the role.
    pub fn used_ids(&self, process: &Process) -> BTreeMap<Arc<str>, UsedIds> {
        let mut out: BTreeMap<Arc<str>, UsedIds> = BTreeMap::new();
        process.visit_values(&mut |value| {
            value.visit(&mut |v| {
                if let Value::Symmetric(s) = v {
                    out.entry(s.domain.clone())
                        .or_insert_with(|| UsedIds {
                            kind: s.kind,
                            ids: BTreeSet::new(),
                        })
                        .ids
                        .insert(s.id);
                }
            })
        });
        for role in &process.roles {
            if role.symmetric && self.roles.contains(&role.rref.name) {
                out.entry(role.rref.name.clone())
                    .or_insert_with(|| UsedIds {
                        kind: DomainKind::Nominal,
                        ids: BTreeSet::new(),
                    })
                    .ids
                    .insert(role.rref.id as i64);
            }
        }
        out
    }

    /// Every renaming into canonical position other than the identity.
    pub fn renamings(&self, process: &Process) -> Vec<Renaming> {
        let used = self.used_ids(process);
        if used.is_empty() {
            return Vec::new();
        }
        let mut out = vec![Renaming {
            ids: BTreeMap::new(),
            roles: self.roles.clone(),
        }];
        for (name, used) in &used {
            let options = self.domain_maps(name, used);
            let mut next = Vec::with_capacity(out.len() * options.len());
            'outer: for base in &out {
                for map in &options {
                    if next.len() >= MAX_RENAMINGS {
                        debug!(domain = %name, limit = MAX_RENAMINGS, "symmetry renamings truncated");
                        break 'outer;
                    }
                    let mut r = base.clone();
                    r.ids.insert(name.clone(), map.clone());
                    next.push(r);
                }
            }
            out = next;
        }
        out.retain(|r| !r.is_identity());
        out
    }

    fn domain_maps(&self, name: &str, used: &UsedIds) -> Vec<BTreeMap<i64, i64>> {
        let ids: Vec<i64> = used.ids.iter().copied().collect();
        match used.kind {
            DomainKind::Nominal => permutations(ids.len())
                .into_iter()
                .map(|perm| ids.iter().copied().zip(perm.into_iter().map(|i| i as i64)).collect())
                .collect(),
            DomainKind::Ordinal => {
                let mut next = 0;
                let map = ids
                    .iter()
                    .map(|&id| {
                        next = next + (ORDINAL_MAX - next) / 2;
                        (id, next)
                    })
                    .collect();
                vec![map]
            }
            DomainKind::Interval => {
                let start = self.domain(name).map_or(0, |d| d.start);
                let min = ids.first().copied().unwrap_or(start);
                vec![ids.iter().map(|&id| (id, id - min + start)).collect()]
            }
        }
    }

    /// Limits that `fresh()` alone cannot enforce once ids are carried
    /// across transitions: distinct ids of ordered domains, and the
    /// divergence of interval domains. Returns the violation, if any.
    pub fn check_constraints(&self, process: &Process) -> Option<String> {
        for (name, used) in self.used_ids(process) {
            let Some(def) = self.domains.get(&name) else {
                continue;
            };
            if !def.kind.is_ordered() {
                continue;
            }
            let count = used.ids.len() as i64;
            if count > def.limit {
                return Some(format!(
                    "domain {:?} uses {} ids, limit {}",
                    name, count, def.limit
                ));
            }
            if def.kind == DomainKind::Interval && def.divergence > 0 {
                if let (Some(min), Some(max)) = (used.ids.first(), used.ids.last()) {
                    if max - min > def.divergence {
                        return Some(format!(
                            "domain {:?} spread {} exceeds divergence {}",
                            name,
                            max - min,
                            def.divergence
                        ));
                    }
                }
            }
        }
        None
    }
}

/// All permutations of `0..n` in lexicographic order.
fn permutations(n: usize) -> Vec<Vec<usize>> {
    let mut current: Vec<usize> = (0..n).collect();
    let mut out = vec![current.clone()];
    loop {
        let Some(i) = (1..current.len()).rev().find(|&i| current[i - 1] < current[i]) else {
            return out;
        };
        let pivot = i - 1;
        let Some(j) = (i..current.len()).rev().find(|&j| current[j] > current[pivot]) else {
            return out;
        };
        current.swap(pivot, j);
        current[i..].reverse();
        out.push(current.clone());
        if out.len() >= MAX_RENAMINGS {
            return out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleInstance;

    fn sym(domain: &str, kind: DomainKind, id: i64) -> Value {
        Value::Symmetric(SymmetricValue {
            domain: Arc::from(domain),
            kind,
            id,
        })
    }

    fn model() -> Model {
        Model::from_json(r#"{"roles": [{"name": "Node", "modifiers": ["symmetric"]}]}"#).unwrap()
    }

    fn process() -> Process {
        Process::new(Arc::new(BTreeMap::new()), &[])
    }

    #[test]
    fn test_permutations() {
        assert_eq!(permutations(0), vec![Vec::<usize>::new()]);
        assert_eq!(permutations(3).len(), 6);
        assert_eq!(permutations(3)[1], vec![0, 2, 1]);
    }

    #[test]
    fn test_nominal_renaming_reaches_canonical_ids() {
        let symmetry = Symmetry::default();
        let mut p = process();
        p.heap.insert("owner", sym("id", DomainKind::Nominal, 1));

        let renamings = symmetry.renamings(&p);
        assert_eq!(renamings.len(), 1);
        let renamed = renamings[0].apply(&p);
        assert_eq!(renamed.heap.get("owner"), Some(&sym("id", DomainKind::Nominal, 0)));

        let mut canonical = process();
        canonical.heap.insert("owner", sym("id", DomainKind::Nominal, 0));
        assert!(symmetry.renamings(&canonical).is_empty());
        assert_eq!(renamed.compute_key(), canonical.compute_key());
    }

    #[test]
    fn test_swapped_ids_are_the_same_state() {
        let symmetry = Symmetry::default();
        let mut a = process();
        a.heap.insert(
            "pair",
            Value::tuple(vec![sym("id", DomainKind::Nominal, 0), sym("id", DomainKind::Nominal, 1)]),
        );
        let mut b = process();
        b.heap.insert(
            "pair",
            Value::tuple(vec![sym("id", DomainKind::Nominal, 1), sym("id", DomainKind::Nominal, 0)]),
        );
        let key = a.compute_key();
        assert!(symmetry
            .renamings(&b)
            .iter()
            .any(|r| r.apply(&b).compute_key() == key));
    }

    #[test]
    fn test_interval_shift_and_ordinal_rank() {
        let symmetry = Symmetry::default();
        let mut p = process();
        p.heap.insert(
            "xs",
            Value::list(vec![sym("t", DomainKind::Interval, 5), sym("t", DomainKind::Interval, 7)]),
        );
        p.heap.insert("o", sym("r", DomainKind::Ordinal, 12345));
        let renamings = symmetry.renamings(&p);
        assert_eq!(renamings.len(), 1);
        let renamed = renamings[0].apply(&p);
        assert_eq!(
            renamed.heap.get("xs"),
            Some(&Value::list(vec![
                sym("t", DomainKind::Interval, 0),
                sym("t", DomainKind::Interval, 2)
            ]))
        );
        assert_eq!(renamed.heap.get("o"), Some(&sym("r", DomainKind::Ordinal, ORDINAL_MAX / 2)));
    }

    #[test]
    fn test_symmetric_roles_are_permuted() {
        let m = model();
        let symmetry = Symmetry::new(&m, &BTreeMap::new());
        assert!(symmetry.is_active());

        let mut p = process();
        for id in 0..2 {
            let mut role = RoleInstance::new(RoleRef::new("Node", id), true, BTreeMap::new());
            role.fields.insert("v".into(), Value::Int(id as i64));
            p.roles.push(role);
        }
        p.heap.insert("leader", Value::Role(RoleRef::new("Node", 1)));

        let renamings = symmetry.renamings(&p);
        assert_eq!(renamings.len(), 1);
        let swapped = renamings[0].apply(&p);
        assert_eq!(swapped.heap.get("leader"), Some(&Value::Role(RoleRef::new("Node", 0))));
        let node0 = swapped.role(&RoleRef::new("Node", 0)).unwrap();
        assert_eq!(node0.fields["v"], Value::Int(1));
    }

    #[test]
    fn test_interval_divergence_constraint() {
        let m = Model::from_json("{}").unwrap();
        let def = DomainDef::interval("t", Some(3), Some(2), 0).unwrap();
        let globals = BTreeMap::from([("T".to_string(), Value::Domain(Arc::new(def)))]);
        let symmetry = Symmetry::new(&m, &globals);

        let mut p = process();
        p.heap.insert(
            "xs",
            Value::list(vec![sym("t", DomainKind::Interval, 0), sym("t", DomainKind::Interval, 2)]),
        );
        assert_eq!(symmetry.check_constraints(&p), None);
        p.heap.insert(
            "xs",
            Value::list(vec![sym("t", DomainKind::Interval, 0), sym("t", DomainKind::Interval, 3)]),
        );
        assert!(symmetry.check_constraints(&p).is_some());
    }
}
