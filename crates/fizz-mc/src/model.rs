//! The loaded specification plus the run-scoped tables derived from it.

use crate::durability::Durability;
use crate::error::{CheckError, CheckResult, ModelError, ModelResult};
use dashmap::DashMap;
use fizz_ast::{File, Function, Role};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Location of a user function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    pub file_index: usize,
    /// Path of the function node, e.g. `Roles[0].Functions[1]`.
    pub path: String,
    pub role: Option<String>,
}

/// A role declaration located in its file.
#[derive(Debug, Clone, Copy)]
pub struct RoleDecl<'a> {
    pub file_index: usize,
    pub index: usize,
    pub role: &'a Role,
}

impl RoleDecl<'_> {
    pub fn path(&self) -> String {
        format!("Roles[{}]", self.index)
    }
}

/// The specification being checked. One `Model` backs one run; the role
/// and channel counters live here rather than in globals.
#[derive(Debug)]
pub struct Model {
    pub files: Vec<File>,
    functions: BTreeMap<String, FunctionRef>,
    durability: BTreeMap<String, Durability>,
    role_refs: DashMap<String, u32>,
    next_channel: AtomicU32,
}

impl Model {
    pub fn new(files: Vec<File>) -> ModelResult<Self> {
        if files.is_empty() {
            return Err(ModelError::Invalid("no input files".into()));
        }
        let mut functions = BTreeMap::new();
        let mut durability = BTreeMap::new();
        for (fi, file) in files.iter().enumerate() {
            for (i, f) in file.functions.iter().enumerate() {
                functions.insert(
                    f.name.clone(),
                    FunctionRef {
                        file_index: fi,
                        path: format!("Functions[{}]", i),
                        role: None,
                    },
                );
            }
            for (r, role) in file.roles.iter().enumerate() {
                for (i, f) in role.functions.iter().enumerate() {
                    functions.insert(
                        format!("{}.{}", role.name, f.name),
                        FunctionRef {
                            file_index: fi,
                            path: format!("Roles[{}].Functions[{}]", r, i),
                            role: Some(role.name.clone()),
                        },
                    );
                }
                if let Some(d) = Durability::from_role(role)? {
                    debug!(role = %role.name, "role declares durability");
                    durability.insert(role.name.clone(), d);
                }
            }
        }
        Ok(Self {
            files,
            functions,
            durability,
            role_refs: DashMap::new(),
            next_channel: AtomicU32::new(0),
        })
    }

    pub fn from_file(file: File) -> ModelResult<Self> {
        Self::new(vec![file])
    }

    /// Parses a model from its JSON AST.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file = File::from_json(json)?;
        Self::from_file(file).map_err(serde::de::Error::custom)
    }

    pub fn load(path: &Path) -> CheckResult<Arc<Self>> {
        let text = std::fs::read_to_string(path).map_err(|source| CheckError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = File::from_json(&text).map_err(|source| CheckError::Ast {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Arc::new(Self::from_file(file)?))
    }

    pub fn file(&self, index: usize) -> ModelResult<&File> {
        self.files
            .get(index)
            .ok_or_else(|| ModelError::Internal(format!("no file at index {}", index)))
    }

    pub fn main(&self) -> &File {
        &self.files[0]
    }

    /// Resolves `name` or `Role.name` to a user function.
    pub fn function(&self, name: &str) -> Option<(&FunctionRef, &Function)> {
        let fref = self.functions.get(name)?;
        let file = self.files.get(fref.file_index)?;
        let function = match &fref.role {
            Some(role) => {
                let (_, role) = file.role(role)?;
                let short = name.rsplit('.').next().unwrap_or(name);
                role.functions.iter().find(|f| f.name == short)?
            }
            None => file.functions.iter().find(|f| f.name == name)?,
        };
        Some((fref, function))
    }

    pub fn role(&self, name: &str) -> Option<RoleDecl<'_>> {
        self.files.iter().enumerate().find_map(|(fi, file)| {
            file.role(name).map(|(index, role)| RoleDecl {
                file_index: fi,
                index,
                role,
            })
        })
    }

    pub fn is_role(&self, name: &str) -> bool {
        self.role(name).is_some()
    }

    pub fn durability(&self, role: &str) -> Option<&Durability> {
        self.durability.get(role)
    }

    /// Next reference number for a new instance of `role`, starting at 0.
    pub fn next_role_ref(&self, role: &str) -> u32 {
        let mut entry = self.role_refs.entry(role.to_string()).or_insert(0);
        let id = *entry;
        *entry += 1;
        id
    }

    pub fn next_channel_id(&self) -> u32 {
        self.next_channel.fetch_add(1, Ordering::Relaxed)
    }

    /// Restarts role and channel numbering, for a fresh simulation walk.
    pub fn reset_counters(&self) {
        self.role_refs.clear();
        self.next_channel.store(0, Ordering::Relaxed);
    }

    /// Number of invariants per file, for sizing witness tables.
    pub fn invariant_counts(&self) -> Vec<usize> {
        self.files.iter().map(|f| f.invariants.len()).collect()
    }

    pub fn has_liveness(&self) -> bool {
        self.files
            .iter()
            .any(|f| f.invariants.iter().any(|i| i.is_eventually()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "functions": [{"name": "helper"}],
        "roles": [{
            "name": "Cache",
            "functions": [{"name": "Get"}],
            "decorators": [{"name": "state", "args": [{"name": "ephemeral", "pyExpr": "['c']"}]}]
        }],
        "invariants": [{"name": "Live", "always": true, "eventually": true, "pyExpr": "True"}]
    }"#;

    #[test]
    fn test_symbol_table() {
        let model = Model::from_json(JSON).unwrap();
        let (fref, f) = model.function("helper").unwrap();
        assert_eq!(fref.path, "Functions[0]");
        assert_eq!(f.name, "helper");
        let (fref, f) = model.function("Cache.Get").unwrap();
        assert_eq!(fref.path, "Roles[0].Functions[0]");
        assert_eq!(fref.role.as_deref(), Some("Cache"));
        assert_eq!(f.name, "Get");
        assert!(model.function("Get").is_none());
        assert!(model.durability("Cache").is_some());
        assert!(model.has_liveness());
        assert_eq!(model.invariant_counts(), vec![1]);
    }

    #[test]
    fn test_counters_are_per_model() {
        let model = Model::from_json(JSON).unwrap();
        assert_eq!(model.next_role_ref("Cache"), 0);
        assert_eq!(model.next_role_ref("Cache"), 1);
        assert_eq!(model.next_role_ref("Other"), 0);
        assert_eq!(model.next_channel_id(), 0);
        assert_eq!(model.next_channel_id(), 1);

        let fresh = Model::from_json(JSON).unwrap();
        assert_eq!(fresh.next_role_ref("Cache"), 0);

        model.reset_counters();
        assert_eq!(model.next_role_ref("Cache"), 0);
        assert_eq!(model.next_channel_id(), 0);
    }

    #[test]
    fn test_role_lookup() {
        let model = Model::from_json(JSON).unwrap();
        let decl = model.role("Cache").unwrap();
        assert_eq!(decl.path(), "Roles[0]");
        assert!(!model.is_role("Server"));
    }
}
