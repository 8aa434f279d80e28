//! Checker configuration: `fizz.yaml` state-space options, the perf model
//! used by Markov analysis, and the run settings the CLI layers on top.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const DEFAULT_MAX_ACTIONS: u64 = 100;
const DEFAULT_MAX_CONCURRENT_ACTIONS: u64 = 2;

/// Global exploration bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub max_actions: u64,
    /// Live threads per process; `0` means `min(2, max_actions)`.
    pub max_concurrent_actions: u64,
    pub crash_on_yield: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_actions: DEFAULT_MAX_ACTIONS,
            max_concurrent_actions: DEFAULT_MAX_CONCURRENT_ACTIONS,
            crash_on_yield: false,
        }
    }
}

/// Per-action overrides, keyed by `Action`, `Role#ref.Action`,
/// `Role#.Action` or `Role.Action`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionOptions {
    /// `0` means unbounded.
    pub max_actions: u64,
    /// `0` means unbounded.
    pub max_concurrent_actions: u64,
    pub crash_on_yield: Option<bool>,
}

/// How liveness properties are checked after exploration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LivenessMode {
    Off,
    /// Exact fair-cycle search, depth first.
    #[default]
    Strict,
    /// Exact fair-cycle search, breadth first.
    StrictBfs,
    /// Graph fixed point over strong-fair links.
    Eventual,
}

impl LivenessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LivenessMode::Off => "off",
            LivenessMode::Strict => "strict",
            LivenessMode::StrictBfs => "strict/bfs",
            LivenessMode::Eventual => "eventual",
        }
    }
}

impl FromStr for LivenessMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "enabled" | "true" | "strict" => Ok(LivenessMode::Strict),
            "strict/bfs" => Ok(LivenessMode::StrictBfs),
            "eventual" | "nondeterministic" => Ok(LivenessMode::Eventual),
            "off" | "false" | "disabled" => Ok(LivenessMode::Off),
            other => Err(ConfigError::Invalid(format!("unknown liveness mode '{}'", other))),
        }
    }
}

impl fmt::Display for LivenessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LivenessMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LivenessMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Bool(true) => Ok(LivenessMode::Strict),
            Raw::Bool(false) => Ok(LivenessMode::Off),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// The contents of `fizz.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSpaceOptions {
    pub options: Options,
    pub liveness: LivenessMode,
    pub deadlock_detection: bool,
    pub continue_on_invariant_failures: bool,
    pub continue_path_on_invariant_failures: bool,
    pub action_options: BTreeMap<String, ActionOptions>,
}

impl StateSpaceOptions {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let parsed: StateSpaceOptions = if text.trim().is_empty() {
            StateSpaceOptions::default()
        } else {
            serde_yml::from_str(text)?
        };
        Ok(parsed.normalized())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Loads `path` if it exists, else returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Applies the derived defaults.
    pub fn normalized(mut self) -> Self {
        if self.options.max_concurrent_actions == 0 {
            self.options.max_concurrent_actions =
                DEFAULT_MAX_CONCURRENT_ACTIONS.min(self.options.max_actions);
        }
        self
    }

    /// Whether a thread whose root frame is `action` may crash at a yield.
    pub fn crash_on_yield(&self, action: &str) -> bool {
        self.action_options
            .get(action)
            .and_then(|o| o.crash_on_yield)
            .unwrap_or(self.options.crash_on_yield)
    }
}

/// Frontier discipline for exhaustive exploration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    #[default]
    Bfs,
    Dfs,
    Random,
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bfs" => Ok(Strategy::Bfs),
            "dfs" => Ok(Strategy::Dfs),
            "random" => Ok(Strategy::Random),
            other => Err(ConfigError::Invalid(format!("unknown strategy '{}'", other))),
        }
    }
}

/// Settings for one checker run.
#[derive(Debug, Clone, Default)]
pub struct CheckConfig {
    /// Options from `fizz.yaml`.
    pub options: StateSpaceOptions,

    /// Frontier discipline.
    pub strategy: Strategy,

    /// Run random walks instead of exhaustive search.
    pub simulation: bool,

    /// Random walks to run in simulation mode (0 = until a failure or stop).
    pub max_runs: u64,

    /// RNG seed for `random` and simulation (0 = derive from the clock).
    pub seed: u64,
}

/// Per-label cost model for `fizz perf`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfModel {
    pub configs: BTreeMap<String, TransitionCost>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionCost {
    /// Probability of taking the labelled branch; unset means equal weight.
    pub probability: Option<f64>,
    pub counters: BTreeMap<String, CounterValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterValue {
    pub numeric: f64,
}

impl PerfModel {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(PerfModel::default());
        }
        let model: PerfModel = serde_yml::from_str(text)?;
        for (label, cost) in &model.configs {
            if let Some(p) = cost.probability {
                if !(0.0..=1.0).contains(&p) {
                    return Err(ConfigError::Invalid(format!(
                        "probability for '{}' must be in [0, 1], got {}",
                        label, p
                    )));
                }
            }
        }
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }
}
