use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use crate::runner::types::{CapturePolicy, FailurePolicy, Sequence};

/// Where a variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    /// Private to one worker
    #[default]
    Local,
    /// Shared by every worker of a run
    Global,
}

/// The process-wide global scope. Cloning shares the same store.
#[derive(Debug, Clone, Default)]
pub struct SharedVariables {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl SharedVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(vars)),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Consistent copy of the whole scope.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.read().clone()
    }

    pub fn extend(&self, vars: HashMap<String, String>) {
        self.write().extend(vars);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-written, so a poisoned lock is
    // still usable.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Variables visible to one worker: its own local scope plus a handle to the global scope.
///
/// Reads look in the local scope first. While globals are pinned, global reads come from a
/// snapshot taken at pin time (plus this worker's own writes), so one resolution pass never
/// sees another worker's half-way updates.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    local: HashMap<String, String>,
    global: SharedVariables,
    pinned: Option<HashMap<String, String>>,
    default_scope: VariableScope,
}

impl VariableContext {
    /// Context with a private global scope, mostly useful in tests.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_globals(global: SharedVariables) -> Self {
        Self {
            global,
            ..Self::default()
        }
    }

    /// Scope that new names are written to.
    pub fn with_capture_scope(mut self, scope: VariableScope) -> Self {
        self.default_scope = scope;
        self
    }

    /// Insert into the local scope unconditionally.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.local.insert(key.into(), value.into());
    }

    pub fn extend(&mut self, vars: HashMap<String, String>) {
        self.local.extend(vars);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.local.get(key) {
            return Some(value.clone());
        }
        match &self.pinned {
            Some(snapshot) => snapshot.get(key).cloned(),
            None => self.global.get(key),
        }
    }

    pub fn get_local(&self, key: &str) -> Option<&str> {
        self.local.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.local.contains_key(key) || self.is_global(key)
    }

    /// Write a variable and return the scope it went to: the local scope if the name is
    /// local, else the global scope if the name is global, else the default scope.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> VariableScope {
        let key = key.into();
        let scope = if self.local.contains_key(&key) {
            VariableScope::Local
        } else if self.is_global(&key) {
            VariableScope::Global
        } else {
            self.default_scope
        };
        self.set_in(scope, key, value);
        scope
    }

    pub fn set_in(
        &mut self,
        scope: VariableScope,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        let (key, value) = (key.into(), value.into());
        match scope {
            VariableScope::Local => {
                self.local.insert(key, value);
            }
            VariableScope::Global => {
                if let Some(snapshot) = self.pinned.as_mut() {
                    snapshot.insert(key.clone(), value.clone());
                }
                self.global.set(key, value);
            }
        }
    }

    /// Take a snapshot of the global scope for the next resolution pass.
    pub fn pin_globals(&mut self) {
        self.pinned = Some(self.global.snapshot());
    }

    pub fn release_globals(&mut self) {
        self.pinned = None;
    }

    pub fn globals(&self) -> &SharedVariables {
        &self.global
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Local variables sorted by name.
    pub fn local_vars(&self) -> BTreeMap<&str, &str> {
        self.local
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    fn is_global(&self, key: &str) -> bool {
        match &self.pinned {
            Some(snapshot) => snapshot.contains_key(key) || self.global.contains(key),
            None => self.global.contains(key),
        }
    }
}

/// Variable overrides for one named environment.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Environment {
    #[serde(flatten)]
    pub variables: HashMap<String, String>,
}

/// `[[test_sets]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TestSetConfig {
    pub files: Vec<PathBuf>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// `[run]` section. Absent keys fall back to `RunConfig` defaults.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RunSection {
    pub sequence: Option<Sequence>,
    pub think_time_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub on_failure: Option<FailurePolicy>,
    pub on_capture_mismatch: Option<CapturePolicy>,
    pub capture_scope: Option<VariableScope>,
    pub correlate: Option<bool>,
    pub seed: Option<u64>,
}

/// Complete `webtest.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebtestConfig {
    #[serde(default)]
    pub run: RunSection,

    #[serde(default)]
    pub test_sets: Vec<TestSetConfig>,

    #[serde(default)]
    pub before_set: Vec<PathBuf>,

    #[serde(default)]
    pub after_set: Vec<PathBuf>,

    /// Per-worker defaults
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Seed values for the shared scope
    #[serde(default)]
    pub globals: HashMap<String, String>,

    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,

    #[serde(default)]
    pub environments: HashMap<String, Environment>,

    /// Directory the config was loaded from; relative scenario paths start here
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl WebtestConfig {
    pub fn get_environment(&self, env_name: &str) -> Option<&Environment> {
        self.environments.get(env_name)
    }
}
