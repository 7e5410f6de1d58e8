use crate::error::{Result, WebtestError};
use crate::runner::types::RunConfig;
use crate::variable::resolver::VariableResolver;
use crate::variable::types::{SharedVariables, WebtestConfig};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Loads `webtest.toml`.
pub struct ConfigLoader;

impl ConfigLoader {
    const CONFIG_FILE: &'static str = "webtest.toml";

    /// Load a config file. Relative scenario paths are resolved against its directory.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<WebtestConfig> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            WebtestError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut config: WebtestConfig = toml::from_str(&content).map_err(|e| {
            WebtestError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::rebase_paths(&mut config, &base_dir);
        config.base_dir = Some(base_dir);
        Ok(config)
    }

    /// Find a config file and load it.
    /// Search order:
    /// 1. the current directory, then each parent
    /// 2. `~/.config/webtest/`
    pub fn find_and_load() -> Result<Option<WebtestConfig>> {
        match Self::find() {
            Some(path) => Self::load_from_path(path).map(Some),
            None => Ok(None),
        }
    }

    fn find() -> Option<PathBuf> {
        if let Ok(mut current) = std::env::current_dir() {
            loop {
                let candidate = current.join(Self::CONFIG_FILE);
                if candidate.exists() {
                    return Some(candidate);
                }
                if !current.pop() {
                    break;
                }
            }
        }

        let candidate = dirs::home_dir()?
            .join(".config")
            .join("webtest")
            .join(Self::CONFIG_FILE);
        candidate.exists().then_some(candidate)
    }

    fn rebase_paths(config: &mut WebtestConfig, base_dir: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        };
        config.before_set.iter_mut().for_each(rebase);
        config.after_set.iter_mut().for_each(rebase);
        for set in &mut config.test_sets {
            set.files.iter_mut().for_each(rebase);
        }
    }

    /// Per-worker variables.
    /// Precedence, lowest first: `[variables]`, `[environments.<env_name>]`, `cli_vars`.
    /// `${VAR}` in config values is replaced from the process environment.
    pub fn build_variables(
        config: &WebtestConfig,
        env_name: Option<&str>,
        cli_vars: &[(String, String)],
    ) -> Result<HashMap<String, String>> {
        let mut vars: HashMap<String, String> = config
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), VariableResolver::resolve_env_vars(v)))
            .collect();

        if let Some(name) = env_name {
            let env = config.get_environment(name).ok_or_else(|| {
                WebtestError::Config(format!("Environment '{}' is not defined", name))
            })?;
            for (key, value) in &env.variables {
                vars.insert(key.clone(), VariableResolver::resolve_env_vars(value));
            }
        }

        for (key, value) in cli_vars {
            vars.insert(key.clone(), value.clone());
        }

        Ok(vars)
    }

    /// The run-wide shared scope, seeded from `[globals]`.
    pub fn build_globals(config: &WebtestConfig) -> SharedVariables {
        SharedVariables::from_map(
            config
                .globals
                .iter()
                .map(|(k, v)| (k.clone(), VariableResolver::resolve_env_vars(v)))
                .collect(),
        )
    }

    /// `[run]` and `[default_headers]` merged over `RunConfig` defaults.
    pub fn run_config(config: &WebtestConfig) -> RunConfig {
        let run = &config.run;
        let defaults = RunConfig::default();
        RunConfig {
            sequence: run.sequence.unwrap_or(defaults.sequence),
            think_time: run
                .think_time_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.think_time),
            timeout: run
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            on_failure: run.on_failure.unwrap_or(defaults.on_failure),
            on_capture_mismatch: run
                .on_capture_mismatch
                .unwrap_or(defaults.on_capture_mismatch),
            capture_scope: run.capture_scope.unwrap_or(defaults.capture_scope),
            correlate: run.correlate.unwrap_or(defaults.correlate),
            seed: run.seed.or(defaults.seed),
            default_headers: config
                .default_headers
                .iter()
                .map(|(k, v)| (k.clone(), VariableResolver::resolve_env_vars(v)))
                .collect(),
        }
    }

    /// Parse a CLI variable argument "key=value".
    pub fn parse_cli_var(s: &str) -> Option<(String, String)> {
        s.split_once('=')
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
    }
}
