use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::warn;

use webtest::parser::WebtestParser;
use webtest::runner::{
    FailurePolicy, RequestExecutor, RunConfig, RunnerFactory, Sequence, TestPlan, TestReporter,
    TestSummary,
};
use webtest::variable::{ConfigLoader, VariableContext, VariableResolver, WebtestConfig};
use webtest::{Client, SharedVariables, WebtestError};

pub type Result<T> = std::result::Result<T, anyhow::Error>;

#[derive(Parser)]
#[command(author, version, about = "Replay .webtest HTTP scenarios", long_about = None)]
pub struct Cli {
    /// Log level: debug, info, quiet or error (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    pub verbosity: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run scenarios against a live server
    Run(RunArgs),
    /// List the numbered requests of scenario files
    Show {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the requests of a scenario with every placeholder resolved
    Resolve {
        file: PathBuf,
        #[command(flatten)]
        vars: VarArgs,
    },
}

#[derive(Args)]
pub struct VarArgs {
    /// Config file (default: search for webtest.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Environment from the config file
    #[arg(short, long)]
    pub env: Option<String>,

    /// Variable override, may be repeated
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

#[derive(Args)]
pub struct RunArgs {
    /// Scenario files run as one test set; defaults to the configured test sets
    pub files: Vec<PathBuf>,

    #[command(flatten)]
    pub vars: VarArgs,

    /// sequential, random, weighted or thread
    #[arg(long)]
    pub sequence: Option<Sequence>,

    #[arg(short = 'n', long, default_value_t = 1)]
    pub iterations: u64,

    /// Worker id, used by thread sequencing and seeding
    #[arg(short, long, default_value_t = 0)]
    pub worker: usize,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long)]
    pub think_time_ms: Option<u64>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Report form parameters that appear in earlier responses
    #[arg(long)]
    pub correlate: bool,

    /// Stop at the first failed test case
    #[arg(long)]
    pub abort_on_failure: bool,

    /// Show descriptions and captured values
    #[arg(short, long)]
    pub verbose: bool,
}

impl VarArgs {
    fn load_config(&self) -> Result<Option<WebtestConfig>> {
        match &self.config {
            Some(path) => Ok(Some(ConfigLoader::load_from_path(path)?)),
            None => Ok(ConfigLoader::find_and_load()?),
        }
    }

    fn cli_vars(&self) -> Result<Vec<(String, String)>> {
        self.vars
            .iter()
            .map(|raw| {
                ConfigLoader::parse_cli_var(raw)
                    .with_context(|| format!("invalid --var '{}', expected KEY=VALUE", raw))
            })
            .collect()
    }

    fn variables(&self, config: Option<&WebtestConfig>) -> Result<HashMap<String, String>> {
        let cli_vars = self.cli_vars()?;
        match config {
            Some(config) => Ok(ConfigLoader::build_variables(
                config,
                self.env.as_deref(),
                &cli_vars,
            )?),
            None => {
                if let Some(env) = &self.env {
                    bail!("environment '{}' given but no webtest.toml found", env);
                }
                Ok(cli_vars.into_iter().collect())
            }
        }
    }
}

/// Returns whether every test case passed.
pub async fn run(args: RunArgs) -> Result<bool> {
    let config = args.vars.load_config()?;
    let variables = args.vars.variables(config.as_ref())?;

    let plan = if !args.files.is_empty() {
        TestPlan::from_files(args.files.iter().cloned())?
    } else if let Some(config) = &config
        && !config.test_sets.is_empty()
    {
        TestPlan::from_config(config)?
    } else {
        bail!("no scenario files given and no test sets configured");
    };

    let mut run_config = config
        .as_ref()
        .map(ConfigLoader::run_config)
        .unwrap_or_default();
    apply_overrides(&mut run_config, &args);
    let globals = config
        .as_ref()
        .map(ConfigLoader::build_globals)
        .unwrap_or_else(SharedVariables::new);

    let transport = Arc::new(Client::new()?);
    let factory = RunnerFactory::new(plan, run_config, transport)?
        .with_globals(globals)
        .with_variables(variables);

    let reporter = TestReporter::new(args.verbose);
    reporter.print_header(
        factory.plan().test_cases().count(),
        args.worker,
        args.iterations,
    );

    let mut worker = factory.worker(args.worker);
    let mut reports = Vec::new();
    for _ in 0..args.iterations {
        match worker.run_iteration().await {
            Ok(report) => {
                reporter.print_iteration(&report);
                reports.push(report);
            }
            Err(WebtestError::RunAborted | WebtestError::Cancelled) => break,
            Err(e) => return Err(e.into()),
        }
    }
    if let Some(report) = worker.finish().await {
        reporter.print_iteration(&report);
        reports.push(report);
    }

    let summary = TestSummary::from_reports(&reports);
    reporter.print_summary(&summary);
    Ok(summary.failed == 0 && !reports.iter().any(|r| r.aborted))
}

fn apply_overrides(config: &mut RunConfig, args: &RunArgs) {
    if let Some(sequence) = args.sequence {
        config.sequence = sequence;
    }
    if let Some(ms) = args.timeout_ms {
        config.timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.think_time_ms {
        config.think_time = Duration::from_millis(ms);
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.correlate {
        config.correlate = true;
    }
    if args.abort_on_failure {
        config.on_failure = FailurePolicy::Abort;
    }
}

pub fn show(files: &[PathBuf]) -> Result<()> {
    for file in files {
        let scenario = WebtestParser::parse_file(file)?;
        println!("{}", file.display().to_string().bold());
        println!("{}", scenario);
    }
    let plan = TestPlan::from_files(files.iter().cloned())?;
    TestReporter::default().print_plan(&plan);
    Ok(())
}

/// Resolve each request in order without sending it. Assignments carry over to later requests;
/// requests that need captured values report the missing variable.
pub fn resolve(file: &Path, vars: &VarArgs) -> Result<()> {
    let config = vars.load_config()?;
    let variables = vars.variables(config.as_ref())?;
    let globals = config
        .as_ref()
        .map(ConfigLoader::build_globals)
        .unwrap_or_else(SharedVariables::new);
    let default_headers = config
        .as_ref()
        .map(|c| ConfigLoader::run_config(c).default_headers)
        .unwrap_or_default();

    let plan = TestPlan::from_files([file])?;
    let executor = RequestExecutor::new(Arc::new(Client::new()?), VariableResolver::default())
        .with_default_headers(default_headers);
    let mut context = VariableContext::with_globals(globals);
    context.extend(variables);

    for test_case in plan.test_cases() {
        for request in &test_case.requests {
            match executor.resolve(&request.template, &context) {
                Ok((resolved, assignments)) => {
                    assignments.commit(&mut context);
                    println!("[{}] {}", request.number, serde_json::to_string_pretty(&resolved)?);
                }
                Err(e) => {
                    warn!(test_number = request.number, error = %e, "Unresolved request");
                    println!("[{}] {}: {}", request.number, "unresolved".yellow(), e);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "webtest",
            "run",
            "login.webtest",
            "--sequence",
            "weighted",
            "-n",
            "5",
            "--var",
            "SERVER=localhost:8080",
            "--abort-on-failure",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.files, vec![PathBuf::from("login.webtest")]);
        assert_eq!(args.sequence, Some(Sequence::Weighted));
        assert_eq!(args.iterations, 5);
        assert_eq!(
            args.vars.cli_vars().unwrap(),
            vec![("SERVER".to_string(), "localhost:8080".to_string())]
        );

        let mut config = RunConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.sequence, Sequence::Weighted);
        assert_eq!(config.on_failure, FailurePolicy::Abort);
    }

    #[test]
    fn test_rejects_unknown_sequence() {
        assert!(Cli::try_parse_from(["webtest", "run", "--sequence", "roundrobin"]).is_err());
    }

    #[test]
    fn test_invalid_var() {
        let cli = Cli::try_parse_from(["webtest", "resolve", "a.webtest", "--var", "=x"]).unwrap();
        let Commands::Resolve { vars, .. } = cli.command else {
            panic!("expected resolve");
        };
        assert!(vars.cli_vars().is_err());
    }
}
