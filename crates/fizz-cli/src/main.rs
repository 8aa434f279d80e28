//! Command-line interface for the FizzBee model checker.

mod snippets;

use clap::{Parser, Subcommand};
use fizz_ast::File;
use fizz_mc::output::format_trace;
use fizz_mc::{
    CheckConfig, CheckOutcome, InvariantPosition, MarkovChain, Model, OutputWriter, PerfModel,
    Processor, StateSpaceOptions, Strategy,
};
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "fizz.yaml";
const PERF_MODEL_FILE: &str = "perf_model.yaml";

/// CLI error with source context for pretty printing.
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("failed to read file: {message}")]
    IoError { message: String },

    #[error("parse error in {path}: {message}")]
    #[diagnostic(code(fizz::parse_error))]
    ParseError {
        path: String,
        message: String,
        #[source_code]
        src: NamedSource<Arc<String>>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("config error: {message}")]
    #[diagnostic(code(fizz::config_error))]
    ConfigError { message: String },

    #[error("check error: {message}")]
    CheckError { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl CliError {
    fn from_snippet(snippet: snippets::Snippet<'_>, e: fizz_eval::ParseError, filename: &str) -> Self {
        let span = e.span();
        let len = snippet.code.len();
        let start = span.start.min(len);
        let end = span.end.clamp(start, len);
        CliError::ParseError {
            message: e.to_string(),
            src: NamedSource::new(format!("{}:{}", filename, snippet.path), Arc::new(snippet.code.to_string())),
            span: (start, end - start).into(),
            path: snippet.path,
        }
    }
}

impl From<fizz_mc::CheckError> for CliError {
    fn from(e: fizz_mc::CheckError) -> Self {
        match e {
            fizz_mc::CheckError::Io { .. } => CliError::IoError {
                message: e.to_string(),
            },
            fizz_mc::CheckError::Config(e) => CliError::ConfigError {
                message: e.to_string(),
            },
            other => CliError::CheckError {
                message: other.to_string(),
            },
        }
    }
}

impl From<fizz_mc::ConfigError> for CliError {
    fn from(e: fizz_mc::ConfigError) -> Self {
        CliError::ConfigError {
            message: e.to_string(),
        }
    }
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "fizz", version = VERSION)]
#[command(about = "Explicit-state model checker for FizzBee specifications", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `check` and `perf`.
#[derive(clap::Args)]
struct RunArgs {
    /// JSON AST of the specification
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// State-space options (default: fizz.yaml next to the AST)
    #[arg(long, value_name = "YAML")]
    config: Option<PathBuf>,

    /// Frontier discipline: bfs, dfs or random
    #[arg(long)]
    strategy: Option<String>,

    /// Override options.max_actions
    #[arg(long)]
    max_actions: Option<u64>,

    /// RNG seed for random exploration and simulation (0 = from the clock)
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Directory for the error graph and state dumps (default: the AST's directory)
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Dump every node and link after the run
    #[arg(long)]
    save_states: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Model check a specification
    Check {
        #[command(flatten)]
        run: RunArgs,

        /// Run random walks instead of exhaustive search
        #[arg(long)]
        simulation: bool,

        /// Random walks to run in simulation mode (0 = until a failure)
        #[arg(long, default_value = "0")]
        max_runs: u64,
    },

    /// Explore the state space and report Markov cost estimates
    Perf {
        #[command(flatten)]
        run: RunArgs,

        /// Cost model (default: perf_model.yaml next to the AST)
        #[arg(long, value_name = "YAML")]
        perf_model: Option<PathBuf>,

        /// Make the witnesses of this invariant absorbing and start from
        /// every scheduling point
        #[arg(long, value_name = "NAME")]
        invariant: Option<String>,

        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a JSON AST and summarise it
    Ast {
        /// JSON AST of the specification
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Dump the whole tree
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Commands::Check { run, .. } | Commands::Perf { run, .. } => run.verbose,
            Commands::Ast { verbose, .. } => *verbose,
        }
    }
}

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("FIZZ_GIT_HASH"),
    " ",
    env!("FIZZ_GIT_DATE"),
    " ",
    env!("FIZZ_BUILD_TARGET"),
    ")"
);

fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    let cli = Cli::parse();

    let level = if cli.command.verbose() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::Check {
            run,
            simulation,
            max_runs,
        } => cmd_check(&run, simulation, max_runs),
        Commands::Perf {
            run,
            perf_model,
            invariant,
            json,
        } => cmd_perf(&run, perf_model.as_deref(), invariant.as_deref(), json),
        Commands::Ast { file, verbose } => cmd_ast(&file, verbose),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            std::process::exit(1);
        }
    }
}

fn read_ast(file: &Path) -> CliResult<File> {
    let text = std::fs::read_to_string(file).map_err(|e| CliError::IoError {
        message: format!("{}: {}", file.display(), e),
    })?;
    File::from_json(&text).map_err(|e| CliError::Other {
        message: format!("invalid AST {}: {}", file.display(), e),
    })
}

/// Loads the AST and rejects it early if any embedded snippet fails to
/// parse.
fn load_model(file: &Path) -> CliResult<Arc<Model>> {
    let ast = read_ast(file)?;
    let filename = file.display().to_string();
    let count = snippets::validate(&ast).map_err(|(s, e)| CliError::from_snippet(s, e, &filename))?;
    info!(snippets = count, "parsed {}", filename);
    let model = Model::from_file(ast).map_err(|e| CliError::CheckError {
        message: e.to_string(),
    })?;
    Ok(Arc::new(model))
}

fn ast_dir(file: &Path) -> PathBuf {
    file.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn check_config(run: &RunArgs) -> CliResult<CheckConfig> {
    let options = match &run.config {
        Some(path) => StateSpaceOptions::load(path)?,
        None => StateSpaceOptions::load_or_default(&ast_dir(&run.file).join(CONFIG_FILE))?,
    };
    let mut config = CheckConfig {
        options,
        seed: run.seed,
        ..CheckConfig::default()
    };
    if let Some(strategy) = &run.strategy {
        config.strategy = strategy.parse::<Strategy>()?;
    }
    if let Some(max_actions) = run.max_actions {
        config.options.options.max_actions = max_actions;
    }
    Ok(config)
}

/// Runs the checker, prints the summary and writes the artifacts. Returns
/// the processor and whether the run passed.
fn run_check(run: &RunArgs, config: CheckConfig) -> CliResult<(Processor, bool)> {
    let model = load_model(&run.file)?;
    let out = OutputWriter::new(run.out_dir.clone().unwrap_or_else(|| ast_dir(&run.file)))?;

    info!("model checking...");
    let start = Instant::now();
    let mut processor = Processor::new(model, config)?;
    stop_on_interrupt(&processor);
    let outcome = processor.check()?;
    let elapsed = start.elapsed();

    println!();
    println!("Result: {}", outcome.label());
    println!("  Nodes: {}", processor.graph().len());
    println!("  Unique states: {}", processor.unique_states());
    match &outcome {
        CheckOutcome::Ok {
            states_explored,
            max_depth,
            ..
        } => {
            println!("  States explored: {}", states_explored);
            println!("  Max depth: {}", max_depth);
        }
        CheckOutcome::InvariantViolation { invariants, .. } => {
            println!("  Invariants: {}", invariants.join(", "));
        }
        CheckOutcome::LivenessViolation { invariant, .. } => {
            println!("  Invariant: {}", invariant);
        }
        CheckOutcome::ExistsNotWitnessed { invariants } => {
            println!("  Invariants: {}", invariants.join(", "));
        }
        CheckOutcome::Stopped { states_explored, .. } => {
            println!("  States explored: {}", states_explored);
        }
        CheckOutcome::Deadlock { .. } => {}
    }
    if processor.runs() > 0 {
        println!("  Runs: {}", processor.runs());
        println!("  Seed: {}", processor.seed());
    }
    println!("  Time: {:.2}s", elapsed.as_secs_f64());

    let trace = outcome.trace();
    if !trace.is_empty() {
        println!("  Trace ({} steps):", trace.len());
        for line in format_trace(processor.graph(), trace) {
            println!("{}", line);
        }
        let path = out.write_error_graph(processor.graph(), trace)?;
        println!("  Error graph: {}", path.display());
    }
    let stopped = matches!(outcome, CheckOutcome::Stopped { .. });
    if run.save_states || stopped {
        let shards = out.write_states(processor.graph())?;
        println!("  State shards: {} in {}", shards, out.dir().display());
    }

    let passed = !outcome.is_violation();
    Ok((processor, passed))
}

/// Ctrl-C raises the processor's stop flag; exploration ends at the next
/// node and the partial graph is still reported.
fn stop_on_interrupt(processor: &Processor) {
    let stop = processor.stop_handle();
    let installed = ctrlc::set_handler(move || {
        stop.store(true, Ordering::Relaxed);
    });
    if let Err(e) = installed {
        warn!("cannot install interrupt handler: {}", e);
    }
}

fn cmd_check(run: &RunArgs, simulation: bool, max_runs: u64) -> CliResult<bool> {
    let mut config = check_config(run)?;
    config.simulation = simulation;
    config.max_runs = max_runs;
    let (_, passed) = run_check(run, config)?;
    Ok(passed)
}

fn cmd_perf(
    run: &RunArgs,
    perf_model: Option<&Path>,
    invariant: Option<&str>,
    json: bool,
) -> CliResult<bool> {
    let perf = match perf_model {
        Some(path) => PerfModel::load(path)?,
        None => {
            let path = ast_dir(&run.file).join(PERF_MODEL_FILE);
            if path.exists() {
                PerfModel::load(&path)?
            } else {
                warn!("no perf model at {}, weighting links equally", path.display());
                PerfModel::default()
            }
        }
    };

    let (processor, passed) = run_check(run, check_config(run)?)?;
    if !passed {
        return Ok(false);
    }

    let chain = MarkovChain::new(processor.graph(), &perf).map_err(|e| CliError::CheckError {
        message: e.to_string(),
    })?;
    info!(states = chain.len(), "computing steady state");
    let analysis = match invariant {
        Some(name) => {
            let position = processor
                .model()
                .main()
                .invariants
                .iter()
                .position(|inv| inv.name == name)
                .ok_or_else(|| CliError::Other {
                    message: format!("unknown invariant '{}'", name),
                })?;
            chain
                .absorb_witnesses(processor.graph(), InvariantPosition::new(0, position))
                .absorption(processor.graph())
        }
        None => chain.steady_state(),
    };

    if json {
        let text = serde_json::to_string_pretty(&analysis).map_err(|e| CliError::Other {
            message: e.to_string(),
        })?;
        println!("{}", text);
        return Ok(true);
    }

    println!();
    println!(
        "Markov analysis: {} iterations{}",
        analysis.iterations,
        if analysis.converged { "" } else { " (not converged)" }
    );
    if analysis.histogram.mean.is_empty() {
        println!("  No counters in the perf model");
    }
    for (counter, mean) in &analysis.histogram.mean {
        println!("  Mean {}: {:.6}", counter, mean);
    }
    if !analysis.histogram.entries.is_empty() {
        println!("  Histogram:");
        for entry in &analysis.histogram.entries {
            let counters: Vec<String> = entry
                .counters
                .iter()
                .map(|(name, value)| format!("{}={:.4}", name, value))
                .collect();
            println!("    {:.6}: {}", entry.probability, counters.join(", "));
        }
    }
    println!("  Likely states:");
    for (node, probability) in analysis.significant(0.01) {
        println!("    {}: {:.4}", node, probability);
    }
    Ok(true)
}

fn cmd_ast(file: &Path, verbose: bool) -> CliResult<bool> {
    let ast = read_ast(file)?;
    let filename = file.display().to_string();
    let count = snippets::validate(&ast).map_err(|(s, e)| CliError::from_snippet(s, e, &filename))?;

    if verbose {
        println!("{:#?}", ast);
    } else {
        println!("file {}", filename);
        if ast.states.is_some() {
            println!("  states");
        }
        println!("  {} actions", ast.actions.len());
        for action in &ast.actions {
            println!(
                "    action {} [{}, {}]",
                action.name,
                action.block.flow.or(action.flow).as_str(),
                action.fairness.level.as_str()
            );
        }
        for function in &ast.functions {
            println!("    func {}({} params)", function.name, function.params.len());
        }
        for role in &ast.roles {
            let modifiers = if role.modifiers.is_empty() {
                String::new()
            } else {
                format!(" [{}]", role.modifiers.join(", "))
            };
            println!("    role {}{}", role.name, modifiers);
            for action in &role.actions {
                println!("      action {}", action.name);
            }
            for function in &role.functions {
                println!("      func {}", function.name);
            }
        }
        for inv in &ast.invariants {
            let mut ops: Vec<&str> = Vec::new();
            if inv.always {
                ops.push("always");
            }
            if inv.eventually {
                ops.push("eventually");
            }
            ops.extend(inv.temporal_operators.iter().map(String::as_str));
            println!("    invariant {} [{}]", inv.name, ops.join(" "));
        }
    }

    println!("{} snippets parsed", count);
    println!("ast: ok");
    Ok(true)
}
