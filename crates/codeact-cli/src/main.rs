//! codeact - run agent-style code snippets under a bounded executor
//!
//! ## Commands
//!
//! - `run`: execute one or more script files in order on a single executor,
//!   so variables defined by one file are visible to the next
//! - `policy`: show the effective builtins and module decisions for a
//!   safe-mode configuration

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use codeact_core::script::builtins::all_names;
use codeact_core::script::modules::AVAILABLE;
use codeact_core::{
    tool_fn, BoundedExecutor, CallContext, CapabilityPolicy, ExecutionState, ExecutorBuilder,
    ExecutorConfig, SafeExecutionConfig, Tool, ToolError, TrajectoryLog, Value,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "codeact")]
#[command(version = codeact_core::VERSION)]
#[command(about = "Bounded, policy-restricted execution of agent code", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute script files in order, sharing one executor
    Run {
        /// Script files to execute
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Per-file timeout in seconds (default from config: 50.0)
        #[arg(short, long)]
        timeout: Option<f64>,

        /// JSON file injected as `ui_state` before every run
        #[arg(long)]
        state: Option<PathBuf>,

        /// Write execution records as JSON lines to this path
        #[arg(long)]
        trajectory: Option<PathBuf>,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Print the builtins and modules the configured policy permits
    Policy {
        #[command(flatten)]
        policy: PolicyArgs,
    },
}

#[derive(Args)]
struct PolicyArgs {
    /// Executor config file (.toml or .json)
    #[arg(short, long, env = "CODEACT_CONFIG")]
    config: Option<PathBuf>,

    /// Restrict builtins and imports
    #[arg(long)]
    safe_mode: bool,

    /// Safe mode with eval/exec/__import__ and os/sys blocked
    #[arg(long, conflicts_with = "safe_mode")]
    hardened: bool,

    /// Permit only these modules (repeatable, comma-separated; "" permits none)
    #[arg(long = "allow-module", value_name = "MODULE")]
    allow_modules: Vec<String>,

    /// Block these modules
    #[arg(long = "block-module", value_name = "MODULE")]
    block_modules: Vec<String>,

    /// Permit only these builtins
    #[arg(long = "allow-builtin", value_name = "NAME")]
    allow_builtins: Vec<String>,

    /// Block these builtins
    #[arg(long = "block-builtin", value_name = "NAME")]
    block_builtins: Vec<String>,

    /// Give every run fresh locals instead of one shared namespace
    #[arg(long)]
    isolated: bool,
}

impl PolicyArgs {
    /// Config file, then `CODEACT_*` environment, then flags.
    fn resolve(&self) -> Result<ExecutorConfig> {
        let mut config = match &self.config {
            Some(path) => ExecutorConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ExecutorConfig::default(),
        };
        config
            .apply_env()
            .context("Invalid CODEACT_* environment override")?;

        if self.hardened {
            config.safe = SafeExecutionConfig::hardened();
        }
        if self.safe_mode {
            config.safe.safe_mode = true;
        }
        if let Some(set) = name_set(&self.allow_modules) {
            config.safe.allowed_modules = Some(set);
        }
        if let Some(set) = name_set(&self.block_modules) {
            config.safe.blocked_modules = Some(set);
        }
        if let Some(set) = name_set(&self.allow_builtins) {
            config.safe.allowed_builtins = Some(set);
        }
        if let Some(set) = name_set(&self.block_builtins) {
            config.safe.blocked_builtins = Some(set);
        }
        if self.isolated {
            config.use_same_scope = false;
        }
        config.validate().context("Invalid executor configuration")?;
        Ok(config)
    }
}

/// `None` when the flag was never given; `Some(empty)` for `--flag ""`.
fn name_set(values: &[String]) -> Option<BTreeSet<String>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    codeact_core::telemetry::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run {
            files,
            timeout,
            state,
            trajectory,
            policy,
        } => cmd_run(&files, timeout, state.as_deref(), trajectory.as_deref(), &policy).await,
        Commands::Policy { policy } => cmd_policy(&policy),
    };
    codeact_core::metrics::METRICS.flush();
    result
}

/// What the demo tools recorded during a session.
#[derive(Default)]
struct Journal {
    memory: Mutex<Vec<String>>,
    completion: Mutex<Option<(bool, String)>>,
}

fn demo_tools(journal: &Arc<Journal>) -> Vec<Arc<dyn Tool>> {
    let memory = Arc::clone(journal);
    let remember = tool_fn("remember", move |mut call| {
        let text = call.require_str(0, "text")?.to_string();
        memory
            .memory
            .lock()
            .map_err(|_| ToolError::new("memory store unavailable"))?
            .push(text.clone());
        call.print(&format!("Remembered: {text}"));
        Ok(Value::None)
    });

    let completion = Arc::clone(journal);
    let complete = tool_fn("complete", move |mut call| {
        let success = call.require(0, "success")?.truthy();
        let reason = match call.arg(1, "reason") {
            Some(value) => value.to_display(),
            None => String::new(),
        };
        *completion
            .completion
            .lock()
            .map_err(|_| ToolError::new("completion state unavailable"))? =
            Some((success, reason.clone()));
        call.print(&format!("Task marked complete: success={success} reason={reason}"));
        Ok(Value::Bool(success))
    });

    vec![remember, complete]
}

async fn cmd_run(
    files: &[PathBuf],
    timeout: Option<f64>,
    state_path: Option<&Path>,
    trajectory_path: Option<&Path>,
    policy: &PolicyArgs,
) -> Result<()> {
    let config = policy.resolve()?;
    let timeout = timeout
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("--timeout must be a non-negative number of seconds")?;

    let state = match state_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read state file {}", path.display()))?;
            let json: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("State file {} is not valid JSON", path.display()))?;
            ExecutionState::new(json)
        }
        None => ExecutionState::empty(),
    };

    let journal = Arc::new(Journal::default());
    let log = Arc::new(TrajectoryLog::new());
    let executor: BoundedExecutor = ExecutorBuilder::from_config(config)
        .tools(demo_tools(&journal))
        .observer(log.clone())
        .build()
        .context("Failed to build executor")?;

    let session = CallContext::new();
    info!(trace_id = %session.trace_id, files = files.len(), "session started");

    for file in files {
        let code = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read script {}", file.display()))?;
        let ctx = session
            .clone()
            .with_attribute("file", file.display().to_string());
        let record = executor.execute_detailed(ctx, &state, &code, timeout).await;
        if files.len() > 1 {
            println!("==> {} ({}) <==", file.display(), record.outcome);
        }
        print!("{}", record.output);
        if !record.output.is_empty() && !record.output.ends_with('\n') {
            println!();
        }
    }

    if let Ok(memory) = journal.memory.lock() {
        if !memory.is_empty() {
            eprintln!("memory: {}", memory.join(" | "));
        }
    }
    if let Ok(completion) = journal.completion.lock() {
        if let Some((success, reason)) = completion.as_ref() {
            eprintln!("completed: success={success} reason={reason}");
        }
    }

    if let Some(path) = trajectory_path {
        let jsonl = log.to_jsonl().context("Failed to serialize trajectory")?;
        std::fs::write(path, jsonl)
            .with_context(|| format!("Failed to write trajectory {}", path.display()))?;
        info!(path = %path.display(), records = log.len(), "trajectory written");
    }

    Ok(())
}

fn cmd_policy(policy: &PolicyArgs) -> Result<()> {
    let config = policy.resolve()?;
    let resolved = CapabilityPolicy::from_config(&config.safe);
    let guard = resolved.import_guard();

    println!("safe mode: {}", config.safe.safe_mode);
    println!("shared scope: {}", config.use_same_scope);
    println!("default timeout: {:?}s", config.default_timeout_secs);
    println!();
    println!("builtins:");
    for name in all_names() {
        println!("  {:<16} {}", name, resolved.builtins.decision(&name));
    }
    println!();
    println!("modules:");
    for module in AVAILABLE {
        println!("  {:<16} {}", module, guard.decision(module));
    }
    Ok(())
}
