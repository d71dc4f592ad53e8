//! Dispatch Daemon - Command-line Front End for the Completion Router
//!
//! Loads the layered configuration (file, environment, flags), assembles a
//! router and either answers a single prompt or serves newline-delimited JSON
//! requests over stdio.
//!
//! # Usage
//!
//! ```bash
//! # One-shot completion
//! dispatch-daemon complete "Explain borrow checking" --task reasoning --complexity complex
//!
//! # Estimate what a prompt would cost without running it
//! dispatch-daemon estimate "Summarize this paper" --task reasoning
//!
//! # Serve NDJSON requests on stdin, replies on stdout
//! dispatch-daemon serve < requests.jsonl
//!
//! # Print the effective configuration
//! dispatch-daemon --daily-budget 25 config
//!
//! # Verbose logging (always on stderr)
//! RUST_LOG=debug dispatch-daemon serve
//! ```
//!
//! # Signals
//!
//! - `SIGINT`: stop reading input, answer in-flight requests, exit

mod serve;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{error, info, warn};

use dispatch_core::config::DispatchToml;
use dispatch_core::{
    load_config, load_config_from_path, CompletionRequest, Complexity, ConfigOverrides,
    DispatchConfig, TaskType,
};

/// Dispatch - route AI completion requests across backends
#[derive(Parser, Debug)]
#[command(name = "dispatch-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "DISPATCH_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Daily budget in USD (overrides file and environment)
    #[arg(long, value_name = "USD", global = true)]
    daily_budget: Option<f64>,

    /// Disable the response cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "DISPATCH_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Complete a single prompt and print the response as JSON
    Complete(CompleteArgs),
    /// Predict the cost of a prompt without sending it
    Estimate(CompleteArgs),
    /// Serve newline-delimited JSON requests from stdin
    Serve,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(ClapArgs, Debug)]
struct CompleteArgs {
    /// Prompt text
    prompt: String,

    /// Task type (reasoning, code_generation, code_review, multimodal, ...)
    #[arg(short = 't', long, default_value = "chat", value_parser = parse_task)]
    task: TaskType,

    /// Complexity (simple, moderate, complex)
    #[arg(long, default_value = "moderate", value_parser = parse_complexity)]
    complexity: Complexity,

    /// Keep the prompt on a local backend
    #[arg(long)]
    private: bool,

    /// Maximum output tokens (0 = backend default)
    #[arg(long, default_value_t = 0)]
    max_tokens: u32,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f64>,

    /// Per-request spending ceiling in USD
    #[arg(long, default_value_t = 0.0)]
    budget: f64,
}

impl CompleteArgs {
    fn to_request(&self) -> CompletionRequest {
        let request = CompletionRequest::new(self.prompt.clone())
            .with_task(self.task)
            .with_complexity(self.complexity)
            .with_privacy(self.private)
            .with_max_tokens(self.max_tokens)
            .with_budget_limit(self.budget);

        match self.temperature {
            Some(temperature) => request.with_temperature(temperature),
            None => request,
        }
    }
}

fn parse_task(value: &str) -> Result<TaskType, String> {
    let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
    match normalized.as_str() {
        "codegen" | "code_gen" => return Ok(TaskType::CodeGeneration),
        "general" => return Ok(TaskType::Chat),
        _ => {}
    }

    TaskType::ALL
        .into_iter()
        .find(|t| t.as_str() == normalized)
        .ok_or_else(|| {
            let known: Vec<_> = TaskType::ALL.iter().map(TaskType::as_str).collect();
            format!("unknown task '{value}' (expected one of: {})", known.join(", "))
        })
}

fn parse_complexity(value: &str) -> Result<Complexity, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "simple" => Ok(Complexity::Simple),
        "moderate" => Ok(Complexity::Moderate),
        "complex" => Ok(Complexity::Complex),
        _ => Err(format!(
            "unknown complexity '{value}' (expected simple, moderate or complex)"
        )),
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr; stdout carries only machine-readable output.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "dispatch_core={level},dispatch_daemon={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration: file, then environment, then flags
fn resolve_config(args: &Args) -> Result<DispatchConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                warn!(path = ?path, "Config file not found, using defaults");
            }
            load_config_from_path(Some(path.clone()))
        }
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(usd) = args.daily_budget {
        overrides = overrides.with_daily_budget(usd);
    }
    if args.no_cache {
        overrides = overrides.with_caching(false);
    }
    overrides.apply(&mut config);

    config.validate().context("Invalid configuration")?;
    info!(source = %config.source(), "Configuration resolved");
    Ok(config)
}

async fn run_complete(config: &DispatchConfig, args: &CompleteArgs) -> Result<()> {
    let router = config.build_router().context("Failed to build router")?;

    let response = router
        .complete(args.to_request())
        .await
        .context("Completion failed")?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_estimate(config: &DispatchConfig, args: &CompleteArgs) -> Result<()> {
    let router = config.build_router().context("Failed to build router")?;

    let prediction = router
        .predict_cost(&args.to_request())
        .await
        .context("No backend can serve this request")?;

    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

async fn run_serve(config: &DispatchConfig) -> Result<()> {
    let router = Arc::new(config.build_router().context("Failed to build router")?);
    info!(backends = ?router.registry().ids(), "Serving requests on stdin");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let mut stdout = tokio::io::stdout();
    let stats = serve::serve(
        Arc::clone(&router),
        BufReader::new(tokio::io::stdin()),
        &mut stdout,
        shutdown,
    )
    .await?;

    info!(
        received = stats.received,
        failed = stats.failed,
        "Input closed"
    );
    if let Some(summary) = router.metrics_summary() {
        info!(
            summary = %serde_json::to_string(&summary)?,
            budget_percent = router.budget_percent(),
            "Metrics summary"
        );
    }
    let accuracy = router.cost_accuracy();
    if accuracy.samples > 0 {
        info!(
            samples = accuracy.samples,
            accuracy = accuracy.accuracy,
            mean_relative_error = accuracy.mean_relative_error,
            "Cost estimate accuracy"
        );
    }
    Ok(())
}

fn run_config(config: &DispatchConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(&DispatchToml::from(config))
        .context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let config = resolve_config(&args)?;

    let result = match &args.command {
        Command::Complete(complete) => run_complete(&config, complete).await,
        Command::Estimate(estimate) => run_estimate(&config, estimate).await,
        Command::Serve => run_serve(&config).await,
        Command::Config => run_config(&config),
    };

    if let Err(e) = &result {
        error!(error = %e, "Dispatch stopped with error");
    }
    result
}
