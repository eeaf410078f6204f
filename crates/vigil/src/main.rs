use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use vigil::agents::{classify_regime, LoggingExecutor, PriceBar, RegimeThresholds};
use vigil::models::{keys, AccountRisk, AgentTask, PositionRisk, SignalParams, TaskStatus};
use vigil::store::{publish_typed, set_typed};
use vigil::Vigil;

#[derive(Parser, Debug)]
#[command(
    name = "vigil",
    about = "Vigil - signal validation and risk monitoring for automated trading"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/vigil.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Pretty-print the output JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a SignalParams JSON document
    Validate {
        /// Read from a file instead of stdin
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Run a risk check
    Risk {
        #[command(subcommand)]
        check: RiskCheck,
    },
    /// Classify a JSON array of price bars and record the regime snapshot
    Regime {
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Load the config and report inconsistent settings
    CheckConfig,
}

#[derive(Subcommand, Debug)]
enum RiskCheck {
    /// Check a PositionRisk JSON document
    Position {
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Check an AccountRisk JSON document
    Account {
        #[arg(short, long)]
        input: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_input(input: Option<&str>) -> Result<String> {
    match input {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read input: {path}"))
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

fn task_output(task: AgentTask) -> Result<serde_json::Value> {
    match (task.status, task.result) {
        (TaskStatus::Completed | TaskStatus::TimedOut, Some(result)) => Ok(result),
        (status, _) => Err(anyhow::anyhow!(
            "Task {} ended {status:?}: {}",
            task.id,
            task.error.unwrap_or_default()
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = vigil::load_config(&cli.config)?;

    if let Command::CheckConfig = cli.command {
        let problems = vigil::config_problems(&config);
        for problem in &problems {
            eprintln!("{problem}");
        }
        if !problems.is_empty() {
            anyhow::bail!("{} problem(s) in {}", problems.len(), cli.config);
        }
        emit(&config, cli.pretty)?;
        return Ok(());
    }

    let vigil = Vigil::from_config(config, Arc::new(LoggingExecutor))
        .await
        .context("Failed to build vigil")?;
    vigil
        .start()
        .map_err(|e| anyhow::anyhow!("Failed to start agents: {e}"))?;

    let outcome = run(&vigil, cli.command, cli.pretty).await;
    vigil.shutdown().await;
    outcome
}

async fn run(vigil: &Vigil, command: Command, pretty: bool) -> Result<()> {
    match command {
        Command::Validate { input } => {
            let raw = read_input(input.as_deref())?;
            let params: SignalParams =
                serde_json::from_str(&raw).context("Failed to parse SignalParams JSON")?;
            let task = vigil
                .validate(&params)
                .await
                .map_err(|e| anyhow::anyhow!("Validation failed: {e}"))?;
            emit(&task_output(task)?, pretty)
        }
        Command::Risk { check } => {
            let task = match check {
                RiskCheck::Position { input } => {
                    let raw = read_input(input.as_deref())?;
                    let position: PositionRisk =
                        serde_json::from_str(&raw).context("Failed to parse PositionRisk JSON")?;
                    vigil.monitor_position(&position).await
                }
                RiskCheck::Account { input } => {
                    let raw = read_input(input.as_deref())?;
                    let account: AccountRisk =
                        serde_json::from_str(&raw).context("Failed to parse AccountRisk JSON")?;
                    vigil.check_account(&account).await
                }
            }
            .map_err(|e| anyhow::anyhow!("Risk check failed: {e}"))?;
            emit(&task_output(task)?, pretty)
        }
        Command::Regime { symbol, input } => {
            let raw = read_input(input.as_deref())?;
            let bars: Vec<PriceBar> =
                serde_json::from_str(&raw).context("Failed to parse price bar JSON")?;
            let snapshot = classify_regime(&symbol, &bars, &RegimeThresholds::default());

            let store = vigil.store().as_ref();
            let ttl = Duration::from_secs(vigil.config().feed.ttl_seconds);
            set_typed(store, &keys::regime(&symbol), &snapshot, Some(ttl))
                .await
                .context("Failed to write regime snapshot")?;
            publish_typed(store, keys::channel::REGIME_UPDATES, &snapshot)
                .await
                .context("Failed to publish regime snapshot")?;
            emit(&snapshot, pretty)
        }
        Command::CheckConfig => Ok(()),
    }
}
