//! `autoloop` CLI: runs the standard pipeline and reports the outcome.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use autoloop::config::{LoopConfig, load_config, render_config};
use autoloop::exit_codes;
use autoloop::logging;
use autoloop::looping::{AutonomousLoop, AutonomousReport, LoopStop};
use autoloop::standard::{DEFAULT_GOALS, StandardModules, standard_context};

const DEFAULT_CONFIG_PATH: &str = "autoloop.toml";

#[derive(Parser)]
#[command(
    name = "autoloop",
    version,
    about = "Cycle-based module orchestration loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the standard pipeline until the threshold or the cycle budget.
    Run {
        /// Config file; missing file means defaults.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Override the configured cycle budget.
        #[arg(long)]
        max_cycles: Option<u32>,
        /// Goal for the run (repeatable). Defaults to the built-in goals.
        #[arg(long = "goal")]
        goals: Vec<String>,
        /// Also write the report as JSON to this path.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print the report as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration (file + environment) as TOML.
    Config {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn main() {
    logging::init();
    match run(Cli::parse()) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            config,
            max_cycles,
            goals,
            output,
            json,
        } => cmd_run(&config, max_cycles, goals, output.as_deref(), json),
        Command::Config { config } => cmd_config(&config),
    }
}

fn effective_config(path: &Path) -> Result<LoopConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env_overrides(|key| std::env::var(key).ok())
        .context("apply environment overrides")?;
    Ok(cfg)
}

fn cmd_run(
    config_path: &Path,
    max_cycles: Option<u32>,
    goals: Vec<String>,
    output: Option<&Path>,
    json: bool,
) -> Result<i32> {
    let cfg = effective_config(config_path)?;
    let max_cycles = max_cycles.unwrap_or(cfg.max_cycles);
    let goals = if goals.is_empty() {
        DEFAULT_GOALS.iter().map(|g| (*g).to_string()).collect()
    } else {
        goals
    };
    info!(environment = %cfg.environment, max_cycles, "starting run");

    let mut modules = StandardModules::new(&cfg);
    let mut ctx = standard_context(goals, cfg.stability_threshold);
    let report = AutonomousLoop::new(&cfg, modules.steps())
        .run(&mut ctx, max_cycles)
        .context("run loop")?;

    if let Some(path) = output {
        write_json(path, &report)?;
    }
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
    } else {
        print!("{}", render_summary(&report));
    }

    Ok(exit_code(&report))
}

fn cmd_config(config_path: &Path) -> Result<i32> {
    let cfg = effective_config(config_path)?;
    print!("{}", render_config(&cfg)?);
    Ok(exit_codes::OK)
}

fn exit_code(report: &AutonomousReport) -> i32 {
    match report.stop {
        LoopStop::ThresholdReached { .. } => exit_codes::OK,
        LoopStop::BudgetExhausted { .. } => exit_codes::BUDGET_EXHAUSTED,
    }
}

fn render_summary(report: &AutonomousReport) -> String {
    let mut out = String::from("=== Autonomous Report ===\n");
    out.push_str(&format!("Cycles executed: {}\n", report.cycles_executed));
    out.push_str(&format!("Best score: {:.2}\n", report.best_score));
    let stop = match report.stop {
        LoopStop::ThresholdReached { cycle } => format!("threshold reached in cycle {cycle}"),
        LoopStop::BudgetExhausted { max_cycles } => {
            format!("budget of {max_cycles} cycles exhausted")
        }
    };
    out.push_str(&format!("Stopped: {stop} (threshold {:.2})\n", report.threshold));

    out.push_str("\nMetrics:\n");
    for (key, value) in &report.metrics {
        out.push_str(&format!("  - {key}: {value:.2}\n"));
    }
    out.push_str("\nArtefacts:\n");
    for (name, artefact) in &report.artefacts {
        let text = match artefact.as_str() {
            Some(text) => text.to_string(),
            None => artefact.to_string(),
        };
        out.push_str(&format!("--- {name} ---\n{text}\n"));
    }
    out.push_str("\nActivity log:\n");
    for entry in &report.logs {
        out.push_str(&format!(" * {entry}\n"));
    }
    out
}

/// Serialize `value` to pretty-printed JSON with trailing newline.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
