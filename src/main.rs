//! Command-line scraper panel.
//!
//! ```bash
//! scraper_panel list
//! scraper_panel --config site.toml config
//! scraper_panel --scraper lt02-scrh status
//! scraper_panel --scraper sr-scrv in first 0.5
//! scraper_panel --scraper sr-scrv shell
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scraper_panel::{
    config::PanelConfig,
    controller::MotorMoveController,
    device::simulated::SimulatedFactory,
    logging,
    scraper::{Axis, Scraper},
    shell::{self, ShellCommand},
};
use tokio::io::BufReader;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "scraper_panel", version, about = "Operator panel for beam scraper jaws")]
struct Cli {
    /// Configuration file layered over the built-in installation table
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Scraper installation, e.g. LT02-SCRH
    #[arg(short, long, global = true)]
    scraper: Option<String>,

    /// Log filter, overriding the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the configured installations
    List,
    /// Print the effective configuration as TOML
    Config,
    /// Read every axis and extra readout
    Status,
    /// Close a jaw by a step
    In {
        axis: Axis,
        #[arg(allow_negative_numbers = true, value_parser = step_arg)]
        step: f64,
    },
    /// Open a jaw by a step
    Out {
        axis: Axis,
        #[arg(allow_negative_numbers = true, value_parser = step_arg)]
        step: f64,
    },
    /// Move an axis to an absolute position
    Move {
        axis: Axis,
        #[arg(allow_negative_numbers = true)]
        target: f64,
    },
    /// Abort all axes
    Abort,
    /// Interactive command shell
    Shell,
}

fn step_arg(raw: &str) -> Result<f64, String> {
    shell::parse_step(raw).map_err(|e| e.to_string())
}

impl Command {
    fn to_shell(&self) -> Option<ShellCommand> {
        Some(match *self {
            Command::Status => ShellCommand::Status,
            Command::In { axis, step } => ShellCommand::In { axis, step },
            Command::Out { axis, step } => ShellCommand::Out { axis, step },
            Command::Move { axis, target } => ShellCommand::Move { axis, target },
            Command::Abort => ShellCommand::Abort,
            Command::List | Command::Config | Command::Shell => return None,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = PanelConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.application.log_level);
    logging::init(level)?;
    info!("Starting {}", config.application.name);

    if let Command::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(true);
    }

    if let Command::List = cli.command {
        for installation in &config.installations {
            println!(
                "{:<10} {} [{}]",
                installation.id,
                installation.title.replace('\n', " "),
                installation.tooltip
            );
        }
        return Ok(true);
    }

    let Some(id) = cli.scraper.as_deref() else {
        bail!(
            "no scraper selected. Use --scraper with one of: {}",
            config.installation_ids().join(" ")
        );
    };
    let installation = config.installation(id)?;

    let factory = SimulatedFactory::from_config(&config);
    let controller = MotorMoveController::from_config(&config.controller);
    let scraper = Scraper::connect(installation, &factory, controller)
        .await
        .with_context(|| format!("connecting scraper {}", installation.id))?;

    if let Command::Shell = cli.command {
        let summary =
            shell::run_session(&scraper, BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await?;
        info!(
            "shell closed after {} commands, {} failed",
            summary.commands, summary.failures
        );
        return Ok(true);
    }

    let Some(command) = cli.command.to_shell() else {
        return Ok(true);
    };
    let reply = shell::execute(&scraper, &command).await;
    for line in &reply.lines {
        if reply.failed {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }
    Ok(!reply.failed)
}
