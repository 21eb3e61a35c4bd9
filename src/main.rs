#![deny(clippy::expect_used)]
#![deny(clippy::unwrap_used)]

mod cmd;
mod common;
mod compile;
mod config;
mod error;
mod graph;
mod manifest;
mod plan;
mod publish;
mod scan;
mod store;
mod tools;
mod version;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use common::STARTING;
use error::Error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Bale::parse();

    tracing_subscriber::registry()
        // Filter spans based on the verbosity flags or RUST_LOG.
        .with(eval_logging(&cli))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(std::io::stdout().is_terminal())
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        .try_init()
        .context("error initializing logging")?;

    tracing::info!(
        "{}Starting {} {}",
        STARTING,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    Ok(match cli.run().await {
        Err(err @ Error::NeedsCompilation) => {
            // The dry-run signal, not a failure; reported via the exit code.
            tracing::warn!("{err}");
            err.exit_code()
        }
        Err(err) => {
            tracing::error!("{}{err}", common::ERROR);
            if let Error::Other(inner) = &err {
                for (n, cause) in inner.chain().enumerate().skip(1) {
                    tracing::info!("  {n}: {cause}");
                }
            }
            err.exit_code()
        }
        Ok(()) => ExitCode::SUCCESS,
    })
}

fn eval_logging(cli: &Bale) -> tracing_subscriber::EnvFilter {
    // allow overriding everything with RUST_LOG or --log
    if let Some(directives) = &cli.log {
        return tracing_subscriber::EnvFilter::new(directives);
    }

    let directives = match (cli.verbose, cli.quiet) {
        // quiet overrides verbose
        (_, true) => "error,bale=warn",
        (0, false) => "error,bale=info",
        (1, false) => "error,bale=debug",
        (_, false) => "error,bale=trace",
    };

    tracing_subscriber::EnvFilter::new(directives)
}

/// Build, version & publish your web asset bundles.
#[derive(Parser)]
#[command(about, author, version)]
struct Bale {
    #[command(subcommand)]
    action: BaleSubcommands,
    /// Path to the Bale config file
    #[arg(long, env = "BALE_CONFIG", global(true))]
    pub config: Option<PathBuf>,
    /// Enable verbose logging.
    #[arg(short, long, global(true), action = ArgAction::Count)]
    pub verbose: u8,
    /// Be more quiet, conflicts with --verbose
    #[arg(short, long, global(true), conflicts_with("verbose"))]
    pub quiet: bool,
    /// Provide a RUST_LOG filter, conflicts with --verbose and --quiet
    #[arg(long, global(true), conflicts_with_all(["verbose", "quiet"]), env("RUST_LOG"))]
    pub log: Option<String>,
}

impl Bale {
    async fn run(self) -> Result<(), Error> {
        match self.action {
            BaleSubcommands::Build(inner) => inner.run(self.config).await,
            BaleSubcommands::Clean(inner) => inner.run(self.config).await,
        }
    }
}

#[derive(Subcommand)]
enum BaleSubcommands {
    /// Compile declared asset bundles and publish them.
    Build(cmd::build::Build),
    /// Clean compiled output artifacts.
    Clean(cmd::clean::Clean),
}
