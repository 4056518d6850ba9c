// Tooling crate: rustdoc on the CLI internals is not published.
#![allow(missing_docs)]

mod args;
mod compile;
mod flash;
mod report;

use clap::{ArgAction, Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::args::{AdapterArgs, BuildArgs};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Firmware build-and-flash tasks", long_about = None)]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug incl. adapter output). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the release firmware, then program, verify and reset the target via OpenOCD
    #[command(visible_alias = "deploy")]
    Flash {
        #[command(flatten)]
        build: BuildArgs,
        #[command(flatten)]
        adapter: AdapterArgs,
        /// Print the build and flash commands without running them
        #[arg(long)]
        dry_run: bool,
    },
    /// Build the firmware only and report the artifact
    Build {
        #[command(flatten)]
        build: BuildArgs,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Flash {
            build,
            adapter,
            dry_run,
        } => flash::run(build, adapter, *dry_run),
        Commands::Build { build } => compile::run(build),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::debug!(error = ?error, "run failed");
            report::print_failure(&error);
            ExitCode::from(report::exit_code(&error))
        }
    }
}
