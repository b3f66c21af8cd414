//! PhiCrab Driver
//!
//! Builds the bundled demo functions and runs them through the dispatch engine.
//! Set `PHICRAB_LOG` to control logging, e.g. `PHICRAB_LOG=debug` to follow
//! every block transition.

use anyhow::Result;
use clap::{Parser, Subcommand};
use phicrab::demos;
use phicrab::interpreter::{Completion, DispatchObserver};
use phicrab::ir::BlockId;
use phicrab::options::EngineOptions;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "phicrab", version, about = "Basic-block dispatch engine for SSA functions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the bundled demo functions
    List,
    /// Build a demo function and run it
    Run {
        /// Name of the demo (see `list`)
        demo: String,

        /// One argument per parameter
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,

        /// Dispatch every block from one flat table, without loop regions
        #[arg(long)]
        flat: bool,

        /// Do not update branch probability counters
        #[arg(long = "no-profile")]
        no_profile: bool,
    },
}

/// Logs the back-edge count of every dispatch level.
#[derive(Debug)]
struct LoopLogger;

impl DispatchObserver for LoopLogger {
    fn loop_count(&self, function: &str, header: Option<BlockId>, count: u64) {
        match header {
            Some(header) => {
                info!("{}: loop at block {} took {} back-edge(s)", function, header, count)
            }
            None => info!("{}: {} back-edge(s) outside loop regions", function, count),
        }
    }
}

fn main() -> ExitCode {
    let log_level = std::env::var("PHICRAB_LOG").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::List => {
            for demo in demos::DEMOS {
                println!("{:<10} {}", demo.name, demo.description);
            }
            return ExitCode::SUCCESS;
        }
        Commands::Run {
            demo,
            args,
            flat,
            no_profile,
        } => {
            let options = EngineOptions {
                profile_branches: !no_profile,
                loop_regions: !flat,
                ..EngineOptions::default()
            };
            run_demo(&demo, &args, options)
        }
    };

    match result {
        Ok(Completion::Return(_)) => ExitCode::SUCCESS,
        Ok(Completion::Unwind(_)) => ExitCode::FAILURE,
        Err(e) => {
            error!("Dispatch failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_demo(name: &str, args: &[String], options: EngineOptions) -> Result<Completion> {
    let demo = demos::find(name)?;
    let function = demo.build(options, Arc::new(LoopLogger))?;
    let args = demos::parse_args(&function, args)?;

    let completion = function.invoke(args)?;
    println!("{}", completion);
    Ok(completion)
}
