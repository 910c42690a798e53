//! shoal CLI entry point

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use shoal::cli::{Cli, Commands};
use shoal::commands::{run_call, run_run, run_serve, run_services, run_wait};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run(cli: &Cli) -> shoal::Result<String> {
    match &cli.command {
        Commands::Serve(args) => run_serve(args),
        Commands::Run(args) => run_run(args),
        Commands::Call(args) => run_call(args),
        Commands::Services(args) => run_services(args),
        Commands::Wait(args) => run_wait(args),
    }
}

/// Logs go to stderr; stdout carries results and the stdio protocol.
fn init_logging(verbose: bool) {
    let directive = if verbose { "shoal=debug" } else { "shoal=info" };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = directive.parse::<Directive>() {
        filter = filter.add_directive(directive);
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
