//! CLI argument definitions using clap with subcommand architecture

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::driver::{Driver, DriverOptions};

/// Fan analysis requests out to a fleet of analyzer services
#[derive(Parser, Debug)]
#[command(name = "shoal")]
#[command(about = "Fan analysis requests out to analyzer services and merge their findings")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Show debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

// ============================================
// Main Commands Enum
// ============================================

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the ShoalService driver over HTTP or stdio
    Serve(ServeArgs),

    /// Run one analysis and print the merged result as JSON
    Run(RunArgs),

    /// Call any method on an endpoint
    Call(CallArgs),

    /// List the services an endpoint exposes
    Services(ServicesArgs),

    /// Wait until every given endpoint answers
    Wait(WaitArgs),
}

// ============================================
// Shared analyzer arguments
// ============================================

#[derive(Args, Debug, Clone)]
pub struct AnalyzerArgs {
    /// Analyzer addresses (host:port), comma separated
    #[arg(long, env = "SHOAL_ANALYZERS", value_delimiter = ',', required = true)]
    pub analyzers: Vec<String>,

    /// Seconds analyzers get to become healthy (0 waits forever)
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub health_timeout: u64,

    /// Deadline in seconds for each analyzer call (0 disables it)
    #[arg(long, default_value = "900", value_name = "SECS")]
    pub analyze_timeout: u64,
}

impl AnalyzerArgs {
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            analyze_timeout: (self.analyze_timeout > 0)
                .then(|| Duration::from_secs(self.analyze_timeout)),
            health_timeout: Duration::from_secs(self.health_timeout),
        }
    }

    pub fn driver(&self) -> Driver {
        Driver::new(self.analyzers.clone()).with_options(self.driver_options())
    }
}

// ============================================
// Serve Subcommand
// ============================================

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub analyzers: AnalyzerArgs,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "SHOAL_PORT", default_value = "10007")]
    pub port: u16,

    /// Read requests from stdin and write responses to stdout instead of HTTP
    #[arg(long)]
    pub stdio: bool,
}

// ============================================
// Run Subcommand
// ============================================

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub analyzers: AnalyzerArgs,

    /// Event name used to pick categories from .shoal.yaml
    #[arg(long, default_value = "manual")]
    pub event: String,

    /// Category to run (repeatable); overrides the repository config
    #[arg(short, long = "category", value_name = "CATEGORY")]
    pub categories: Vec<String>,

    /// Repository root
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Files to analyze, relative to the repository root (default: all files)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,
}

// ============================================
// Client Subcommands
// ============================================

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Endpoint address (host:port or URL)
    pub address: String,

    /// Method path, e.g. /AnalyzerService/GetCategory
    pub method: String,

    /// JSON params
    #[arg(default_value = "{}")]
    pub params: String,

    /// Use the streaming protocol and print one result per line
    #[arg(long)]
    pub stream: bool,
}

#[derive(Args, Debug)]
pub struct ServicesArgs {
    /// Endpoint address (host:port or URL)
    pub address: String,

    /// Print the raw service list as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Endpoint addresses
    #[arg(required = true)]
    pub addresses: Vec<String>,

    /// Seconds to wait (0 waits forever)
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub timeout: u64,
}
