//! shoal: analyzer fan-out over a small JSON RPC protocol
//!
//! A caller submits one analysis request; shoal discovers which analyzer
//! services handle which categories, calls exactly the right ones
//! concurrently and merges their findings, keeping every failure.
//!
//! # Layers
//!
//! - [`rpc`]: newline-delimited JSON RPC with single-result and streaming
//!   calls, served over HTTP or pipes
//! - [`analysis`]: the analyzer contract and a service for hosting analyzers
//! - [`driver`]: category discovery, fan-out and fan-in
//! - [`config`]: per-repository `.shoal.yaml`
//!
//! # Example
//!
//! ```ignore
//! use shoal::analysis::{AnalysisContext, DriverRequest};
//! use shoal::driver::Driver;
//!
//! let driver = Driver::new(vec!["localhost:10005".to_string()]);
//! driver.wait_for_analyzers().await?;
//! let response = driver
//!     .run(DriverRequest {
//!         triggered_category: vec!["WordCount".to_string()],
//!         event: "manual".to_string(),
//!         shoal_context: AnalysisContext {
//!             repo_root: Some("/src/project".to_string()),
//!             ..Default::default()
//!         },
//!     })
//!     .await;
//! ```

pub mod analysis;
pub mod cli;
pub mod commands;
pub mod config;
pub mod driver;
pub mod error;
pub mod fs_utils;
pub mod rpc;

// Re-export commonly used types
pub use analysis::{Analyzer, AnalysisContext, AnalysisFailure, DriverRequest, DriverResponse, Note};
pub use cli::{Cli, Commands};
pub use driver::{Driver, DriverOptions};
pub use error::{Result, ShoalError};
pub use rpc::{Client, ClientError, Endpoint, RpcError, Service};
