//! Error types and exit codes for shoal

use std::process::ExitCode;
use thiserror::Error;

use crate::rpc::{ClientError, RegistryError};

/// Main error type for shoal operations
#[derive(Error, Debug)]
pub enum ShoalError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Service registration failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("RPC failed: {0}")]
    Client(#[from] ClientError),

    /// Addresses paired with the error each one returned
    #[error("{} analyzer(s) not healthy: {}", failures.len(), format_failures(failures))]
    Unhealthy { failures: Vec<(String, String)> },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(addr, err)| format!("{} ({})", addr, err))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ShoalError {
    /// Convert error to an exit code:
    /// - 0: Success
    /// - 1: IO or JSON error
    /// - 2: Invalid arguments or configuration
    /// - 3: Remote call failed
    /// - 4: Analyzers not healthy
    /// - 5: Service registration failed
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) => ExitCode::from(1),
            Self::Json(_) => ExitCode::from(1),
            Self::Config { .. } => ExitCode::from(2),
            Self::InvalidArgument { .. } => ExitCode::from(2),
            Self::Client(_) => ExitCode::from(3),
            Self::Unhealthy { .. } => ExitCode::from(4),
            Self::Registry(_) => ExitCode::from(5),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type alias for shoal operations
pub type Result<T> = std::result::Result<T, ShoalError>;
