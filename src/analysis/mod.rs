//! Analysis payloads and the analyzer-side service

pub mod service;
pub mod types;

pub use service::{register_analyzer_service, Analyzer, AnalyzerService};
pub use types::*;
