//! Analysis data model
//!
//! These are the payloads of the analyzer contract:
//!
//! - `/AnalyzerService/GetCategory`: [`GetCategoryRequest`] -> [`GetCategoryResponse`]
//! - `/AnalyzerService/Analyze`: [`AnalyzeRequest`] -> [`AnalyzeResponse`]
//! - `/ShoalService/Run`: [`DriverRequest`] -> [`DriverResponse`]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Service addressing
// ============================================================================

/// Service exposed by every analyzer endpoint
pub const ANALYZER_SERVICE: &str = "AnalyzerService";

pub const GET_CATEGORY_METHOD: &str = "/AnalyzerService/GetCategory";

pub const ANALYZE_METHOD: &str = "/AnalyzerService/Analyze";

/// Service exposed by the driver
pub const SHOAL_SERVICE: &str = "ShoalService";

pub const RUN_METHOD: &str = "/ShoalService/Run";

// ============================================================================
// Shared context
// ============================================================================

/// Where the analyzed code came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// What to analyze. Handed to every analyzer as an independent copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisContext {
    /// Absolute path of the repository checkout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<String>,

    /// Paths relative to `repo_root`, `/`-separated
    #[serde(default)]
    pub file_path: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<SourceContext>,
}

// ============================================================================
// Findings
// ============================================================================

/// 1-based line and column bounds inside a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TextRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_column: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Location {
    /// Absent for notes about the repository as a whole
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<SourceContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<TextRange>,
}

/// A single finding reported by an analyzer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Note {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Link to further documentation about the finding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more_info: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Note {
    /// A note about `path`, attributed to `category`
    pub fn at(category: &str, path: &str, source_context: Option<SourceContext>) -> Self {
        Self {
            category: Some(category.to_string()),
            location: Some(Location {
                path: Some(path.to_string()),
                source_context,
                range: None,
            }),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_range(mut self, range: TextRange) -> Self {
        if let Some(location) = self.location.as_mut() {
            location.range = Some(range);
        }
        self
    }
}

/// An analyzer, or the driver itself, could not do its job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub failure_message: String,
}

impl AnalysisFailure {
    pub fn new(category: Option<&str>, failure_message: impl Into<String>) -> Self {
        Self {
            category: category.map(str::to_string),
            failure_message: failure_message.into(),
        }
    }
}

// ============================================================================
// Analyzer contract
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GetCategoryRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GetCategoryResponse {
    #[serde(default)]
    pub category: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub shoal_context: AnalysisContext,

    /// Categories the receiving endpoint should run
    #[serde(default)]
    pub category: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub note: Vec<Note>,

    #[serde(default)]
    pub failure: Vec<AnalysisFailure>,
}

impl AnalyzeResponse {
    pub fn failed(failure: AnalysisFailure) -> Self {
        Self {
            note: Vec::new(),
            failure: vec![failure],
        }
    }
}

// ============================================================================
// Driver contract
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DriverRequest {
    /// Categories to run. Empty means "whatever the repository config
    /// enables for `event`".
    #[serde(default)]
    pub triggered_category: Vec<String>,

    #[serde(default)]
    pub event: String,

    #[serde(default)]
    pub shoal_context: AnalysisContext,
}

/// One entry per analyzer endpoint that was called, plus one for driver
/// setup failures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DriverResponse {
    #[serde(default)]
    pub analyze_response: Vec<AnalyzeResponse>,
}

impl DriverResponse {
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.analyze_response.iter().flat_map(|r| r.note.iter())
    }

    pub fn failures(&self) -> impl Iterator<Item = &AnalysisFailure> {
        self.analyze_response.iter().flat_map(|r| r.failure.iter())
    }
}
