//! Analyzer pack service
//!
//! Hosts a set of local [`Analyzer`]s behind the `AnalyzerService` contract
//! so that a driver can discover and call them.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use crate::analysis::types::{
    AnalysisContext, AnalysisFailure, AnalyzeRequest, AnalyzeResponse, GetCategoryRequest,
    GetCategoryResponse, Note, ANALYZER_SERVICE,
};
use crate::rpc::{RegistryError, Service};

/// A single analysis, identified by its category
pub trait Analyzer: Send + Sync + 'static {
    /// Should not contain spaces or other special characters.
    fn category(&self) -> &str;

    /// Runs on a blocking thread. An error is reported as a failure for this
    /// category and does not affect other analyzers.
    fn analyze(&self, ctx: &AnalysisContext) -> anyhow::Result<Vec<Note>>;
}

pub struct AnalyzerService {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl AnalyzerService {
    pub fn new(analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        Self { analyzers }
    }

    pub fn categories(&self) -> Vec<String> {
        self.analyzers
            .iter()
            .map(|a| a.category().to_string())
            .collect()
    }

    /// Run every analyzer whose category was requested, in registration order.
    pub async fn analyze(&self, req: AnalyzeRequest) -> AnalyzeResponse {
        let requested: HashSet<&str> = req.category.iter().map(String::as_str).collect();
        let mut resp = AnalyzeResponse::default();

        for analyzer in &self.analyzers {
            let category = analyzer.category().to_string();
            if !requested.contains(category.as_str()) {
                continue;
            }
            tracing::info!("About to run analyzer: {}", category);

            let analyzer = Arc::clone(analyzer);
            let ctx = req.shoal_context.clone();
            match tokio::task::spawn_blocking(move || analyzer.analyze(&ctx)).await {
                Ok(Ok(notes)) => resp.note.extend(notes),
                Ok(Err(e)) => {
                    tracing::warn!("analyzer {} failed: {:#}", category, e);
                    resp.failure
                        .push(AnalysisFailure::new(Some(category.as_str()), format!("{:#}", e)));
                }
                Err(e) if e.is_panic() => {
                    let msg = panic_message(e.into_panic());
                    tracing::warn!("analyzer {} panicked: {}", category, msg);
                    resp.failure.push(AnalysisFailure::new(
                        Some(category.as_str()),
                        format!("analyzer panicked: {}", msg),
                    ));
                }
                Err(e) => {
                    resp.failure
                        .push(AnalysisFailure::new(Some(category.as_str()), e.to_string()));
                }
            }
        }

        tracing::info!(
            "finished analyzing, sending back {} notes and {} failures",
            resp.note.len(),
            resp.failure.len()
        );
        resp
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Build the `AnalyzerService` service for `analyzers`.
pub fn register_analyzer_service(analyzers: Vec<Arc<dyn Analyzer>>) -> Result<Service, RegistryError> {
    let mut service = Service::named(ANALYZER_SERVICE);
    service.register(AnalyzerService::new(analyzers), |r| {
        r.unary("GetCategory", |svc, _ctx, _req: GetCategoryRequest| async move {
            Ok(GetCategoryResponse {
                category: svc.categories(),
            })
        });
        r.unary("Analyze", |svc, _ctx, req: AnalyzeRequest| async move {
            Ok(svc.analyze(req).await)
        });
    })?;
    Ok(service)
}
