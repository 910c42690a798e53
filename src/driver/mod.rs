//! Orchestration driver
//!
//! [`Driver::run`] resolves which categories to run, discovers which analyzers
//! serve them, calls those analyzers concurrently and merges their answers.
//! It never fails as a whole: every problem becomes an [`AnalysisFailure`] in
//! the aggregate response.

pub mod directory;

use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::{spawn_blocking, JoinSet};

use crate::analysis::{
    AnalysisFailure, AnalyzeRequest, AnalyzeResponse, DriverRequest, DriverResponse, Note,
    ANALYZE_METHOD, SHOAL_SERVICE,
};
use crate::config::{ConfigSource, EventConfig, FileConfigSource};
use crate::error::Result;
use crate::fs_utils::{collect_all_files, filter_paths};
use crate::rpc::{Client, RegistryError, Service};

pub use directory::{probe_all, wait_for_all, AnalyzerDirectory, ClientPool};

/// Category of failures raised by the driver itself
pub const DRIVER_SETUP_CATEGORY: &str = "Driver setup";

/// Default deadline for each analyzer call
pub const DEFAULT_ANALYZE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Default time analyzers get to become healthy
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Deadline for each `Analyze` call. `None` waits as long as it takes.
    pub analyze_timeout: Option<Duration>,

    /// Used by [`Driver::wait_for_analyzers`]. Zero waits forever.
    pub health_timeout: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            analyze_timeout: Some(DEFAULT_ANALYZE_TIMEOUT),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }
}

pub struct Driver {
    addresses: Vec<String>,
    pool: Arc<ClientPool>,
    config: Arc<dyn ConfigSource>,
    options: DriverOptions,
}

impl Driver {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses,
            pool: Arc::new(ClientPool::new()),
            config: Arc::new(FileConfigSource),
            options: DriverOptions::default(),
        }
    }

    pub fn with_pool(mut self, pool: Arc<ClientPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_config_source(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = config;
        self
    }

    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    /// Block until every analyzer answers, or report all that did not.
    pub async fn wait_for_analyzers(&self) -> Result<()> {
        wait_for_all(&self.pool, &self.addresses, self.options.health_timeout).await
    }

    pub async fn run(&self, req: DriverRequest) -> DriverResponse {
        tracing::info!(
            event = %req.event,
            categories = ?req.triggered_category,
            repo_root = ?req.shoal_context.repo_root,
            "Received analysis request"
        );

        let Some(repo_root) = req
            .shoal_context
            .repo_root
            .clone()
            .filter(|root| !root.is_empty())
        else {
            return setup_failure("No repo root was provided");
        };
        let repo_path = Path::new(&repo_root);

        // Config reads and the file walk touch the disk; keep them off the workers.
        let source = Arc::clone(&self.config);
        let (root, event) = (repo_path.to_path_buf(), req.event.clone());
        let config: EventConfig = match spawn_blocking(move || source.load(&root, &event)).await {
            Ok(Ok(config)) => config.unwrap_or_default(),
            Ok(Err(e)) => return setup_failure(format!("Could not load config: {}", e)),
            Err(e) => return setup_failure(format!("Could not load config: {}", e)),
        };

        let desired: BTreeSet<String> = if req.triggered_category.is_empty() {
            config.categories.iter().cloned().collect()
        } else {
            req.triggered_category.iter().cloned().collect()
        };
        if desired.is_empty() {
            tracing::info!("No categories to run for event {:?}", req.event);
            return DriverResponse::default();
        }

        let mut ctx = req.shoal_context.clone();
        if ctx.file_path.is_empty() {
            let root = repo_path.to_path_buf();
            match spawn_blocking(move || collect_all_files(&root)).await {
                Ok(Ok(files)) => ctx.file_path = files,
                Ok(Err(e)) => {
                    return setup_failure(format!("Could not list files under {}: {}", repo_root, e))
                }
                Err(e) => {
                    return setup_failure(format!("Could not list files under {}: {}", repo_root, e))
                }
            }
        }
        ctx.file_path = filter_paths(&ctx.file_path, &config.ignore);
        if ctx.file_path.is_empty() {
            tracing::info!("No files left to analyze after applying ignore rules");
            return DriverResponse::default();
        }

        let directory = AnalyzerDirectory::discover(&self.pool, &self.addresses).await;

        let mut aggregate = DriverResponse::default();
        let mut missing = Vec::new();
        let desired: BTreeSet<String> = desired
            .into_iter()
            .filter(|category| {
                let served = directory.serves(category);
                if !served {
                    missing.push(AnalysisFailure::new(
                        Some(category.as_str()),
                        format!(
                            "The triggered category {:?} could not be found at the locations {:?}",
                            category, self.addresses
                        ),
                    ));
                }
                served
            })
            .collect();
        if !missing.is_empty() {
            tracing::warn!("No analyzer serves {} requested category(s)", missing.len());
            aggregate.analyze_response.push(AnalyzeResponse {
                note: Vec::new(),
                failure: missing,
            });
        }
        if desired.is_empty() {
            return aggregate;
        }

        let files: Arc<HashSet<String>> = Arc::new(ctx.file_path.iter().cloned().collect());
        let mut tasks = JoinSet::new();

        for (address, declared) in directory.iter() {
            let category: Vec<String> = declared.intersection(&desired).cloned().collect();
            if category.is_empty() {
                continue;
            }
            let client = match self.pool.get(address) {
                Ok(client) => client,
                Err(e) => {
                    aggregate
                        .analyze_response
                        .push(AnalyzeResponse::failed(analyzer_failure(address, &e.to_string())));
                    continue;
                }
            };

            tracing::debug!("Calling {} for {:?}", address, category);
            let request = AnalyzeRequest {
                shoal_context: ctx.clone(),
                category,
            };
            let address = address.to_string();
            let files = Arc::clone(&files);
            let timeout = self.options.analyze_timeout;

            tasks.spawn(async move {
                let call = AssertUnwindSafe(call_analyze(&client, &request, timeout)).catch_unwind();
                let resp = match call.await {
                    Ok(Ok(resp)) => filter_results(resp, &files),
                    Ok(Err(e)) => AnalyzeResponse::failed(analyzer_failure(&address, &e)),
                    Err(_) => AnalyzeResponse::failed(analyzer_failure(&address, "call panicked")),
                };
                (address, resp)
            });
        }

        let mut responses = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => responses.push(done),
                Err(e) => aggregate
                    .analyze_response
                    .push(AnalyzeResponse::failed(AnalysisFailure::new(
                        None,
                        format!("Analyzer task failed: {}", e),
                    ))),
            }
        }
        responses.sort_by(|a, b| a.0.cmp(&b.0));
        aggregate
            .analyze_response
            .extend(responses.into_iter().map(|(_, resp)| resp));

        tracing::info!(
            "Analysis finished with {} note(s) and {} failure(s)",
            aggregate.notes().count(),
            aggregate.failures().count()
        );
        aggregate
    }
}

async fn call_analyze(
    client: &Client,
    request: &AnalyzeRequest,
    timeout: Option<Duration>,
) -> std::result::Result<AnalyzeResponse, String> {
    let call = client.call::<_, AnalyzeResponse>(ANALYZE_METHOD, request);
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome.map_err(|e| e.to_string()),
            Err(_) => Err(format!("no response within {:?}", limit)),
        },
        None => call.await.map_err(|e| e.to_string()),
    }
}

fn analyzer_failure(address: &str, err: &str) -> AnalysisFailure {
    tracing::warn!("Error from analyzer {}: {}", address, err);
    AnalysisFailure::new(None, format!("Error from analyzer {}: {}", address, err))
}

fn setup_failure(message: impl Into<String>) -> DriverResponse {
    let failure = AnalysisFailure::new(Some(DRIVER_SETUP_CATEGORY), message);
    tracing::warn!("{}", failure.failure_message);
    DriverResponse {
        analyze_response: vec![AnalyzeResponse::failed(failure)],
    }
}

/// Drop notes that cannot be attributed or are outside the analyzed files.
/// Failures are kept as they are.
pub fn filter_results(mut resp: AnalyzeResponse, files: &HashSet<String>) -> AnalyzeResponse {
    resp.note.retain(|note| keep_note(note, files));
    resp
}

fn keep_note(note: &Note, files: &HashSet<String>) -> bool {
    let Some(location) = note.location.as_ref() else {
        return false;
    };
    note.category.is_some()
        && location.source_context.is_some()
        && location.path.as_ref().map_or(true, |path| files.contains(path))
}

/// Build the `ShoalService` service around `driver`.
pub fn register_shoal_service(driver: Driver) -> std::result::Result<Service, RegistryError> {
    let mut service = Service::named(SHOAL_SERVICE);
    service.register(driver, |r| {
        r.unary("Run", |driver, _ctx, req: DriverRequest| async move {
            Ok(driver.run(req).await)
        });
    })?;
    Ok(service)
}
