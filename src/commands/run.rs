//! One-shot analysis command handler

use crate::analysis::{AnalysisContext, DriverRequest};
use crate::cli::RunArgs;
use crate::error::Result;

pub fn run_run(args: &RunArgs) -> Result<String> {
    let repo_root = std::fs::canonicalize(&args.repo)?;
    let request = DriverRequest {
        triggered_category: args.categories.clone(),
        event: args.event.clone(),
        shoal_context: AnalysisContext {
            repo_root: Some(repo_root.to_string_lossy().into_owned()),
            file_path: args.files.clone(),
            source_context: None,
        },
    };

    let response = super::runtime()?.block_on(async {
        let driver = args.analyzers.driver();
        // Unhealthy analyzers are reported as failures by the run itself.
        let _ = driver.wait_for_analyzers().await;
        driver.run(request).await
    });

    Ok(format!("{}\n", serde_json::to_string_pretty(&response)?))
}
