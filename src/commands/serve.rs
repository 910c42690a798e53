//! Driver server command handler
//!
//! Waits for the configured analyzers, then exposes `ShoalService/Run`
//! either over HTTP or over stdin/stdout. In stdio mode stdout carries the
//! protocol, so logs stay on stderr.

use tokio::io::BufReader;
use tokio::net::TcpListener;

use crate::cli::ServeArgs;
use crate::driver::register_shoal_service;
use crate::rpc::{Context, Endpoint};

pub fn run_serve(args: &ServeArgs) -> crate::Result<String> {
    super::runtime()?.block_on(serve(args))?;

    // Server exits cleanly - no output needed
    Ok(String::new())
}

async fn serve(args: &ServeArgs) -> crate::Result<()> {
    tracing::info!("Starting shoal driver v{}", env!("CARGO_PKG_VERSION"));

    let driver = args.analyzers.driver();
    if driver.wait_for_analyzers().await.is_err() {
        tracing::warn!("Serving anyway; unhealthy analyzers will report failures");
    }

    let endpoint = Endpoint::new(vec![register_shoal_service(driver)?])?;

    if args.stdio {
        tracing::info!("Serving on stdin/stdout");
        endpoint
            .serve_pipes(
                Context::new(),
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
            )
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        return Ok(());
    }

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    endpoint.serve_http(listener).await?;
    Ok(())
}
