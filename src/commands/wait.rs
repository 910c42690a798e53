//! Batch readiness command handler

use std::time::Duration;

use crate::cli::WaitArgs;
use crate::driver::{wait_for_all, ClientPool};
use crate::error::Result;

pub fn run_wait(args: &WaitArgs) -> Result<String> {
    let pool = ClientPool::new();
    let timeout = Duration::from_secs(args.timeout);
    super::runtime()?.block_on(wait_for_all(&pool, &args.addresses, timeout))?;

    Ok(format!("{} endpoint(s) ready\n", args.addresses.len()))
}
