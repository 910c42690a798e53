//! Generic client command handlers

use serde_json::Value;

use crate::cli::{CallArgs, ServicesArgs};
use crate::error::{Result, ShoalError};
use crate::rpc::{Client, ServiceInfo};

pub fn run_call(args: &CallArgs) -> Result<String> {
    let params: Value = serde_json::from_str(&args.params).map_err(|e| ShoalError::InvalidArgument {
        message: format!("params must be JSON: {}", e),
    })?;
    let client = Client::http(&args.address)?;
    super::runtime()?.block_on(call(args, &client, &params))
}

async fn call(args: &CallArgs, client: &Client, params: &Value) -> Result<String> {
    if !args.stream {
        let result: Value = client.call(&args.method, params).await?;
        return Ok(format!("{}\n", serde_json::to_string_pretty(&result)?));
    }

    // Results are printed as they arrive.
    let mut reader = client.stream(&args.method, params).await?;
    while let Some(result) = reader.next::<Value>().await? {
        println!("{}", serde_json::to_string(&result)?);
    }
    Ok(String::new())
}

pub fn run_services(args: &ServicesArgs) -> Result<String> {
    let client = Client::http(&args.address)?;
    let services = super::runtime()?.block_on(client.list_services())?;

    if args.json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&services)?));
    }
    Ok(format_services(&services))
}

fn format_services(services: &[ServiceInfo]) -> String {
    let mut out = String::new();
    for service in services {
        out.push_str(&service.name);
        out.push('\n');
        for method in &service.methods {
            out.push_str(&format!("  {}({})", method.name, method.params.join(", ")));
            if method.stream {
                out.push_str(" [stream]");
            }
            out.push('\n');
        }
    }
    out
}
