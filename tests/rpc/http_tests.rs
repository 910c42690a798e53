//! The RPC protocol over a real HTTP listener

use std::time::Duration;

use serde_json::{json, Value};

use crate::common::{counter_endpoint, spawn_http};
use shoal::rpc::transport::endpoint_url;
use shoal::rpc::{Client, ClientError, ErrorCode, ServiceInfo};

async fn counter_client() -> (String, Client) {
    let address = spawn_http(counter_endpoint()).await;
    let client = Client::http(&address).expect("client");
    (address, client)
}

/// POST a raw body and return the response lines
async fn post_raw(address: &str, body: &str) -> (u16, Vec<Value>) {
    let resp = reqwest::Client::new()
        .post(endpoint_url(address))
        .body(body.to_string())
        .send()
        .await
        .expect("post");
    let status = resp.status().as_u16();
    let text = resp.text().await.expect("body");
    let lines = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect();
    (status, lines)
}

// ============================================================================
// UNARY AND STREAMING CALLS
// ============================================================================

#[tokio::test]
async fn test_unary_call_over_http() {
    let (_, client) = counter_client().await;
    let doubled: u32 = client.call("/Counter/Double", &json!({"n": 21})).await.unwrap();
    assert_eq!(doubled, 42);
}

#[tokio::test]
async fn test_stream_result_counts() {
    let (_, client) = counter_client().await;
    for n in [0u32, 1, 7] {
        let reader = client.stream("/Counter/Up", &json!({ "n": n })).await.unwrap();
        let items: Vec<u32> = reader.collect().await.unwrap();
        assert_eq!(items, (0..n).collect::<Vec<_>>(), "n = {}", n);
    }
}

#[tokio::test]
async fn test_stream_read_incrementally() {
    let (_, client) = counter_client().await;
    let mut reader = client.stream("/Counter/Up", &json!({"n": 3})).await.unwrap();

    assert_eq!(reader.next::<u32>().await.unwrap(), Some(0));
    assert_eq!(reader.next::<u32>().await.unwrap(), Some(1));
    assert_eq!(reader.next::<u32>().await.unwrap(), Some(2));
    assert_eq!(reader.next::<u32>().await.unwrap(), None);
    // Completion is sticky
    assert_eq!(reader.next::<u32>().await.unwrap(), None);
}

#[tokio::test]
async fn test_concurrent_calls_share_a_client() {
    let (_, client) = counter_client().await;
    let calls = (0..16u32).map(|n| {
        let client = client.clone();
        async move { client.call::<_, u32>("/Counter/Double", &json!({ "n": n })).await }
    });
    let results = futures_util::future::join_all(calls).await;
    for (n, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), n as u32 * 2);
    }
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[tokio::test]
async fn test_streaming_wire_format() {
    let (address, _) = counter_client().await;
    let (status, lines) = post_raw(
        &address,
        r#"{"jsonrpc":"2.0 streaming","id":5,"method":"/Counter/Up","params":{"n":2}}"#,
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["result"], json!(0));
    assert_eq!(lines[1]["result"], json!(1));
    assert_eq!(lines[2]["success"], json!(true));
    for line in &lines {
        assert_eq!(line["jsonrpc"], json!("2.0 streaming"));
        assert_eq!(line["id"], json!(5));
    }
}

#[tokio::test]
async fn test_single_version_collapses_stream() {
    let (address, _) = counter_client().await;
    let (_, lines) = post_raw(
        &address,
        r#"{"jsonrpc":"2.0","id":"x","method":"/Counter/Up","params":{"n":3}}"#,
    )
    .await;

    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["jsonrpc"], json!("2.0"));
    assert_eq!(lines[0]["id"], json!("x"));
    assert_eq!(lines[0]["result"], json!([0, 1, 2]));
}

#[tokio::test]
async fn test_protocol_errors_over_http() {
    let (address, _) = counter_client().await;

    let (status, lines) = post_raw(&address, "not json at all").await;
    assert_eq!(status, 200);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["error"]["code"], json!(ErrorCode::Parsing.code()));

    let (_, lines) = post_raw(&address, r#"{"jsonrpc":"2.0","id":1,"method":"/Counter/Triple"}"#).await;
    assert_eq!(lines[0]["error"]["code"], json!(ErrorCode::MethodNotFound.code()));
}

#[tokio::test]
async fn test_get_is_not_allowed() {
    let (address, _) = counter_client().await;
    let resp = reqwest::get(endpoint_url(&address)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 405);
}

#[tokio::test]
async fn test_response_content_type() {
    let (address, _) = counter_client().await;
    let resp = reqwest::Client::new()
        .post(endpoint_url(&address))
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"/Counter/Double","params":{"n":1}}"#)
        .send()
        .await
        .unwrap();
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("application/json"), "{}", content_type);
}

/// Content-Encoding of a streaming call, with decompression left to the test
async fn content_encoding(address: &str, accept: Option<&str>) -> Option<String> {
    let http = reqwest::Client::builder()
        .no_gzip()
        .no_deflate()
        .build()
        .unwrap();
    let mut req = http
        .post(endpoint_url(address))
        .body(r#"{"jsonrpc":"2.0 streaming","id":1,"method":"/Counter/Up","params":{"n":200}}"#);
    if let Some(accept) = accept {
        req = req.header(reqwest::header::ACCEPT_ENCODING, accept);
    }
    let resp = req.send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    resp.headers()
        .get(reqwest::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[tokio::test]
async fn test_response_compression_negotiated() {
    let (address, _) = counter_client().await;
    assert_eq!(content_encoding(&address, Some("gzip")).await.as_deref(), Some("gzip"));
    assert_eq!(content_encoding(&address, Some("deflate")).await.as_deref(), Some("deflate"));
    assert_eq!(content_encoding(&address, None).await, None);
}

#[tokio::test]
async fn test_compressed_stream_decodes() {
    let (_, client) = counter_client().await;
    let items: Vec<u32> = client
        .stream("/Counter/Up", &json!({"n": 500}))
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(items, (0..500).collect::<Vec<_>>());
}

// ============================================================================
// ERRORS AND DISCOVERY
// ============================================================================

#[tokio::test]
async fn test_handler_error_reaches_client() {
    let (_, client) = counter_client().await;
    let err = client
        .call::<_, u32>("/Counter/Fail", &json!({"n": 1}))
        .await
        .unwrap_err();
    let remote = err.remote().expect("remote error");
    assert_eq!(remote.code, ErrorCode::Application);
    assert_eq!(remote.message, "counter failed");
}

#[tokio::test]
async fn test_list_services_over_http() {
    let (_, client) = counter_client().await;
    let services: Vec<ServiceInfo> = client.list_services().await.unwrap();
    let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Counter", "ServerInfo"]);

    let counter = &services[0];
    let mut methods: Vec<(&str, bool)> = counter
        .methods
        .iter()
        .map(|m| (m.name.as_str(), m.stream))
        .collect();
    methods.sort();
    assert_eq!(methods, vec![("Double", false), ("Fail", false), ("Up", true)]);
}

#[tokio::test]
async fn test_wait_until_ready() {
    let (_, client) = counter_client().await;
    client.wait_until_ready(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_wait_until_ready_gives_up() {
    let client = Client::http("127.0.0.1:1").unwrap();
    let err = client
        .wait_until_ready(Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotReady(_)), "{:?}", err);

    // The connection failure itself, not the expiry of the last attempt
    let message = err.to_string().to_lowercase();
    assert!(message.contains("transport error"), "{}", message);
    assert!(message.contains("refused"), "{}", message);
    assert!(!message.contains("no answer within"), "{}", message);
}
