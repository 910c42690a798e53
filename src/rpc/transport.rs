//! Client transports
//!
//! A transport carries one encoded request to an endpoint and hands back the
//! raw, newline-delimited response body as a byte stream.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tokio_util::io::ReaderStream;

use crate::rpc::client::ClientError;
use crate::rpc::endpoint::{Endpoint, PIPE_CAPACITY};
use crate::rpc::service::Context;

/// Raw response body of one request
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

const MAX_IDLE_PER_HOST: usize = 128;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `body` and return the response stream.
    async fn send_request(&self, body: Vec<u8>) -> Result<ByteStream, ClientError>;

    /// Human-readable address, used in logs and error messages
    fn address(&self) -> &str;
}

/// Requests are `POST`ed to the root of an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    address: String,
    url: String,
}

impl HttpTransport {
    pub fn new(address: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            http,
            address: address.to_string(),
            url: endpoint_url(address),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_request(&self, body: Vec<u8>) -> Result<ByteStream, ClientError> {
        let resp = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        if resp.status() != StatusCode::OK {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }

        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(transport_error))
            .boxed())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// reqwest keeps the interesting part (refused, reset, DNS) in the source chain.
fn transport_error(e: reqwest::Error) -> ClientError {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    ClientError::Transport(message)
}

/// Serves requests with an in-process endpoint over an in-memory pipe.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    endpoint: Endpoint,
    ctx: Context,
    address: String,
}

impl LocalTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ctx: Context::new(),
            address: "local".to_string(),
        }
    }

    /// Metadata handed to every request, in place of HTTP headers
    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send_request(&self, body: Vec<u8>) -> Result<ByteStream, ClientError> {
        let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let endpoint = self.endpoint.clone();
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            if let Err(e) = endpoint.handle_request(ctx, &body, &mut writer).await {
                tracing::debug!("local request ended early: {}", e);
            }
        });

        Ok(ReaderStream::new(reader)
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// `host:port` -> `http://host:port/`; explicit schemes are kept.
pub fn endpoint_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{}/", address)
    } else {
        format!("http://{}/", address)
    }
}
