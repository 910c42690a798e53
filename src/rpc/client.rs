//! RPC client
//!
//! [`Client`] issues requests over a [`Transport`] and decodes the
//! newline-delimited responses. Single-result calls go through
//! [`Client::call`]; streaming calls hand back a [`Reader`] that yields one
//! decoded result at a time.
//!
//! [`PipeWriter`] and [`PipeReader`] speak the same protocol over a pair of
//! byte pipes, for talking to a `serve --stdio` process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use crate::rpc::endpoint::Endpoint;
use crate::rpc::protocol::{check_id, Request, Response, RpcError, Version};
use crate::rpc::service::{ServiceInfo, LIST_METHOD, SERVER_INFO_SERVICE};
use crate::rpc::transport::{ByteStream, HttpTransport, LocalTransport, Transport};

/// First delay between readiness attempts
const INITIAL_BACKOFF: Duration = Duration::from_micros(800);

/// Delays stop doubling once they pass this bound
const MAX_BACKOFF: Duration = Duration::from_secs(25);

/// Longest response line a reader accepts
const MAX_LINE_LENGTH: usize = 256 * 1024 * 1024;

/// Request ids are unique across every client in the process.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Client-side failures. Cloneable so a [`Reader`] can keep reporting its
/// terminal error.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("error encoding request: {0}")]
    Encode(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("error decoding response: {0}")]
    Decode(String),

    #[error("{0}")]
    Remote(#[from] RpcError),

    #[error("endpoint not ready: {0}")]
    NotReady(Box<ClientError>),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}

impl ClientError {
    /// The protocol error returned by the endpoint, if that is what this is
    pub fn remote(&self) -> Option<&RpcError> {
        match self {
            ClientError::Remote(err) => Some(err),
            ClientError::NotReady(last) => last.remote(),
            _ => None,
        }
    }
}

/// Caller of a single endpoint. Clones share the transport.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.transport.address())
            .finish()
    }
}

impl Client {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Client of the HTTP endpoint at `address` (`host:port` or a URL)
    pub fn http(address: &str) -> Result<Self, ClientError> {
        Ok(Self::new(HttpTransport::new(address)?))
    }

    /// Client of an in-process endpoint
    pub fn local(endpoint: Endpoint) -> Self {
        Self::new(LocalTransport::new(endpoint))
    }

    pub fn address(&self) -> &str {
        self.transport.address()
    }

    /// Call a single-result method. An endpoint that only answers with a
    /// success marker yields `null`.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, ClientError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut reader = self.open(Version::Single, method, params).await?;
        let value = reader.next_value().await?.unwrap_or(Value::Null);
        reader.close();
        decode_result(value)
    }

    /// Call a streaming method. Results are read from the returned [`Reader`].
    pub async fn stream<P>(&self, method: &str, params: &P) -> Result<Reader, ClientError>
    where
        P: Serialize + ?Sized,
    {
        self.open(Version::Streaming, method, params).await
    }

    /// Every service registered on the endpoint, including `ServerInfo`
    pub async fn list_services(&self) -> Result<Vec<ServiceInfo>, ClientError> {
        let method = format!("/{}/{}", SERVER_INFO_SERVICE, LIST_METHOD);
        self.call(&method, &Value::Null).await
    }

    /// Poll `ServerInfo/List` with exponential backoff until the endpoint
    /// answers. A zero `timeout` waits forever.
    ///
    /// On timeout the error carries the last failure the endpoint gave, not
    /// the expiry of the final attempt.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), ClientError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut ival = INITIAL_BACKOFF;
        let mut last_err = None;

        loop {
            let attempt = self.list_services();
            let outcome = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(not_ready(last_err, timeout)),
                },
                None => attempt.await,
            };

            match outcome {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::debug!("{} not ready yet: {}", self.address(), e);
                    last_err = Some(e);
                }
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(not_ready(last_err, timeout));
                    }
                    tokio::time::sleep(ival.min(deadline - now)).await;
                    // No new attempt once the deadline has passed.
                    if Instant::now() >= deadline {
                        return Err(not_ready(last_err, timeout));
                    }
                }
                None => tokio::time::sleep(ival).await,
            }

            if ival <= MAX_BACKOFF {
                ival *= 2;
            }
        }
    }

    async fn open<P>(&self, version: Version, method: &str, params: &P) -> Result<Reader, ClientError>
    where
        P: Serialize + ?Sized,
    {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let params = serde_json::to_value(params).map_err(|e| ClientError::Encode(e.to_string()))?;
        let req = Request::new(version, id, method, params);
        let body = serde_json::to_vec(&req).map_err(|e| ClientError::Encode(e.to_string()))?;

        let stream = self.transport.send_request(body).await?;
        Ok(Reader::new(id, stream))
    }
}

fn decode_result<R: DeserializeOwned>(value: Value) -> Result<R, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
}

fn not_ready(last_err: Option<ClientError>, timeout: Duration) -> ClientError {
    let last = last_err
        .unwrap_or_else(|| ClientError::Transport(format!("no answer within {:?}", timeout)));
    ClientError::NotReady(Box::new(last))
}

type BodyReader = StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>;

/// Splits a response body into lines
struct LineDecoder {
    lines: Option<FramedRead<BodyReader, LinesCodec>>,
}

impl LineDecoder {
    fn new(stream: ByteStream) -> Self {
        Self::with_max_length(stream, MAX_LINE_LENGTH)
    }

    fn with_max_length(stream: ByteStream, max_length: usize) -> Self {
        let body = stream.map(|chunk| chunk.map_err(std::io::Error::other)).boxed();
        Self {
            lines: Some(FramedRead::new(
                StreamReader::new(body),
                LinesCodec::new_with_max_length(max_length),
            )),
        }
    }

    /// Next non-blank line, without its terminator. `None` at end of stream.
    async fn next_line(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            let Some(lines) = self.lines.as_mut() else {
                return Ok(None);
            };
            match lines.next().await {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => return Ok(Some(line)),
                Some(Err(e)) => {
                    self.release();
                    return Err(line_error(e));
                }
                None => {
                    self.release();
                    return Ok(None);
                }
            }
        }
    }

    fn release(&mut self) {
        self.lines = None;
    }
}

fn line_error(err: LinesCodecError) -> ClientError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            ClientError::Decode("response line exceeds the length limit".to_string())
        }
        LinesCodecError::Io(e) => {
            // Transport failures travel through the reader wrapped in io::Error.
            let transport = e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<ClientError>())
                .cloned();
            transport.unwrap_or_else(|| ClientError::from(e))
        }
    }
}

/// Results of one streaming call
///
/// After an error or the completion marker the reader is finished: further
/// calls to [`Reader::next`] keep returning the same outcome.
pub struct Reader {
    id: u64,
    lines: LineDecoder,
    done: bool,
    terminal: Option<ClientError>,
}

impl Reader {
    fn new(id: u64, stream: ByteStream) -> Self {
        Self {
            id,
            lines: LineDecoder::new(stream),
            done: false,
            terminal: None,
        }
    }

    /// Request id this reader answers
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Decode the next result. `Ok(None)` once the stream has completed.
    pub async fn next<R: DeserializeOwned>(&mut self) -> Result<Option<R>, ClientError> {
        match self.next_value().await? {
            Some(value) => decode_result(value).map(Some),
            None => Ok(None),
        }
    }

    /// Drain every remaining result.
    pub async fn collect<R: DeserializeOwned>(mut self) -> Result<Vec<R>, ClientError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Discard anything still unread and release the transport.
    pub fn close(&mut self) {
        self.lines.release();
        if self.terminal.is_none() {
            self.done = true;
        }
    }

    async fn next_value(&mut self) -> Result<Option<Value>, ClientError> {
        if let Some(err) = &self.terminal {
            return Err(err.clone());
        }
        if self.done {
            return Ok(None);
        }

        let line = match self.lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                return Err(self.fail(ClientError::Decode(
                    "response stream ended before completion".to_string(),
                )))
            }
            Err(e) => return Err(self.fail(e)),
        };

        let resp: Response = match serde_json::from_str(&line) {
            Ok(resp) => resp,
            Err(e) => return Err(self.fail(ClientError::Decode(e.to_string()))),
        };

        if let Some(id) = &resp.id {
            if id.as_u64() != Some(self.id) {
                return Err(self.fail(ClientError::Decode(format!(
                    "response id {} does not match request id {}",
                    id, self.id
                ))));
            }
        }

        if let Some(err) = resp.error {
            return Err(self.fail(ClientError::Remote(err)));
        }
        if resp.success {
            self.close();
            return Ok(None);
        }

        // A single-version answer carries the whole exchange.
        if resp.version != Version::Streaming {
            self.close();
        }
        Ok(Some(resp.result.unwrap_or(Value::Null)))
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        self.lines.release();
        self.terminal = Some(err.clone());
        err
    }
}

/// Writes streaming requests to an endpoint served over pipes
pub struct PipeWriter<W> {
    out: W,
    next_id: u64,
}

impl<W: AsyncWrite + Unpin> PipeWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, next_id: 0 }
    }

    /// Send one request and return its id.
    pub async fn send<P>(&mut self, method: &str, params: &P) -> Result<u64, ClientError>
    where
        P: Serialize + ?Sized,
    {
        self.next_id += 1;
        let params = serde_json::to_value(params).map_err(|e| ClientError::Encode(e.to_string()))?;
        let req = Request::new(Version::Streaming, self.next_id, method, params);

        let mut line = serde_json::to_vec(&req).map_err(|e| ClientError::Encode(e.to_string()))?;
        line.push(b'\n');
        self.out.write_all(&line).await?;
        self.out.flush().await?;
        Ok(self.next_id)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Reads responses written by an endpoint served over pipes
pub struct PipeReader<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> PipeReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            lines: input.lines(),
        }
    }

    /// Hand every response to `f` as `(id, result, error, success)` until the
    /// input ends or `f` returns `false`.
    ///
    /// Ids are passed through as sent, number or string. A response without
    /// an id (a parse error from the endpoint) is reported with `null`.
    pub async fn receive<F>(&mut self, mut f: F) -> Result<(), ClientError>
    where
        F: FnMut(Value, Option<Value>, Option<RpcError>, bool) -> bool,
    {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let resp: Response =
                serde_json::from_str(&line).map_err(|e| ClientError::Decode(e.to_string()))?;
            check_id(resp.id.as_ref())
                .map_err(|_| ClientError::Decode(format!("invalid response id: {:?}", resp.id)))?;

            if !f(resp.id.unwrap_or(Value::Null), resp.result, resp.error, resp.success) {
                break;
            }
        }
        Ok(())
    }
}
