//! Endpoint dispatcher
//!
//! An [`Endpoint`] is a set of services that answers wire requests. Each
//! request goes through `decode -> validate -> resolve -> invoke -> emit` and
//! always ends in exactly one terminal outcome: a result, a stream of results
//! followed by a success marker, or a single error.
//!
//! Every endpoint answers `/ServerInfo/List` with a description of its
//! registered services.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::post;
use axum::Router;
use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tower_http::compression::CompressionLayer;

use crate::rpc::protocol::{check_id, parse_method_path, Response, RpcError, Request, Version};
use crate::rpc::service::{
    Context, Method, MethodInfo, RegistryError, Service, ServiceInfo, LIST_METHOD,
    SERVER_INFO_SERVICE,
};

/// Results a streaming handler may queue before it is suspended
const STREAM_BUFFER: usize = 64;

/// In-memory pipe between a request task and its HTTP response body
pub(crate) const PIPE_CAPACITY: usize = 64 * 1024;

/// Lookup failures for `/Service/Method`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no such service")]
    NoSuchService,
    #[error("no such method")]
    NoSuchMethod,
}

/// Failures writing responses. These are contract violations or I/O errors
/// on the outgoing stream; they never reach the caller as protocol errors.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("attempt to write multiple results in non-streaming protocol")]
    MultipleResults,

    #[error("attempt to write result after stream is complete")]
    AfterCompletion,

    #[error("error encoding response: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("error writing response: {0}")]
    Io(#[from] std::io::Error),
}

/// A collection of services dispatching wire requests
#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    services: Arc<Vec<Service>>,
}

impl Endpoint {
    pub fn new(services: Vec<Service>) -> Result<Self, RegistryError> {
        for (i, service) in services.iter().enumerate() {
            if service.name() == SERVER_INFO_SERVICE {
                return Err(RegistryError::ReservedName {
                    name: service.name().to_string(),
                });
            }
            if services[..i].iter().any(|s| s.name() == service.name()) {
                return Err(RegistryError::DuplicateService {
                    name: service.name().to_string(),
                });
            }
        }
        Ok(Self {
            services: Arc::new(services),
        })
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Find the method registered as `/service_name/method_name`.
    ///
    /// The `ServerInfo` meta-service is answered by the dispatcher itself and
    /// is not visible here.
    pub fn resolve(&self, service_name: &str, method_name: &str) -> Result<&Method, ResolveError> {
        let service = self
            .services
            .iter()
            .find(|s| s.name() == service_name)
            .ok_or(ResolveError::NoSuchService)?;
        service.method(method_name).ok_or(ResolveError::NoSuchMethod)
    }

    /// Every registered service, followed by the meta-service
    pub fn service_list(&self) -> Vec<ServiceInfo> {
        let mut list: Vec<ServiceInfo> = self.services.iter().map(Service::info).collect();
        list.push(ServiceInfo {
            name: SERVER_INFO_SERVICE.to_string(),
            methods: vec![MethodInfo {
                name: LIST_METHOD.to_string(),
                params: Vec::new(),
                stream: false,
            }],
        });
        list
    }

    /// Answer one encoded request, writing newline-delimited responses to `out`.
    ///
    /// Protocol and handler failures are reported to the caller as error
    /// responses and return `Ok`. An `Err` means the responses could not be
    /// written.
    pub async fn handle_request<W>(&self, ctx: Context, raw: &[u8], out: &mut W) -> Result<(), WriterError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut wr = ResponseWriter::new(out);

        // Decode
        let req: Request = match serde_json::from_slice(raw) {
            Ok(req) => req,
            Err(e) => {
                return wr
                    .error(RpcError::parsing(format!("error decoding JSON: {}", e)))
                    .await;
            }
        };
        wr.version = req.version.clone();

        // Validate. An unusable id is not echoed back.
        if let Err(e) = check_id(req.id.as_ref()) {
            return wr.error(e).await;
        }
        wr.id = req.id.clone();
        if !req.version.is_known() {
            return wr
                .error(RpcError::invalid_request(format!(
                    "invalid protocol version: {:?}",
                    req.version.as_str()
                )))
                .await;
        }

        // Resolve
        let Some((service_name, method_name)) = parse_method_path(&req.method) else {
            return wr
                .error(RpcError::method_not_found(format!(
                    "Unknown method name format: {:?}",
                    req.method
                )))
                .await;
        };

        if service_name == SERVER_INFO_SERVICE {
            wr.version = Version::Single;
            if method_name != LIST_METHOD {
                return wr
                    .error(RpcError::method_not_found(format!(
                        "{:?} method not found in builtin service {:?}",
                        method_name, SERVER_INFO_SERVICE
                    )))
                    .await;
            }
            let list = serde_json::to_value(self.service_list())?;
            return wr.result(list).await;
        }

        let method = match self.resolve(service_name, method_name) {
            Ok(method) => method,
            Err(_) => {
                return wr
                    .error(RpcError::method_not_found(format!(
                        "Method not found: /{}/{}",
                        service_name, method_name
                    )))
                    .await;
            }
        };

        if !method.stream {
            wr.version = Version::Single;
        }

        tracing::debug!(
            method = %req.method,
            version = %wr.version,
            "dispatching request"
        );

        self.invoke(method, ctx, req.params, &mut wr).await
    }

    async fn invoke<W>(
        &self,
        method: &Method,
        ctx: Context,
        params: Option<Value>,
        wr: &mut ResponseWriter<'_, W>,
    ) -> Result<(), WriterError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let streaming = wr.version == Version::Streaming;
        let (tx, mut rx) = mpsc::channel::<Value>(STREAM_BUFFER);

        let invocation = AssertUnwindSafe(method.invoke(ctx, params, tx)).catch_unwind();
        tokio::pin!(invocation);

        // Single-version outputs; a streaming method called this way answers
        // with one array of everything it emitted.
        let mut buffered: Vec<Value> = Vec::new();
        let mut emit_failure: Option<WriterError> = None;

        let outcome = loop {
            tokio::select! {
                biased;
                Some(value) = rx.recv() => {
                    emit(wr, streaming, value, &mut buffered, &mut emit_failure).await;
                }
                outcome = &mut invocation => break outcome,
            }
        };
        rx.close();
        while let Ok(value) = rx.try_recv() {
            emit(wr, streaming, value, &mut buffered, &mut emit_failure).await;
        }

        if let Some(e) = emit_failure {
            tracing::error!("failed to stream result for {}: {}", method.name, e);
            let _ = wr.error(RpcError::internal(e.to_string())).await;
            return Err(e);
        }

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let err = panic_error(panic);
                tracing::warn!("handler for {} panicked: {}", method.name, err.message);
                return wr.error(err).await;
            }
        };

        if let Err(err) = result {
            return wr.error(handler_error(err)).await;
        }

        match wr.version {
            Version::Streaming => wr.success().await,
            _ if method.stream => wr.result(Value::Array(buffered)).await,
            _ => match (buffered.pop(), buffered.is_empty()) {
                (Some(value), true) => wr.result(value).await,
                _ => {
                    tracing::error!("non-singleton result for non-stream method {}", method.name);
                    wr.error(RpcError::internal(format!(
                        "method {} did not produce exactly one result",
                        method.name
                    )))
                    .await
                }
            },
        }
    }

    /// Serve newline-delimited requests from `reader` until EOF, answering on
    /// `writer`. Blank lines are skipped.
    pub async fn serve_pipes<R, W>(&self, ctx: Context, reader: R, mut writer: W) -> Result<(), WriterError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            self.handle_request(ctx.clone(), line.as_bytes(), &mut writer)
                .await?;
        }
        Ok(())
    }

    /// HTTP front end: every request is a `POST /` carrying one encoded request.
    /// Responses are gzip or deflate compressed when the caller accepts it.
    pub fn router(self) -> Router {
        Router::new()
            .route("/", post(handle_http))
            .layer(CompressionLayer::new())
            .with_state(self)
    }

    pub async fn serve_http(self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Serving {} service(s) on http://{}", self.services.len(), addr);
        }
        axum::serve(listener, self.router()).await
    }
}

async fn handle_http(State(endpoint): State<Endpoint>, headers: HeaderMap, body: Bytes) -> HttpResponse {
    let ctx = context_from_headers(&headers);
    let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);

    tokio::spawn(async move {
        if let Err(e) = endpoint.handle_request(ctx, &body, &mut writer).await {
            tracing::warn!("HTTP RPC error: {}", e);
        }
    });

    (
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

fn context_from_headers(headers: &HeaderMap) -> Context {
    let mut ctx = Context::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            ctx.set(name.as_str(), value);
        }
    }
    ctx
}

async fn emit<W>(
    wr: &mut ResponseWriter<'_, W>,
    streaming: bool,
    value: Value,
    buffered: &mut Vec<Value>,
    failure: &mut Option<WriterError>,
) where
    W: AsyncWrite + Unpin + Send,
{
    if !streaming {
        buffered.push(value);
    } else if failure.is_none() {
        if let Err(e) = wr.result(value).await {
            *failure = Some(e);
        }
    }
}

/// Handler errors that carry an `RpcError` are forwarded verbatim.
fn handler_error(err: anyhow::Error) -> RpcError {
    match err.downcast::<RpcError>() {
        Ok(rpc) => rpc,
        Err(err) => RpcError::application(format!("{:#}", err)),
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> RpcError {
    let panic = match panic.downcast::<RpcError>() {
        Ok(rpc) => return *rpc,
        Err(panic) => panic,
    };
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        RpcError::internal(*msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        RpcError::internal(msg.clone())
    } else {
        RpcError::internal("handler panicked")
    }
}

/// Writes the responses of one request and enforces the exchange contract
struct ResponseWriter<'a, W> {
    out: &'a mut W,
    id: Option<Value>,
    version: Version,
    results: usize,
    finished: bool,
}

impl<'a, W: AsyncWrite + Unpin + Send> ResponseWriter<'a, W> {
    fn new(out: &'a mut W) -> Self {
        Self {
            out,
            id: None,
            version: Version::Single,
            results: 0,
            finished: false,
        }
    }

    async fn write(&mut self, mut resp: Response) -> Result<(), WriterError> {
        if self.results > 0 && self.version != Version::Streaming {
            return Err(WriterError::MultipleResults);
        } else if self.finished {
            return Err(WriterError::AfterCompletion);
        }
        resp.id = self.id.clone();
        resp.version = self.version.clone();

        let mut line = serde_json::to_vec(&resp)?;
        line.push(b'\n');
        self.out.write_all(&line).await?;
        self.out.flush().await?;
        self.results += 1;
        Ok(())
    }

    async fn error(&mut self, err: RpcError) -> Result<(), WriterError> {
        self.write(Response::error(err)).await?;
        self.finished = true;
        Ok(())
    }

    async fn result(&mut self, result: Value) -> Result<(), WriterError> {
        self.write(Response::result(result)).await
    }

    async fn success(&mut self) -> Result<(), WriterError> {
        self.write(Response::success()).await?;
        self.finished = true;
        Ok(())
    }
}
