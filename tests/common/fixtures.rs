//! Fake analyzers and endpoints
//!
//! Analyzer endpoints run in-process, either behind a `LocalTransport` or on
//! an HTTP listener bound to `127.0.0.1:0`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::net::TcpListener;

use shoal::analysis::{register_analyzer_service, AnalysisContext, Analyzer, Note, SourceContext};
use shoal::driver::ClientPool;
use shoal::rpc::transport::{ByteStream, LocalTransport, Transport};
use shoal::rpc::{Client, ClientError, Endpoint, Service, Sink};

// ============================================================================
// Analyzers
// ============================================================================

/// Reports one note per file it was asked about, plus two notes the driver
/// must drop: one outside the requested files and one without a source
/// context.
pub struct FileNotes {
    category: String,
    seen: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FileNotes {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// File lists this analyzer received, one entry per call
    pub fn seen(&self) -> Arc<Mutex<Vec<Vec<String>>>> {
        Arc::clone(&self.seen)
    }
}

impl Analyzer for FileNotes {
    fn category(&self) -> &str {
        &self.category
    }

    fn analyze(&self, ctx: &AnalysisContext) -> anyhow::Result<Vec<Note>> {
        self.seen.lock().push(ctx.file_path.clone());

        let mut notes: Vec<Note> = ctx
            .file_path
            .iter()
            .map(|path| {
                Note::at(&self.category, path, Some(SourceContext::default()))
                    .with_description(format!("{} looked at {}", self.category, path))
            })
            .collect();
        notes.push(Note::at(
            &self.category,
            "not/requested.rs",
            Some(SourceContext::default()),
        ));
        notes.push(Note::at(&self.category, "no_context.rs", None));
        Ok(notes)
    }
}

/// Always fails
pub struct Failing {
    category: String,
}

impl Failing {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
        }
    }
}

impl Analyzer for Failing {
    fn category(&self) -> &str {
        &self.category
    }

    fn analyze(&self, _ctx: &AnalysisContext) -> anyhow::Result<Vec<Note>> {
        anyhow::bail!("{} exploded", self.category)
    }
}

// ============================================================================
// Endpoints and clients
// ============================================================================

pub fn analyzer_endpoint(analyzers: Vec<Arc<dyn Analyzer>>) -> Endpoint {
    let service = register_analyzer_service(analyzers).expect("register analyzers");
    Endpoint::new(vec![service]).expect("build endpoint")
}

/// An in-process client that reports `address` as its own
pub fn local_client(address: &str, endpoint: Endpoint) -> Client {
    Client::new(LocalTransport::new(endpoint).with_address(address))
}

/// Counts every request sent through it
pub struct CountingTransport {
    inner: LocalTransport,
    requests: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn send_request(&self, body: Vec<u8>) -> Result<ByteStream, ClientError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.inner.send_request(body).await
    }

    fn address(&self) -> &str {
        self.inner.address()
    }
}

/// An in-process client that counts requests
pub fn counting_client(endpoint: Endpoint) -> (Client, Arc<AtomicUsize>) {
    let requests = Arc::new(AtomicUsize::new(0));
    let client = Client::new(CountingTransport {
        inner: LocalTransport::new(endpoint),
        requests: Arc::clone(&requests),
    });
    (client, requests)
}

/// A pool whose addresses resolve to the given clients
pub fn pool_with(clients: Vec<(&str, Client)>) -> Arc<ClientPool> {
    let pool = ClientPool::new();
    for (address, client) in clients {
        pool.insert(address, client);
    }
    Arc::new(pool)
}

/// Serve `endpoint` over HTTP on an ephemeral port and return its address.
pub async fn spawn_http(endpoint: Endpoint) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local addr").to_string();
    tokio::spawn(endpoint.serve_http(listener));
    address
}

// ============================================================================
// Counter service
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CountParams {
    pub n: u32,
}

pub struct Counter;

/// `/Counter/Up` streams `0..n`; `/Counter/Double` returns `2n`;
/// `/Counter/Fail` always fails.
pub fn counter_service() -> Service {
    let mut service = Service::named("Counter");
    service
        .register(Counter, |r| {
            r.streaming("Up", |_c, _ctx, input: CountParams, out: Sink<u32>| async move {
                for i in 0..input.n {
                    out.send(i).await?;
                }
                Ok(())
            });
            r.unary("Double", |_c, _ctx, input: CountParams| async move { Ok(input.n * 2) });
            r.unary("Fail", |_c, _ctx, _input: CountParams| async move {
                Err::<u32, _>(anyhow::anyhow!("counter failed"))
            });
        })
        .expect("register counter");
    service
}

pub fn counter_endpoint() -> Endpoint {
    Endpoint::new(vec![counter_service()]).expect("build endpoint")
}
