//! Analyzer directory and health probing
//!
//! The directory maps every analyzer address to the categories it declared
//! through `/AnalyzerService/GetCategory`. It is rebuilt for each driver run
//! and is read-only once built.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::RwLock;

use crate::analysis::{GetCategoryRequest, GetCategoryResponse, GET_CATEGORY_METHOD};
use crate::error::{Result, ShoalError};
use crate::rpc::{Client, ClientError};

/// Clients keyed by analyzer address, created on first use
#[derive(Debug, Default)]
pub struct ClientPool {
    clients: RwLock<HashMap<String, Arc<Client>>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The client for `address`, creating an HTTP client if there is none yet.
    pub fn get(&self, address: &str) -> std::result::Result<Arc<Client>, ClientError> {
        let key = normalize_address(address);
        if let Some(client) = self.clients.read().get(key) {
            return Ok(Arc::clone(client));
        }

        let mut clients = self.clients.write();
        if let Some(client) = clients.get(key) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(Client::http(key)?);
        clients.insert(key.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Use `client` for `address` from now on.
    pub fn insert(&self, address: &str, client: Client) {
        self.clients
            .write()
            .insert(normalize_address(address).to_string(), Arc::new(client));
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `http://host:port/` and `host:port` name the same analyzer.
fn normalize_address(address: &str) -> &str {
    let address = address.trim();
    address
        .strip_prefix("http://")
        .unwrap_or(address)
        .trim_end_matches('/')
}

/// Address -> declared categories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzerDirectory {
    categories: BTreeMap<String, BTreeSet<String>>,
}

impl AnalyzerDirectory {
    /// Ask every analyzer for its categories, concurrently.
    ///
    /// An analyzer that cannot be reached, or answers with an error, is
    /// listed with no categories.
    pub async fn discover(pool: &ClientPool, addresses: &[String]) -> Self {
        let lookups = addresses.iter().map(|address| async move {
            let categories = fetch_categories(pool, address).await;
            (address.clone(), categories)
        });
        let categories = join_all(lookups).await.into_iter().collect();

        Self { categories }
    }

    pub fn from_map(categories: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self { categories }
    }

    pub fn categories(&self, address: &str) -> Option<&BTreeSet<String>> {
        self.categories.get(address)
    }

    /// `(address, categories)` in address order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.categories.iter().map(|(a, c)| (a.as_str(), c))
    }

    /// True if some analyzer declared `category`
    pub fn serves(&self, category: &str) -> bool {
        self.categories.values().any(|c| c.contains(category))
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

async fn fetch_categories(pool: &ClientPool, address: &str) -> BTreeSet<String> {
    let client = match pool.get(address) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Could not create client for {}: {}", address, e);
            return BTreeSet::new();
        }
    };

    match client
        .call::<_, GetCategoryResponse>(GET_CATEGORY_METHOD, &GetCategoryRequest {})
        .await
    {
        Ok(resp) => {
            tracing::debug!("{} declares {:?}", address, resp.category);
            resp.category.into_iter().collect()
        }
        Err(e) => {
            tracing::warn!("Could not get categories from {}: {}", address, e);
            BTreeSet::new()
        }
    }
}

// ============================================================================
// Health
// ============================================================================

/// Wait for every analyzer to answer, concurrently. A zero `timeout` waits
/// forever.
pub async fn probe_all(
    pool: &ClientPool,
    addresses: &[String],
    timeout: Duration,
) -> BTreeMap<String, std::result::Result<(), ClientError>> {
    let probes = addresses.iter().map(|address| async move {
        let outcome = match pool.get(address) {
            Ok(client) => client.wait_until_ready(timeout).await,
            Err(e) => Err(e),
        };
        (address.clone(), outcome)
    });
    join_all(probes).await.into_iter().collect()
}

/// Succeeds only if every analyzer became ready within `timeout`. Otherwise
/// every unhealthy analyzer is reported, not just the first.
pub async fn wait_for_all(pool: &ClientPool, addresses: &[String], timeout: Duration) -> Result<()> {
    let failures: Vec<(String, String)> = probe_all(pool, addresses, timeout)
        .await
        .into_iter()
        .filter_map(|(address, outcome)| outcome.err().map(|e| (address, e.to_string())))
        .collect();

    if failures.is_empty() {
        tracing::info!("All {} analyzer(s) are ready", addresses.len());
        return Ok(());
    }
    for (address, err) in &failures {
        tracing::warn!("Analyzer {} is not healthy: {}", address, err);
    }
    Err(ShoalError::Unhealthy { failures })
}
