//! Fan-out to analyzer endpoints and fan-in of their results

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{
    all_failures, analyzer_endpoint, assert_empty_response, assert_failure_mentions,
    assert_notes_in_scope, counter_endpoint, counting_client, note_categories, note_paths,
    pool_with, spawn_http, Failing, FileNotes,
};
use shoal::analysis::{
    AnalysisContext, Analyzer, DriverRequest, DriverResponse, Note, RUN_METHOD,
};
use shoal::config::StaticConfigSource;
use shoal::driver::{
    register_shoal_service, AnalyzerDirectory, ClientPool, Driver, DriverOptions,
    DRIVER_SETUP_CATEGORY,
};
use shoal::rpc::{Client, Endpoint};

fn request(categories: &[&str], files: &[&str]) -> DriverRequest {
    DriverRequest {
        triggered_category: categories.iter().map(|s| s.to_string()).collect(),
        event: "manual".to_string(),
        shoal_context: AnalysisContext {
            repo_root: Some(std::env::temp_dir().to_string_lossy().to_string()),
            file_path: files.iter().map(|s| s.to_string()).collect(),
            source_context: None,
        },
    }
}

fn driver(addresses: &[&str], pool: Arc<ClientPool>) -> Driver {
    Driver::new(addresses.iter().map(|s| s.to_string()).collect())
        .with_pool(pool)
        .with_config_source(Arc::new(StaticConfigSource::default()))
}

// ============================================================================
// DISCOVERY
// ============================================================================

#[tokio::test]
async fn test_directory_aggregates_categories() {
    let pool = pool_with(vec![
        (
            "analyzer-a:1",
            Client::local(analyzer_endpoint(vec![
                Arc::new(FileNotes::new("Foo")),
                Arc::new(FileNotes::new("Bar")),
            ])),
        ),
        ("analyzer-b:1", Client::local(counter_endpoint())),
    ]);
    let addresses = vec![
        "analyzer-a:1".to_string(),
        "analyzer-b:1".to_string(),
        "127.0.0.1:1".to_string(),
    ];

    let directory = AnalyzerDirectory::discover(&pool, &addresses).await;

    let mut expected = BTreeMap::new();
    expected.insert(
        "analyzer-a:1".to_string(),
        BTreeSet::from(["Bar".to_string(), "Foo".to_string()]),
    );
    expected.insert("analyzer-b:1".to_string(), BTreeSet::new());
    expected.insert("127.0.0.1:1".to_string(), BTreeSet::new());
    assert_eq!(directory, AnalyzerDirectory::from_map(expected));
    assert!(directory.serves("Foo"));
    assert!(!directory.serves("Baz"));
}

#[tokio::test]
async fn test_discovery_over_http() {
    let address = spawn_http(analyzer_endpoint(vec![Arc::new(FileNotes::new("Lint"))])).await;
    let pool = ClientPool::new();
    let directory = AnalyzerDirectory::discover(&pool, &[address.clone()]).await;

    assert_eq!(
        directory.categories(&address),
        Some(&BTreeSet::from(["Lint".to_string()]))
    );
    assert_eq!(pool.len(), 1);
}

// ============================================================================
// FAN-OUT
// ============================================================================

#[tokio::test]
async fn test_only_desired_categories_run() {
    let foo = FileNotes::new("Foo");
    let bar = FileNotes::new("Bar");
    let (foo_seen, bar_seen) = (foo.seen(), bar.seen());
    let pool = pool_with(vec![(
        "a:1",
        Client::local(analyzer_endpoint(vec![Arc::new(foo), Arc::new(bar)])),
    )]);

    let resp = driver(&["a:1"], pool)
        .run(request(&["Foo", "Baz"], &["dir1/A.cc"]))
        .await;

    assert_eq!(note_categories(&resp), vec!["Foo".to_string()]);
    assert_eq!(note_paths(&resp), vec!["dir1/A.cc".to_string()]);
    assert_notes_in_scope(&resp, &["dir1/A.cc"]);

    let failures = all_failures(&resp);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].category.as_deref(), Some("Baz"));

    assert_eq!(foo_seen.lock().clone(), vec![vec!["dir1/A.cc".to_string()]]);
    assert!(bar_seen.lock().is_empty());
}

#[tokio::test]
async fn test_out_of_scope_notes_dropped() {
    let pool = pool_with(vec![(
        "a:1",
        Client::local(analyzer_endpoint(vec![Arc::new(FileNotes::new("Foo"))])),
    )]);
    let files = ["src/a.rs", "src/b.rs"];

    let resp = driver(&["a:1"], pool).run(request(&["Foo"], &files)).await;

    // FileNotes also reports not/requested.rs and a note without source context
    assert_eq!(note_paths(&resp), vec!["src/a.rs".to_string(), "src/b.rs".to_string()]);
    assert_notes_in_scope(&resp, &files);
    assert_eq!(resp.failures().count(), 0);
}

#[tokio::test]
async fn test_failing_analyzer_is_isolated() {
    let pool = pool_with(vec![
        (
            "a:1",
            Client::local(analyzer_endpoint(vec![Arc::new(Failing::new("Lint"))])),
        ),
        (
            "b:1",
            Client::local(analyzer_endpoint(vec![Arc::new(FileNotes::new("Style"))])),
        ),
    ]);

    let resp = driver(&["a:1", "b:1"], pool)
        .run(request(&["Lint", "Style"], &["main.go"]))
        .await;

    assert_eq!(note_categories(&resp), vec!["Style".to_string()]);
    let failures = all_failures(&resp);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].category.as_deref(), Some("Lint"));
    assert_failure_mentions(&resp, "Lint exploded");
}

#[tokio::test]
async fn test_responses_ordered_by_address() {
    let pool = pool_with(vec![
        (
            "zulu:1",
            Client::local(analyzer_endpoint(vec![Arc::new(FileNotes::new("Z"))])),
        ),
        (
            "alpha:1",
            Client::local(analyzer_endpoint(vec![Arc::new(FileNotes::new("A"))])),
        ),
    ]);

    let resp = driver(&["zulu:1", "alpha:1"], pool)
        .run(request(&["A", "Z"], &["f.txt"]))
        .await;

    let first: Vec<&str> = resp
        .analyze_response
        .iter()
        .map(|r| r.note[0].category.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(first, vec!["A", "Z"]);
}

#[tokio::test]
async fn test_fanout_over_http() {
    let lint = spawn_http(analyzer_endpoint(vec![Arc::new(FileNotes::new("Lint"))])).await;
    let style = spawn_http(analyzer_endpoint(vec![Arc::new(FileNotes::new("Style"))])).await;
    let driver = Driver::new(vec![lint, style])
        .with_config_source(Arc::new(StaticConfigSource::default()));

    driver.wait_for_analyzers().await.unwrap();
    let resp = driver.run(request(&["Lint", "Style"], &["a.py"])).await;

    assert_eq!(
        note_categories(&resp),
        vec!["Lint".to_string(), "Style".to_string()]
    );
    assert_eq!(resp.failures().count(), 0);
}

#[tokio::test]
async fn test_unreachable_analyzer_reported_as_missing_category() {
    let driver = driver(&["127.0.0.1:1"], Arc::new(ClientPool::new()));
    let resp = driver.run(request(&["Lint"], &["a.py"])).await;

    assert_eq!(resp.notes().count(), 0);
    let failures = all_failures(&resp);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].category.as_deref(), Some("Lint"));
    assert_failure_mentions(&resp, "127.0.0.1:1");
}

struct Sleepy;

impl Analyzer for Sleepy {
    fn category(&self) -> &str {
        "Slow"
    }

    fn analyze(&self, _ctx: &AnalysisContext) -> anyhow::Result<Vec<Note>> {
        std::thread::sleep(Duration::from_secs(2));
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_analyze_deadline() {
    let pool = pool_with(vec![("slow:1", Client::local(analyzer_endpoint(vec![Arc::new(Sleepy)])))]);
    let driver = driver(&["slow:1"], pool).with_options(DriverOptions {
        analyze_timeout: Some(Duration::from_millis(100)),
        ..DriverOptions::default()
    });

    let resp = driver.run(request(&["Slow"], &["a"])).await;

    let failures = all_failures(&resp);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].category, None);
    assert_failure_mentions(&resp, "Error from analyzer slow:1");
}

// ============================================================================
// EMPTY RUNS
// ============================================================================

#[tokio::test]
async fn test_no_categories_makes_no_calls() {
    let (client, requests) = counting_client(analyzer_endpoint(vec![Arc::new(FileNotes::new("Foo"))]));
    let pool = pool_with(vec![("a:1", client)]);

    let resp = driver(&["a:1"], pool).run(request(&[], &["a.rs"])).await;

    assert_empty_response(&resp);
    assert_eq!(requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_everything_ignored_makes_no_calls() {
    let (client, requests) = counting_client(analyzer_endpoint(vec![Arc::new(FileNotes::new("Foo"))]));
    let pool = pool_with(vec![("a:1", client)]);
    let config = shoal::config::ShoalConfig::parse(
        "global:\n  ignore: [vendor/, third_party/]\nevents:\n  - event: default\n    categories: [Foo]\n",
    )
    .unwrap();

    let resp = Driver::new(vec!["a:1".to_string()])
        .with_pool(pool)
        .with_config_source(Arc::new(StaticConfigSource {
            config: Some(config),
        }))
        .run(request(&[], &["vendor/x.rs", "third_party/y.rs"]))
        .await;

    assert_empty_response(&resp);
    assert_eq!(requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_repo_root_is_setup_failure() {
    let mut req = request(&["Foo"], &["a.rs"]);
    req.shoal_context.repo_root = None;

    let resp = driver(&[], Arc::new(ClientPool::new())).run(req).await;

    let failures = all_failures(&resp);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].category.as_deref(), Some(DRIVER_SETUP_CATEGORY));
}

// ============================================================================
// DRIVER AS A SERVICE
// ============================================================================

#[tokio::test]
async fn test_run_through_shoal_service() {
    let pool = pool_with(vec![(
        "a:1",
        Client::local(analyzer_endpoint(vec![Arc::new(FileNotes::new("Foo"))])),
    )]);
    let service = register_shoal_service(driver(&["a:1"], pool)).unwrap();
    let address = spawn_http(Endpoint::new(vec![service]).unwrap()).await;

    let client = Client::http(&address).unwrap();
    let resp: DriverResponse = client
        .call(RUN_METHOD, &request(&["Foo"], &["x.c"]))
        .await
        .unwrap();

    assert_eq!(note_paths(&resp), vec!["x.c".to_string()]);
}
