// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end SDK tests against an in-process itemwire-core.
//!
//! Each test spins up its own server on a throwaway SQLite database and
//! drives it through the public SDK surface only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use itemwire_core::handlers::HandlerState;
use itemwire_core::outbox::{DispatcherConfig, OutboxDispatcher};
use itemwire_core::persistence::SqlitePersistence;
use itemwire_core::rate_limit::{RateLimiterRegistry, SlidingWindowConfig, TokenBucketConfig};
use itemwire_core::server::{ClientRegistry, ItemServerState, run_item_server};
use itemwire_sdk::{ItemEvent, ItemwireSdk, ResilienceConfig, SdkConfig, SdkError};

// ============================================================================
// Test Server
// ============================================================================

/// An in-process itemwire-core instance for SDK tests.
struct TestServer {
    addr: SocketAddr,
    state: Arc<ItemServerState>,
    server_task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    _data_dir: TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with_limits(SlidingWindowConfig::default(), TokenBucketConfig::default())
            .await
    }

    async fn spawn_with_limits(window: SlidingWindowConfig, bucket: TokenBucketConfig) -> Self {
        let data_dir = TempDir::new().expect("Failed to create scratch dir");
        let db_path = data_dir.path().join("itemwire-sdk-test.db");
        let persistence = Arc::new(
            SqlitePersistence::from_path(&db_path)
                .await
                .expect("Failed to open SQLite database"),
        );

        let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind probe");
        let addr = probe.local_addr().expect("Failed to read probe addr");
        drop(probe);

        let registry = Arc::new(ClientRegistry::new());
        let state = Arc::new(ItemServerState::new(
            HandlerState::new(persistence.clone()),
            RateLimiterRegistry::new(window),
            registry.clone(),
            bucket,
        ));

        let server_task = spawn_item_server(addr, state.clone());

        // Fast outbox poll so event tests do not sit around waiting
        let dispatcher = OutboxDispatcher::with_config(
            persistence,
            registry,
            DispatcherConfig {
                poll_interval: Duration::from_millis(25),
                ..Default::default()
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(dispatcher.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            addr,
            state,
            server_task,
            shutdown_tx,
            _data_dir: data_dir,
        }
    }

    /// Kill the server without telling connected clients. From the SDK's
    /// point of view the connection simply goes silent.
    async fn kill(&mut self) {
        self.server_task.abort();
        let _ = (&mut self.server_task).await;
    }

    /// Start a fresh server on the same address and database.
    async fn respawn(&mut self) {
        self.server_task = spawn_item_server(self.addr, self.state.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    fn sdk(&self, principal_id: &str, username: &str) -> ItemwireSdk {
        self.sdk_with(principal_id, username, |config| config)
    }

    fn sdk_with(
        &self,
        principal_id: &str,
        username: &str,
        tune: impl FnOnce(SdkConfig) -> SdkConfig,
    ) -> ItemwireSdk {
        let config = SdkConfig::new(principal_id, username)
            .with_server_addr(self.addr)
            .with_skip_cert_verification(true);
        ItemwireSdk::new(tune(config)).expect("Failed to create SDK")
    }

    fn shutdown(&self) {
        self.shutdown_tx.send(true).ok();
    }
}

fn spawn_item_server(addr: SocketAddr, state: Arc<ItemServerState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run_item_server(addr, state).await {
            eprintln!("Test item server error: {}", e);
        }
    })
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_sdk_full_lifecycle() {
    let server = TestServer::spawn().await;
    let sdk = server.sdk("lifecycle-principal", "Lifecycle");

    sdk.ensure_connected().await.expect("Failed to connect");
    assert!(sdk.is_connected().await);
    assert!(sdk.connection_id().await.is_some());

    let health = sdk.health_check().await.expect("Health check failed");
    assert!(health.is_healthy(), "fresh server should be healthy: {:?}", health);
    assert!(!health.version.is_empty());

    let item = sdk
        .create_item("Laptop", "Dev machine")
        .await
        .expect("Create failed");
    assert_eq!(item.name, "Laptop");
    assert_eq!(item.description, "Dev machine");
    assert_eq!(item.created_by, "lifecycle-principal");

    let fetched = sdk.get_item(&item.id).await.expect("Get failed");
    assert_eq!(fetched.as_ref().map(|i| i.id.as_str()), Some(item.id.as_str()));

    let updated = sdk
        .update_item(&item.id, "Laptop Pro", "Upgraded dev machine")
        .await
        .expect("Update failed");
    assert_eq!(updated.id, item.id);
    assert_eq!(updated.name, "Laptop Pro");

    let items = sdk.list_items().await.expect("List failed");
    assert_eq!(items.len(), 1);

    sdk.notify_presence(true).await.expect("Presence failed");

    sdk.delete_item(&item.id).await.expect("Delete failed");
    let gone = sdk.get_item(&item.id).await.expect("Get after delete failed");
    assert!(gone.is_none());

    sdk.close().await;
    assert!(!sdk.is_connected().await);
    server.shutdown();
}

#[tokio::test]
async fn test_sdk_get_missing_item_is_none() {
    let server = TestServer::spawn().await;
    let sdk = server.sdk("missing-principal", "Missy");
    sdk.connect().await.expect("Failed to connect");

    let missing = sdk.get_item("no-such-id").await.expect("Get failed");
    assert!(missing.is_none());

    server.shutdown();
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn test_sdk_auto_keys_never_collide() {
    let server = TestServer::spawn().await;
    let sdk = server.sdk("auto-key-principal", "Auto");
    sdk.connect().await.expect("Failed to connect");

    // Identical payloads with auto-generated keys are distinct requests
    let first = sdk.create_item("Same name", "Same desc").await.expect("Create failed");
    let second = sdk.create_item("Same name", "Same desc").await.expect("Create failed");
    assert_ne!(first.id, second.id);

    let items = sdk.list_items().await.expect("List failed");
    assert_eq!(items.len(), 2);

    server.shutdown();
}

#[tokio::test]
async fn test_sdk_explicit_key_replays() {
    let server = TestServer::spawn().await;
    let sdk = server.sdk("replay-principal", "Replay");
    sdk.connect().await.expect("Failed to connect");

    let first = sdk
        .create_item_with_key("Keyboard", "Mechanical", "create-kb-1")
        .await
        .expect("Create failed");
    let replayed = sdk
        .create_item_with_key("Keyboard", "Mechanical", "create-kb-1")
        .await
        .expect("Replay failed");

    assert_eq!(first.id, replayed.id);
    let items = sdk.list_items().await.expect("List failed");
    assert_eq!(items.len(), 1);

    server.shutdown();
}

#[tokio::test]
async fn test_sdk_concurrent_creates() {
    let server = TestServer::spawn().await;
    let sdk = server.sdk("concurrent-principal", "Concurrent");
    sdk.connect().await.expect("Failed to connect");

    let creates = (0..10).map(|i| {
        let sdk = &sdk;
        async move {
            sdk.create_item(&format!("Item {}", i), "concurrent")
                .await
                .expect("Create failed")
        }
    });
    let created = futures::future::join_all(creates).await;

    let mut ids: Vec<_> = created.iter().map(|i| i.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10, "every create must yield a distinct item");

    let items = sdk.list_items().await.expect("List failed");
    assert_eq!(items.len(), 10);

    server.shutdown();
}

// ============================================================================
// Events
// ============================================================================

async fn next_item_event(events: &mut tokio::sync::broadcast::Receiver<ItemEvent>) -> ItemEvent {
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("Timed out waiting for event")
            .expect("Event channel closed");
        // Presence chatter from our own hello can interleave with item events
        if !matches!(event, ItemEvent::Presence(_)) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_sdk_event_stream() {
    let server = TestServer::spawn().await;
    let sdk = server.sdk("event-principal", "Eve");
    sdk.connect().await.expect("Failed to connect");

    let mut events = sdk.events();

    let item = sdk.create_item("Tracked", "watch me").await.expect("Create failed");
    match next_item_event(&mut events).await {
        ItemEvent::Created(created) => {
            assert_eq!(created.id, item.id);
            assert_eq!(created.name, "Tracked");
        }
        other => panic!("Expected Created event, got {:?}", other),
    }

    sdk.update_item(&item.id, "Tracked v2", "still watching")
        .await
        .expect("Update failed");
    match next_item_event(&mut events).await {
        ItemEvent::Updated(updated) => assert_eq!(updated.name, "Tracked v2"),
        other => panic!("Expected Updated event, got {:?}", other),
    }

    sdk.delete_item(&item.id).await.expect("Delete failed");
    match next_item_event(&mut events).await {
        ItemEvent::Deleted { item_id } => assert_eq!(item_id, item.id),
        other => panic!("Expected Deleted event, got {:?}", other),
    }

    server.shutdown();
}

#[tokio::test]
async fn test_sdk_two_clients_see_each_other() {
    let server = TestServer::spawn().await;
    let writer = server.sdk("writer-principal", "Writer");
    let watcher = server.sdk("watcher-principal", "Watcher");
    writer.connect().await.expect("Writer failed to connect");
    watcher.connect().await.expect("Watcher failed to connect");

    let mut events = watcher.events();
    let item = writer.create_item("Shared", "seen by both").await.expect("Create failed");

    match next_item_event(&mut events).await {
        ItemEvent::Created(created) => assert_eq!(created.id, item.id),
        other => panic!("Expected Created event, got {:?}", other),
    }

    server.shutdown();
}

// ============================================================================
// Error classification
// ============================================================================

#[tokio::test]
async fn test_sdk_validation_error_is_not_retried() {
    let server = TestServer::spawn().await;
    let sdk = server.sdk("validation-principal", "Val");
    sdk.connect().await.expect("Failed to connect");

    let start = Instant::now();
    let result = sdk.create_item("", "no name").await;
    match result {
        Err(SdkError::Server { code, .. }) => assert_eq!(code, "VALIDATION_ERROR"),
        other => panic!("Expected validation error, got {:?}", other),
    }
    // A retried call would burn at least one full backoff delay
    assert!(start.elapsed() < Duration::from_millis(500));

    // The failure was logical, not transport, so the pipeline still works
    let item = sdk.create_item("Named", "fine").await.expect("Create failed");
    assert_eq!(item.name, "Named");

    server.shutdown();
}

#[tokio::test]
async fn test_sdk_rate_limited_surfaces_without_retry() {
    // One token, refilled far too slowly to matter within the test
    let bucket = TokenBucketConfig {
        capacity: 1,
        refill_amount: 1,
        refill_interval: Duration::from_secs(600),
    };
    let server = TestServer::spawn_with_limits(SlidingWindowConfig::default(), bucket).await;
    let sdk = server.sdk("limited-principal", "Limited");
    sdk.connect().await.expect("Failed to connect");

    let first = sdk.create_item("Only one", "fits").await;
    assert!(first.is_ok(), "first call should consume the only token: {:?}", first);

    let start = Instant::now();
    let error = sdk
        .list_items()
        .await
        .expect_err("second call must be rate limited");
    assert!(error.is_rate_limited());
    match error {
        SdkError::RateLimited(info) => assert!(info.limit > 0),
        other => panic!("Expected rate limited error, got {:?}", other),
    }
    assert!(start.elapsed() < Duration::from_millis(500));

    // Rate limiting must not poison the breaker; admission-exempt calls
    // still go through
    let health = sdk.health_check().await.expect("Health check failed");
    assert!(health.is_healthy());

    server.shutdown();
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test]
async fn test_sdk_survives_server_restart() {
    let mut server = TestServer::spawn().await;
    let sdk = server.sdk_with("restart-principal", "Restarter", |config| {
        config
            .with_connect_timeout_ms(600)
            .with_request_timeout_ms(600)
            .with_resilience(ResilienceConfig {
                max_retries: 2,
                base_backoff: Duration::from_millis(100),
                breaker_min_calls: 20,
                ..Default::default()
            })
    });
    sdk.connect().await.expect("Failed to connect");

    let item = sdk.create_item("Durable", "outlives the server").await.expect("Create failed");

    // Kill the server out from under the SDK. The connection goes silent,
    // so the next call times out, drops the wedged connection, and the
    // redial fails until the server is back.
    server.kill().await;
    let while_down = sdk.list_items().await;
    assert!(while_down.is_err(), "calls must fail while the server is down");

    tokio::time::sleep(Duration::from_millis(400)).await;
    server.respawn().await;

    let fetched = sdk
        .get_item(&item.id)
        .await
        .expect("Get after restart failed");
    assert_eq!(
        fetched.map(|i| i.id),
        Some(item.id.clone()),
        "item must survive the restart"
    );

    // A fresh hello happened on the way back in
    assert!(sdk.is_connected().await);

    server.shutdown();
}

#[tokio::test]
async fn test_sdk_connect_is_idempotent() {
    let server = TestServer::spawn().await;
    let sdk = server.sdk("idempotent-connect", "Ida");

    sdk.connect().await.expect("First connect failed");
    let first_id = sdk.connection_id().await;
    sdk.connect().await.expect("Second connect failed");

    // Reconnecting over a live connection re-greets but does not redial
    assert!(sdk.is_connected().await);
    assert!(first_id.is_some());

    server.shutdown();
}
