// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for itemwire-core E2E tests.
//!
//! Provides TestContext for setting up database, server, dispatcher, and
//! client connections. Tests run against a throwaway SQLite file, so no
//! external services are needed.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use itemwire_core::handlers::HandlerState;
use itemwire_core::outbox::{DispatcherConfig, OutboxDispatcher};
use itemwire_core::persistence::SqlitePersistence;
use itemwire_core::rate_limit::{RateLimiterRegistry, SlidingWindowConfig, TokenBucketConfig};
use itemwire_core::server::{ClientRegistry, ItemServerState};
use itemwire_protocol::client::{ItemwireClient, ItemwireClientConfig};
use itemwire_protocol::wire;

/// Test context that manages database, server, and client for E2E tests.
pub struct TestContext {
    pub persistence: Arc<SqlitePersistence>,
    pub client: ItemwireClient,
    pub server_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    _data_dir: TempDir,
}

impl TestContext {
    /// Create a test context with default rate limits (roomy enough that
    /// ordinary tests never hit them).
    pub async fn new() -> Self {
        Self::with_limits(SlidingWindowConfig::default(), TokenBucketConfig::default()).await
    }

    /// Create a test context with explicit admission limits.
    ///
    /// This sets up:
    /// 1. A SQLite database in a scratch directory (migrations applied)
    /// 2. The item QUIC server on an available port
    /// 3. An outbox dispatcher polling fast enough for event tests
    /// 4. A QUIC client pointed at the server
    pub async fn with_limits(window: SlidingWindowConfig, bucket: TokenBucketConfig) -> Self {
        // 1. Open a throwaway SQLite database
        let data_dir = TempDir::new().expect("Failed to create scratch dir");
        let db_path = data_dir.path().join("itemwire-test.db");
        let persistence = Arc::new(
            SqlitePersistence::from_path(&db_path)
                .await
                .expect("Failed to open SQLite database"),
        );

        // 2. Find an available port
        let listener =
            std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind probe socket");
        let server_addr = listener.local_addr().expect("Failed to read probe addr");
        drop(listener);

        // 3. Build server state
        let registry = Arc::new(ClientRegistry::new());
        let state = Arc::new(ItemServerState::new(
            HandlerState::new(persistence.clone()),
            RateLimiterRegistry::new(window),
            registry.clone(),
            bucket,
        ));

        // 4. Start item server in background
        let server_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = itemwire_core::server::run_item_server(server_addr, server_state).await
            {
                eprintln!("Test item server error: {}", e);
            }
        });

        // 5. Start the outbox dispatcher with a fast poll so event tests
        //    do not sit around waiting
        let dispatcher = OutboxDispatcher::with_config(
            persistence.clone(),
            registry,
            DispatcherConfig {
                poll_interval: Duration::from_millis(25),
                ..Default::default()
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(dispatcher.run(shutdown_rx));

        // 6. Wait for the server to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 7. Create a client
        let client = new_client_for(server_addr);

        Self {
            persistence,
            client,
            server_addr,
            shutdown_tx,
            _data_dir: data_dir,
        }
    }

    /// Create another client against the same server (a separate QUIC
    /// connection, e.g. an event subscriber).
    pub fn new_client(&self) -> ItemwireClient {
        new_client_for(self.server_addr)
    }

    /// Connect a client and bind it to a principal.
    pub async fn hello_as(&self, client: &ItemwireClient, principal_id: &str, username: &str) {
        client.connect().await.expect("Failed to connect");
        let resp: wire::RpcResponse = client
            .request(&wrap_hello(wire::HelloRequest {
                principal_id: principal_id.to_string(),
                username: username.to_string(),
            }))
            .await
            .expect("Failed to send hello");
        match resp.response {
            Some(wire::rpc_response::Response::Hello(r)) => {
                assert!(!r.connection_id.is_empty(), "Hello returned no connection id");
            }
            other => panic!("Unexpected hello response: {:?}", other),
        }
    }

    /// Signal the dispatcher to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send(true).ok();
    }
}

fn new_client_for(server_addr: SocketAddr) -> ItemwireClient {
    ItemwireClient::new(ItemwireClientConfig {
        server_addr,
        dangerous_skip_cert_verification: true,
        ..Default::default()
    })
    .expect("Failed to create client")
}

// ============================================================================
// Request Wrapping Helpers
// ============================================================================

pub fn wrap_hello(req: wire::HelloRequest) -> wire::RpcRequest {
    wire::RpcRequest {
        request: Some(wire::rpc_request::Request::Hello(req)),
    }
}

pub fn wrap_create(req: wire::CreateItemRequest) -> wire::RpcRequest {
    wire::RpcRequest {
        request: Some(wire::rpc_request::Request::CreateItem(req)),
    }
}

pub fn wrap_update(req: wire::UpdateItemRequest) -> wire::RpcRequest {
    wire::RpcRequest {
        request: Some(wire::rpc_request::Request::UpdateItem(req)),
    }
}

pub fn wrap_delete(req: wire::DeleteItemRequest) -> wire::RpcRequest {
    wire::RpcRequest {
        request: Some(wire::rpc_request::Request::DeleteItem(req)),
    }
}

pub fn wrap_get(req: wire::GetItemRequest) -> wire::RpcRequest {
    wire::RpcRequest {
        request: Some(wire::rpc_request::Request::GetItem(req)),
    }
}

pub fn wrap_list(req: wire::ListItemsRequest) -> wire::RpcRequest {
    wire::RpcRequest {
        request: Some(wire::rpc_request::Request::ListItems(req)),
    }
}

pub fn wrap_presence(req: wire::NotifyPresenceRequest) -> wire::RpcRequest {
    wire::RpcRequest {
        request: Some(wire::rpc_request::Request::NotifyPresence(req)),
    }
}

pub fn wrap_health_check(req: wire::HealthCheckRequest) -> wire::RpcRequest {
    wire::RpcRequest {
        request: Some(wire::rpc_request::Request::HealthCheck(req)),
    }
}
