// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Main SDK client for item operations against itemwire-core.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use itemwire_protocol::{ItemwireClient, wire};

use crate::config::SdkConfig;
use crate::error::{Result, SdkError};
use crate::resilience::{CircuitBreaker, reconnect_delay};
use crate::types::{HealthStatus, Item, ItemEvent};

/// Error code the server returns for requests on a connection with no bound
/// principal.
const AUTH_REQUIRED: &str = "AUTH_REQUIRED";

/// Events buffered per subscriber before lagging receivers start losing the
/// oldest ones.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// High-level client for itemwire-core.
///
/// Wraps the low-level QUIC client with session management (hello on connect,
/// re-hello after reconnects), a resilience pipeline (circuit breaker, retries
/// with backoff, per-attempt timeouts), automatic idempotency keys for writes,
/// and a broadcast stream of decoded server-push events.
///
/// # Example
///
/// ```ignore
/// use itemwire_sdk::ItemwireSdk;
///
/// let sdk = ItemwireSdk::localhost("my-principal", "my-name")?;
/// sdk.connect().await?;
///
/// let item = sdk.create_item("Widget", "A fine widget").await?;
/// let all = sdk.list_items().await?;
///
/// let mut events = sdk.events();
/// while let Ok(event) = events.recv().await {
///     println!("server push: {:?}", event);
/// }
/// ```
pub struct ItemwireSdk {
    inner: Arc<SdkInner>,
}

struct SdkInner {
    config: SdkConfig,
    client: ItemwireClient,
    breaker: CircuitBreaker,
    /// Connection ID handed out by the last successful hello
    connection_id: Mutex<Option<String>>,
    event_tx: broadcast::Sender<ItemEvent>,
    listener_started: AtomicBool,
    listener_cancel: CancellationToken,
}

impl ItemwireSdk {
    // ========== Construction ==========

    /// Create a new SDK instance with the given configuration.
    pub fn new(config: SdkConfig) -> Result<Self> {
        let client = ItemwireClient::new(config.client_config())?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let breaker = CircuitBreaker::new(&config.resilience);

        Ok(Self {
            inner: Arc::new(SdkInner {
                config,
                client,
                breaker,
                connection_id: Mutex::new(None),
                event_tx,
                listener_started: AtomicBool::new(false),
                listener_cancel: CancellationToken::new(),
            }),
        })
    }

    /// Create an SDK instance from environment variables.
    ///
    /// See [`SdkConfig::from_env`] for required and optional environment
    /// variables.
    pub fn from_env() -> Result<Self> {
        let config = SdkConfig::from_env()?;
        Self::new(config)
    }

    /// Create an SDK instance for local development.
    ///
    /// This connects to `127.0.0.1:8001` with TLS verification disabled.
    pub fn localhost(principal_id: impl Into<String>, username: impl Into<String>) -> Result<Self> {
        let config = SdkConfig::localhost(principal_id, username);
        Self::new(config)
    }

    // ========== Connection ==========

    /// Connect to itemwire-core and bind the configured principal.
    ///
    /// Also starts the background event listener feeding [`events`].
    ///
    /// [`events`]: ItemwireSdk::events
    #[instrument(skip(self), fields(principal_id = %self.inner.config.principal_id))]
    pub async fn connect(&self) -> Result<()> {
        info!("Connecting to itemwire-core");
        self.inner.client.connect().await?;
        self.inner.hello().await?;
        self.spawn_event_listener();
        info!("Connected to itemwire-core");
        Ok(())
    }

    /// Block until a connection with a bound principal is available.
    ///
    /// Dials immediately, then walks the reconnect schedule (2 s, 5 s, 10 s,
    /// 30 s, capping at 60 s between attempts) until a dial and hello both
    /// succeed. Returns as soon as the session is up; does not give up on
    /// its own.
    #[instrument(skip(self), fields(principal_id = %self.inner.config.principal_id))]
    pub async fn ensure_connected(&self) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            let delay = reconnect_delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.inner.ensure_session().await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(attempt, "Reconnected to itemwire-core");
                    }
                    self.spawn_event_listener();
                    return Ok(());
                }
                Err(error) => {
                    warn!(attempt, error = %error, "Reconnect attempt failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Check if the underlying transport is connected.
    pub async fn is_connected(&self) -> bool {
        self.inner.client.is_connected().await
    }

    /// The connection ID assigned by the server on the last hello, if any.
    pub async fn connection_id(&self) -> Option<String> {
        self.inner.connection_id.lock().await.clone()
    }

    /// The principal this SDK acts as.
    pub fn principal_id(&self) -> &str {
        &self.inner.config.principal_id
    }

    /// The display name sent in hello and presence.
    pub fn username(&self) -> &str {
        &self.inner.config.username
    }

    /// Close the connection and stop the background event listener.
    pub async fn close(&self) {
        self.inner.listener_cancel.cancel();
        self.inner.client.close().await;
    }

    // ========== Items ==========

    /// Create an item with an auto-generated idempotency key.
    ///
    /// The generated key makes the call safe to retry: replays of the same
    /// request are deduplicated by the server.
    #[instrument(skip(self), fields(principal_id = %self.inner.config.principal_id))]
    pub async fn create_item(&self, name: &str, description: &str) -> Result<Item> {
        self.create_item_with_key(name, description, Uuid::new_v4().to_string())
            .await
    }

    /// Create an item under a caller-chosen idempotency key.
    ///
    /// Repeating the call with the same key within the server's replay window
    /// returns the originally created item instead of creating a duplicate.
    #[instrument(skip(self, key), fields(principal_id = %self.inner.config.principal_id))]
    pub async fn create_item_with_key(
        &self,
        name: &str,
        description: &str,
        key: impl Into<String>,
    ) -> Result<Item> {
        let request = wire::RpcRequest {
            request: Some(wire::rpc_request::Request::CreateItem(
                wire::CreateItemRequest {
                    name: name.to_string(),
                    description: description.to_string(),
                    idempotency_key: Some(key.into()),
                },
            )),
        };

        let response = self.call(&request).await?;
        match response.response {
            Some(wire::rpc_response::Response::Item(item)) => item
                .item
                .map(Item::from)
                .ok_or_else(|| SdkError::UnexpectedResponse("ItemResponse missing item".to_string())),
            Some(wire::rpc_response::Response::Error(error)) => Err(SdkError::Server {
                code: error.code,
                message: error.message,
            }),
            _ => Err(SdkError::UnexpectedResponse(
                "expected ItemResponse".to_string(),
            )),
        }
    }

    /// Update an item's name and description, with an auto-generated
    /// idempotency key.
    #[instrument(skip(self), fields(principal_id = %self.inner.config.principal_id, item_id = %id))]
    pub async fn update_item(&self, id: &str, name: &str, description: &str) -> Result<Item> {
        self.update_item_with_key(id, name, description, Uuid::new_v4().to_string())
            .await
    }

    /// Update an item under a caller-chosen idempotency key.
    #[instrument(skip(self, key), fields(principal_id = %self.inner.config.principal_id, item_id = %id))]
    pub async fn update_item_with_key(
        &self,
        id: &str,
        name: &str,
        description: &str,
        key: impl Into<String>,
    ) -> Result<Item> {
        let request = wire::RpcRequest {
            request: Some(wire::rpc_request::Request::UpdateItem(
                wire::UpdateItemRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    description: description.to_string(),
                    idempotency_key: Some(key.into()),
                },
            )),
        };

        let response = self.call(&request).await?;
        match response.response {
            Some(wire::rpc_response::Response::Item(item)) => item
                .item
                .map(Item::from)
                .ok_or_else(|| SdkError::UnexpectedResponse("ItemResponse missing item".to_string())),
            Some(wire::rpc_response::Response::Error(error)) => Err(SdkError::Server {
                code: error.code,
                message: error.message,
            }),
            _ => Err(SdkError::UnexpectedResponse(
                "expected ItemResponse".to_string(),
            )),
        }
    }

    /// Delete an item, with an auto-generated idempotency key.
    #[instrument(skip(self), fields(principal_id = %self.inner.config.principal_id, item_id = %id))]
    pub async fn delete_item(&self, id: &str) -> Result<()> {
        self.delete_item_with_key(id, Uuid::new_v4().to_string())
            .await
    }

    /// Delete an item under a caller-chosen idempotency key.
    #[instrument(skip(self, key), fields(principal_id = %self.inner.config.principal_id, item_id = %id))]
    pub async fn delete_item_with_key(&self, id: &str, key: impl Into<String>) -> Result<()> {
        let request = wire::RpcRequest {
            request: Some(wire::rpc_request::Request::DeleteItem(
                wire::DeleteItemRequest {
                    id: id.to_string(),
                    idempotency_key: Some(key.into()),
                },
            )),
        };

        let response = self.call(&request).await?;
        match response.response {
            Some(wire::rpc_response::Response::Ack(_)) => Ok(()),
            Some(wire::rpc_response::Response::Error(error)) => Err(SdkError::Server {
                code: error.code,
                message: error.message,
            }),
            _ => Err(SdkError::UnexpectedResponse(
                "expected AckResponse".to_string(),
            )),
        }
    }

    /// Look up one item. Returns `None` when the item does not exist.
    #[instrument(skip(self), fields(principal_id = %self.inner.config.principal_id, item_id = %id))]
    pub async fn get_item(&self, id: &str) -> Result<Option<Item>> {
        let request = wire::RpcRequest {
            request: Some(wire::rpc_request::Request::GetItem(wire::GetItemRequest {
                id: id.to_string(),
            })),
        };

        let response = self.call(&request).await?;
        match response.response {
            Some(wire::rpc_response::Response::GetItem(get)) => {
                if get.found {
                    Ok(get.item.map(Item::from))
                } else {
                    Ok(None)
                }
            }
            Some(wire::rpc_response::Response::Error(error)) => Err(SdkError::Server {
                code: error.code,
                message: error.message,
            }),
            _ => Err(SdkError::UnexpectedResponse(
                "expected GetItemResponse".to_string(),
            )),
        }
    }

    /// List all items, newest first.
    #[instrument(skip(self), fields(principal_id = %self.inner.config.principal_id))]
    pub async fn list_items(&self) -> Result<Vec<Item>> {
        let request = wire::RpcRequest {
            request: Some(wire::rpc_request::Request::ListItems(
                wire::ListItemsRequest {},
            )),
        };

        let response = self.call(&request).await?;
        match response.response {
            Some(wire::rpc_response::Response::ItemList(list)) => {
                Ok(list.items.into_iter().map(Item::from).collect())
            }
            Some(wire::rpc_response::Response::Error(error)) => Err(SdkError::Server {
                code: error.code,
                message: error.message,
            }),
            _ => Err(SdkError::UnexpectedResponse(
                "expected ListItemsResponse".to_string(),
            )),
        }
    }

    // ========== Presence & Health ==========

    /// Broadcast an explicit presence change for this principal.
    #[instrument(skip(self), fields(principal_id = %self.inner.config.principal_id))]
    pub async fn notify_presence(&self, online: bool) -> Result<()> {
        let request = wire::RpcRequest {
            request: Some(wire::rpc_request::Request::NotifyPresence(
                wire::NotifyPresenceRequest { online },
            )),
        };

        let response = self.call(&request).await?;
        match response.response {
            Some(wire::rpc_response::Response::Ack(_)) => Ok(()),
            Some(wire::rpc_response::Response::Error(error)) => Err(SdkError::Server {
                code: error.code,
                message: error.message,
            }),
            _ => Err(SdkError::UnexpectedResponse(
                "expected AckResponse".to_string(),
            )),
        }
    }

    /// Query service health. Works before hello.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let request = wire::RpcRequest {
            request: Some(wire::rpc_request::Request::HealthCheck(
                wire::HealthCheckRequest {},
            )),
        };

        let response = self.call(&request).await?;
        match response.response {
            Some(wire::rpc_response::Response::Health(health)) => Ok(HealthStatus {
                status: health.status,
                version: health.version,
            }),
            Some(wire::rpc_response::Response::Error(error)) => Err(SdkError::Server {
                code: error.code,
                message: error.message,
            }),
            _ => Err(SdkError::UnexpectedResponse(
                "expected HealthCheckResponse".to_string(),
            )),
        }
    }

    // ========== Events ==========

    /// Subscribe to decoded server-push events.
    ///
    /// Each call returns an independent receiver. A receiver that falls more
    /// than the channel capacity behind loses the oldest events and observes
    /// a `Lagged` error before catching up.
    pub fn events(&self) -> broadcast::Receiver<ItemEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Start the background task that accepts server-push streams and feeds
    /// the event broadcast. Idempotent.
    fn spawn_event_listener(&self) {
        if self.inner.listener_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            debug!("Event listener started");
            let mut failures: u32 = 0;
            loop {
                tokio::select! {
                    biased;

                    _ = inner.listener_cancel.cancelled() => {
                        debug!("Event listener stopped");
                        break;
                    }

                    result = inner.client.next_event() => match result {
                        Ok(event) => {
                            failures = 0;
                            if let Some(kind) = event.kind {
                                let _ = inner.event_tx.send(ItemEvent::from(kind));
                            }
                        }
                        Err(error) => {
                            failures = failures.saturating_add(1);
                            let delay = reconnect_delay(failures - 1);
                            debug!(
                                error = %error,
                                delay_ms = delay.as_millis() as u64,
                                "Event stream interrupted"
                            );
                            tokio::select! {
                                _ = inner.listener_cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        });
    }

    // ========== Call pipeline ==========

    /// Send one request through the resilience pipeline: circuit breaker,
    /// retries with exponential backoff, and a timeout per attempt.
    ///
    /// In-band `RateLimited` responses surface as [`SdkError::RateLimited`]
    /// without retries. An `AUTH_REQUIRED` error triggers one re-hello and a
    /// single replay; other in-band errors pass through for the caller to
    /// map. Neither counts as a breaker sample.
    async fn call(&self, request: &wire::RpcRequest) -> Result<wire::RpcResponse> {
        let resilience = &self.inner.config.resilience;
        let mut attempt: u32 = 0;
        let mut rehello_done = false;

        loop {
            self.inner.breaker.check()?;

            match self.attempt_once(request).await {
                Ok(response) => match &response.response {
                    Some(wire::rpc_response::Response::RateLimited(info)) => {
                        if resilience.count_rate_limited_in_breaker {
                            self.inner.breaker.record_failure();
                        }
                        return Err(SdkError::RateLimited(info.clone().into()));
                    }
                    Some(wire::rpc_response::Response::Error(error))
                        if error.code == AUTH_REQUIRED && !rehello_done =>
                    {
                        // The connection lost its principal binding, usually
                        // after a transparent reconnect. Greet again and
                        // replay the request once.
                        rehello_done = true;
                        debug!("Connection has no principal binding, re-greeting");
                        self.inner.hello().await?;
                    }
                    Some(wire::rpc_response::Response::Error(_)) => return Ok(response),
                    _ => {
                        self.inner.breaker.record_success();
                        return Ok(response);
                    }
                },
                Err(error) if error.is_retriable() => {
                    self.inner.breaker.record_failure();
                    if matches!(error, SdkError::Timeout(_)) {
                        // A timed-out attempt can leave the connection wedged.
                        // Drop it so the next attempt dials fresh.
                        self.inner.client.close().await;
                    }
                    if attempt >= resilience.max_retries {
                        return Err(error);
                    }
                    let delay = resilience.backoff_delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// One attempt: make sure a session exists, then send the request. The
    /// whole attempt shares a single timeout budget.
    async fn attempt_once(&self, request: &wire::RpcRequest) -> Result<wire::RpcResponse> {
        let timeout = Duration::from_millis(self.inner.config.request_timeout_ms);
        let attempt = async {
            self.inner.ensure_session().await?;
            let response: wire::RpcResponse = self.inner.client.request(request).await?;
            Ok(response)
        };

        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| SdkError::Timeout(self.inner.config.request_timeout_ms))?
    }
}

impl SdkInner {
    /// Reconnect the transport and re-greet if the connection is down.
    async fn ensure_session(&self) -> Result<()> {
        if self.client.is_connected().await {
            return Ok(());
        }
        self.client.connect().await?;
        self.hello().await
    }

    /// Bind the configured principal to the current connection.
    async fn hello(&self) -> Result<()> {
        let request = wire::RpcRequest {
            request: Some(wire::rpc_request::Request::Hello(wire::HelloRequest {
                principal_id: self.config.principal_id.clone(),
                username: self.config.username.clone(),
            })),
        };

        let response: wire::RpcResponse = self.client.request(&request).await?;
        match response.response {
            Some(wire::rpc_response::Response::Hello(hello)) => {
                debug!(connection_id = %hello.connection_id, "Principal bound to connection");
                *self.connection_id.lock().await = Some(hello.connection_id);
                Ok(())
            }
            Some(wire::rpc_response::Response::Error(error)) => Err(SdkError::Server {
                code: error.code,
                message: error.message,
            }),
            _ => Err(SdkError::UnexpectedResponse(
                "expected HelloResponse".to_string(),
            )),
        }
    }
}
