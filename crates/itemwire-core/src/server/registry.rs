// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connected-client registry for itemwire-core.
//!
//! Tracks live QUIC connections so outbox notifications and presence changes
//! can be pushed to every client. Each push rides its own unidirectional
//! stream; a client that cannot be reached is logged and skipped without
//! failing the push, and a push to zero clients succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use itemwire_protocol::frame::{Frame, write_frame};
use itemwire_protocol::wire::Event;

use crate::handlers::Principal;
use crate::notifications::{Notification, NotificationSink};
use crate::rate_limit::{TokenBucket, TokenBucketConfig};

/// State shared between the stream tasks of one connection.
pub struct ConnectionState {
    principal: RwLock<Option<Principal>>,
    /// Per-connection burst limiter.
    pub bucket: TokenBucket,
    /// Server-assigned id, for correlation in logs and the hello response.
    pub connection_id: String,
}

impl ConnectionState {
    /// Create state for a fresh, unauthenticated connection.
    pub fn new(bucket_config: TokenBucketConfig) -> Self {
        Self {
            principal: RwLock::new(None),
            bucket: TokenBucket::new(bucket_config),
            connection_id: Uuid::new_v4().to_string(),
        }
    }

    /// The principal bound by hello, if any yet.
    pub async fn principal(&self) -> Option<Principal> {
        self.principal.read().await.clone()
    }

    /// Bind a principal to this connection. A second hello rebinds.
    pub async fn set_principal(&self, principal: Principal) {
        *self.principal.write().await = Some(principal);
    }
}

struct ClientHandle {
    connection: quinn::Connection,
    state: Arc<ConnectionState>,
}

/// Registry of live client connections, keyed by QUIC stable id.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<usize, ClientHandle>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly accepted connection.
    pub async fn register(
        &self,
        stable_id: usize,
        connection: quinn::Connection,
        state: Arc<ConnectionState>,
    ) {
        let mut clients = self.clients.write().await;
        clients.insert(stable_id, ClientHandle { connection, state });
        debug!(stable_id, total = clients.len(), "Client registered");
    }

    /// Forget a closed connection.
    pub async fn remove(&self, stable_id: usize) {
        let mut clients = self.clients.write().await;
        clients.remove(&stable_id);
        debug!(stable_id, total = clients.len(), "Client removed");
    }

    /// Number of tracked connections.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether any live connection is still bound to this principal.
    pub async fn principal_still_connected(&self, principal_id: &str) -> bool {
        let clients = self.clients.read().await;
        for handle in clients.values() {
            if let Some(principal) = handle.state.principal().await
                && principal.id == principal_id
            {
                return true;
            }
        }
        false
    }

    /// Push one event to every connected client.
    ///
    /// The event is encoded once; each client gets it on a fresh
    /// unidirectional stream. Returns how many clients it reached.
    pub async fn broadcast(&self, event: &Event) -> usize {
        let frame = match Frame::event(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode event for broadcast");
                return 0;
            }
        };

        // Snapshot the connections so the push does not hold the lock
        let connections: Vec<(usize, quinn::Connection)> = {
            let clients = self.clients.read().await;
            clients
                .iter()
                .map(|(id, handle)| (*id, handle.connection.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (stable_id, connection) in connections {
            match push_frame(&connection, &frame).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(stable_id, error = %e, "Failed to push event to client"),
            }
        }
        delivered
    }

    /// Push one event to a single connection, if it is still tracked.
    pub async fn send_to(&self, stable_id: usize, event: &Event) {
        let connection = {
            let clients = self.clients.read().await;
            clients
                .get(&stable_id)
                .map(|handle| handle.connection.clone())
        };
        let Some(connection) = connection else {
            return;
        };

        let frame = match Frame::event(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode event");
                return;
            }
        };
        if let Err(e) = push_frame(&connection, &frame).await {
            debug!(stable_id, error = %e, "Failed to push event to client");
        }
    }
}

async fn push_frame(connection: &quinn::Connection, frame: &Frame) -> anyhow::Result<()> {
    let mut send = connection.open_uni().await?;
    write_frame(&mut send, frame).await?;
    send.finish()?;
    Ok(())
}

#[async_trait]
impl NotificationSink for ClientRegistry {
    async fn deliver(&self, notification: &Notification) -> crate::error::Result<()> {
        let event = notification.to_event();
        let delivered = self.broadcast(&event).await;
        debug!(
            delivered,
            kind = notification.message_type(),
            "Notification fanned out"
        );
        Ok(())
    }
}
