// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Item QUIC server for itemwire-core.
//!
//! Accepts client connections, admits requests through the rate limits,
//! enforces hello-first authentication, and routes item requests to handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, instrument, warn};

use itemwire_protocol::frame::Frame;
use itemwire_protocol::server::{ConnectionHandler, ItemwireServer, StreamHandler};
use itemwire_protocol::wire::{
    AckResponse, Event, HelloRequest, HelloResponse, RateLimitInfo, RpcError, RpcRequest,
    RpcResponse, event, rpc_request::Request, rpc_response::Response,
};

use crate::error::CoreError;
use crate::handlers::{
    HandlerState, Principal, handle_create_item, handle_delete_item, handle_get_item,
    handle_health_check, handle_list_items, handle_update_item, presence_changed, validate_hello,
};
use crate::rate_limit::{RateLimiterRegistry, TokenBucketConfig};
use crate::server::registry::{ClientRegistry, ConnectionState};

/// Shared state for the item server.
pub struct ItemServerState {
    /// Handler state: persistence plus the idempotency gate.
    pub handlers: HandlerState,
    /// Per-principal window limiters.
    pub limiter: RateLimiterRegistry,
    /// Live client connections, also the notification sink.
    pub registry: Arc<ClientRegistry>,
    /// Burst limiter tuning applied to each new connection.
    pub bucket_config: TokenBucketConfig,
}

impl ItemServerState {
    /// Assemble server state from its parts.
    pub fn new(
        handlers: HandlerState,
        limiter: RateLimiterRegistry,
        registry: Arc<ClientRegistry>,
        bucket_config: TokenBucketConfig,
    ) -> Self {
        Self {
            handlers,
            limiter,
            registry,
            bucket_config,
        }
    }
}

/// Run the item QUIC server
#[instrument(skip(state))]
pub async fn run_item_server(bind_addr: SocketAddr, state: Arc<ItemServerState>) -> Result<()> {
    let server = ItemwireServer::localhost(bind_addr)?;

    info!(addr = %bind_addr, "Item QUIC server starting");

    server
        .run(move |conn: ConnectionHandler| {
            let state = state.clone();
            async move {
                handle_connection(conn, state).await;
            }
        })
        .await?;

    Ok(())
}

/// Handle a single client connection
#[instrument(skip(conn, state), fields(remote = %conn.remote_address()))]
pub async fn handle_connection(conn: ConnectionHandler, state: Arc<ItemServerState>) {
    let stable_id = conn.stable_id();
    let conn_state = Arc::new(ConnectionState::new(state.bucket_config.clone()));
    state
        .registry
        .register(stable_id, conn.connection(), Arc::clone(&conn_state))
        .await;

    info!(connection_id = %conn_state.connection_id, "New client connection accepted");

    {
        let state = Arc::clone(&state);
        let conn_state = Arc::clone(&conn_state);
        conn.run(move |stream: StreamHandler| {
            let state = Arc::clone(&state);
            let conn_state = Arc::clone(&conn_state);
            async move {
                if let Err(e) = handle_stream(stream, state, conn_state, stable_id).await {
                    error!("Stream error: {}", e);
                }
            }
        })
        .await;
    }

    state.registry.remove(stable_id).await;

    // Going offline is broadcast only when this was the principal's last
    // connection
    if let Some(principal) = conn_state.principal().await
        && !state.registry.principal_still_connected(&principal.id).await
    {
        let event = presence_changed(&principal, false);
        state.registry.broadcast(&event).await;
        info!(principal_id = %principal.id, "Principal went offline");
    }

    debug!("Client connection closed");
}

/// Handle a single stream (request/response)
async fn handle_stream(
    mut stream: StreamHandler,
    state: Arc<ItemServerState>,
    conn_state: Arc<ConnectionState>,
    stable_id: usize,
) -> Result<()> {
    // Read the request frame
    let request_frame = stream.read_frame().await?;

    // Decode as RpcRequest wrapper; bytes that do not decode get a structured
    // error instead of a dropped stream
    let rpc_request: RpcRequest = match request_frame.decode() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to decode request frame");
            stream
                .respond_error(&RpcError {
                    code: "DECODE_ERROR".to_string(),
                    message: format!("request did not decode: {e}"),
                })
                .await?;
            stream.finish()?;
            return Ok(());
        }
    };

    let request = match rpc_request.request {
        Some(request) => request,
        None => {
            warn!("Received empty RpcRequest");
            let response = RpcResponse {
                response: Some(Response::Error(RpcError {
                    code: "EMPTY_REQUEST".to_string(),
                    message: "RpcRequest contained no request".to_string(),
                })),
            };
            stream.write_frame(&Frame::response(&response)?).await?;
            stream.finish()?;
            return Ok(());
        }
    };

    debug!(
        "Received item request: {:?}",
        std::mem::discriminant(&request)
    );

    // Hello and health checks bypass admission; everything else goes through
    // the rate limits first and the hello requirement second
    let response = match request {
        Request::Hello(request) => handle_hello(&state, &conn_state, request).await,
        Request::HealthCheck(request) => match handle_health_check(&state.handlers, request).await
        {
            Ok(response) => Response::Health(response),
            Err(e) => Response::Error(e.to_rpc_error()),
        },
        request => match admit(&state, &conn_state, stable_id).await {
            Admission::Admitted(principal) => dispatch(&state, request, &principal).await,
            Admission::RateLimited(info) => Response::RateLimited(info),
            Admission::AuthRequired => Response::Error(CoreError::AuthRequired.to_rpc_error()),
        },
    };

    // Send response
    let rpc_response = RpcResponse {
        response: Some(response),
    };
    stream.write_frame(&Frame::response(&rpc_response)?).await?;
    stream.finish()?;

    Ok(())
}

/// Outcome of the admission gate.
enum Admission {
    Admitted(Principal),
    RateLimited(RateLimitInfo),
    AuthRequired,
}

/// Admit one item request: connection burst bucket, then the principal
/// window, then the hello requirement. Rate limits are checked before
/// authentication so an unauthenticated flood cannot dodge them.
async fn admit(
    state: &ItemServerState,
    conn_state: &ConnectionState,
    stable_id: usize,
) -> Admission {
    if !conn_state.bucket.try_acquire().await {
        warn!(connection_id = %conn_state.connection_id, "Connection burst limit exceeded");
        let info = state.limiter.rejection_info();
        push_rate_limit_event(state, stable_id, info);
        return Admission::RateLimited(info);
    }

    let principal = conn_state.principal().await;
    let principal_id = principal.as_ref().map(|p| p.id.as_str());
    if !state.limiter.check(principal_id).await.is_allowed() {
        warn!(principal_id = ?principal_id, "Principal rate limit exceeded");
        let info = state.limiter.rejection_info();
        push_rate_limit_event(state, stable_id, info);
        return Admission::RateLimited(info);
    }

    match principal {
        Some(principal) => Admission::Admitted(principal),
        None => Admission::AuthRequired,
    }
}

/// Fire-and-forget push of the rate-limit event to the rejected connection.
fn push_rate_limit_event(state: &ItemServerState, stable_id: usize, info: RateLimitInfo) {
    let registry = Arc::clone(&state.registry);
    tokio::spawn(async move {
        let event = Event {
            kind: Some(event::Kind::RateLimitExceeded(info)),
        };
        registry.send_to(stable_id, &event).await;
    });
}

/// Handle hello: bind the principal to the connection and broadcast that it
/// came online.
async fn handle_hello(
    state: &ItemServerState,
    conn_state: &ConnectionState,
    request: HelloRequest,
) -> Response {
    let principal = match validate_hello(&request) {
        Ok(principal) => principal,
        Err(e) => return Response::Error(e.to_rpc_error()),
    };

    info!(
        principal_id = %principal.id,
        username = %principal.username,
        connection_id = %conn_state.connection_id,
        "Client hello"
    );
    conn_state.set_principal(principal.clone()).await;

    let event = presence_changed(&principal, true);
    state.registry.broadcast(&event).await;

    Response::Hello(HelloResponse {
        connection_id: conn_state.connection_id.clone(),
    })
}

/// Route an admitted request to its handler.
async fn dispatch(state: &ItemServerState, request: Request, principal: &Principal) -> Response {
    match request {
        Request::CreateItem(request) => {
            match handle_create_item(&state.handlers, request, principal).await {
                Ok(response) => Response::Item(response),
                Err(e) => Response::Error(e.to_rpc_error()),
            }
        }

        Request::UpdateItem(request) => {
            match handle_update_item(&state.handlers, request, principal).await {
                Ok(response) => Response::Item(response),
                Err(e) => Response::Error(e.to_rpc_error()),
            }
        }

        Request::DeleteItem(request) => {
            match handle_delete_item(&state.handlers, request, principal).await {
                Ok(response) => Response::Ack(response),
                Err(e) => Response::Error(e.to_rpc_error()),
            }
        }

        Request::GetItem(request) => match handle_get_item(&state.handlers, request).await {
            Ok(response) => Response::GetItem(response),
            Err(e) => Response::Error(e.to_rpc_error()),
        },

        Request::ListItems(request) => match handle_list_items(&state.handlers, request).await {
            Ok(response) => Response::ItemList(response),
            Err(e) => Response::Error(e.to_rpc_error()),
        },

        Request::NotifyPresence(request) => {
            let event = presence_changed(principal, request.online);
            let reached = state.registry.broadcast(&event).await;
            debug!(
                principal_id = %principal.id,
                online = request.online,
                reached,
                "Presence notified"
            );
            Response::Ack(AckResponse {})
        }

        // Handled before admission
        Request::Hello(_) | Request::HealthCheck(_) => Response::Error(RpcError {
            code: "INTERNAL_ERROR".to_string(),
            message: "request routed incorrectly".to_string(),
        }),
    }
}
