// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Item protocol handlers for itemwire-core.
//!
//! These handlers process item requests (create, update, delete, lookups,
//! presence, health) after the server has admitted and authenticated them.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use itemwire_protocol::wire::{
    AckResponse, CreateItemRequest, DeleteItemRequest, Event, GetItemRequest, GetItemResponse,
    HealthCheckRequest, HealthCheckResponse, HelloRequest, ItemResponse, ListItemsRequest,
    ListItemsResponse, PresenceChangedEvent, UpdateItemRequest, event,
};

use crate::error::{CoreError, Result};
use crate::idempotency::IdempotencyGate;
use crate::notifications::Notification;
use crate::persistence::{ItemRecord, Persistence};

/// Longest accepted item name, in characters.
pub const MAX_NAME_CHARS: usize = 200;
/// Longest accepted item description, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Authenticated identity a hello bound to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable principal identifier.
    pub id: String,
    /// Display name.
    pub username: String,
}

/// Shared state for item handlers.
///
/// Contains the persistence implementation and the write-path replay gate
/// shared across all handlers.
pub struct HandlerState {
    /// Persistence implementation.
    pub persistence: Arc<dyn Persistence>,
    /// Replay gate for keyed writes.
    pub idempotency: IdempotencyGate,
}

impl HandlerState {
    /// Create handler state with the default idempotency TTL.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        let idempotency = IdempotencyGate::new(Arc::clone(&persistence));
        Self {
            persistence,
            idempotency,
        }
    }

    /// Create handler state with a custom idempotency TTL.
    pub fn with_idempotency_ttl(
        persistence: Arc<dyn Persistence>,
        ttl: chrono::Duration,
    ) -> Self {
        let idempotency = IdempotencyGate::with_ttl(Arc::clone(&persistence), ttl);
        Self {
            persistence,
            idempotency,
        }
    }
}

fn validate_text(field: &'static str, value: &str, max_chars: usize) -> Result<()> {
    if value.is_empty() {
        return Err(CoreError::ValidationError {
            field: field.to_string(),
            message: format!("{field} is required"),
        });
    }
    if value.chars().count() > max_chars {
        return Err(CoreError::ValidationError {
            field: field.to_string(),
            message: format!("{field} must be at most {max_chars} characters"),
        });
    }
    Ok(())
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CoreError::ValidationError {
            field: "id".to_string(),
            message: "id is required".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Hello
// ============================================================================

/// Validate a hello and produce the principal to bind to the connection.
///
/// # Errors
///
/// Returns a validation error if `principal_id` or `username` is empty.
pub fn validate_hello(request: &HelloRequest) -> Result<Principal> {
    if request.principal_id.is_empty() {
        return Err(CoreError::ValidationError {
            field: "principal_id".to_string(),
            message: "principal_id is required".to_string(),
        });
    }
    if request.username.is_empty() {
        return Err(CoreError::ValidationError {
            field: "username".to_string(),
            message: "username is required".to_string(),
        });
    }
    Ok(Principal {
        id: request.principal_id.clone(),
        username: request.username.clone(),
    })
}

// ============================================================================
// Item Writes
// ============================================================================

/// Handle item creation.
///
/// The item id is generated server-side. The `ItemCreated` notification is
/// staged in the same transaction as the row, and when the request carries an
/// idempotency key a retry replays the stored response instead of creating a
/// second item.
#[instrument(skip(state, request), fields(principal_id = %principal.id))]
pub async fn handle_create_item(
    state: &HandlerState,
    request: CreateItemRequest,
    principal: &Principal,
) -> Result<ItemResponse> {
    validate_text("name", &request.name, MAX_NAME_CHARS)?;
    validate_text("description", &request.description, MAX_DESCRIPTION_CHARS)?;

    let persistence = Arc::clone(&state.persistence);
    let created_by = principal.id.clone();
    let key = request.idempotency_key.clone();
    state
        .idempotency
        .execute(key.as_deref(), || async move {
            let now = Utc::now();
            let record = ItemRecord {
                id: Uuid::new_v4().to_string(),
                name: request.name,
                description: request.description,
                created_at: now,
                updated_at: None,
                created_by,
            };
            let outbox = Notification::created(&record).to_outbox_message(now)?;
            persistence.insert_item(&record, &outbox).await?;

            info!(item_id = %record.id, "Item created");
            Ok(ItemResponse {
                item: Some(record.to_wire()),
            })
        })
        .await
}

/// Handle item update.
///
/// Reads the current row, applies the new name and description, and writes
/// it back with a fresh `updated_at`. `created_at` and `created_by` are
/// preserved from the original row. The `ItemUpdated` notification is staged
/// in the same transaction.
#[instrument(skip(state, request), fields(item_id = %request.id, principal_id = %principal.id))]
pub async fn handle_update_item(
    state: &HandlerState,
    request: UpdateItemRequest,
    principal: &Principal,
) -> Result<ItemResponse> {
    validate_id(&request.id)?;
    validate_text("name", &request.name, MAX_NAME_CHARS)?;
    validate_text("description", &request.description, MAX_DESCRIPTION_CHARS)?;

    let persistence = Arc::clone(&state.persistence);
    let key = request.idempotency_key.clone();
    state
        .idempotency
        .execute(key.as_deref(), || async move {
            let Some(existing) = persistence.get_item(&request.id).await? else {
                return Err(CoreError::ItemNotFound {
                    item_id: request.id,
                });
            };

            let now = Utc::now();
            let record = ItemRecord {
                id: existing.id,
                name: request.name,
                description: request.description,
                created_at: existing.created_at,
                updated_at: Some(now),
                created_by: existing.created_by,
            };
            let outbox = Notification::updated(&record).to_outbox_message(now)?;
            persistence.update_item(&record, &outbox).await?;

            info!(item_id = %record.id, "Item updated");
            Ok(ItemResponse {
                item: Some(record.to_wire()),
            })
        })
        .await
}

/// Handle item deletion.
///
/// The `ItemDeleted` notification is staged in the same transaction as the
/// delete. Acknowledgements are not replayed, so a keyed retry runs the
/// delete again and reports not-found once the row is gone.
#[instrument(skip(state, request), fields(item_id = %request.id, principal_id = %principal.id))]
pub async fn handle_delete_item(
    state: &HandlerState,
    request: DeleteItemRequest,
    principal: &Principal,
) -> Result<AckResponse> {
    validate_id(&request.id)?;

    let persistence = Arc::clone(&state.persistence);
    let key = request.idempotency_key.clone();
    state
        .idempotency
        .execute(key.as_deref(), || async move {
            let now = Utc::now();
            let outbox = Notification::deleted(&request.id).to_outbox_message(now)?;
            persistence.delete_item(&request.id, &outbox).await?;

            info!(item_id = %request.id, "Item deleted");
            Ok(AckResponse {})
        })
        .await
}

// ============================================================================
// Item Reads
// ============================================================================

/// Handle item lookup.
///
/// A missing item reports `found: false` rather than an error.
#[instrument(skip(state, request), fields(item_id = %request.id))]
pub async fn handle_get_item(
    state: &HandlerState,
    request: GetItemRequest,
) -> Result<GetItemResponse> {
    validate_id(&request.id)?;

    let item = state.persistence.get_item(&request.id).await?;
    debug!(found = item.is_some(), "Item lookup");

    Ok(GetItemResponse {
        found: item.is_some(),
        item: item.map(|record| record.to_wire()),
    })
}

/// Handle item listing. Items come back newest first.
#[instrument(skip(state, _request))]
pub async fn handle_list_items(
    state: &HandlerState,
    _request: ListItemsRequest,
) -> Result<ListItemsResponse> {
    let items = state.persistence.list_items().await?;
    debug!(count = items.len(), "Listing items");

    Ok(ListItemsResponse {
        items: items.into_iter().map(|record| record.to_wire()).collect(),
    })
}

// ============================================================================
// Presence
// ============================================================================

/// Build the event broadcast when a principal's presence changes.
///
/// Used for explicit presence requests as well as for the implicit online on
/// hello and offline when a principal's last connection closes.
pub fn presence_changed(principal: &Principal, online: bool) -> Event {
    Event {
        kind: Some(event::Kind::PresenceChanged(PresenceChangedEvent {
            principal_id: principal.id.clone(),
            username: principal.username.clone(),
            online,
            last_seen_ms: Utc::now().timestamp_millis(),
        })),
    }
}

// ============================================================================
// Health
// ============================================================================

/// Handle health check.
///
/// Reports `healthy` when the database answers a probe query and `degraded`
/// when it does not. The check itself never fails; health must stay
/// reachable while the database is down.
#[instrument(skip(state, _request))]
pub async fn handle_health_check(
    state: &HandlerState,
    _request: HealthCheckRequest,
) -> Result<HealthCheckResponse> {
    let db_ok = state.persistence.health_check_db().await.unwrap_or(false);
    if !db_ok {
        warn!("Health check could not reach the database");
    }

    let status = if db_ok { "healthy" } else { "degraded" };
    Ok(HealthCheckResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
