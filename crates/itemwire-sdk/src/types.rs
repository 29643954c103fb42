// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SDK-facing types mapped from the wire protocol.

use itemwire_protocol::wire;

/// A synchronized item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Server-assigned identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Creation time (unix millis)
    pub created_at_ms: i64,
    /// Last update time (unix millis), unset until the first update
    pub updated_at_ms: Option<i64>,
    /// Principal that created the item
    pub created_by: String,
}

impl From<wire::Item> for Item {
    fn from(item: wire::Item) -> Self {
        Self {
            id: item.id,
            name: item.name,
            description: item.description,
            created_at_ms: item.created_at_ms,
            updated_at_ms: item.updated_at_ms,
            created_by: item.created_by,
        }
    }
}

/// Rate limit details reported by the server on an admission rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Requests allowed per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the window resets (unix millis)
    pub reset_at_ms: i64,
}

impl From<wire::RateLimitInfo> for RateLimit {
    fn from(info: wire::RateLimitInfo) -> Self {
        Self {
            limit: info.limit,
            remaining: info.remaining,
            reset_at_ms: info.reset_at_ms,
        }
    }
}

/// Service health as reported by `health_check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    /// `"healthy"` or `"degraded"`
    pub status: String,
    /// Server crate version
    pub version: String,
}

impl HealthStatus {
    /// Whether the server reported itself fully operational.
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// A presence change for a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// Principal whose presence changed
    pub principal_id: String,
    /// Display name of the principal
    pub username: String,
    /// Whether the principal is now online
    pub online: bool,
    /// When the principal was last seen (unix millis)
    pub last_seen_ms: i64,
}

impl From<wire::PresenceChangedEvent> for PresenceUpdate {
    fn from(event: wire::PresenceChangedEvent) -> Self {
        Self {
            principal_id: event.principal_id,
            username: event.username,
            online: event.online,
            last_seen_ms: event.last_seen_ms,
        }
    }
}

/// A server-push event, decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEvent {
    /// An item was created
    Created(Item),
    /// An item was updated
    Updated(Item),
    /// An item was deleted
    Deleted {
        /// Identifier of the deleted item
        item_id: String,
    },
    /// A free-form system notification
    Notification {
        /// Notification type
        kind: String,
        /// Human-readable message
        message: String,
        /// When the notification was produced (unix millis)
        timestamp_ms: i64,
    },
    /// A principal went online or offline
    Presence(PresenceUpdate),
    /// This connection exceeded an admission limit
    RateLimitExceeded(RateLimit),
}

impl From<wire::event::Kind> for ItemEvent {
    fn from(kind: wire::event::Kind) -> Self {
        match kind {
            wire::event::Kind::ItemCreated(item) => ItemEvent::Created(item.into()),
            wire::event::Kind::ItemUpdated(item) => ItemEvent::Updated(item.into()),
            wire::event::Kind::ItemDeleted(event) => ItemEvent::Deleted {
                item_id: event.item_id,
            },
            wire::event::Kind::Notification(event) => ItemEvent::Notification {
                kind: event.kind,
                message: event.message,
                timestamp_ms: event.timestamp_ms,
            },
            wire::event::Kind::PresenceChanged(event) => ItemEvent::Presence(event.into()),
            wire::event::Kind::RateLimitExceeded(info) => ItemEvent::RateLimitExceeded(info.into()),
        }
    }
}
