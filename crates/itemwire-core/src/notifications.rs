// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed outbox notifications and their wire mapping.
//!
//! Item mutations write outbox rows as (message_type, JSON payload) pairs.
//! The dispatcher decodes rows back into [`Notification`] values and hands
//! them to a [`NotificationSink`] for delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::persistence::{ItemRecord, NewOutboxMessage};
use itemwire_protocol::wire;

/// Message type tag for item creation notifications.
pub const ITEM_CREATED: &str = "ItemCreated";
/// Message type tag for item update notifications.
pub const ITEM_UPDATED: &str = "ItemUpdated";
/// Message type tag for item deletion notifications.
pub const ITEM_DELETED: &str = "ItemDeleted";

/// Item snapshot carried by creation and update notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPayload {
    /// Unique identifier for the item.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// When the item was created.
    pub created_at: DateTime<Utc>,
    /// When the item was last updated, if ever.
    pub updated_at: Option<DateTime<Utc>>,
    /// Principal that created the item.
    pub created_by: String,
}

impl ItemPayload {
    /// Build a payload from a persistence record.
    pub fn from_record(record: &ItemRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            created_by: record.created_by.clone(),
        }
    }

    /// Convert this payload to its wire representation.
    pub fn to_wire(&self) -> wire::Item {
        wire::Item {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at_ms: self.created_at.timestamp_millis(),
            updated_at_ms: self.updated_at.map(|t| t.timestamp_millis()),
            created_by: self.created_by.clone(),
        }
    }
}

/// Payload carried by deletion notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDeletedPayload {
    /// Identifier of the deleted item.
    pub id: String,
}

/// A notification produced by an item mutation.
///
/// Stored in the outbox as JSON, delivered to subscribers as a wire event.
#[derive(Debug, Clone)]
pub enum Notification {
    /// An item was created.
    ItemCreated(ItemPayload),
    /// An item was updated.
    ItemUpdated(ItemPayload),
    /// An item was deleted.
    ItemDeleted(ItemDeletedPayload),
}

impl Notification {
    /// Notification for a freshly created item.
    pub fn created(record: &ItemRecord) -> Self {
        Self::ItemCreated(ItemPayload::from_record(record))
    }

    /// Notification for an updated item.
    pub fn updated(record: &ItemRecord) -> Self {
        Self::ItemUpdated(ItemPayload::from_record(record))
    }

    /// Notification for a deleted item.
    pub fn deleted(item_id: &str) -> Self {
        Self::ItemDeleted(ItemDeletedPayload {
            id: item_id.to_string(),
        })
    }

    /// The message type tag this notification is stored under.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::ItemCreated(_) => ITEM_CREATED,
            Self::ItemUpdated(_) => ITEM_UPDATED,
            Self::ItemDeleted(_) => ITEM_DELETED,
        }
    }

    /// Serialize this notification into an outbox row.
    pub fn to_outbox_message(&self, created_at: DateTime<Utc>) -> Result<NewOutboxMessage> {
        let payload = match self {
            Self::ItemCreated(p) | Self::ItemUpdated(p) => serde_json::to_string(p)?,
            Self::ItemDeleted(p) => serde_json::to_string(p)?,
        };
        Ok(NewOutboxMessage {
            message_type: self.message_type().to_string(),
            payload,
            created_at,
        })
    }

    /// Decode a stored outbox row back into a notification.
    ///
    /// Returns `Ok(None)` for message types this build does not recognize;
    /// the dispatcher decides whether those rows are skipped or parked.
    /// A recognized type with an undecodable payload is an error.
    pub fn from_stored(message_type: &str, payload: &str) -> Result<Option<Self>> {
        let notification = match message_type {
            ITEM_CREATED => Self::ItemCreated(serde_json::from_str(payload)?),
            ITEM_UPDATED => Self::ItemUpdated(serde_json::from_str(payload)?),
            ITEM_DELETED => Self::ItemDeleted(serde_json::from_str(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(notification))
    }

    /// Convert this notification to a wire event for subscriber push.
    pub fn to_event(&self) -> wire::Event {
        let kind = match self {
            Self::ItemCreated(p) => wire::event::Kind::ItemCreated(p.to_wire()),
            Self::ItemUpdated(p) => wire::event::Kind::ItemUpdated(p.to_wire()),
            Self::ItemDeleted(p) => wire::event::Kind::ItemDeleted(wire::ItemDeletedEvent {
                item_id: p.id.clone(),
            }),
        };
        wire::Event { kind: Some(kind) }
    }
}

/// Destination for decoded notifications.
///
/// The QUIC server's client registry is the production sink; tests plug in
/// recording sinks.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification to all current subscribers.
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}
