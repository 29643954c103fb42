// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protobuf message definitions for the itemwire protocol.
//!
//! The message set is small and owned by this repository, so the types are
//! written as `prost` derives directly instead of going through a `.proto`
//! compile step. Tags are stable; add new fields with fresh tags only.

/// An item as it travels on the wire. Timestamps are UTC milliseconds.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Item {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(int64, tag = "4")]
    pub created_at_ms: i64,
    #[prost(int64, optional, tag = "5")]
    pub updated_at_ms: Option<i64>,
    /// Principal id of the creator.
    #[prost(string, tag = "6")]
    pub created_by: String,
}

// ========== Requests ==========

/// Binds an authenticated principal to the connection. Must be the first
/// call on a connection; everything except health checks is rejected until
/// the server has seen it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub principal_id: String,
    #[prost(string, tag = "2")]
    pub username: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateItemRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub description: String,
    /// Caller-generated 128-bit key; retries of the same logical attempt
    /// must carry the same key.
    #[prost(string, optional, tag = "3")]
    pub idempotency_key: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateItemRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(string, optional, tag = "4")]
    pub idempotency_key: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteItemRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, optional, tag = "2")]
    pub idempotency_key: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetItemRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ListItemsRequest {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct NotifyPresenceRequest {
    #[prost(bool, tag = "1")]
    pub online: bool,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct HealthCheckRequest {}

// ========== Responses ==========

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloResponse {
    /// Server-assigned connection id, for correlation in logs.
    #[prost(string, tag = "1")]
    pub connection_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ItemResponse {
    #[prost(message, optional, tag = "1")]
    pub item: Option<Item>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetItemResponse {
    #[prost(bool, tag = "1")]
    pub found: bool,
    #[prost(message, optional, tag = "2")]
    pub item: Option<Item>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListItemsResponse {
    /// Newest-first by creation time.
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<Item>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AckResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthCheckResponse {
    #[prost(string, tag = "1")]
    pub status: String,
    #[prost(string, tag = "2")]
    pub version: String,
}

/// Admission-control rejection details. `reset_at_ms` is the earliest time
/// the caller should try again.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct RateLimitInfo {
    #[prost(uint32, tag = "1")]
    pub limit: u32,
    #[prost(uint32, tag = "2")]
    pub remaining: u32,
    #[prost(int64, tag = "3")]
    pub reset_at_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcError {
    /// Stable machine-readable code (for example `ITEM_NOT_FOUND`).
    #[prost(string, tag = "1")]
    pub code: String,
    #[prost(string, tag = "2")]
    pub message: String,
}

// ========== Envelopes ==========

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcRequest {
    #[prost(oneof = "rpc_request::Request", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub request: Option<rpc_request::Request>,
}

pub mod rpc_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "1")]
        Hello(super::HelloRequest),
        #[prost(message, tag = "2")]
        CreateItem(super::CreateItemRequest),
        #[prost(message, tag = "3")]
        UpdateItem(super::UpdateItemRequest),
        #[prost(message, tag = "4")]
        DeleteItem(super::DeleteItemRequest),
        #[prost(message, tag = "5")]
        GetItem(super::GetItemRequest),
        #[prost(message, tag = "6")]
        ListItems(super::ListItemsRequest),
        #[prost(message, tag = "7")]
        NotifyPresence(super::NotifyPresenceRequest),
        #[prost(message, tag = "8")]
        HealthCheck(super::HealthCheckRequest),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcResponse {
    #[prost(oneof = "rpc_response::Response", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub response: Option<rpc_response::Response>,
}

pub mod rpc_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        Hello(super::HelloResponse),
        #[prost(message, tag = "2")]
        Item(super::ItemResponse),
        #[prost(message, tag = "3")]
        GetItem(super::GetItemResponse),
        #[prost(message, tag = "4")]
        ItemList(super::ListItemsResponse),
        #[prost(message, tag = "5")]
        Ack(super::AckResponse),
        #[prost(message, tag = "6")]
        Health(super::HealthCheckResponse),
        /// Admission rejection. Distinct from `Error` so clients can treat
        /// throttling as its own outcome class.
        #[prost(message, tag = "7")]
        RateLimited(super::RateLimitInfo),
        #[prost(message, tag = "8")]
        Error(super::RpcError),
    }
}

// ========== Server push ==========

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ItemDeletedEvent {
    #[prost(string, tag = "1")]
    pub item_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NotificationEvent {
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(int64, tag = "3")]
    pub timestamp_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PresenceChangedEvent {
    #[prost(string, tag = "1")]
    pub principal_id: String,
    #[prost(string, tag = "2")]
    pub username: String,
    #[prost(bool, tag = "3")]
    pub online: bool,
    #[prost(int64, tag = "4")]
    pub last_seen_ms: i64,
}

/// One server-to-client push. Each rides its own unidirectional stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(oneof = "event::Kind", tags = "1, 2, 3, 4, 5, 6")]
    pub kind: Option<event::Kind>,
}

pub mod event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        ItemCreated(super::Item),
        #[prost(message, tag = "2")]
        ItemUpdated(super::Item),
        #[prost(message, tag = "3")]
        ItemDeleted(super::ItemDeletedEvent),
        #[prost(message, tag = "4")]
        Notification(super::NotificationEvent),
        #[prost(message, tag = "5")]
        PresenceChanged(super::PresenceChangedEvent),
        #[prost(message, tag = "6")]
        RateLimitExceeded(super::RateLimitInfo),
    }
}
