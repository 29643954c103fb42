// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Itemwire Protocol - QUIC + Protobuf communication layer
//!
//! The wire protocol spoken between itemwire clients and itemwire-core:
//! request/response calls over bidirectional QUIC streams, server-push
//! events over unidirectional ones.
//!
//! # Layering
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │ RPC: request/response calls + server-push events   │
//! ├────────────────────────────────────────────────────┤
//! │ Framing: length-prefixed protobuf (prost)          │
//! ├────────────────────────────────────────────────────┤
//! │ Transport: QUIC (quinn)                            │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! Every call carries a [`wire::RpcRequest`] envelope and receives a
//! [`wire::RpcResponse`] envelope back. Events pushed by the server (item
//! changes, presence, rate-limit notices) arrive as [`wire::Event`] frames,
//! one per unidirectional stream.
//!
//! # Usage
//!
//! ```ignore
//! use itemwire_protocol::{ItemwireClient, wire};
//!
//! let client = ItemwireClient::localhost()?;
//! client.connect().await?;
//!
//! let request = wire::RpcRequest {
//!     request: Some(wire::rpc_request::Request::GetItem(wire::GetItemRequest {
//!         id: "c2a2a9e4".to_string(),
//!     })),
//! };
//!
//! let response: wire::RpcResponse = client.request(&request).await?;
//! ```

pub mod client;
pub mod frame;
pub mod server;
pub mod wire;

pub use client::{ClientError, ItemwireClient, ItemwireClientConfig};
pub use frame::{Frame, FrameError, MessageType};
pub use server::{
    ConnectionHandler, ItemwireServer, ItemwireServerConfig, ServerError, StreamHandler,
};
