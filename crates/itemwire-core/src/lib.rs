// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Itemwire Core - Item Synchronization Service
//!
//! This crate provides the server side of itemwire. It owns the item store,
//! makes keyed writes idempotent, and pushes change notifications to every
//! connected client through a transactional outbox, persisting all state to
//! PostgreSQL.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Clients                                │
//! │                     (itemwire-sdk, CLI)                         │
//! └─────────────────────────────────────────────────────────────────┘
//!            │ requests (bi streams)        ▲ events (uni streams)
//!            ▼                              │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       itemwire-core                             │
//! │                        (This Crate)                             │
//! │                                                                 │
//! │   admission ──► hello auth ──► handlers ──► persistence         │
//! │   (rate limits)                    │            │               │
//! │                                    │   item row + outbox row    │
//! │                                    │     (one transaction)      │
//! │                                    ▼            │               │
//! │   client registry ◄── outbox dispatcher ◄───────┘               │
//! │   (push to all)        (poll loop)                              │
//! └─────────────────────────────────────────────────────────────────┘
//!            │
//!            ▼
//! ┌───────────────────────┐
//! │      PostgreSQL       │
//! │  (items, idempotency, │
//! │   outbox)             │
//! └───────────────────────┘
//! ```
//!
//! # Item Protocol
//!
//! One QUIC server handles all client traffic. Each request rides its own
//! bidirectional stream; server pushes ride unidirectional streams.
//!
//! ## Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `Hello` | Bind a principal to the connection; required before item operations |
//! | `CreateItem` | Create an item (server-generated id, optional idempotency key) |
//! | `UpdateItem` | Replace an item's name and description |
//! | `DeleteItem` | Delete an item |
//! | `GetItem` | Look up one item; missing items report `found: false` |
//! | `ListItems` | List all items, newest first |
//! | `NotifyPresence` | Broadcast a presence change to connected clients |
//! | `HealthCheck` | Service status and version; no hello required |
//!
//! ## Request Lifecycle
//!
//! Every item request passes three gates in order:
//!
//! 1. **Burst bucket**: per-connection token bucket absorbing short spikes
//! 2. **Principal window**: segmented sliding window shared by all of a
//!    principal's connections
//! 3. **Hello requirement**: requests before hello are rejected with
//!    `AUTH_REQUIRED`
//!
//! Rate limits come first so an unauthenticated flood cannot dodge them.
//! `Hello` and `HealthCheck` bypass all three.
//!
//! ## Write Path
//!
//! Writes stage their notification in the same database transaction as the
//! item mutation. A background dispatcher polls the outbox and fans each
//! notification out to every connected client, so a crash between commit and
//! push never loses a notification. Keyed writes store their encoded
//! response and replay it when the same key comes back within the TTL.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `ITEMWIRE_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `ITEMWIRE_QUIC_PORT` | No | `8001` | Item QUIC server port |
//! | `ITEMWIRE_OUTBOX_POLL_MS` | No | `1000` | Outbox poll interval in milliseconds |
//! | `ITEMWIRE_OUTBOX_BATCH_SIZE` | No | `100` | Outbox rows fetched per cycle |
//! | `ITEMWIRE_OUTBOX_MAX_RETRIES` | No | `5` | Delivery attempts before a row is parked |
//! | `ITEMWIRE_OUTBOX_DEAD_LETTER` | No | `false` | Count unrecognized rows as failures |
//! | `ITEMWIRE_IDEMPOTENCY_TTL_HOURS` | No | `24` | Replay window for keyed writes |
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`error`]: Error types with RPC error code mapping
//! - [`handlers`]: Item protocol request handlers
//! - [`idempotency`]: Replay gate for keyed writes
//! - [`migrations`]: Embedded schema migrations
//! - [`notifications`]: Typed notifications and the delivery sink
//! - [`outbox`]: Background outbox dispatcher
//! - [`persistence`]: PostgreSQL and SQLite persistence backends
//! - [`rate_limit`]: Admission limiters
//! - [`server`]: QUIC server, request routing, client registry

#![deny(missing_docs)]

/// Server configuration loaded from environment variables.
pub mod config;

/// Error types for core operations with RPC error code mapping.
pub mod error;

/// Item protocol handlers (writes, reads, presence, health).
pub mod handlers;

/// Replay gate that makes keyed writes idempotent.
pub mod idempotency;

/// Embedded schema migrations for both database backends.
pub mod migrations;

/// Typed change notifications and the delivery sink trait.
pub mod notifications;

/// Background dispatcher that drains the outbox to connected clients.
pub mod outbox;

/// Database operations for items, idempotency records, and the outbox.
pub mod persistence;

/// Admission rate limiting (per-principal windows, per-connection buckets).
pub mod rate_limit;

/// QUIC server, request routing, and the connected-client registry.
#[cfg(feature = "server")]
pub mod server;
