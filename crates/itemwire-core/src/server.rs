// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC server for itemwire-core.
//!
//! Provides two components:
//! - Item Server: Accepts client connections and routes item requests to handlers
//! - Client Registry: Tracks live connections so notifications can be pushed to them

/// Item request routing and the admission gate.
pub mod item_server;

/// Connected-client tracking and event push.
pub mod registry;

pub use item_server::{ItemServerState, run_item_server};
pub use registry::{ClientRegistry, ConnectionState};
