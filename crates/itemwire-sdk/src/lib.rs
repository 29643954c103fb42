// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! # Itemwire SDK
//!
//! High-level client SDK for itemwire-core. Item CRUD over QUIC with
//! automatic idempotency keys, live server-push events, and a built-in
//! resilience pipeline.
//!
//! ## Features
//!
//! - **Item operations**: create, update, delete, get, and list items
//! - **Idempotent writes**: every write carries an idempotency key, generated
//!   automatically or supplied by the caller, so retries never duplicate work
//! - **Live events**: a broadcast stream of item changes, presence updates,
//!   and notifications pushed by the server
//! - **Resilience**: per-attempt timeouts, retries with exponential backoff
//!   and jitter, and a circuit breaker over a sliding failure window
//! - **Session management**: hello on connect, automatic re-hello when the
//!   server forgets the connection, and a reconnect schedule for outages
//! - **Presence and health**: explicit presence broadcasts and service
//!   health checks
//!
//! ## Quick Start
//!
//! ```ignore
//! use itemwire_sdk::ItemwireSdk;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect to a local itemwire-core with TLS verification disabled
//!     let sdk = ItemwireSdk::localhost("principal-1", "Alice")?;
//!     sdk.connect().await?;
//!
//!     // Writes are idempotent; a retried create never duplicates the item
//!     let item = sdk.create_item("Widget", "A fine widget").await?;
//!     println!("created {}", item.id);
//!
//!     let items = sdk.list_items().await?;
//!     println!("{} items total", items.len());
//!
//!     sdk.delete_item(&item.id).await?;
//!     sdk.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Events
//!
//! Every connected client receives a push stream of changes. Subscribe with
//! [`ItemwireSdk::events`]; each subscriber gets an independent receiver.
//!
//! ```ignore
//! let mut events = sdk.events();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         itemwire_sdk::ItemEvent::Created(item) => println!("new: {}", item.name),
//!         itemwire_sdk::ItemEvent::Deleted { item_id } => println!("gone: {item_id}"),
//!         other => println!("{other:?}"),
//!     }
//! }
//! ```
//!
//! ## Resilience
//!
//! Each request runs through a pipeline: the circuit breaker is consulted,
//! the attempt gets its own timeout, and transient failures are retried with
//! exponential backoff and jitter. The breaker opens when more than half of
//! the calls in a sliding window fail, rejects calls while open, and admits
//! a single probe after a cool-down. Rate-limit rejections surface as
//! [`SdkError::RateLimited`] without retries and, by default, without
//! counting against the breaker. Tune all of this via [`ResilienceConfig`].
//!
//! ## Environment Variables
//!
//! [`ItemwireSdk::from_env`] reads:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `ITEMWIRE_PRINCIPAL_ID` | yes | - | Stable identity for this client |
//! | `ITEMWIRE_USERNAME` | yes | - | Display name for presence |
//! | `ITEMWIRE_SERVER_ADDR` | no | `127.0.0.1:8001` | Server address |
//! | `ITEMWIRE_SERVER_NAME` | no | `localhost` | TLS server name |
//! | `ITEMWIRE_SKIP_CERT_VERIFICATION` | no | `false` | Accept any TLS cert |
//! | `ITEMWIRE_CONNECT_TIMEOUT_MS` | no | `10000` | Dial timeout |
//! | `ITEMWIRE_REQUEST_TIMEOUT_MS` | no | `30000` | Per-attempt timeout |
//!
//! ## Programmatic Configuration
//!
//! ```ignore
//! use itemwire_sdk::{ItemwireSdk, ResilienceConfig, SdkConfig};
//!
//! let config = SdkConfig::new("principal-1", "Alice")
//!     .with_server_addr("10.0.0.5:8001".parse()?)
//!     .with_server_name("itemwire.internal")
//!     .with_request_timeout_ms(5_000)
//!     .with_resilience(ResilienceConfig {
//!         max_retries: 2,
//!         ..Default::default()
//!     });
//! let sdk = ItemwireSdk::new(config)?;
//! ```

mod client;
mod config;
mod error;
mod resilience;
mod types;

pub use client::ItemwireSdk;
pub use config::SdkConfig;
pub use error::{Result, SdkError};
pub use resilience::ResilienceConfig;
pub use types::{HealthStatus, Item, ItemEvent, PresenceUpdate, RateLimit};

// Re-exported for callers that tune the underlying transport directly.
pub use itemwire_protocol::ItemwireClientConfig;
