// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbox dispatch loop.
//!
//! Item mutations commit their notification rows in the same transaction as
//! the data change. The [`OutboxDispatcher`] polls those rows on an interval,
//! delivers them to a [`NotificationSink`], and records every row's outcome
//! in one batch transaction at the end of the cycle. Delivery is therefore
//! at-least-once; a crash between delivery and bookkeeping replays the row.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::notifications::{Notification, NotificationSink};
use crate::persistence::{OutboxOutcome, Persistence};

/// Widest error text stored in an outbox row.
const MAX_STORED_ERROR_LEN: usize = 2000;

/// Tuning knobs for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often the outbox is polled.
    pub poll_interval: Duration,
    /// Maximum rows drained per cycle.
    pub batch_size: u32,
    /// Delivery attempts before a row stops being fetched.
    pub max_retries: u32,
    /// Treat rows with unrecognized message types as failures so they burn
    /// through their retries and get parked. When false such rows are left
    /// pending and logged each cycle.
    pub dead_letter_unrecognized: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            max_retries: 5,
            dead_letter_unrecognized: false,
        }
    }
}

/// Counters from one dispatch cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Rows fetched from the outbox.
    pub fetched: usize,
    /// Rows delivered to the sink.
    pub delivered: usize,
    /// Rows whose delivery attempt failed.
    pub failed: usize,
    /// Unrecognized rows left untouched.
    pub skipped: usize,
    /// Expired idempotency records removed.
    pub reaped: u64,
}

/// Background loop that drains the outbox into a notification sink.
pub struct OutboxDispatcher {
    persistence: Arc<dyn Persistence>,
    sink: Arc<dyn NotificationSink>,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    /// Create a dispatcher with default tuning.
    pub fn new(persistence: Arc<dyn Persistence>, sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_config(persistence, sink, DispatcherConfig::default())
    }

    /// Create a dispatcher with explicit tuning.
    pub fn with_config(
        persistence: Arc<dyn Persistence>,
        sink: Arc<dyn NotificationSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            persistence,
            sink,
            config,
        }
    }

    /// Run until the shutdown signal flips to true, then drain once and exit.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "Outbox dispatcher started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_cycle().await {
                        Ok(stats) if stats.fetched > 0 => {
                            debug!(
                                fetched = stats.fetched,
                                delivered = stats.delivered,
                                failed = stats.failed,
                                skipped = stats.skipped,
                                "Outbox cycle complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("Outbox cycle failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Outbox dispatcher draining before shutdown");
                        if let Err(e) = self.run_cycle().await {
                            error!("Final outbox cycle failed: {}", e);
                        }
                        break;
                    }
                }
            }
        }

        info!("Outbox dispatcher stopped");
    }

    /// One poll: reap expired idempotency records, then fetch, deliver, record.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let mut stats = CycleStats::default();

        stats.reaped = self
            .persistence
            .delete_expired_idempotency_records(Utc::now())
            .await?;
        if stats.reaped > 0 {
            debug!(count = stats.reaped, "Reaped expired idempotency records");
        }

        let batch = self
            .persistence
            .fetch_pending_outbox(
                i64::from(self.config.batch_size),
                self.config.max_retries as i32,
            )
            .await?;
        stats.fetched = batch.len();
        if batch.is_empty() {
            return Ok(stats);
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        for row in &batch {
            match Notification::from_stored(&row.message_type, &row.payload) {
                Ok(Some(notification)) => match self.sink.deliver(&notification).await {
                    Ok(()) => {
                        stats.delivered += 1;
                        outcomes.push(OutboxOutcome::Delivered {
                            id: row.id,
                            processed_at: Utc::now(),
                        });
                    }
                    Err(e) => {
                        stats.failed += 1;
                        warn!(
                            id = row.id,
                            message_type = %row.message_type,
                            "Outbox delivery failed: {}",
                            e
                        );
                        outcomes.push(OutboxOutcome::Failed {
                            id: row.id,
                            error: truncate_error(&e.to_string()),
                        });
                    }
                },
                Ok(None) => {
                    if self.config.dead_letter_unrecognized {
                        stats.failed += 1;
                        outcomes.push(OutboxOutcome::Failed {
                            id: row.id,
                            error: format!(
                                "unrecognized message type '{}'",
                                row.message_type
                            ),
                        });
                    } else {
                        stats.skipped += 1;
                        warn!(
                            id = row.id,
                            message_type = %row.message_type,
                            "Skipping unrecognized outbox message type"
                        );
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(id = row.id, "Outbox payload is not decodable: {}", e);
                    outcomes.push(OutboxOutcome::Failed {
                        id: row.id,
                        error: truncate_error(&e.to_string()),
                    });
                }
            }
        }

        self.persistence.apply_outbox_outcomes(&outcomes).await?;
        Ok(stats)
    }
}

fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_STORED_ERROR_LEN {
        error.to_string()
    } else {
        error.chars().take(MAX_STORED_ERROR_LEN).collect()
    }
}
