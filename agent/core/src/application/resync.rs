// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Periodic full workload resync
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements internal responsibilities for resync

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::workload::{WorkloadEvent, WorkloadSource};

/// Emits a `FullList` of every known workload on a fixed period.
pub struct ResyncTimer {
    source: Arc<dyn WorkloadSource>,
    events: mpsc::Sender<WorkloadEvent>,
    interval: Duration,
}

impl ResyncTimer {
    pub fn new(
        source: Arc<dyn WorkloadSource>,
        events: mpsc::Sender<WorkloadEvent>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            events,
            interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_seconds = self.interval.as_secs(), "resync timer started");

        // First tick one full period after start
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.resync().await {
                        break;
                    }
                }
            }
        }

        info!("resync timer stopped");
    }

    /// Queues one `FullList`. Returns `false` once the publisher is gone.
    pub async fn resync(&self) -> bool {
        let workloads = match self.source.list_all().await {
            Ok(workloads) => workloads,
            Err(err) => {
                warn!(error = %err, "failed to list workloads for resync");
                return true;
            }
        };

        info!(workloads = workloads.len(), "queueing full workload list");
        self.events.send(WorkloadEvent::FullList(workloads)).await.is_ok()
    }
}
