// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Forwards Kubernetes Events to the control plane as unary calls.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements internal responsibilities for event reporter

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::control_plane::{ClusterEvent, ControlPlaneApi};

pub struct EventReporter {
    api: Arc<dyn ControlPlaneApi>,
    events: mpsc::Receiver<ClusterEvent>,
}

impl EventReporter {
    pub fn new(api: Arc<dyn ControlPlaneApi>, events: mpsc::Receiver<ClusterEvent>) -> Self {
        Self { api, events }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("event reporter started");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let owner = event.owner.kind();
            match self.api.report_event(event).await {
                Ok(()) => {
                    metrics::counter!("tether_reports_total", "rpc" => "add_event", "outcome" => "ok")
                        .increment(1);
                    debug!(owner = %owner, "cluster event reported");
                }
                Err(err) => {
                    // Not retried
                    metrics::counter!("tether_reports_total", "rpc" => "add_event", "outcome" => "error")
                        .increment(1);
                    warn!(owner = %owner, error = %err, "failed to report cluster event");
                }
            }
        }

        info!("event reporter stopped");
    }
}
