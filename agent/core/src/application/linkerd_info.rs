// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Linkerd Info Reporter
//!
//! Periodically snapshots mesh authorization policy (Servers and
//! ServerAuthorizations) and reports it on the `LinkerdInfo` call. The first
//! report is sent immediately on start.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements internal responsibilities for linkerd info

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::control_plane::{ControlPlaneApi, LinkerdInfo, MeshInfoSource};

pub struct LinkerdInfoReporter {
    api: Arc<dyn ControlPlaneApi>,
    mesh: Arc<dyn MeshInfoSource>,
    interval: Duration,
}

impl LinkerdInfoReporter {
    pub fn new(api: Arc<dyn ControlPlaneApi>, mesh: Arc<dyn MeshInfoSource>, interval: Duration) -> Self {
        Self {
            api,
            mesh,
            interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_seconds = self.interval.as_secs(), "linkerd info reporter started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.report().await,
            }
        }

        info!("linkerd info reporter stopped");
    }

    /// Sends one auth policy snapshot. Failures are logged and skipped.
    pub async fn report(&self) {
        let policy = match self.mesh.auth_policy().await {
            Ok(policy) => policy,
            Err(err) => {
                warn!(error = %err, "failed to read mesh auth policy");
                return;
            }
        };

        debug!(
            servers = policy.servers.len(),
            server_authorizations = policy.server_authorizations.len(),
            "reporting auth policy"
        );
        let outcome = match self.api.report_linkerd_info(LinkerdInfo::AuthPolicy(policy)).await {
            Ok(()) => "ok",
            Err(err) => {
                warn!(error = %err, "failed to report linkerd info");
                "error"
            }
        };
        metrics::counter!("tether_reports_total", "rpc" => "linkerd_info", "outcome" => outcome)
            .increment(1);
    }
}
