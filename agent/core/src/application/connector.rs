// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Connector
//!
//! Wires the two streams and their workers into one supervised unit:
//!
//! ```text
//!  watcher ──► workload_events ──► EventPublisher ──► EventStream ──► control plane
//!  ResyncTimer ──────┘
//!
//!  control plane ──► CommandStream ──► CommandDispatcher ──► DiagnosticCollector ──► reports
//!
//!  watcher ──► cluster_events ──► EventReporter ──► ReportEvent
//!  LinkerdInfoReporter ──────────────────────────► ReportLinkerdInfo
//! ```
//!
//! The two streams are independent: a stall on one never blocks the other.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements internal responsibilities for connector

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use super::command_stream::CommandStream;
use super::diagnostic_collector::{CollectorSettings, DiagnosticCollector};
use super::dispatcher::{CommandDispatcher, DispatcherSettings};
use super::event_reporter::EventReporter;
use super::event_stream::{EventPublisher, EventStream};
use super::linkerd_info::LinkerdInfoReporter;
use super::resync::ResyncTimer;
use crate::domain::agent_config::AgentConfigSpec;
use crate::domain::auth::AuthContext;
use crate::domain::control_plane::{ClusterEvent, ControlPlaneApi, MeshInfoSource};
use crate::domain::diagnostics::PodDataSource;
use crate::domain::workload::{WorkloadEvent, WorkloadSource};
use crate::infrastructure::reconnecting_stream::StreamState;

const CLUSTER_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub reconnect_interval: Duration,
    pub event_channel_capacity: usize,
    pub resync_interval: Duration,
    pub linkerd_info_interval: Duration,
    pub collector: CollectorSettings,
    pub dispatcher: DispatcherSettings,
}

impl ConnectorSettings {
    pub fn from_config(spec: &AgentConfigSpec) -> Self {
        Self {
            reconnect_interval: spec.streams.reconnect_interval,
            event_channel_capacity: spec.streams.event_channel_capacity,
            resync_interval: spec.streams.resync_interval,
            linkerd_info_interval: spec.kubernetes.linkerd_info_interval,
            collector: CollectorSettings::from_config(&spec.diagnostics, &spec.kubernetes),
            dispatcher: DispatcherSettings::from(&spec.diagnostics),
        }
    }
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfigSpec::default())
    }
}

/// Collaborators the connector runs against.
pub struct Connector {
    pub api: Arc<dyn ControlPlaneApi>,
    pub auth: AuthContext,
    pub workloads: Arc<dyn WorkloadSource>,
    pub pods: Arc<dyn PodDataSource>,
    /// `None` disables the Linkerd info side channel.
    pub mesh: Option<Arc<dyn MeshInfoSource>>,
    pub settings: ConnectorSettings,
}

impl Connector {
    /// Spawns every worker and returns immediately.
    ///
    /// All workers stop when `shutdown` is cancelled; await
    /// [`ConnectorHandle::join`] to wait for them.
    pub fn start(self, shutdown: CancellationToken) -> ConnectorHandle {
        let Connector {
            api,
            auth,
            workloads,
            pods,
            mesh,
            settings,
        } = self;

        let tasks = TaskTracker::new();
        let (workload_events, workload_rx) = mpsc::channel(settings.event_channel_capacity.max(1));
        let (cluster_events, cluster_rx) = mpsc::channel(CLUSTER_EVENT_CAPACITY);

        // Closed by the publisher once its current send is done
        let events = Arc::new(EventStream::new(
            api.clone(),
            auth.clone(),
            settings.reconnect_interval,
            CancellationToken::new(),
        ));
        let commands = Arc::new(CommandStream::new(
            api.clone(),
            auth,
            settings.reconnect_interval,
            shutdown.child_token(),
        ));
        let event_state = events.subscribe();
        let command_state = commands.subscribe();

        tasks.spawn(EventPublisher::new(events, workload_rx).run(shutdown.clone()));
        tasks.spawn(
            ResyncTimer::new(workloads, workload_events.clone(), settings.resync_interval)
                .run(shutdown.clone()),
        );

        let collector = Arc::new(DiagnosticCollector::new(api.clone(), pods, settings.collector));
        tasks.spawn(CommandDispatcher::new(commands, collector, settings.dispatcher).run(shutdown.clone()));

        tasks.spawn(EventReporter::new(api.clone(), cluster_rx).run(shutdown.clone()));
        if let Some(mesh) = mesh {
            tasks.spawn(
                LinkerdInfoReporter::new(api, mesh, settings.linkerd_info_interval)
                    .run(shutdown.clone()),
            );
        }

        tasks.close();
        info!("connector started");

        ConnectorHandle {
            workload_events,
            cluster_events,
            event_state,
            command_state,
            tasks,
        }
    }
}

pub struct ConnectorHandle {
    workload_events: mpsc::Sender<WorkloadEvent>,
    cluster_events: mpsc::Sender<ClusterEvent>,
    event_state: watch::Receiver<StreamState>,
    command_state: watch::Receiver<StreamState>,
    tasks: TaskTracker,
}

impl ConnectorHandle {
    /// Producer side of the event stream. Sends wait while the publisher is
    /// behind, which bounds memory during a long outage.
    pub fn workload_events(&self) -> mpsc::Sender<WorkloadEvent> {
        self.workload_events.clone()
    }

    pub fn cluster_events(&self) -> mpsc::Sender<ClusterEvent> {
        self.cluster_events.clone()
    }

    pub fn event_state(&self) -> watch::Receiver<StreamState> {
        self.event_state.clone()
    }

    pub fn command_state(&self) -> watch::Receiver<StreamState> {
        self.command_state.clone()
    }

    /// Waits for every worker to stop, including in-flight collections.
    pub async fn join(self) {
        let ConnectorHandle {
            workload_events,
            cluster_events,
            tasks,
            ..
        } = self;
        drop(workload_events);
        drop(cluster_events);
        tasks.wait().await;
        info!("connector stopped");
    }
}
