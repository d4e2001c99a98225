// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fakes for connector integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use tether_agent_core::application::diagnostic_collector::CollectorSettings;
use tether_agent_core::application::dispatcher::DispatcherSettings;
use tether_agent_core::application::ConnectorSettings;
use tether_agent_core::domain::{
    AuthContext, AuthPolicyInfo, ClusterEvent, CommandSource, ControlPlaneApi, DataSourceError,
    DecodedCommand, DiagnosticBundle, EventFrame, EventSink, LinkerdInfo, LogOptions, Manifest,
    ObjectRef, PodDataSource, PodRef, ProxyAdminEndpoint, ProxyLogReport, StreamSink,
    StreamSource, TransportError, Workload, WorkloadEvent, WorkloadSource,
};

/// Connector settings scaled down for tests.
pub fn fast_settings() -> ConnectorSettings {
    ConnectorSettings {
        reconnect_interval: Duration::from_millis(20),
        event_channel_capacity: 64,
        resync_interval: Duration::from_secs(3600),
        linkerd_info_interval: Duration::from_secs(3600),
        collector: CollectorSettings {
            metrics_samples: 2,
            metrics_sample_interval: Duration::from_millis(10),
            max_collection_duration: Duration::from_secs(5),
            linkerd_namespace: "linkerd".to_string(),
        },
        dispatcher: DispatcherSettings {
            max_concurrent: 8,
            dedupe_ttl: Duration::from_secs(600),
            drain_grace: Duration::from_secs(1),
        },
    }
}

pub fn auth() -> AuthContext {
    AuthContext::new("agent-1", "key-1")
}

pub fn deployment(name: &str) -> Workload {
    Workload::Deployment {
        manifest: Manifest::from_json(&serde_json::json!({
            "kind": "Deployment",
            "metadata": { "name": name, "namespace": "shop" },
        }))
        .unwrap(),
        replica_sets: vec![],
    }
}

/// Polls `condition` every 10ms, panicking after 5s.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

type Connection = Arc<Mutex<Vec<EventFrame>>>;

/// In-memory control plane recording everything the agent sends.
pub struct RecordingControlPlane {
    connections: Mutex<Vec<Connection>>,
    open_failures: AtomicUsize,
    broken_sends: Arc<AtomicUsize>,
    send_gate: SendGate,
    command_streams: AtomicUsize,
    failed_reports: AtomicUsize,
    report_attempts: Mutex<Vec<String>>,
    command_tx: mpsc::UnboundedSender<DecodedCommand>,
    command_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<DecodedCommand>>>,
    diagnostics: Mutex<Vec<DiagnosticBundle>>,
    logs: Mutex<Vec<ProxyLogReport>>,
    events: Mutex<Vec<ClusterEvent>>,
    linkerd: Mutex<Vec<LinkerdInfo>>,
}

impl RecordingControlPlane {
    pub fn new() -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connections: Mutex::new(Vec::new()),
            open_failures: AtomicUsize::new(0),
            broken_sends: Arc::new(AtomicUsize::new(0)),
            send_gate: SendGate::default(),
            command_streams: AtomicUsize::new(0),
            failed_reports: AtomicUsize::new(0),
            report_attempts: Mutex::new(Vec::new()),
            command_tx,
            command_rx: Arc::new(tokio::sync::Mutex::new(command_rx)),
            diagnostics: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            linkerd: Mutex::new(Vec::new()),
        })
    }

    /// The next `n` event stream opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.open_failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` non-auth frames break the stream they are sent on.
    pub fn break_next_sends(&self, n: usize) {
        self.broken_sends.store(n, Ordering::SeqCst);
    }

    /// Non-auth frames block until [`release_sends`](Self::release_sends).
    pub fn hold_sends(&self) {
        *self.send_gate.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_sends(&self) {
        if let Some(gate) = self.send_gate.gate.lock().take() {
            gate.close();
        }
    }

    /// Sends currently blocked by [`hold_sends`](Self::hold_sends).
    pub fn held_sends(&self) -> usize {
        self.send_gate.waiting.load(Ordering::SeqCst)
    }

    /// The next `n` diagnostic reports are rejected.
    pub fn fail_next_reports(&self, n: usize) {
        self.failed_reports.store(n, Ordering::SeqCst);
    }

    /// Diagnostic IDs of every report attempt, including rejected ones.
    pub fn report_attempts(&self) -> Vec<String> {
        self.report_attempts.lock().clone()
    }

    pub fn push_command(&self, command: DecodedCommand) {
        let _ = self.command_tx.send(command);
    }

    /// Frames received, one list per physical event stream.
    pub fn connections(&self) -> Vec<Vec<EventFrame>> {
        self.connections
            .lock()
            .iter()
            .map(|frames| frames.lock().clone())
            .collect()
    }

    pub fn auth_frames(&self) -> usize {
        self.connections()
            .iter()
            .flatten()
            .filter(|frame| matches!(frame, EventFrame::Auth(_)))
            .count()
    }

    /// Every workload event received, in arrival order.
    pub fn workload_events(&self) -> Vec<WorkloadEvent> {
        self.connections()
            .into_iter()
            .flatten()
            .filter_map(|frame| match frame {
                EventFrame::Event(event) => Some(event),
                EventFrame::Auth(_) => None,
            })
            .collect()
    }

    pub fn command_streams(&self) -> usize {
        self.command_streams.load(Ordering::SeqCst)
    }

    pub fn diagnostics(&self) -> Vec<DiagnosticBundle> {
        self.diagnostics.lock().clone()
    }

    pub fn logs(&self) -> Vec<ProxyLogReport> {
        self.logs.lock().clone()
    }

    pub fn cluster_events(&self) -> Vec<ClusterEvent> {
        self.events.lock().clone()
    }

    pub fn linkerd_info(&self) -> Vec<LinkerdInfo> {
        self.linkerd.lock().clone()
    }
}

#[derive(Clone, Default)]
struct SendGate {
    gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    waiting: Arc<AtomicUsize>,
}

impl SendGate {
    async fn pass(&self) {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            // Closed on release
            let _ = gate.acquire().await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct RecordingSink {
    frames: Connection,
    broken_sends: Arc<AtomicUsize>,
    send_gate: SendGate,
}

#[async_trait]
impl StreamSink<EventFrame> for RecordingSink {
    async fn send(&mut self, message: EventFrame) -> Result<(), TransportError> {
        if !matches!(message, EventFrame::Auth(_)) {
            self.send_gate.pass().await;
        }
        if !matches!(message, EventFrame::Auth(_))
            && self
                .broken_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(TransportError::Rpc {
                code: "Unavailable".to_string(),
                message: "connection reset".to_string(),
            });
        }
        self.frames.lock().push(message);
        Ok(())
    }

    async fn close_send(&mut self) {}
}

struct FeedSource {
    feed: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<DecodedCommand>>>,
}

#[async_trait]
impl StreamSource<DecodedCommand> for FeedSource {
    async fn recv(&mut self) -> Result<Option<DecodedCommand>, TransportError> {
        Ok(self.feed.lock().await.recv().await)
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl ControlPlaneApi for RecordingControlPlane {
    async fn open_event_stream(&self) -> Result<EventSink, TransportError> {
        if self
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let frames = Connection::default();
        self.connections.lock().push(frames.clone());
        Ok(Box::new(RecordingSink {
            frames,
            broken_sends: self.broken_sends.clone(),
            send_gate: self.send_gate.clone(),
        }))
    }

    async fn open_command_stream(&self, _auth: &AuthContext) -> Result<CommandSource, TransportError> {
        self.command_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FeedSource {
            feed: self.command_rx.clone(),
        }))
    }

    async fn report_diagnostics(&self, bundle: DiagnosticBundle) -> Result<(), TransportError> {
        self.report_attempts.lock().push(bundle.diagnostic_id.clone());
        if self
            .failed_reports
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Rpc {
                code: "Unavailable".to_string(),
                message: "control plane unavailable".to_string(),
            });
        }
        self.diagnostics.lock().push(bundle);
        Ok(())
    }

    async fn report_logs(&self, report: ProxyLogReport) -> Result<(), TransportError> {
        self.logs.lock().push(report);
        Ok(())
    }

    async fn report_event(&self, event: ClusterEvent) -> Result<(), TransportError> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn report_linkerd_info(&self, info: LinkerdInfo) -> Result<(), TransportError> {
        self.linkerd.lock().push(info);
        Ok(())
    }
}

/// Fixed workload cache.
#[derive(Default)]
pub struct StaticWorkloads {
    workloads: Mutex<Vec<Workload>>,
}

impl StaticWorkloads {
    pub fn new(workloads: Vec<Workload>) -> Arc<Self> {
        Arc::new(Self {
            workloads: Mutex::new(workloads),
        })
    }
}

#[async_trait]
impl WorkloadSource for StaticWorkloads {
    async fn list_all(&self) -> Result<Vec<Workload>, tether_agent_core::domain::WatchError> {
        Ok(self.workloads.lock().clone())
    }
}

/// Pod data source with scriptable failures and gates.
#[derive(Default)]
pub struct ScriptedPods {
    failing: Mutex<HashSet<&'static str>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    log_requests: Mutex<Vec<(PodRef, LogOptions)>>,
}

impl ScriptedPods {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes one artifact fail: `logs`, `metrics`, `pod_manifest`,
    /// `linkerd_config_map`, `node_manifests` or `service_manifest`.
    pub fn fail(&self, artifact: &'static str) {
        self.failing.lock().insert(artifact);
    }

    /// Log requests for `pod` block until [`release`](Self::release).
    pub fn hold(&self, pod: &str) {
        self.gates
            .lock()
            .insert(pod.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, pod: &str) {
        if let Some(gate) = self.gates.lock().get(pod) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn log_requests(&self) -> Vec<(PodRef, LogOptions)> {
        self.log_requests.lock().clone()
    }

    fn check(&self, artifact: &'static str) -> Result<(), DataSourceError> {
        if self.failing.lock().contains(artifact) {
            return Err(DataSourceError::Api(format!("{} unavailable", artifact)));
        }
        Ok(())
    }
}

struct StaticAdmin;

#[async_trait]
impl ProxyAdminEndpoint for StaticAdmin {
    fn address(&self) -> &str {
        "10.0.0.7:4191"
    }

    async fn scrape_metrics(&self) -> Result<Bytes, DataSourceError> {
        Ok(Bytes::from_static(b"request_total 1\n"))
    }
}

#[async_trait]
impl PodDataSource for ScriptedPods {
    async fn proxy_logs(&self, pod: &PodRef, options: &LogOptions) -> Result<Bytes, DataSourceError> {
        self.log_requests.lock().push((pod.clone(), options.clone()));
        let gate = self.gates.lock().get(&pod.name).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        self.check("logs")?;
        Ok(Bytes::from(format!("logs of {}\n", pod.name)))
    }

    async fn proxy_admin(&self, _pod: &PodRef) -> Result<Box<dyn ProxyAdminEndpoint>, DataSourceError> {
        self.check("metrics")?;
        Ok(Box::new(StaticAdmin))
    }

    async fn manifest(&self, object: &ObjectRef) -> Result<Manifest, DataSourceError> {
        let artifact = match object.kind.as_str() {
            "Pod" => "pod_manifest",
            "ConfigMap" => "linkerd_config_map",
            _ => "service_manifest",
        };
        self.check(artifact)?;
        Ok(Manifest::from_json(&serde_json::json!({
            "kind": object.kind.as_str(),
            "metadata": { "name": object.name, "namespace": object.namespace },
        }))?)
    }

    async fn node_manifests(&self) -> Result<Vec<Manifest>, DataSourceError> {
        self.check("node_manifests")?;
        Ok(vec![Manifest::new(&b"{\"kind\":\"Node\"}"[..]); 2])
    }
}

/// Mesh source returning a fixed policy.
pub struct StaticMesh;

#[async_trait]
impl tether_agent_core::domain::MeshInfoSource for StaticMesh {
    async fn auth_policy(&self) -> Result<AuthPolicyInfo, DataSourceError> {
        Ok(AuthPolicyInfo {
            servers: vec![Manifest::new(&b"{\"kind\":\"Server\"}"[..])],
            server_authorizations: vec![],
        })
    }
}
