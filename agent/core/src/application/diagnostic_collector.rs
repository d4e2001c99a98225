// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Diagnostic Collector
//!
//! Executes one [`AgentCommand`] end to end.
//!
//! For `GetProxyDiagnostics` six artifacts are fetched concurrently:
//!
//! | artifact             | source                                             |
//! |----------------------|----------------------------------------------------|
//! | `logs`               | full proxy container log                           |
//! | `metrics`            | `metrics_samples` scrapes, `metrics_sample_interval` apart |
//! | `pod_manifest`       | the target pod                                     |
//! | `linkerd_config_map` | `linkerd-config` in the control-plane namespace    |
//! | `node_manifests`     | every node in the cluster                          |
//! | `service_manifest`   | `default/kubernetes`                               |
//!
//! A failed artifact is logged against the diagnostic ID and left empty; the
//! bundle is reported regardless. Each sub-fetch is bounded by
//! `max_collection_duration` and by the cancellation token of the task.
//!
//! `GetProxyLogs` fetches the last `lines` timestamped log lines (none for 0)
//! and reports them keyed by pod.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements internal responsibilities for diagnostic collector

use bytes::Bytes;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::agent_config::{DiagnosticsConfig, KubernetesConfig};
use crate::domain::command::{AgentCommand, PodRef};
use crate::domain::control_plane::ControlPlaneApi;
use crate::domain::diagnostics::{
    DataSourceError, DiagnosticBundle, LogOptions, ObjectKind, ObjectRef, PodDataSource,
    ProxyLogReport,
};

pub const PROXY_CONFIG_MAP: &str = "linkerd-config";
pub const API_SERVER_SERVICE: &str = "kubernetes";
pub const API_SERVER_NAMESPACE: &str = "default";

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub metrics_samples: u32,
    pub metrics_sample_interval: Duration,
    pub max_collection_duration: Duration,
    pub linkerd_namespace: String,
}

impl CollectorSettings {
    pub fn from_config(diagnostics: &DiagnosticsConfig, kubernetes: &KubernetesConfig) -> Self {
        Self {
            metrics_samples: diagnostics.metrics_samples,
            metrics_sample_interval: diagnostics.metrics_sample_interval,
            max_collection_duration: diagnostics.max_collection_duration,
            linkerd_namespace: kubernetes.linkerd_namespace.clone(),
        }
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self::from_config(&DiagnosticsConfig::default(), &KubernetesConfig::default())
    }
}

pub struct DiagnosticCollector {
    api: Arc<dyn ControlPlaneApi>,
    pods: Arc<dyn PodDataSource>,
    settings: CollectorSettings,
}

impl DiagnosticCollector {
    pub fn new(
        api: Arc<dyn ControlPlaneApi>,
        pods: Arc<dyn PodDataSource>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            api,
            pods,
            settings,
        }
    }

    /// Runs `command`, returning whether its result reached the control plane.
    pub async fn execute(&self, command: AgentCommand, cancel: CancellationToken) -> bool {
        match command {
            AgentCommand::GetProxyDiagnostics { pod, diagnostic_id } => {
                self.proxy_diagnostics(&pod, &diagnostic_id, &cancel).await
            }
            AgentCommand::GetProxyLogs { pod, lines } => self.proxy_logs(&pod, lines, &cancel).await,
        }
    }

    async fn proxy_diagnostics(
        &self,
        pod: &PodRef,
        diagnostic_id: &str,
        cancel: &CancellationToken,
    ) -> bool {
        info!(diagnostic_id, pod = %pod, "collecting proxy diagnostics");

        let bundle = self.collect(pod, diagnostic_id, cancel).await;
        let missing = bundle.missing();
        if !missing.is_empty() {
            warn!(diagnostic_id, missing = ?missing, "reporting partial diagnostics");
        }

        match self.api.report_diagnostics(bundle).await {
            Ok(()) => {
                record_report("proxy_diagnostics", "ok");
                info!(diagnostic_id, "proxy diagnostics reported");
                true
            }
            Err(err) => {
                record_report("proxy_diagnostics", "error");
                error!(diagnostic_id, error = %err, "failed to report proxy diagnostics");
                false
            }
        }
    }

    /// Gathers every artifact for `pod`. Never fails; missing artifacts are `None`.
    pub async fn collect(
        &self,
        pod: &PodRef,
        diagnostic_id: &str,
        cancel: &CancellationToken,
    ) -> DiagnosticBundle {
        let log_options = LogOptions::default();
        let pod_object = ObjectRef::pod(pod);
        let config_map = ObjectRef::new(
            ObjectKind::ConfigMap,
            PROXY_CONFIG_MAP,
            self.settings.linkerd_namespace.clone(),
        );
        let api_service = ObjectRef::new(ObjectKind::Service, API_SERVER_SERVICE, API_SERVER_NAMESPACE);

        let (logs, metrics_samples, pod_manifest, linkerd_config_map, node_manifests, service_manifest) = tokio::join!(
            self.artifact(diagnostic_id, "logs", cancel, self.pods.proxy_logs(pod, &log_options)),
            self.artifact(diagnostic_id, "metrics", cancel, self.sample_metrics(pod)),
            self.artifact(diagnostic_id, "pod_manifest", cancel, self.pods.manifest(&pod_object)),
            self.artifact(diagnostic_id, "linkerd_config_map", cancel, self.pods.manifest(&config_map)),
            self.artifact(diagnostic_id, "node_manifests", cancel, self.pods.node_manifests()),
            self.artifact(diagnostic_id, "service_manifest", cancel, self.pods.manifest(&api_service)),
        );

        DiagnosticBundle {
            diagnostic_id: diagnostic_id.to_string(),
            logs,
            metrics_samples,
            pod_manifest,
            linkerd_config_map,
            node_manifests,
            service_manifest,
        }
    }

    /// Scrapes the proxy admin endpoint `metrics_samples` times over one
    /// connection. Any failed scrape fails the whole series.
    async fn sample_metrics(&self, pod: &PodRef) -> Result<Vec<Bytes>, DataSourceError> {
        let endpoint = self.pods.proxy_admin(pod).await?;
        debug!(pod = %pod, address = endpoint.address(), "sampling proxy metrics");

        let count = self.settings.metrics_samples.max(1);
        let mut samples = Vec::with_capacity(count as usize);
        for sample in 0..count {
            if sample > 0 {
                tokio::time::sleep(self.settings.metrics_sample_interval).await;
            }
            samples.push(endpoint.scrape_metrics().await?);
        }
        Ok(samples)
    }

    async fn proxy_logs(&self, pod: &PodRef, lines: u32, cancel: &CancellationToken) -> bool {
        info!(pod = %pod, lines, "collecting proxy logs");

        let options = LogOptions {
            tail_lines: Some(i64::from(lines)),
            timestamps: true,
        };
        let logs = match self.bounded(cancel, self.pods.proxy_logs(pod, &options)).await {
            Ok(logs) => logs,
            Err(err) => {
                metrics::counter!("tether_diagnostic_subfetch_failures_total", "artifact" => "logs")
                    .increment(1);
                error!(pod = %pod, error = %err, "cannot obtain proxy logs");
                return false;
            }
        };

        let report = ProxyLogReport {
            pod: pod.clone(),
            lines: logs,
            timestamp: Utc::now(),
        };
        match self.api.report_logs(report).await {
            Ok(()) => {
                record_report("proxy_logs", "ok");
                debug!(pod = %pod, "proxy logs reported");
                true
            }
            Err(err) => {
                record_report("proxy_logs", "error");
                error!(pod = %pod, error = %err, "failed to report proxy logs");
                false
            }
        }
    }

    async fn artifact<T>(
        &self,
        diagnostic_id: &str,
        artifact: &'static str,
        cancel: &CancellationToken,
        fetch: impl Future<Output = Result<T, DataSourceError>>,
    ) -> Option<T> {
        match self.bounded(cancel, fetch).await {
            Ok(value) => Some(value),
            Err(err) => {
                metrics::counter!("tether_diagnostic_subfetch_failures_total", "artifact" => artifact)
                    .increment(1);
                warn!(
                    diagnostic_id,
                    artifact,
                    error = %err,
                    "cannot obtain {} for diagnostic {}",
                    artifact,
                    diagnostic_id
                );
                None
            }
        }
    }

    async fn bounded<T>(
        &self,
        cancel: &CancellationToken,
        fetch: impl Future<Output = Result<T, DataSourceError>>,
    ) -> Result<T, DataSourceError> {
        let budget = self.settings.max_collection_duration;
        tokio::select! {
            _ = cancel.cancelled() => Err(DataSourceError::Cancelled),
            outcome = tokio::time::timeout(budget, fetch) => {
                outcome.unwrap_or(Err(DataSourceError::TimedOut(budget)))
            }
        }
    }
}

fn record_report(rpc: &'static str, outcome: &'static str) {
    metrics::counter!("tether_reports_total", "rpc" => rpc, "outcome" => outcome).increment(1);
}
