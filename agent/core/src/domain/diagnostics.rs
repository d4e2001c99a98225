// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Diagnostic Domain Model
//!
//! Artifacts gathered for the control plane in response to diagnostic
//! commands, and the pod data source they are read from.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements internal responsibilities for diagnostics

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use super::command::PodRef;
use super::workload::Manifest;

/// Aggregate result of one `GetProxyDiagnostics` command.
///
/// Every artifact is optional: `None` marks a sub-fetch that failed, which is
/// not an error for the bundle as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticBundle {
    pub diagnostic_id: String,
    pub logs: Option<Bytes>,
    pub metrics_samples: Option<Vec<Bytes>>,
    pub pod_manifest: Option<Manifest>,
    pub linkerd_config_map: Option<Manifest>,
    pub node_manifests: Option<Vec<Manifest>>,
    pub service_manifest: Option<Manifest>,
}

impl DiagnosticBundle {
    pub fn new(diagnostic_id: impl Into<String>) -> Self {
        Self {
            diagnostic_id: diagnostic_id.into(),
            ..Default::default()
        }
    }

    /// Names of the artifacts that could not be collected.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.logs.is_none() {
            missing.push("logs");
        }
        if self.metrics_samples.is_none() {
            missing.push("metrics");
        }
        if self.pod_manifest.is_none() {
            missing.push("pod_manifest");
        }
        if self.linkerd_config_map.is_none() {
            missing.push("linkerd_config_map");
        }
        if self.node_manifests.is_none() {
            missing.push("node_manifests");
        }
        if self.service_manifest.is_none() {
            missing.push("service_manifest");
        }
        missing
    }
}

/// Tail of a proxy's log, reported for `GetProxyLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLogReport {
    pub pod: PodRef,
    pub lines: Bytes,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub tail_lines: Option<i64>,
    pub timestamps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Pod,
    ConfigMap,
    Service,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Pod => "Pod",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::Service => "Service",
        }
    }
}

/// Namespaced object whose manifest can be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub name: String,
    pub namespace: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn pod(pod: &PodRef) -> Self {
        Self::new(ObjectKind::Pod, pod.name.clone(), pod.namespace.clone())
    }
}

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("pod {pod} is not running (phase: {phase})")]
    PodNotRunning { pod: PodRef, phase: String },

    #[error("pod {0} has no IP allocated")]
    NoPodIp(PodRef),

    #[error("pod {pod} has no `{container}` container")]
    MissingContainer { pod: PodRef, container: String },

    #[error("container `{container}` in pod {pod} exposes no `{port}` port")]
    MissingPort {
        pod: PodRef,
        container: String,
        port: String,
    },

    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        name: String,
        namespace: String,
    },

    #[error("cluster API error: {0}")]
    Api(String),

    #[error("metrics scrape failed: {0}")]
    Scrape(String),

    #[error("port forward failed: {0}")]
    Forward(String),

    #[error("failed to encode manifest: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("collection cancelled")]
    Cancelled,

    #[error("collection exceeded {0:?}")]
    TimedOut(Duration),
}

/// Connection to a proxy's admin endpoint, held for the duration of a
/// sampling window. Dropping it releases any forwarding it relies on.
#[async_trait]
pub trait ProxyAdminEndpoint: Send + Sync {
    /// `host:port` the scrape requests are sent to.
    fn address(&self) -> &str;

    async fn scrape_metrics(&self) -> Result<Bytes, DataSourceError>;
}

/// Read access to pods and cluster objects for diagnostics.
///
/// Whether the proxy admin endpoint is addressed directly or through a local
/// port-forward is decided by the implementation.
#[async_trait]
pub trait PodDataSource: Send + Sync {
    async fn proxy_logs(&self, pod: &PodRef, options: &LogOptions) -> Result<Bytes, DataSourceError>;

    async fn proxy_admin(&self, pod: &PodRef) -> Result<Box<dyn ProxyAdminEndpoint>, DataSourceError>;

    async fn manifest(&self, object: &ObjectRef) -> Result<Manifest, DataSourceError>;

    async fn node_manifests(&self) -> Result<Vec<Manifest>, DataSourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_lists_absent_artifacts() {
        let mut bundle = DiagnosticBundle::new("d1");
        assert_eq!(bundle.missing().len(), 6);

        bundle.logs = Some(Bytes::from_static(b"log"));
        bundle.metrics_samples = Some(vec![]);
        bundle.linkerd_config_map = Some(Manifest::default());
        bundle.node_manifests = Some(vec![]);
        bundle.service_manifest = Some(Manifest::default());

        assert_eq!(bundle.missing(), vec!["pod_manifest"]);
    }
}
