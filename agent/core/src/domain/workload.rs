// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workload Domain Model
//!
//! Workloads are the unit of cluster state pushed over the event stream: a
//! DaemonSet, Deployment or StatefulSet together with the Pods it owns (and,
//! for Deployments, the intermediate ReplicaSets).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements internal responsibilities for workload

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Serialized Kubernetes object.
///
/// Clones share the underlying buffer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Manifest(Bytes);

impl Manifest {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self(raw.into())
    }

    pub fn from_json<T: Serialize>(object: &T) -> Result<Self, serde_json::Error> {
        Ok(Self(Bytes::from(serde_json::to_vec(object)?)))
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Manifest({} bytes)", self.0.len())
    }
}

/// ReplicaSet owned by a Deployment, with the Pods it owns in turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedReplicaSet {
    pub manifest: Manifest,
    pub pods: Vec<Manifest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
        }
    }

    /// Parses a Kubernetes `kind` string, returning `None` for kinds that are
    /// not workloads.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "DaemonSet" => Some(WorkloadKind::DaemonSet),
            "Deployment" => Some(WorkloadKind::Deployment),
            "StatefulSet" => Some(WorkloadKind::StatefulSet),
            _ => None,
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    DaemonSet {
        manifest: Manifest,
        pods: Vec<Manifest>,
    },
    Deployment {
        manifest: Manifest,
        replica_sets: Vec<OwnedReplicaSet>,
    },
    StatefulSet {
        manifest: Manifest,
        pods: Vec<Manifest>,
    },
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Workload::DaemonSet { .. } => WorkloadKind::DaemonSet,
            Workload::Deployment { .. } => WorkloadKind::Deployment,
            Workload::StatefulSet { .. } => WorkloadKind::StatefulSet,
        }
    }

    /// Number of pods across the workload, including those under ReplicaSets.
    pub fn pod_count(&self) -> usize {
        match self {
            Workload::DaemonSet { pods, .. } | Workload::StatefulSet { pods, .. } => pods.len(),
            Workload::Deployment { replica_sets, .. } => {
                replica_sets.iter().map(|rs| rs.pods.len()).sum()
            }
        }
    }
}

/// A change in cluster workload state, in the order it must reach the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadEvent {
    Added(Workload),
    Updated {
        old: Workload,
        new: Workload,
        timestamp: DateTime<Utc>,
    },
    Deleted(Workload),
    /// Authoritative snapshot of every known workload. The control plane
    /// reconciles its state against it.
    FullList(Vec<Workload>),
}

impl WorkloadEvent {
    pub fn label(&self) -> &'static str {
        match self {
            WorkloadEvent::Added(_) => "added",
            WorkloadEvent::Updated { .. } => "updated",
            WorkloadEvent::Deleted(_) => "deleted",
            WorkloadEvent::FullList(_) => "full_list",
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("resource caches did not synchronize within {0:?}")]
    SyncTimeout(Duration),

    #[error("cluster API error: {0}")]
    Api(String),

    #[error("failed to encode manifest: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Pull side of the resource watcher.
///
/// Push-style notifications are delivered on the channel handed to the
/// watcher when it starts, and only after its caches are synchronized.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// Every workload currently known to the caches.
    async fn list_all(&self) -> Result<Vec<Workload>, WatchError>;
}
