// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Types exchanged with the control plane and the collaborator traits the
//! connector depends on. No transport or Kubernetes client code lives here.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements internal responsibilities for mod

pub mod agent_config;
pub mod auth;
pub mod command;
pub mod control_plane;
pub mod diagnostics;
pub mod workload;

pub use auth::{AuthContext, CredentialError, CredentialProvider};
pub use command::{AgentCommand, CommandDecodeError, DecodedCommand, PodRef};
pub use control_plane::{
    AuthPolicyInfo, ClusterEvent, CommandSource, ControlPlaneApi, EventFrame, EventSink,
    LinkerdInfo, MeshInfoSource, StreamSink, StreamSource, TransportError,
};
pub use diagnostics::{
    DataSourceError, DiagnosticBundle, LogOptions, ObjectKind, ObjectRef, PodDataSource,
    ProxyAdminEndpoint, ProxyLogReport,
};
pub use workload::{
    Manifest, OwnedReplicaSet, WatchError, Workload, WorkloadEvent, WorkloadKind, WorkloadSource,
};
