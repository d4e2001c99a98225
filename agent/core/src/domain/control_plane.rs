// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control Plane Port
//!
//! Transport-agnostic RPC surface the connector consumes: two long-lived
//! streams plus unary report calls. The gRPC adapter lives in
//! `infrastructure::control_plane`; tests substitute recording doubles.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements internal responsibilities for control plane

use async_trait::async_trait;
use thiserror::Error;

use super::auth::AuthContext;
use super::command::DecodedCommand;
use super::diagnostics::{DataSourceError, DiagnosticBundle, ProxyLogReport};
use super::workload::{Manifest, Workload, WorkloadEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("stream ended")]
    EndOfStream,

    #[error("rpc failed ({code}): {message}")]
    Rpc { code: String, message: String },

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

/// Frame on the outbound event stream. `Auth` is always the first frame of a
/// physical stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFrame {
    Auth(AuthContext),
    Event(WorkloadEvent),
}

/// Sending half of a physical stream.
#[async_trait]
pub trait StreamSink<M: Send + 'static>: Send {
    async fn send(&mut self, message: M) -> Result<(), TransportError>;

    /// Half-closes the stream. Best effort.
    async fn close_send(&mut self);
}

/// Receiving half of a physical stream.
#[async_trait]
pub trait StreamSource<M: Send + 'static>: Send {
    /// `Ok(None)` is a clean end of stream.
    async fn recv(&mut self) -> Result<Option<M>, TransportError>;

    async fn close(&mut self);
}

#[async_trait]
impl<M, T> StreamSink<M> for Box<T>
where
    M: Send + 'static,
    T: StreamSink<M> + ?Sized,
{
    async fn send(&mut self, message: M) -> Result<(), TransportError> {
        (**self).send(message).await
    }

    async fn close_send(&mut self) {
        (**self).close_send().await
    }
}

#[async_trait]
impl<M, T> StreamSource<M> for Box<T>
where
    M: Send + 'static,
    T: StreamSource<M> + ?Sized,
{
    async fn recv(&mut self) -> Result<Option<M>, TransportError> {
        (**self).recv().await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}

pub type EventSink = Box<dyn StreamSink<EventFrame>>;
pub type CommandSource = Box<dyn StreamSource<DecodedCommand>>;

/// Kubernetes Event together with the workload it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEvent {
    pub event: Manifest,
    pub owner: Workload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPolicyInfo {
    pub servers: Vec<Manifest>,
    pub server_authorizations: Vec<Manifest>,
}

/// Low-frequency mesh information reported on the side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkerdInfo {
    AuthPolicy(AuthPolicyInfo),
}

/// Reads mesh policy objects from the cluster.
#[async_trait]
pub trait MeshInfoSource: Send + Sync {
    /// Missing policy CRDs yield empty lists, not an error.
    async fn auth_policy(&self) -> Result<AuthPolicyInfo, DataSourceError>;
}

#[async_trait]
pub trait ControlPlaneApi: Send + Sync {
    /// Opens a new outbound stream. The caller sends the `Auth` frame.
    async fn open_event_stream(&self) -> Result<EventSink, TransportError>;

    /// Opens a new inbound command stream bound to `auth`.
    async fn open_command_stream(&self, auth: &AuthContext) -> Result<CommandSource, TransportError>;

    async fn report_diagnostics(&self, bundle: DiagnosticBundle) -> Result<(), TransportError>;

    async fn report_logs(&self, report: ProxyLogReport) -> Result<(), TransportError>;

    async fn report_event(&self, event: ClusterEvent) -> Result<(), TransportError>;

    async fn report_linkerd_info(&self, info: LinkerdInfo) -> Result<(), TransportError>;
}
