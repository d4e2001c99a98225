// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! gRPC Control Plane Client
//!
//! [`ControlPlaneApi`] over tonic.
//!
//! Each stream opened through this client gets its own HTTP/2 connection, so
//! an unreachable control plane fails the open and the reconnect loop backs
//! off. Unary reports share one lazily connected channel. Every request
//! carries the `authorization` metadata from the [`CredentialProvider`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for client

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Streaming;
use tracing::debug;

use super::mapper;
use super::proto;
use super::proto::control_plane_client::ControlPlaneClient;
use crate::domain::agent_config::ControlPlaneConfig;
use crate::domain::auth::{AuthContext, CredentialProvider};
use crate::domain::command::DecodedCommand;
use crate::domain::control_plane::{
    ClusterEvent, CommandSource, ControlPlaneApi, EventFrame, EventSink, LinkerdInfo, StreamSink,
    StreamSource, TransportError,
};
use crate::domain::diagnostics::{DiagnosticBundle, ProxyLogReport};

/// Frames buffered between the event stream and the HTTP/2 body.
const EVENT_BUFFER: usize = 1;

pub struct GrpcControlPlane {
    endpoint: Endpoint,
    client: ControlPlaneClient<Channel>,
    credentials: Arc<dyn CredentialProvider>,
    auth: AuthContext,
}

impl GrpcControlPlane {
    /// Builds the client without connecting. Connection errors surface on the
    /// first call.
    pub fn new(
        config: &ControlPlaneConfig,
        credentials: Arc<dyn CredentialProvider>,
        auth: AuthContext,
    ) -> Result<Self, TransportError> {
        if config.insecure && credentials.requires_transport_security() {
            return Err(TransportError::Credentials(
                "credentials require TLS but the control plane connection is insecure".to_string(),
            ));
        }

        let address = if config.grpc_addr.contains("://") {
            config.grpc_addr.clone()
        } else if config.insecure {
            format!("http://{}", config.grpc_addr)
        } else {
            format!("https://{}", config.grpc_addr)
        };

        let mut endpoint = Endpoint::from_shared(address)
            .map_err(|e| TransportError::Connect(e.to_string()))?
            .connect_timeout(config.connect_timeout);
        if !config.insecure {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }

        let client = ControlPlaneClient::new(endpoint.connect_lazy());
        Ok(Self {
            endpoint,
            client,
            credentials,
            auth,
        })
    }

    async fn request<T>(&self, message: T) -> Result<tonic::Request<T>, TransportError> {
        let header = self
            .credentials
            .authorization()
            .await
            .map_err(|e| TransportError::Credentials(e.to_string()))?;
        let value: AsciiMetadataValue = header
            .parse()
            .map_err(|_| TransportError::Credentials("authorization value is not ASCII".to_string()))?;

        let mut request = tonic::Request::new(message);
        request.metadata_mut().insert("authorization", value);
        Ok(request)
    }

    /// Fresh connection for a long-lived stream.
    async fn stream_client(&self) -> Result<ControlPlaneClient<Channel>, TransportError> {
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(ControlPlaneClient::new(channel))
    }
}

#[async_trait]
impl ControlPlaneApi for GrpcControlPlane {
    async fn open_event_stream(&self) -> Result<EventSink, TransportError> {
        let mut client = self.stream_client().await?;
        let (frames, outbound) = mpsc::channel(EVENT_BUFFER);
        let request = self.request(ReceiverStream::new(outbound)).await?;

        let call = tokio::spawn(async move {
            client
                .workload_stream(request)
                .await
                .map(|_| ())
                .map_err(mapper::status)
        });

        Ok(Box::new(GrpcEventSink {
            frames: Some(frames),
            call: Some(call),
        }))
    }

    async fn open_command_stream(&self, auth: &AuthContext) -> Result<CommandSource, TransportError> {
        let mut client = self.stream_client().await?;
        let request = self.request(mapper::auth(auth)).await?;
        let response = client.manage_agent(request).await.map_err(mapper::status)?;

        Ok(Box::new(GrpcCommandSource {
            stream: Some(response.into_inner()),
        }))
    }

    async fn report_diagnostics(&self, bundle: DiagnosticBundle) -> Result<(), TransportError> {
        let request = self.request(mapper::proxy_diagnostic(&self.auth, bundle)).await?;
        self.client
            .clone()
            .proxy_diagnostics(request)
            .await
            .map_err(mapper::status)?;
        Ok(())
    }

    async fn report_logs(&self, report: ProxyLogReport) -> Result<(), TransportError> {
        let request = self.request(mapper::proxy_log(&self.auth, report)).await?;
        self.client.clone().proxy_logs(request).await.map_err(mapper::status)?;
        Ok(())
    }

    async fn report_event(&self, event: ClusterEvent) -> Result<(), TransportError> {
        let request = self.request(mapper::event(&self.auth, event)).await?;
        self.client.clone().add_event(request).await.map_err(mapper::status)?;
        Ok(())
    }

    async fn report_linkerd_info(&self, info: LinkerdInfo) -> Result<(), TransportError> {
        let request = self.request(mapper::linkerd_message(&self.auth, info)).await?;
        self.client.clone().linkerd_info(request).await.map_err(mapper::status)?;
        Ok(())
    }
}

/// Client-streaming `WorkloadStream` call. Frames go through a channel that
/// backs the request body; the spawned call resolves when the server answers
/// or the connection drops.
struct GrpcEventSink {
    frames: Option<mpsc::Sender<proto::WorkloadMessage>>,
    call: Option<JoinHandle<Result<(), TransportError>>>,
}

impl GrpcEventSink {
    async fn outcome(&mut self) -> TransportError {
        self.frames = None;
        match self.call.take() {
            Some(call) => match call.await {
                Ok(Ok(())) => TransportError::EndOfStream,
                Ok(Err(err)) => err,
                Err(join) => TransportError::Connect(join.to_string()),
            },
            None => TransportError::EndOfStream,
        }
    }
}

#[async_trait]
impl StreamSink<EventFrame> for GrpcEventSink {
    async fn send(&mut self, frame: EventFrame) -> Result<(), TransportError> {
        let Some(frames) = self.frames.as_ref() else {
            return Err(TransportError::EndOfStream);
        };
        if self.call.as_ref().is_some_and(|call| call.is_finished()) {
            return Err(self.outcome().await);
        }

        match frames.send(mapper::workload_message(&frame)).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.outcome().await),
        }
    }

    async fn close_send(&mut self) {
        // Dropping the sender ends the request body
        self.frames = None;
        debug!("workload stream half-closed");
    }
}

struct GrpcCommandSource {
    stream: Option<Streaming<proto::AgentCommand>>,
}

#[async_trait]
impl StreamSource<DecodedCommand> for GrpcCommandSource {
    async fn recv(&mut self) -> Result<Option<DecodedCommand>, TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let message = stream.message().await.map_err(mapper::status)?;
        Ok(message.map(mapper::decode_command))
    }

    async fn close(&mut self) {
        self.stream = None;
    }
}
