// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Command Stream
//!
//! Inbound channel of [`AgentCommand`]s. Identity is passed to the connecting
//! call on every (re)open instead of being sent as a first frame.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements internal responsibilities for command stream

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::auth::AuthContext;
use crate::domain::command::{AgentCommand, DecodedCommand};
use crate::domain::control_plane::{CommandSource, ControlPlaneApi, StreamSource, TransportError};
use crate::infrastructure::reconnecting_stream::{
    ReconnectingStream, StreamError, StreamOpener, StreamState,
};

pub struct CommandStreamOpener {
    api: Arc<dyn ControlPlaneApi>,
    auth: AuthContext,
}

#[async_trait]
impl StreamOpener for CommandStreamOpener {
    type Handle = CommandSource;

    fn channel(&self) -> &'static str {
        "command"
    }

    async fn open(&self) -> Result<CommandSource, TransportError> {
        self.api.open_command_stream(&self.auth).await
    }

    async fn teardown(&self, mut handle: CommandSource) {
        handle.close().await;
    }
}

pub struct CommandStream {
    stream: ReconnectingStream<CommandStreamOpener>,
}

impl CommandStream {
    pub fn new(
        api: Arc<dyn ControlPlaneApi>,
        auth: AuthContext,
        retry_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stream: ReconnectingStream::new(CommandStreamOpener { api, auth }, retry_interval, shutdown),
        }
    }

    /// Blocks until the next well-formed command arrives, reconnecting as
    /// needed. Malformed commands are logged and skipped.
    ///
    /// The only error is [`StreamError::Closed`].
    pub async fn next_command(&self) -> Result<AgentCommand, StreamError> {
        loop {
            match self.stream.recv::<DecodedCommand>().await {
                Ok(Ok(command)) => {
                    metrics::counter!("tether_commands_received_total", "kind" => command.label())
                        .increment(1);
                    return Ok(command);
                }
                Ok(Err(err)) => {
                    metrics::counter!("tether_commands_rejected_total", "reason" => "malformed")
                        .increment(1);
                    warn!(error = %err, "dropping malformed command");
                }
                Err(StreamError::Closed) => return Err(StreamError::Closed),
                Err(err) => {
                    debug!(error = %err, "command stream reset, reconnecting");
                }
            }
        }
    }

    pub fn state(&self) -> StreamState {
        self.stream.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.stream.subscribe()
    }

    pub async fn close(&self) {
        self.stream.close().await;
    }
}
