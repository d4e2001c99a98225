// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Stream
//!
//! Outbound channel carrying [`WorkloadEvent`]s to the control plane.
//!
//! Every physical stream starts with an `Auth` frame, so identity is
//! re-asserted after each reconnect. Frames on one physical stream arrive in
//! send order; frames lost at a disconnect are healed by the periodic
//! `FullList` resync rather than by acknowledgements.
//!
//! Producers never call [`EventStream::publish`] directly. They push into the
//! channel drained by a single [`EventPublisher`] task, which keeps producer
//! latency independent of stream health.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements internal responsibilities for event stream

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::auth::AuthContext;
use crate::domain::control_plane::{ControlPlaneApi, EventFrame, EventSink, StreamSink, TransportError};
use crate::domain::workload::WorkloadEvent;
use crate::infrastructure::reconnecting_stream::{
    ReconnectingStream, StreamError, StreamOpener, StreamState,
};

/// How long a send in progress may still take once shutdown begins.
pub const SHUTDOWN_SEND_GRACE: Duration = Duration::from_secs(5);

pub struct EventStreamOpener {
    api: Arc<dyn ControlPlaneApi>,
    auth: AuthContext,
}

#[async_trait]
impl StreamOpener for EventStreamOpener {
    type Handle = EventSink;

    fn channel(&self) -> &'static str {
        "event"
    }

    async fn open(&self) -> Result<EventSink, TransportError> {
        self.api.open_event_stream().await
    }

    async fn handshake(&self, handle: &mut EventSink) -> Result<(), TransportError> {
        handle.send(EventFrame::Auth(self.auth.clone())).await
    }

    async fn teardown(&self, mut handle: EventSink) {
        handle.close_send().await;
    }
}

pub struct EventStream {
    stream: ReconnectingStream<EventStreamOpener>,
}

impl EventStream {
    pub fn new(
        api: Arc<dyn ControlPlaneApi>,
        auth: AuthContext,
        retry_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stream: ReconnectingStream::new(EventStreamOpener { api, auth }, retry_interval, shutdown),
        }
    }

    /// Delivers one event, reconnecting as many times as it takes.
    ///
    /// Returns on success, once the stream is closed, or once `shutdown` fires.
    /// A send already on a connected stream gets [`SHUTDOWN_SEND_GRACE`] to
    /// complete; waiting for a new stream is cut short immediately.
    pub async fn publish(
        &self,
        event: WorkloadEvent,
        shutdown: &CancellationToken,
    ) -> Result<(), StreamError> {
        let kind = event.label();
        let frame = EventFrame::Event(event);

        loop {
            let grace = if self.stream.state() == StreamState::Connected {
                SHUTDOWN_SEND_GRACE
            } else {
                Duration::ZERO
            };
            let abandoned = async {
                shutdown.cancelled().await;
                tokio::time::sleep(grace).await;
            };

            let result = tokio::select! {
                result = self.stream.send(frame.clone()) => result,
                _ = abandoned => return Err(StreamError::Closed),
            };

            match result {
                Ok(()) => {
                    metrics::counter!("tether_events_published_total", "kind" => kind).increment(1);
                    return Ok(());
                }
                Err(StreamError::Closed) => return Err(StreamError::Closed),
                Err(_) if shutdown.is_cancelled() => return Err(StreamError::Closed),
                Err(err) => {
                    debug!(kind, error = %err, "retrying workload event on a new stream");
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

/// Single consumer that serializes every workload event producer onto the
/// event stream.
pub struct EventPublisher {
    stream: Arc<EventStream>,
    events: mpsc::Receiver<WorkloadEvent>,
}

impl EventPublisher {
    pub fn new(stream: Arc<EventStream>, events: mpsc::Receiver<WorkloadEvent>) -> Self {
        Self { stream, events }
    }

    /// Runs until `shutdown` fires or every producer is gone, then closes the
    /// stream. An event being sent when `shutdown` fires is still delivered.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("event publisher started");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Err(err) = self.stream.publish(event, &shutdown).await {
                debug!(error = %err, "event stream closed during publish");
                break;
            }
        }

        self.stream.close().await;
        info!("event publisher stopped");
    }
}
