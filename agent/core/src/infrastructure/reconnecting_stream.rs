// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reconnecting Stream
//!
//! "Always eventually connected" wrapper around one logical channel to the
//! control plane. At most one physical stream exists per instance; every
//! open, send, receive and teardown happens under a single lock.
//!
//! ```text
//! Disconnected ──ensure_connected──▶ Connecting ──open + handshake ok──▶ Connected
//!      ▲                                 │ (failure: sleep, retry)           │
//!      └──────────── transport error / end of stream ◀───────────────────────┘
//!
//! any state ──close()──▶ Closed (terminal)
//! ```
//!
//! Opening never gives up on its own: a permanently unreachable control plane
//! means indefinite retry at a fixed interval. Only [`ReconnectingStream::close`]
//! (or cancellation of the token the stream was built with) ends the loop, and
//! it surfaces as [`StreamError::Closed`], the one error callers must not retry.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for reconnecting stream

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::control_plane::{StreamSink, StreamSource, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The stream was shut down. Terminal.
    #[error("stream closed")]
    Closed,

    /// The physical stream failed and was discarded; the next operation reconnects.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl StreamError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StreamError::Closed)
    }
}

/// Observable state of a [`ReconnectingStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Disconnected => "disconnected",
            StreamState::Connecting => "connecting",
            StreamState::Connected => "connected",
            StreamState::Closed => "closed",
        }
    }
}

/// Creates physical streams for one logical channel.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    type Handle: Send;

    /// Channel name used in logs and metric labels.
    fn channel(&self) -> &'static str;

    async fn open(&self) -> Result<Self::Handle, TransportError>;

    /// Runs on every freshly opened handle before it is handed out. A failure
    /// counts as a failed open.
    async fn handshake(&self, _handle: &mut Self::Handle) -> Result<(), TransportError> {
        Ok(())
    }

    /// Best-effort release of a handle that is being discarded.
    async fn teardown(&self, handle: Self::Handle);
}

enum Connection<H> {
    Disconnected,
    Connected(H),
    Closed,
}

pub struct ReconnectingStream<O: StreamOpener> {
    opener: O,
    connection: Mutex<Connection<O::Handle>>,
    state: watch::Sender<StreamState>,
    retry_interval: Duration,
    shutdown: CancellationToken,
}

impl<O: StreamOpener> ReconnectingStream<O> {
    /// Cancelling `shutdown` has the same effect as [`close`](Self::close)
    /// for every pending and future operation.
    pub fn new(opener: O, retry_interval: Duration, shutdown: CancellationToken) -> Self {
        let (state, _) = watch::channel(StreamState::Disconnected);
        Self {
            opener,
            connection: Mutex::new(Connection::Disconnected),
            state,
            retry_interval,
            shutdown,
        }
    }

    pub fn channel(&self) -> &'static str {
        self.opener.channel()
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Sends one message on the current physical stream, opening one first if
    /// needed. On failure the physical stream is discarded and the error is
    /// returned; retrying the logical send is up to the caller.
    pub async fn send<M>(&self, message: M) -> Result<(), StreamError>
    where
        M: Send + 'static,
        O::Handle: StreamSink<M>,
    {
        let mut connection = self.ensure_connected().await?;
        let Connection::Connected(handle) = &mut *connection else {
            return Err(StreamError::Closed);
        };

        let result = tokio::select! {
            result = handle.send(message) => result,
            _ = self.shutdown.cancelled() => return Err(StreamError::Closed),
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.discard(&mut connection, &err).await;
                Err(err.into())
            }
        }
    }

    /// Receives the next message, opening a physical stream first if needed.
    /// A clean end of stream is reported as [`TransportError::EndOfStream`].
    pub async fn recv<M>(&self) -> Result<M, StreamError>
    where
        M: Send + 'static,
        O::Handle: StreamSource<M>,
    {
        let mut connection = self.ensure_connected().await?;
        let Connection::Connected(handle) = &mut *connection else {
            return Err(StreamError::Closed);
        };

        let result = tokio::select! {
            result = handle.recv() => result,
            _ = self.shutdown.cancelled() => return Err(StreamError::Closed),
        };

        let err = match result {
            Ok(Some(message)) => return Ok(message),
            Ok(None) => TransportError::EndOfStream,
            Err(err) => err,
        };
        self.discard(&mut connection, &err).await;
        Err(err.into())
    }

    /// Tears down the physical stream and marks the channel closed. Idempotent.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let mut connection = self.connection.lock().await;
        if let Connection::Connected(handle) =
            std::mem::replace(&mut *connection, Connection::Closed)
        {
            self.opener.teardown(handle).await;
            info!(channel = self.channel(), "stream closed");
        }
        self.set_state(StreamState::Closed);
    }

    async fn ensure_connected(&self) -> Result<MutexGuard<'_, Connection<O::Handle>>, StreamError> {
        let mut connection = tokio::select! {
            guard = self.connection.lock() => guard,
            _ = self.shutdown.cancelled() => return Err(StreamError::Closed),
        };

        if self.shutdown.is_cancelled() || matches!(&*connection, Connection::Closed) {
            return Err(StreamError::Closed);
        }
        if matches!(&*connection, Connection::Connected(_)) {
            return Ok(connection);
        }

        let channel = self.channel();
        self.set_state(StreamState::Connecting);

        loop {
            let attempt = tokio::select! {
                attempt = self.open_once() => attempt,
                _ = self.shutdown.cancelled() => return Err(StreamError::Closed),
            };

            match attempt {
                Ok(handle) => {
                    *connection = Connection::Connected(handle);
                    self.set_state(StreamState::Connected);
                    info!(channel, "stream connected");
                    return Ok(connection);
                }
                Err(err) => {
                    metrics::counter!("tether_stream_open_failures_total", "channel" => channel)
                        .increment(1);
                    warn!(channel, error = %err, "failed to open stream, retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                _ = self.shutdown.cancelled() => return Err(StreamError::Closed),
            }
        }
    }

    async fn open_once(&self) -> Result<O::Handle, TransportError> {
        let mut handle = self.opener.open().await?;
        debug!(channel = self.channel(), "stream opened");

        if let Err(err) = self.opener.handshake(&mut handle).await {
            self.opener.teardown(handle).await;
            return Err(err);
        }
        Ok(handle)
    }

    async fn discard(&self, connection: &mut Connection<O::Handle>, reason: &TransportError) {
        if !matches!(connection, Connection::Connected(_)) {
            return;
        }
        if let Connection::Connected(handle) =
            std::mem::replace(connection, Connection::Disconnected)
        {
            self.opener.teardown(handle).await;
        }
        self.set_state(StreamState::Disconnected);

        let channel = self.channel();
        metrics::counter!("tether_stream_reconnects_total", "channel" => channel).increment(1);
        info!(channel, reason = %reason, "stream reset");
    }

    fn set_state(&self, next: StreamState) {
        self.state.send_replace(next);
        let connected = if next == StreamState::Connected { 1.0 } else { 0.0 };
        metrics::gauge!("tether_stream_connected", "channel" => self.channel()).set(connected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Frame {
        Hello,
        Data(u32),
    }

    #[derive(Default)]
    struct Wire {
        frames: SyncMutex<Vec<Frame>>,
        inbound: SyncMutex<Vec<Option<u32>>>,
        fail_next_send: SyncMutex<bool>,
        teardowns: AtomicUsize,
    }

    struct TestHandle {
        wire: Arc<Wire>,
    }

    #[async_trait]
    impl StreamSink<Frame> for TestHandle {
        async fn send(&mut self, message: Frame) -> Result<(), TransportError> {
            if std::mem::take(&mut *self.wire.fail_next_send.lock()) {
                return Err(TransportError::EndOfStream);
            }
            self.wire.frames.lock().push(message);
            Ok(())
        }

        async fn close_send(&mut self) {}
    }

    #[async_trait]
    impl StreamSource<u32> for TestHandle {
        async fn recv(&mut self) -> Result<Option<u32>, TransportError> {
            let next = {
                let mut inbound = self.wire.inbound.lock();
                if inbound.is_empty() {
                    None
                } else {
                    Some(inbound.remove(0))
                }
            };
            match next {
                Some(item) => Ok(item),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    struct ScriptedOpener {
        wire: Arc<Wire>,
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl ScriptedOpener {
        fn new(wire: Arc<Wire>, failures: usize) -> Self {
            Self {
                wire,
                failures_left: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StreamOpener for Arc<ScriptedOpener> {
        type Handle = TestHandle;

        fn channel(&self) -> &'static str {
            "test"
        }

        async fn open(&self) -> Result<TestHandle, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::Connect("refused".to_string()));
            }
            Ok(TestHandle {
                wire: self.wire.clone(),
            })
        }

        async fn handshake(&self, handle: &mut TestHandle) -> Result<(), TransportError> {
            handle.send(Frame::Hello).await
        }

        async fn teardown(&self, _handle: TestHandle) {
            self.wire.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stream(
        opener: Arc<ScriptedOpener>,
    ) -> ReconnectingStream<Arc<ScriptedOpener>> {
        ReconnectingStream::new(opener, Duration::from_millis(1), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_converges_after_k_failed_opens() {
        let wire = Arc::new(Wire::default());
        let opener = Arc::new(ScriptedOpener::new(wire.clone(), 3));
        let stream = stream(opener.clone());

        stream.send(Frame::Data(1)).await.unwrap();

        assert_eq!(opener.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(*wire.frames.lock(), vec![Frame::Hello, Frame::Data(1)]);
        assert_eq!(stream.state(), StreamState::Connected);
    }

    #[tokio::test]
    async fn test_failed_send_discards_handle_and_rehandshakes() {
        let wire = Arc::new(Wire::default());
        let opener = Arc::new(ScriptedOpener::new(wire.clone(), 0));
        let stream = stream(opener.clone());

        stream.send(Frame::Data(1)).await.unwrap();
        *wire.fail_next_send.lock() = true;

        let err = stream.send(Frame::Data(2)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(stream.state(), StreamState::Disconnected);
        assert_eq!(wire.teardowns.load(Ordering::SeqCst), 1);

        stream.send(Frame::Data(2)).await.unwrap();
        assert_eq!(
            *wire.frames.lock(),
            vec![Frame::Hello, Frame::Data(1), Frame::Hello, Frame::Data(2)]
        );
        assert_eq!(opener.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_end_of_stream_on_recv_resets() {
        let wire = Arc::new(Wire::default());
        wire.inbound.lock().extend([Some(7), None, Some(8)]);
        let opener = Arc::new(ScriptedOpener::new(wire.clone(), 0));
        let stream = stream(opener.clone());

        assert_eq!(stream.recv::<u32>().await.unwrap(), 7);
        assert_eq!(
            stream.recv::<u32>().await.unwrap_err(),
            StreamError::Transport(TransportError::EndOfStream)
        );
        assert_eq!(stream.recv::<u32>().await.unwrap(), 8);
        assert_eq!(opener.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_idempotent() {
        let wire = Arc::new(Wire::default());
        let opener = Arc::new(ScriptedOpener::new(wire.clone(), 0));
        let stream = stream(opener.clone());

        stream.send(Frame::Data(1)).await.unwrap();
        stream.close().await;
        stream.close().await;

        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(wire.teardowns.load(Ordering::SeqCst), 1);

        let err = stream.send(Frame::Data(2)).await.unwrap_err();
        assert_eq!(err, StreamError::Closed);
        assert!(!err.is_retryable());
        assert_eq!(opener.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_interrupts_endless_open_loop() {
        let wire = Arc::new(Wire::default());
        let opener = Arc::new(ScriptedOpener::new(wire, usize::MAX));
        let stream = Arc::new(stream(opener));

        let sender = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.send(Frame::Data(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stream.state(), StreamState::Connecting);

        stream.close().await;
        let result = tokio::time::timeout(Duration::from_secs(1), sender)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(StreamError::Closed));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_recv() {
        let wire = Arc::new(Wire::default());
        let opener = Arc::new(ScriptedOpener::new(wire, 0));
        let stream = Arc::new(stream(opener));

        let receiver = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.recv::<u32>().await })
        };

        let mut state = stream.subscribe();
        state
            .wait_for(|s| *s == StreamState::Connected)
            .await
            .unwrap();

        stream.close().await;
        let result = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(StreamError::Closed));
    }
}
