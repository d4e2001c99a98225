// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Local port-forward to a pod port
//!
//! Binds an ephemeral port on `127.0.0.1` and tunnels each accepted
//! connection to the pod over the API server's port-forward subresource.
//! Used in local mode, when the agent runs outside the cluster network.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for forward

use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{K8sError, K8sResult};

/// Pause after a failed accept, e.g. while out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Running forward. Dropping it stops the listener and every open tunnel.
#[derive(Debug)]
pub struct PortForward {
    local_addr: SocketAddr,
    stop: CancellationToken,
}

impl PortForward {
    pub async fn start(pods: Api<Pod>, pod_name: &str, port: u16) -> K8sResult<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(forward_error)?;
        let local_addr = listener.local_addr().map_err(forward_error)?;
        let stop = CancellationToken::new();

        debug!(pod = pod_name, port, local = %local_addr, "port forward listening");
        tokio::spawn(accept_loop(listener, pods, pod_name.to_string(), port, stop.clone()));

        Ok(Self { local_addr, stop })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    pods: Api<Pod>,
    pod_name: String,
    port: u16,
    stop: CancellationToken,
) {
    loop {
        let Some((socket, peer)) = next_connection(|| listener.accept(), &stop).await else {
            break;
        };

        let pods = pods.clone();
        let pod_name = pod_name.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                result = tunnel(&pods, &pod_name, port, socket) => {
                    if let Err(err) = result {
                        debug!(pod = %pod_name, peer = %peer, error = %err, "port forward tunnel closed");
                    }
                }
            }
        });
    }

    debug!(pod = %pod_name, port, "port forward stopped");
}

/// Accepts the next connection, backing off after each failure. `None` once
/// `stop` fires.
async fn next_connection<C, F, Fut>(mut accept: F, stop: &CancellationToken) -> Option<C>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<C>>,
{
    loop {
        tokio::select! {
            _ = stop.cancelled() => return None,
            accepted = accept() => match accepted {
                Ok(connection) => return Some(connection),
                Err(err) => warn!(error = %err, "port forward accept failed"),
            },
        }

        tokio::select! {
            _ = stop.cancelled() => return None,
            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
        }
    }
}

async fn tunnel(pods: &Api<Pod>, pod_name: &str, port: u16, mut socket: TcpStream) -> K8sResult<()> {
    let mut forwarder = pods.portforward(pod_name, &[port]).await?;
    let mut upstream = forwarder
        .take_stream(port)
        .ok_or_else(|| K8sError::ForwardError {
            message: format!("no stream for port {}", port),
        })?;

    tokio::io::copy_bidirectional(&mut socket, &mut upstream)
        .await
        .map_err(forward_error)?;

    drop(upstream);
    forwarder.join().await.map_err(forward_error)?;
    Ok(())
}

fn forward_error(err: impl std::fmt::Display) -> K8sError {
    K8sError::ForwardError {
        message: err.to_string(),
    }
}
