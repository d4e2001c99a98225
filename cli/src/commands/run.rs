// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `tether run`
//!
//! Startup order:
//!
//! 1. metrics recorder, configuration
//! 2. Kubernetes client and API probe
//! 3. workload watcher, blocking until its caches are synchronized
//! 4. credentials and control plane client
//! 5. connector, watcher feed and admin server
//!
//! Any failure before step 5 exits the process. Ctrl+C or SIGTERM drains the
//! connector before exit.

use anyhow::{Context, Result};
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tether_agent_core::application::{Connector, ConnectorSettings};
use tether_agent_core::domain::agent_config::{AgentConfigManifest, AgentConfigSpec};
use tether_agent_core::domain::{AuthContext, CredentialProvider};
use tether_agent_core::infrastructure::control_plane::GrpcControlPlane;
use tether_agent_core::infrastructure::credentials::{
    ClientCredentialsTokenSource, StaticCredentials,
};
use tether_agent_core::infrastructure::k8s::{KubeCluster, KubeWorkloadWatcher};
use tether_agent_core::presentation::{self, AdminState};

#[derive(Args, Default)]
pub struct RunArgs {
    /// Control plane HTTP API (host:port)
    #[arg(long, value_name = "ADDR")]
    pub api_addr: Option<String>,

    /// Control plane gRPC API (host:port)
    #[arg(long, value_name = "ADDR")]
    pub grpc_addr: Option<String>,

    /// Admin server bind address
    #[arg(long, value_name = "ADDR")]
    pub admin_addr: Option<String>,

    /// Path to kubeconfig (default: in-cluster or ~/.kube/config)
    #[arg(long, value_name = "FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// Reach proxies through local port-forwards
    #[arg(long)]
    pub local_mode: bool,

    /// Disable TLS to the control plane (development only)
    #[arg(long)]
    pub insecure: bool,

    /// Agent identifier
    #[arg(long)]
    pub agent_id: Option<String>,

    /// Agent key presented in the stream handshake
    #[arg(long, env = "TETHER_AGENT_KEY", default_value = "", hide_env_values = true)]
    pub agent_key: String,

    /// OAuth2 client id for the token endpoint
    #[arg(long, env = "CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    /// OAuth2 client secret for the token endpoint
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Fixed bearer token instead of the client-credentials exchange
    #[arg(long, env = "TETHER_TOKEN", hide_env_values = true, conflicts_with_all = ["client_id", "client_secret"])]
    pub token: Option<String>,
}

impl RunArgs {
    /// Flags win over the manifest and its environment overrides.
    pub fn apply(&self, spec: &mut AgentConfigSpec) {
        if let Some(addr) = &self.api_addr {
            spec.control_plane.api_addr = addr.clone();
        }
        if let Some(addr) = &self.grpc_addr {
            spec.control_plane.grpc_addr = addr.clone();
        }
        if let Some(addr) = &self.admin_addr {
            spec.admin.bind_address = addr.clone();
        }
        if let Some(path) = &self.kubeconfig {
            spec.kubernetes.kubeconfig = Some(path.clone());
        }
        if let Some(id) = &self.agent_id {
            spec.agent.id = id.clone();
        }
        if self.local_mode {
            spec.agent.local_mode = true;
        }
        if self.insecure {
            spec.control_plane.insecure = true;
        }
    }

    fn credentials(&self, spec: &AgentConfigSpec) -> Result<Arc<dyn CredentialProvider>> {
        let secure = !spec.control_plane.insecure;

        if let Some(token) = &self.token {
            warn!("using a fixed bearer token");
            return Ok(Arc::new(StaticCredentials::bearer(token, secure)));
        }

        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                let source = ClientCredentialsTokenSource::new(
                    id.clone(),
                    secret.clone(),
                    &spec.control_plane.api_addr,
                    &spec.agent.id,
                    secure,
                )
                .context("Failed to build token client")?;
                Ok(Arc::new(source))
            }
            _ => anyhow::bail!("CLIENT_ID and CLIENT_SECRET must be set (or TETHER_TOKEN for development)"),
        }
    }
}

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")?;

    let mut config =
        AgentConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    args.apply(&mut config.spec);
    config
        .validate()
        .context("Configuration validation failed")?;
    let spec = &config.spec;

    info!(
        agent_id = %spec.agent.id,
        grpc_addr = %spec.control_plane.grpc_addr,
        local_mode = spec.agent.local_mode,
        "tether agent starting"
    );

    let cluster = KubeCluster::connect(spec.kubernetes.kubeconfig.as_deref(), spec.agent.local_mode)
        .await
        .context("Failed to create Kubernetes client")?;
    cluster
        .probe(spec.kubernetes.startup_probe_timeout)
        .await
        .context("Kubernetes API is not reachable")?;
    let cluster = Arc::new(cluster);

    let shutdown = CancellationToken::new();
    let (watcher, feed) = KubeWorkloadWatcher::start(cluster.client(), shutdown.child_token());
    watcher
        .wait_until_ready(spec.kubernetes.cache_sync_timeout)
        .await
        .context("Resource caches failed to synchronize")?;

    let credentials = args.credentials(spec)?;
    let auth = AuthContext::new(spec.agent.id.clone(), args.agent_key.clone());
    let api = GrpcControlPlane::new(&spec.control_plane, credentials, auth.clone())
        .context("Invalid control plane endpoint")?;

    let handle = Connector {
        api: Arc::new(api),
        auth,
        workloads: watcher,
        pods: cluster.clone(),
        mesh: Some(cluster),
        settings: ConnectorSettings::from_config(spec),
    }
    .start(shutdown.clone());

    let feed_task = tokio::spawn(feed.run(
        handle.workload_events(),
        handle.cluster_events(),
        shutdown.clone(),
    ));

    let admin = presentation::router(AdminState {
        metrics: Some(metrics),
        event_stream: handle.event_state(),
        command_stream: handle.command_state(),
        start_time: Instant::now(),
    });
    let listener = TcpListener::bind(&spec.admin.bind_address)
        .await
        .with_context(|| format!("Failed to bind admin server to {}", spec.admin.bind_address))?;
    info!("Admin server listening on {}", spec.admin.bind_address);

    let admin_shutdown = shutdown.clone();
    let admin_task = tokio::spawn(async move {
        axum::serve(listener, admin)
            .with_graceful_shutdown(async move { admin_shutdown.cancelled().await })
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = shutdown.cancelled() => {}
    }
    info!("tether agent shutting down");
    shutdown.cancel();

    if let Err(err) = feed_task.await {
        error!(error = %err, "watcher feed task failed");
    }
    handle.join().await;
    admin_task
        .await
        .context("Admin server task failed")?
        .context("Admin server failed")?;

    info!("tether agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_manifest() {
        let mut spec = AgentConfigSpec::default();
        spec.agent.id = "from-file".to_string();

        let args = RunArgs {
            grpc_addr: Some("localhost:9000".to_string()),
            agent_id: Some("from-flag".to_string()),
            insecure: true,
            ..Default::default()
        };
        args.apply(&mut spec);

        assert_eq!(spec.agent.id, "from-flag");
        assert_eq!(spec.control_plane.grpc_addr, "localhost:9000");
        assert!(spec.control_plane.insecure);
        assert!(!spec.agent.local_mode);
    }

    #[test]
    fn test_credentials_required() {
        let spec = AgentConfigSpec::default();
        let args = RunArgs::default();
        assert!(args.credentials(&spec).is_err());

        let args = RunArgs {
            token: Some("dev".to_string()),
            ..Default::default()
        };
        let credentials = args.credentials(&spec).unwrap();
        assert!(credentials.requires_transport_security());
    }
}
