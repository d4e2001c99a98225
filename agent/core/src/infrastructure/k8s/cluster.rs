// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Kubernetes Cluster Access
//!
//! [`KubeCluster`] serves diagnostic reads from the live API server and the
//! mesh policy snapshots for the Linkerd info reporter.
//!
//! The proxy admin endpoint is the `linkerd-admin` port of the `linkerd-proxy`
//! container. In-cluster it is addressed as `podIP:port`; in local mode a
//! [`PortForward`] on `127.0.0.1` is opened for the lifetime of the endpoint.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for cluster

use async_trait::async_trait;
use bytes::Bytes;
use k8s_openapi::api::core::v1::{ConfigMap, Container, Node, Pod, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, LogParams, TypeMeta};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::error::{K8sError, K8sResult};
use super::forward::PortForward;
use crate::domain::command::PodRef;
use crate::domain::control_plane::{AuthPolicyInfo, MeshInfoSource};
use crate::domain::diagnostics::{
    DataSourceError, LogOptions, ObjectKind, ObjectRef, PodDataSource, ProxyAdminEndpoint,
};
use crate::domain::workload::Manifest;

pub const PROXY_CONTAINER: &str = "linkerd-proxy";
pub const PROXY_ADMIN_PORT: &str = "linkerd-admin";
pub const POLICY_GROUP: &str = "policy.linkerd.io";
pub const POLICY_VERSION: &str = "v1beta1";

const PROBE_INTERVAL: Duration = Duration::from_secs(1);
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    http: reqwest::Client,
    local_mode: bool,
}

impl KubeCluster {
    pub fn new(client: Client, local_mode: bool) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
            local_mode,
        }
    }

    /// Connects with an explicit kubeconfig, or with in-cluster / default
    /// discovery when `kubeconfig` is `None`.
    pub async fn connect(kubeconfig: Option<&Path>, local_mode: bool) -> K8sResult<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| K8sError::ConfigError {
                    message: format!("{}: {}", path.display(), e),
                })?;
                let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| K8sError::ConfigError {
                        message: e.to_string(),
                    })?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        debug!(local_mode, "K8s client initialized");
        Ok(Self::new(client, local_mode))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Polls the API server version every second until it answers or
    /// `timeout` elapses.
    pub async fn probe(&self, timeout: Duration) -> K8sResult<()> {
        info!("waiting for Kubernetes API availability");
        let reached = tokio::time::timeout(timeout, async {
            loop {
                match self.client.apiserver_version().await {
                    Ok(version) => return version,
                    Err(err) => {
                        debug!(error = %err, "cannot reach Kubernetes API; retrying");
                        tokio::time::sleep(PROBE_INTERVAL).await;
                    }
                }
            }
        })
        .await
        .map_err(|_| K8sError::Unreachable(timeout))?;

        info!(version = %reached.git_version, "Kubernetes API reached");
        Ok(())
    }

    async fn get_manifest<K>(&self, object: &ObjectRef) -> K8sResult<Manifest>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &object.namespace);
        let found = api
            .get(&object.name)
            .await
            .map_err(|e| K8sError::from_lookup(e, object.kind.as_str(), &object.name, &object.namespace))?;
        Ok(Manifest::from_json(&found)?)
    }

    /// Fetches `pod` and checks it can serve proxy admin requests.
    async fn running_pod(&self, pod: &PodRef) -> Result<Pod, DataSourceError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let object = api
            .get(&pod.name)
            .await
            .map_err(|e| K8sError::from_lookup(e, "Pod", &pod.name, &pod.namespace))?;

        let status = object.status.as_ref();
        let phase = status.and_then(|s| s.phase.clone()).unwrap_or_default();
        if phase != "Running" {
            return Err(DataSourceError::PodNotRunning {
                pod: pod.clone(),
                phase,
            });
        }
        if status.and_then(|s| s.pod_ip.as_deref()).is_none_or(str::is_empty) {
            return Err(DataSourceError::NoPodIp(pod.clone()));
        }
        Ok(object)
    }

    async fn list_policy(&self, kind: &str, plural: &str) -> K8sResult<Vec<Manifest>> {
        let gvk = GroupVersionKind::gvk(POLICY_GROUP, POLICY_VERSION, kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(kind, "policy resource not installed");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        list.items
            .into_iter()
            .map(|mut object| {
                object.types = Some(TypeMeta {
                    api_version: resource.api_version.clone(),
                    kind: resource.kind.clone(),
                });
                Manifest::from_json(&object).map_err(K8sError::from)
            })
            .collect()
    }
}

/// Proxy container of `pod`, including native sidecars declared as init
/// containers.
fn proxy_container(pod: &Pod) -> Option<&Container> {
    let spec = pod.spec.as_ref()?;
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .find(|container| container.name == PROXY_CONTAINER)
}

fn container_port(container: &Container, port_name: &str) -> Option<i32> {
    container
        .ports
        .iter()
        .flatten()
        .find(|port| port.name.as_deref() == Some(port_name))
        .map(|port| port.container_port)
}

#[async_trait]
impl PodDataSource for KubeCluster {
    async fn proxy_logs(&self, pod: &PodRef, options: &LogOptions) -> Result<Bytes, DataSourceError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let params = LogParams {
            container: Some(PROXY_CONTAINER.to_string()),
            tail_lines: options.tail_lines,
            timestamps: options.timestamps,
            ..Default::default()
        };

        let logs = api
            .logs(&pod.name, &params)
            .await
            .map_err(|e| K8sError::from_lookup(e, "Pod", &pod.name, &pod.namespace))?;
        Ok(Bytes::from(logs))
    }

    async fn proxy_admin(&self, pod: &PodRef) -> Result<Box<dyn ProxyAdminEndpoint>, DataSourceError> {
        let object = self.running_pod(pod).await?;
        let container = proxy_container(&object).ok_or_else(|| DataSourceError::MissingContainer {
            pod: pod.clone(),
            container: PROXY_CONTAINER.to_string(),
        })?;
        let port = container_port(container, PROXY_ADMIN_PORT).ok_or_else(|| DataSourceError::MissingPort {
            pod: pod.clone(),
            container: PROXY_CONTAINER.to_string(),
            port: PROXY_ADMIN_PORT.to_string(),
        })?;

        if self.local_mode {
            let port = u16::try_from(port)
                .map_err(|_| DataSourceError::Forward(format!("invalid container port {}", port)))?;
            let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
            let forward = PortForward::start(api, &pod.name, port).await?;
            return Ok(Box::new(HttpProxyAdmin {
                http: self.http.clone(),
                address: forward.local_addr().to_string(),
                _forward: Some(forward),
            }));
        }

        // running_pod guarantees the IP
        let ip = object
            .status
            .and_then(|status| status.pod_ip)
            .unwrap_or_default();
        Ok(Box::new(HttpProxyAdmin {
            http: self.http.clone(),
            address: format!("{}:{}", ip, port),
            _forward: None,
        }))
    }

    async fn manifest(&self, object: &ObjectRef) -> Result<Manifest, DataSourceError> {
        let manifest = match object.kind {
            ObjectKind::Pod => self.get_manifest::<Pod>(object).await?,
            ObjectKind::ConfigMap => self.get_manifest::<ConfigMap>(object).await?,
            ObjectKind::Service => self.get_manifest::<Service>(object).await?,
        };
        Ok(manifest)
    }

    async fn node_manifests(&self) -> Result<Vec<Manifest>, DataSourceError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await.map_err(K8sError::from)?;
        let manifests = nodes
            .items
            .iter()
            .map(Manifest::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(manifests)
    }
}

#[async_trait]
impl MeshInfoSource for KubeCluster {
    async fn auth_policy(&self) -> Result<AuthPolicyInfo, DataSourceError> {
        let servers = self.list_policy("Server", "servers").await?;
        let server_authorizations = self
            .list_policy("ServerAuthorization", "serverauthorizations")
            .await?;
        Ok(AuthPolicyInfo {
            servers,
            server_authorizations,
        })
    }
}

/// Proxy admin endpoint reached over plain HTTP.
pub struct HttpProxyAdmin {
    http: reqwest::Client,
    address: String,
    _forward: Option<PortForward>,
}

impl HttpProxyAdmin {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            address: address.into(),
            _forward: None,
        }
    }
}

#[async_trait]
impl ProxyAdminEndpoint for HttpProxyAdmin {
    fn address(&self) -> &str {
        &self.address
    }

    async fn scrape_metrics(&self) -> Result<Bytes, DataSourceError> {
        let url = format!("http://{}/metrics", self.address);
        let response = self
            .http
            .get(&url)
            .timeout(SCRAPE_TIMEOUT)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| DataSourceError::Scrape(e.to_string()))?;

        response
            .bytes()
            .await
            .map_err(|e| DataSourceError::Scrape(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerPort, PodSpec};

    fn pod_with(containers: Vec<Container>, init_containers: Option<Vec<Container>>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers,
                init_containers,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn proxy(ports: Vec<ContainerPort>) -> Container {
        Container {
            name: PROXY_CONTAINER.to_string(),
            ports: Some(ports),
            ..Default::default()
        }
    }

    fn admin_port() -> ContainerPort {
        ContainerPort {
            name: Some(PROXY_ADMIN_PORT.to_string()),
            container_port: 4191,
            ..Default::default()
        }
    }

    #[test]
    fn test_admin_port_of_proxy_container() {
        let app = Container {
            name: "app".to_string(),
            ..Default::default()
        };
        let pod = pod_with(vec![app, proxy(vec![admin_port()])], None);

        let container = proxy_container(&pod).unwrap();
        assert_eq!(container_port(container, PROXY_ADMIN_PORT), Some(4191));
    }

    #[test]
    fn test_proxy_as_native_sidecar() {
        let pod = pod_with(vec![], Some(vec![proxy(vec![admin_port()])]));
        assert!(proxy_container(&pod).is_some());
    }

    #[test]
    fn test_missing_proxy_or_port() {
        let pod = pod_with(vec![], None);
        assert!(proxy_container(&pod).is_none());

        let container = proxy(vec![]);
        assert_eq!(container_port(&container, PROXY_ADMIN_PORT), None);
    }

    #[tokio::test]
    async fn test_scrape_metrics_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/metrics")
            .with_body("request_total 1\n")
            .create_async()
            .await;

        let admin = HttpProxyAdmin::new(server.host_with_port());
        let body = admin.scrape_metrics().await.unwrap();
        assert_eq!(&body[..], b"request_total 1\n");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_scrape_error_status() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/metrics").with_status(500).create_async().await;

        let admin = HttpProxyAdmin::new(server.host_with_port());
        assert!(matches!(
            admin.scrape_metrics().await,
            Err(DataSourceError::Scrape(_))
        ));
    }
}
