// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Agent Configuration Types
//
// Defines the configuration schema for a tether cluster agent:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Agent identity and control-plane endpoints
// - Stream reconnect and resync timing
// - Diagnostic collection budgets
// - Kubernetes access and admin endpoint settings
//
// Client credentials are never part of the manifest; they are read from the
// environment by the CLI.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "tether.dev/v1";
pub const KIND: &str = "AgentConfig";

/// Top-level Kubernetes-style agent configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfigManifest {
    /// API version (must be "tether.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "AgentConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: AgentConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable agent name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfigSpec {
    pub agent: AgentIdentity,

    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    #[serde(default)]
    pub streams: StreamConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub kubernetes: KubernetesConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Agent identifier issued by the control plane at registration
    pub id: String,

    /// Address proxies through local port-forwards instead of pod IPs.
    /// Used when the agent runs outside the cluster.
    #[serde(default)]
    pub local_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Host:port of the HTTP API (token endpoint)
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// Host:port of the gRPC API
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,

    /// Disable TLS for both APIs (development only)
    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Pause between failed attempts to open a stream
    #[serde(default = "default_reconnect_interval", with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Buffered workload events between producers and the stream sender
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Period of the full workload resync
    #[serde(default = "default_resync_interval", with = "humantime_serde")]
    pub resync_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_metrics_samples")]
    pub metrics_samples: u32,

    #[serde(default = "default_metrics_sample_interval", with = "humantime_serde")]
    pub metrics_sample_interval: Duration,

    /// Upper bound for any single collection sub-fetch
    #[serde(default = "default_max_collection_duration", with = "humantime_serde")]
    pub max_collection_duration: Duration,

    /// Collections allowed to run at once; further commands are dropped
    #[serde(default = "default_max_concurrent_collections")]
    pub max_concurrent_collections: usize,

    /// Window in which a repeated diagnostic ID is ignored (0 disables)
    #[serde(default = "default_dedupe_ttl", with = "humantime_serde")]
    pub dedupe_ttl: Duration,

    /// Time in-flight collections get to finish on shutdown
    #[serde(default = "default_drain_grace", with = "humantime_serde")]
    pub drain_grace: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Explicit kubeconfig; in-cluster or default discovery when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub startup_probe_timeout: Duration,

    #[serde(default = "default_sync_timeout", with = "humantime_serde")]
    pub cache_sync_timeout: Duration,

    #[serde(default = "default_linkerd_namespace")]
    pub linkerd_namespace: String,

    #[serde(default = "default_linkerd_info_interval", with = "humantime_serde")]
    pub linkerd_info_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_addr")]
    pub bind_address: String,
}

fn default_api_addr() -> String {
    "api.tether.dev:443".to_string()
}

fn default_grpc_addr() -> String {
    "grpc.tether.dev:443".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_reconnect_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_resync_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_metrics_samples() -> u32 {
    6
}

fn default_metrics_sample_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_max_collection_duration() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_concurrent_collections() -> usize {
    32
}

fn default_dedupe_ttl() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_drain_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_linkerd_namespace() -> String {
    "linkerd".to_string()
}

fn default_linkerd_info_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_admin_addr() -> String {
    "0.0.0.0:9990".to_string()
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            api_addr: default_api_addr(),
            grpc_addr: default_grpc_addr(),
            insecure: false,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: default_reconnect_interval(),
            event_channel_capacity: default_event_channel_capacity(),
            resync_interval: default_resync_interval(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            metrics_samples: default_metrics_samples(),
            metrics_sample_interval: default_metrics_sample_interval(),
            max_collection_duration: default_max_collection_duration(),
            max_concurrent_collections: default_max_concurrent_collections(),
            dedupe_ttl: default_dedupe_ttl(),
            drain_grace: default_drain_grace(),
        }
    }
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            startup_probe_timeout: default_probe_timeout(),
            cache_sync_timeout: default_sync_timeout(),
            linkerd_namespace: default_linkerd_namespace(),
            linkerd_info_interval: default_linkerd_info_interval(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_address: default_admin_addr(),
        }
    }
}

impl Default for AgentConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "tether-agent".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                labels: None,
            },
            spec: AgentConfigSpec::default(),
        }
    }
}

impl AgentConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. TETHER_CONFIG_PATH environment variable
    /// 2. ./tether-config.yaml (working directory)
    /// 3. ~/.tether/config.yaml (user home)
    /// 4. /etc/tether/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TETHER_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./tether-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".tether").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/tether/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TETHER_AGENT_ID") {
            tracing::info!("Environment override: TETHER_AGENT_ID");
            self.spec.agent.id = val;
        }
        if let Ok(val) = std::env::var("TETHER_API_ADDR") {
            tracing::info!("Environment override: TETHER_API_ADDR={}", val);
            self.spec.control_plane.api_addr = val;
        }
        if let Ok(val) = std::env::var("TETHER_GRPC_ADDR") {
            tracing::info!("Environment override: TETHER_GRPC_ADDR={}", val);
            self.spec.control_plane.grpc_addr = val;
        }
        if let Ok(val) = std::env::var("TETHER_ADMIN_ADDR") {
            tracing::info!("Environment override: TETHER_ADMIN_ADDR={}", val);
            self.spec.admin.bind_address = val;
        }
        if let Some(insecure) = env_flag("TETHER_INSECURE") {
            self.spec.control_plane.insecure = insecure;
        }
        if let Some(local_mode) = env_flag("TETHER_LOCAL_MODE") {
            self.spec.agent.local_mode = local_mode;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.agent.id.is_empty() {
            anyhow::bail!("spec.agent.id cannot be empty");
        }

        let control_plane = &self.spec.control_plane;
        if control_plane.api_addr.is_empty() {
            anyhow::bail!("spec.control_plane.api_addr cannot be empty");
        }
        if control_plane.grpc_addr.is_empty() {
            anyhow::bail!("spec.control_plane.grpc_addr cannot be empty");
        }

        if self.spec.streams.event_channel_capacity == 0 {
            anyhow::bail!("spec.streams.event_channel_capacity must be at least 1");
        }
        if self.spec.streams.resync_interval.is_zero() {
            anyhow::bail!("spec.streams.resync_interval must be positive");
        }

        if self.spec.kubernetes.linkerd_info_interval.is_zero() {
            anyhow::bail!("spec.kubernetes.linkerd_info_interval must be positive");
        }

        let diagnostics = &self.spec.diagnostics;
        if diagnostics.metrics_samples == 0 {
            anyhow::bail!("spec.diagnostics.metrics_samples must be at least 1");
        }
        if diagnostics.max_concurrent_collections == 0 {
            anyhow::bail!("spec.diagnostics.max_concurrent_collections must be at least 1");
        }
        let window = diagnostics.metrics_sample_interval * diagnostics.metrics_samples.saturating_sub(1);
        if window >= diagnostics.max_collection_duration {
            anyhow::bail!(
                "metrics sampling window ({:?}) does not fit in max_collection_duration ({:?})",
                window,
                diagnostics.max_collection_duration
            );
        }

        if self.spec.admin.bind_address.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!(
                "spec.admin.bind_address is not a socket address: '{}'",
                self.spec.admin.bind_address
            );
        }

        Ok(())
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => {
            tracing::info!("Environment override: {}=true", name);
            Some(true)
        }
        "false" | "0" | "no" | "off" => {
            tracing::info!("Environment override: {}=false", name);
            Some(false)
        }
        _ => {
            tracing::warn!(
                "Invalid value for {}: '{}'. Expected true/false. Ignoring.",
                name,
                val
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_manifest() -> AgentConfigManifest {
        let mut manifest = AgentConfigManifest::default();
        manifest.spec.agent.id = "agent-7f3c".to_string();
        manifest
    }

    #[test]
    fn test_default_manifest() {
        let manifest = AgentConfigManifest::default();
        assert_eq!(manifest.api_version, "tether.dev/v1");
        assert_eq!(manifest.kind, "AgentConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.streams.reconnect_interval, Duration::from_millis(100));
        assert_eq!(manifest.spec.streams.resync_interval, Duration::from_secs(600));
        assert_eq!(manifest.spec.diagnostics.metrics_samples, 6);
        assert_eq!(manifest.spec.diagnostics.metrics_sample_interval, Duration::from_secs(10));
        assert_eq!(manifest.spec.kubernetes.linkerd_namespace, "linkerd");
    }

    #[test]
    fn test_yaml_with_humantime_durations() {
        let yaml = r#"
apiVersion: tether.dev/v1
kind: AgentConfig
metadata:
  name: edge-cluster
spec:
  agent:
    id: agent-42
    local_mode: true
  control_plane:
    grpc_addr: localhost:8443
    insecure: true
  streams:
    resync_interval: 2m
  diagnostics:
    metrics_samples: 3
    metrics_sample_interval: 500ms
"#;
        let manifest = AgentConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "edge-cluster");
        assert_eq!(manifest.spec.agent.id, "agent-42");
        assert!(manifest.spec.agent.local_mode);
        assert_eq!(manifest.spec.control_plane.grpc_addr, "localhost:8443");
        assert_eq!(manifest.spec.control_plane.api_addr, "api.tether.dev:443");
        assert_eq!(manifest.spec.streams.resync_interval, Duration::from_secs(120));
        assert_eq!(manifest.spec.streams.reconnect_interval, Duration::from_millis(100));
        assert_eq!(manifest.spec.diagnostics.metrics_sample_interval, Duration::from_millis(500));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether-config.yaml");

        let manifest = valid_manifest();
        manifest.to_yaml_file(&path).unwrap();

        let loaded = AgentConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.agent.id, "agent-7f3c");
        assert_eq!(loaded.spec.diagnostics.dedupe_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(AgentConfigManifest::load_or_default(Some(missing)).is_err());
    }

    #[test]
    fn test_validation() {
        let mut manifest = valid_manifest();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.agent.id.clear();
        assert!(manifest.validate().is_err());
        manifest.spec.agent.id = "agent-7f3c".to_string();

        manifest.spec.diagnostics.metrics_samples = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.diagnostics.metrics_samples = 6;

        // 6 samples 10s apart need 50s of budget
        manifest.spec.diagnostics.max_collection_duration = Duration::from_secs(30);
        assert!(manifest.validate().is_err());
        manifest.spec.diagnostics.max_collection_duration = Duration::from_secs(300);

        manifest.spec.admin.bind_address = "not-an-address".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let mut manifest = valid_manifest();
        manifest.spec.kubernetes.linkerd_info_interval = Duration::ZERO;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("linkerd_info_interval"));

        let mut manifest = valid_manifest();
        manifest.spec.streams.resync_interval = Duration::ZERO;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_zero_linkerd_interval_in_yaml_rejected() {
        let yaml = r#"
apiVersion: tether.dev/v1
kind: AgentConfig
metadata:
  name: edge
spec:
  agent:
    id: agent-7f3c
  kubernetes:
    linkerd_info_interval: 0s
"#;
        let manifest = AgentConfigManifest::from_yaml_str(yaml).unwrap();
        assert!(manifest.validate().is_err());
    }
}
