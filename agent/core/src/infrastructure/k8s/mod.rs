// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Kubernetes adapters
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for k8s

pub mod cluster;
pub mod error;
pub mod forward;
pub mod watcher;

pub use cluster::{HttpProxyAdmin, KubeCluster};
pub use error::{K8sError, K8sResult};
pub use watcher::{ChangeFeed, KubeWorkloadWatcher};
