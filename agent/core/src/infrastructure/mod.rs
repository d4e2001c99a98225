// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure Layer
//!
//! Adapters behind the domain traits: the gRPC control plane client, token
//! acquisition, the Kubernetes watcher and data sources, and the reconnecting
//! stream primitive both connector channels run on.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for mod

pub mod control_plane;
pub mod credentials;
pub mod k8s;
pub mod reconnecting_stream;
