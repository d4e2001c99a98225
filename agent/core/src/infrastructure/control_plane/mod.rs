// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! gRPC adapter for the control plane
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for control plane

pub mod client;
pub mod mapper;
pub mod proto;

pub use client::GrpcControlPlane;
