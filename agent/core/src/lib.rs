// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # tether-agent-core
//!
//! Dual-stream connector between a Kubernetes cluster and the tether control
//! plane.
//!
//! - an outbound **event stream** pushing workload state, authenticated by a
//!   first-frame handshake and healed by a periodic full resync
//! - an inbound **command stream** feeding a non-blocking dispatcher that runs
//!   one diagnostic collection per command
//!
//! Both channels sit on [`infrastructure::reconnecting_stream::ReconnectingStream`],
//! which hides transport churn behind an explicit state machine.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Implements internal responsibilities for lib

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
