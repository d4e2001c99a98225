// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Layer
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements internal responsibilities for mod

pub mod command_stream;
pub mod connector;
pub mod diagnostic_collector;
pub mod dispatcher;
pub mod event_reporter;
pub mod event_stream;
pub mod linkerd_info;
pub mod resync;

pub use connector::{Connector, ConnectorHandle, ConnectorSettings};
