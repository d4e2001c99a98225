// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Commands pushed by the control plane
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements internal responsibilities for command

use std::fmt;
use thiserror::Error;

/// Identifies a pod by name and namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
}

impl PodRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A unit of work requested by the control plane. Each command drives exactly
/// one diagnostic collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    GetProxyDiagnostics {
        pod: PodRef,
        diagnostic_id: String,
    },
    GetProxyLogs {
        pod: PodRef,
        lines: u32,
    },
}

impl AgentCommand {
    pub fn label(&self) -> &'static str {
        match self {
            AgentCommand::GetProxyDiagnostics { .. } => "get_proxy_diagnostics",
            AgentCommand::GetProxyLogs { .. } => "get_proxy_logs",
        }
    }

    pub fn pod(&self) -> &PodRef {
        match self {
            AgentCommand::GetProxyDiagnostics { pod, .. } | AgentCommand::GetProxyLogs { pod, .. } => pod,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandDecodeError {
    #[error("command frame carries no payload")]
    MissingPayload,

    #[error("command field `{0}` is empty")]
    MissingField(&'static str),
}

/// A received command frame. Decode failures are delivered in-band so that a
/// malformed payload drops one command without resetting the stream.
pub type DecodedCommand = Result<AgentCommand, CommandDecodeError>;
