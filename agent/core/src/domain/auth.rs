// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent identity and request credentials
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements internal responsibilities for auth

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Immutable per-agent identity asserted on every channel to the control plane.
///
/// Created once at startup and shared read-only by every stream and unary call.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    agent_id: String,
    agent_key: String,
}

impl AuthContext {
    pub fn new(agent_id: impl Into<String>, agent_key: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_key: agent_key.into(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn agent_key(&self) -> &str {
        &self.agent_key
    }
}

// The key never reaches logs.
impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("agent_id", &self.agent_id)
            .field("agent_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("token request failed: {0}")]
    Request(String),

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed token response: {0}")]
    Malformed(String),
}

/// Supplies the `authorization` metadata attached to every RPC.
///
/// Implementations refresh the underlying bearer token transparently.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Value of the `authorization` header, e.g. `Bearer <token>`.
    async fn authorization(&self) -> Result<String, CredentialError>;

    fn requires_transport_security(&self) -> bool;
}
