// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control Plane Credentials
//!
//! [`CredentialProvider`] implementations attached to every gRPC call.
//!
//! [`ClientCredentialsTokenSource`] runs the OAuth2 client-credentials grant
//! against the control plane's `/agent-token` endpoint, sending the client ID
//! and secret as HTTP basic auth. Tokens are cached and refreshed shortly
//! before they expire; a token without `expires_in` is kept until the process
//! exits.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for credentials

use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::auth::{CredentialError, CredentialProvider};

/// Tokens are refreshed this long before their reported expiry.
const EXPIRY_DELTA: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    header: String,
    refresh_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.refresh_at.is_none_or(|at| now < at)
    }
}

pub struct ClientCredentialsTokenSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    secure: bool,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsTokenSource {
    /// `api_addr` is `host[:port]` of the control plane HTTP API. The token
    /// endpoint is reached over `https` unless `secure` is false.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        api_addr: &str,
        agent_id: &str,
        secure: bool,
    ) -> Result<Self, CredentialError> {
        let scheme = if secure { "https" } else { "http" };
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        Ok(Self {
            http,
            token_url: format!("{}://{}/agent-token?agent_id={}", scheme, api_addr, agent_id),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            secure,
            cached: Mutex::new(None),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    async fn fetch(&self) -> Result<CachedToken, CredentialError> {
        debug!(url = %self.token_url, "requesting agent token");

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(CredentialError::Malformed("empty access_token".to_string()));
        }

        let refresh_at = token.expires_in.map(|secs| {
            Instant::now() + Duration::from_secs(secs).saturating_sub(EXPIRY_DELTA)
        });
        info!(expires_in = ?token.expires_in, "obtained agent token");

        Ok(CachedToken {
            header: format!("{} {}", normalize_token_type(&token.token_type), token.access_token),
            refresh_at,
        })
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialsTokenSource {
    async fn authorization(&self) -> Result<String, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.header.clone());
        }

        let token = self.fetch().await?;
        let header = token.header.clone();
        *cached = Some(token);
        Ok(header)
    }

    fn requires_transport_security(&self) -> bool {
        self.secure
    }
}

/// Canonical capitalisation of common token types.
fn normalize_token_type(token_type: &str) -> String {
    if token_type.is_empty() || token_type.eq_ignore_ascii_case("bearer") {
        "Bearer".to_string()
    } else if token_type.eq_ignore_ascii_case("mac") {
        "MAC".to_string()
    } else if token_type.eq_ignore_ascii_case("basic") {
        "Basic".to_string()
    } else {
        token_type.to_string()
    }
}

/// Fixed authorization value, for development clusters and tests.
pub struct StaticCredentials {
    header: String,
    secure: bool,
}

impl StaticCredentials {
    pub fn bearer(token: impl AsRef<str>, secure: bool) -> Self {
        Self {
            header: format!("Bearer {}", token.as_ref()),
            secure,
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn authorization(&self) -> Result<String, CredentialError> {
        Ok(self.header.clone())
    }

    fn requires_transport_security(&self) -> bool {
        self.secure
    }
}
