// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Kubernetes adapter errors
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for error

use std::time::Duration;
use thiserror::Error;

use crate::domain::diagnostics::DataSourceError;
use crate::domain::workload::WatchError;

pub type K8sResult<T> = Result<T, K8sError>;

#[derive(Error, Debug)]
pub enum K8sError {
    #[error("K8s API error: {message}")]
    ApiError { message: String },

    #[error("{kind} not found: {namespace}/{name}")]
    NotFound {
        kind: &'static str,
        name: String,
        namespace: String,
    },

    #[error("Invalid kubeconfig: {message}")]
    ConfigError { message: String },

    #[error("Kubernetes API not reachable within {0:?}")]
    Unreachable(Duration),

    #[error("Port forward error: {message}")]
    ForwardError { message: String },

    #[error("Failed to encode object: {0}")]
    Encode(#[from] serde_json::Error),
}

impl K8sError {
    /// Maps a 404 from the API server to [`K8sError::NotFound`].
    pub fn from_lookup(err: kube::Error, kind: &'static str, name: &str, namespace: &str) -> Self {
        match err {
            kube::Error::Api(ref response) if response.code == 404 => K8sError::NotFound {
                kind,
                name: name.into(),
                namespace: namespace.into(),
            },
            other => other.into(),
        }
    }
}

impl From<kube::Error> for K8sError {
    fn from(err: kube::Error) -> Self {
        K8sError::ApiError {
            message: err.to_string(),
        }
    }
}

impl From<K8sError> for DataSourceError {
    fn from(err: K8sError) -> Self {
        match err {
            K8sError::NotFound {
                kind,
                name,
                namespace,
            } => DataSourceError::NotFound {
                kind,
                name,
                namespace,
            },
            K8sError::ForwardError { message } => DataSourceError::Forward(message),
            K8sError::Encode(err) => DataSourceError::Encode(err),
            other => DataSourceError::Api(other.to_string()),
        }
    }
}

impl From<K8sError> for WatchError {
    fn from(err: K8sError) -> Self {
        match err {
            K8sError::Encode(err) => WatchError::Encode(err),
            other => WatchError::Api(other.to_string()),
        }
    }
}
