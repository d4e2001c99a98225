// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Admin HTTP surface
//!
//! `/live` always answers 200 while the process serves requests. `/ready`
//! answers 200 only while the event stream is connected. `/metrics` renders
//! the Prometheus recorder when one is installed.
//!
//! # Architecture
//!
//! - **Layer:** Presentation Layer
//! - **Purpose:** Implements internal responsibilities for admin

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::infrastructure::reconnecting_stream::StreamState;

pub struct AdminState {
    pub metrics: Option<PrometheusHandle>,
    pub event_stream: watch::Receiver<StreamState>,
    pub command_stream: watch::Receiver<StreamState>,
    pub start_time: Instant,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/live", get(live_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(state))
}

async fn live_handler(State(state): State<Arc<AdminState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn ready_handler(
    State(state): State<Arc<AdminState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let events = *state.event_stream.borrow();
    let commands = *state.command_stream.borrow();
    let status = if events == StreamState::Connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "event_stream": events.as_str(),
            "command_stream": commands.as_str(),
        })),
    )
}

async fn metrics_handler(State(state): State<Arc<AdminState>>) -> (StatusCode, String) {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed\n".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn serve(state: AdminState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_ready_follows_event_stream() {
        let (events_tx, events) = watch::channel(StreamState::Connecting);
        let (_commands_tx, commands) = watch::channel(StreamState::Connected);
        let base = serve(AdminState {
            metrics: None,
            event_stream: events,
            command_stream: commands,
            start_time: Instant::now(),
        })
        .await;

        let response = reqwest::get(format!("{}/ready", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        events_tx.send(StreamState::Connected).unwrap();
        let response = reqwest::get(format!("{}/ready", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["event_stream"], "connected");

        let response = reqwest::get(format!("{}/live", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let (_events_tx, events) = watch::channel(StreamState::Disconnected);
        let (_commands_tx, commands) = watch::channel(StreamState::Disconnected);
        let base = serve(AdminState {
            metrics: None,
            event_stream: events,
            command_stream: commands,
            start_time: Instant::now(),
        })
        .await;

        let response = reqwest::get(format!("{}/metrics", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
