// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Command Dispatcher
//!
//! Pulls commands off the [`CommandStream`] and starts one collection task per
//! command without waiting for it, so a minutes-long capture never stalls the
//! receive loop.
//!
//! Admission is bounded: when `max_concurrent` collections are already
//! running, further commands are dropped rather than queued. A diagnostic ID
//! is ignored while its collection runs and for `dedupe_ttl` after its bundle
//! was reported; a failed report leaves the ID free for redelivery.
//!
//! On shutdown the loop stops receiving and closes the stream. In-flight
//! collections get `drain_grace` to finish before their cancellation token
//! fires.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements internal responsibilities for dispatcher

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::command_stream::CommandStream;
use super::diagnostic_collector::DiagnosticCollector;
use crate::domain::agent_config::DiagnosticsConfig;
use crate::domain::command::AgentCommand;

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_concurrent: usize,
    pub dedupe_ttl: Duration,
    pub drain_grace: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from(&DiagnosticsConfig::default())
    }
}

impl From<&DiagnosticsConfig> for DispatcherSettings {
    fn from(config: &DiagnosticsConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_collections,
            dedupe_ttl: config.dedupe_ttl,
            drain_grace: config.drain_grace,
        }
    }
}

/// Why a command did not start a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Saturated,
    Duplicate,
}

impl Rejection {
    fn as_str(&self) -> &'static str {
        match self {
            Rejection::Saturated => "saturated",
            Rejection::Duplicate => "duplicate",
        }
    }
}

pub struct CommandDispatcher {
    commands: Arc<CommandStream>,
    collector: Arc<DiagnosticCollector>,
    admission: Arc<Semaphore>,
    seen: Arc<SeenDiagnostics>,
    tasks: TaskTracker,
    collections: CancellationToken,
    drain_grace: Duration,
}

impl CommandDispatcher {
    pub fn new(
        commands: Arc<CommandStream>,
        collector: Arc<DiagnosticCollector>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            commands,
            collector,
            admission: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            seen: Arc::new(SeenDiagnostics::new(settings.dedupe_ttl)),
            tasks: TaskTracker::new(),
            collections: CancellationToken::new(),
            drain_grace: settings.drain_grace,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("command dispatcher started");

        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.commands.next_command() => match next {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            // Rejections are logged and counted by dispatch
            let _ = self.dispatch(command);
        }

        self.commands.close().await;
        self.drain().await;
        info!("command dispatcher stopped");
    }

    /// Starts the collection for `command` in the background.
    pub fn dispatch(&self, command: AgentCommand) -> Result<(), Rejection> {
        self.admit(&command).map(|permit| {
            let collector = self.collector.clone();
            let seen = self.seen.clone();
            let cancel = self.collections.child_token();
            self.tasks.spawn(async move {
                let diagnostic_id = match &command {
                    AgentCommand::GetProxyDiagnostics { diagnostic_id, .. } => {
                        Some(diagnostic_id.clone())
                    }
                    AgentCommand::GetProxyLogs { .. } => None,
                };
                let reported = collector.execute(command, cancel).await;
                if let Some(id) = diagnostic_id {
                    seen.settle(&id, reported);
                }
                drop(permit);
            });
        })
    }

    fn admit(&self, command: &AgentCommand) -> Result<OwnedSemaphorePermit, Rejection> {
        let result = self.try_admit(command);
        if let Err(rejection) = result.as_ref() {
            metrics::counter!("tether_commands_rejected_total", "reason" => rejection.as_str())
                .increment(1);
        }
        result
    }

    fn try_admit(&self, command: &AgentCommand) -> Result<OwnedSemaphorePermit, Rejection> {
        let Ok(permit) = self.admission.clone().try_acquire_owned() else {
            warn!(
                command = command.label(),
                pod = %command.pod(),
                "collection limit reached, dropping command"
            );
            return Err(Rejection::Saturated);
        };

        if let AgentCommand::GetProxyDiagnostics { diagnostic_id, .. } = command {
            if !self.seen.first_sighting(diagnostic_id) {
                info!(diagnostic_id = %diagnostic_id, "ignoring repeated diagnostic request");
                return Err(Rejection::Duplicate);
            }
        }

        Ok(permit)
    }

    async fn drain(&self) {
        self.tasks.close();
        if self.tasks.is_empty() {
            return;
        }

        info!(in_flight = self.tasks.len(), "waiting for in-flight collections");
        if tokio::time::timeout(self.drain_grace, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.tasks.len(),
                "drain grace elapsed, cancelling collections"
            );
            self.collections.cancel();
            self.tasks.wait().await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Sighting {
    InFlight,
    Reported(Instant),
}

/// Diagnostic IDs being collected, or reported within the last `ttl`.
struct SeenDiagnostics {
    ttl: Duration,
    entries: Mutex<HashMap<String, Sighting>>,
}

impl SeenDiagnostics {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Marks `id` in flight, returning `false` if it is in flight already or
    /// was reported inside the window.
    fn first_sighting(&self, id: &str) -> bool {
        if self.ttl.is_zero() {
            return true;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, sighting| match sighting {
            Sighting::InFlight => true,
            Sighting::Reported(at) => now.duration_since(*at) < self.ttl,
        });

        match entries.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Sighting::InFlight);
                true
            }
        }
    }

    /// Ends the collection of `id`. Only a reported bundle keeps suppressing
    /// redeliveries.
    fn settle(&self, id: &str, reported: bool) {
        if self.ttl.is_zero() {
            return;
        }

        let mut entries = self.entries.lock();
        if reported {
            entries.insert(id.to_string(), Sighting::Reported(Instant::now()));
        } else {
            entries.remove(id);
        }
    }
}
