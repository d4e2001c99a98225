// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Conversions between domain types and the generated protobuf messages.
//!
//! Absent diagnostic artifacts are encoded as empty fields.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for mapper

use chrono::{DateTime, Utc};

use super::proto;
use crate::domain::auth::AuthContext;
use crate::domain::command::{AgentCommand, CommandDecodeError, DecodedCommand, PodRef};
use crate::domain::control_plane::{AuthPolicyInfo, ClusterEvent, EventFrame, LinkerdInfo, TransportError};
use crate::domain::diagnostics::{DiagnosticBundle, ProxyLogReport};
use crate::domain::workload::{Manifest, OwnedReplicaSet, Workload, WorkloadEvent};

pub fn auth(auth: &AuthContext) -> proto::Auth {
    proto::Auth {
        agent_id: auth.agent_id().to_string(),
        agent_key: auth.agent_key().to_string(),
    }
}

pub fn timestamp(at: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

fn pods(manifests: &[Manifest]) -> Vec<proto::Pod> {
    manifests
        .iter()
        .map(|pod| proto::Pod { pod: pod.to_vec() })
        .collect()
}

fn replica_set(replica_set: &OwnedReplicaSet) -> proto::ReplicaSet {
    proto::ReplicaSet {
        replica_set: replica_set.manifest.to_vec(),
        pods: pods(&replica_set.pods),
    }
}

pub fn workload(workload: &Workload) -> proto::Workload {
    use proto::workload::Workload as Kind;

    let kind = match workload {
        Workload::DaemonSet { manifest, pods: owned } => Kind::Daemonset(proto::DaemonSet {
            daemon_set: manifest.to_vec(),
            pods: pods(owned),
        }),
        Workload::Deployment {
            manifest,
            replica_sets,
        } => Kind::Deployment(proto::Deployment {
            deployment: manifest.to_vec(),
            replica_sets: replica_sets.iter().map(replica_set).collect(),
        }),
        Workload::StatefulSet { manifest, pods: owned } => Kind::Statefulset(proto::StatefulSet {
            stateful_set: manifest.to_vec(),
            pods: pods(owned),
        }),
    };

    proto::Workload {
        workload: Some(kind),
    }
}

pub fn workload_message(frame: &EventFrame) -> proto::WorkloadMessage {
    use proto::workload_message::Message;

    let message = match frame {
        EventFrame::Auth(context) => Message::Auth(auth(context)),
        EventFrame::Event(WorkloadEvent::Added(added)) => Message::Added(proto::AddWorkload {
            workload: Some(workload(added)),
        }),
        EventFrame::Event(WorkloadEvent::Updated {
            old,
            new,
            timestamp: at,
        }) => Message::Updated(proto::UpdateWorkload {
            old_workload: Some(workload(old)),
            new_workload: Some(workload(new)),
            timestamp: Some(timestamp(*at)),
        }),
        EventFrame::Event(WorkloadEvent::Deleted(deleted)) => Message::Deleted(proto::DeleteWorkload {
            workload: Some(workload(deleted)),
        }),
        EventFrame::Event(WorkloadEvent::FullList(workloads)) => Message::List(proto::ListWorkloads {
            workloads: workloads.iter().map(workload).collect(),
        }),
    };

    proto::WorkloadMessage {
        message: Some(message),
    }
}

fn pod_ref(name: String, namespace: String) -> Result<PodRef, CommandDecodeError> {
    if name.is_empty() {
        return Err(CommandDecodeError::MissingField("pod_name"));
    }
    if namespace.is_empty() {
        return Err(CommandDecodeError::MissingField("pod_namespace"));
    }
    Ok(PodRef::new(name, namespace))
}

pub fn decode_command(command: proto::AgentCommand) -> DecodedCommand {
    use proto::agent_command::Command;

    match command.command {
        Some(Command::GetProxyDiagnostics(request)) => {
            let pod = pod_ref(request.pod_name, request.pod_namespace)?;
            if request.diagnostic_id.is_empty() {
                return Err(CommandDecodeError::MissingField("diagnostic_id"));
            }
            Ok(AgentCommand::GetProxyDiagnostics {
                pod,
                diagnostic_id: request.diagnostic_id,
            })
        }
        Some(Command::GetProxyLogs(request)) => Ok(AgentCommand::GetProxyLogs {
            pod: pod_ref(request.pod_name, request.pod_namespace)?,
            lines: request.lines,
        }),
        None => Err(CommandDecodeError::MissingPayload),
    }
}

fn manifests(manifests: Option<Vec<Manifest>>) -> Vec<Vec<u8>> {
    manifests
        .unwrap_or_default()
        .iter()
        .map(Manifest::to_vec)
        .collect()
}

fn manifest(manifest: Option<Manifest>) -> Vec<u8> {
    manifest.map(|m| m.to_vec()).unwrap_or_default()
}

pub fn proxy_diagnostic(context: &AuthContext, bundle: DiagnosticBundle) -> proto::ProxyDiagnostic {
    proto::ProxyDiagnostic {
        auth: Some(auth(context)),
        diagnostic_id: bundle.diagnostic_id,
        logs: bundle.logs.map(|logs| logs.to_vec()).unwrap_or_default(),
        metrics: bundle
            .metrics_samples
            .unwrap_or_default()
            .into_iter()
            .map(|sample| sample.to_vec())
            .collect(),
        pod_manifest: manifest(bundle.pod_manifest),
        linkerd_config_map: manifest(bundle.linkerd_config_map),
        nodes: manifests(bundle.node_manifests),
        k8s_service_manifest: manifest(bundle.service_manifest),
    }
}

pub fn proxy_log(context: &AuthContext, report: ProxyLogReport) -> proto::ProxyLog {
    proto::ProxyLog {
        auth: Some(auth(context)),
        pod_name: report.pod.name,
        pod_namespace: report.pod.namespace,
        lines: report.lines.to_vec(),
        timestamp: Some(timestamp(report.timestamp)),
    }
}

pub fn event(context: &AuthContext, event: ClusterEvent) -> proto::Event {
    proto::Event {
        auth: Some(auth(context)),
        event: event.event.to_vec(),
        owner: Some(workload(&event.owner)),
    }
}

fn auth_policy_info(info: AuthPolicyInfo) -> proto::AuthPolicyInfo {
    proto::AuthPolicyInfo {
        servers: info
            .servers
            .iter()
            .map(|server| proto::Server {
                server: server.to_vec(),
            })
            .collect(),
        server_authorizations: info
            .server_authorizations
            .iter()
            .map(|authorization| proto::ServerAuthorization {
                server_authorization: authorization.to_vec(),
            })
            .collect(),
    }
}

pub fn linkerd_message(context: &AuthContext, info: LinkerdInfo) -> proto::LinkerdMessage {
    use proto::linkerd_message::Message;

    let message = match info {
        LinkerdInfo::AuthPolicy(policy) => Message::AuthPolicyInfo(auth_policy_info(policy)),
    };

    proto::LinkerdMessage {
        auth: Some(auth(context)),
        message: Some(message),
    }
}

pub fn status(status: tonic::Status) -> TransportError {
    TransportError::Rpc {
        code: format!("{:?}", status.code()),
        message: status.message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn deployment() -> Workload {
        Workload::Deployment {
            manifest: Manifest::new(&b"deploy"[..]),
            replica_sets: vec![OwnedReplicaSet {
                manifest: Manifest::new(&b"rs"[..]),
                pods: vec![Manifest::new(&b"pod"[..])],
            }],
        }
    }

    #[test]
    fn test_auth_frame_maps_to_auth_message() {
        let frame = EventFrame::Auth(AuthContext::new("agent-1", "key"));
        let message = workload_message(&frame);

        match message.message {
            Some(proto::workload_message::Message::Auth(auth)) => {
                assert_eq!(auth.agent_id, "agent-1");
                assert_eq!(auth.agent_key, "key");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_deployment_keeps_replica_set_hierarchy() {
        let mapped = workload(&deployment());
        let Some(proto::workload::Workload::Deployment(deployment)) = mapped.workload else {
            panic!("expected deployment");
        };
        assert_eq!(deployment.deployment, b"deploy");
        assert_eq!(deployment.replica_sets.len(), 1);
        assert_eq!(deployment.replica_sets[0].replica_set, b"rs");
        assert_eq!(deployment.replica_sets[0].pods[0].pod, b"pod");
    }

    #[test]
    fn test_update_carries_timestamp() {
        let at = DateTime::from_timestamp(1_700_000_000, 5).unwrap();
        let frame = EventFrame::Event(WorkloadEvent::Updated {
            old: deployment(),
            new: deployment(),
            timestamp: at,
        });

        let Some(proto::workload_message::Message::Updated(update)) = workload_message(&frame).message else {
            panic!("expected update");
        };
        let ts = update.timestamp.unwrap();
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 5);
    }

    #[test]
    fn test_decode_diagnostics_command() {
        let command = proto::AgentCommand {
            command: Some(proto::agent_command::Command::GetProxyDiagnostics(
                proto::GetProxyDiagnostics {
                    pod_name: "web-0".into(),
                    pod_namespace: "shop".into(),
                    diagnostic_id: "d1".into(),
                },
            )),
        };

        assert_eq!(
            decode_command(command),
            Ok(AgentCommand::GetProxyDiagnostics {
                pod: PodRef::new("web-0", "shop"),
                diagnostic_id: "d1".into(),
            })
        );
    }

    #[test]
    fn test_decode_rejects_malformed_commands() {
        assert_eq!(
            decode_command(proto::AgentCommand { command: None }),
            Err(CommandDecodeError::MissingPayload)
        );

        let missing_namespace = proto::AgentCommand {
            command: Some(proto::agent_command::Command::GetProxyLogs(proto::GetProxyLogs {
                pod_name: "web-0".into(),
                pod_namespace: String::new(),
                lines: 10,
            })),
        };
        assert_eq!(
            decode_command(missing_namespace),
            Err(CommandDecodeError::MissingField("pod_namespace"))
        );

        let missing_id = proto::AgentCommand {
            command: Some(proto::agent_command::Command::GetProxyDiagnostics(
                proto::GetProxyDiagnostics {
                    pod_name: "web-0".into(),
                    pod_namespace: "shop".into(),
                    diagnostic_id: String::new(),
                },
            )),
        };
        assert_eq!(
            decode_command(missing_id),
            Err(CommandDecodeError::MissingField("diagnostic_id"))
        );
    }

    #[test]
    fn test_partial_bundle_encodes_missing_artifacts_as_empty() {
        let mut bundle = DiagnosticBundle::new("d1");
        bundle.logs = Some(Bytes::from_static(b"log line"));
        bundle.metrics_samples = Some(vec![Bytes::from_static(b"m1"), Bytes::from_static(b"m2")]);

        let message = proxy_diagnostic(&AuthContext::new("agent-1", "key"), bundle);
        assert_eq!(message.diagnostic_id, "d1");
        assert_eq!(message.logs, b"log line");
        assert_eq!(message.metrics.len(), 2);
        assert!(message.pod_manifest.is_empty());
        assert!(message.nodes.is_empty());
        assert!(message.auth.is_some());
    }
}
