// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Kubernetes Workload Watcher
//!
//! Keeps reflector stores for DaemonSets, Deployments, StatefulSets,
//! ReplicaSets and Pods, and turns watch events into [`WorkloadEvent`]s.
//!
//! Lifecycle:
//!
//! 1. [`KubeWorkloadWatcher::start`] spawns the reflectors and returns the
//!    pull side (the watcher, a [`WorkloadSource`]) and the push side
//!    ([`ChangeFeed`]).
//! 2. [`KubeWorkloadWatcher::wait_until_ready`] blocks until every store has
//!    completed its first listing.
//! 3. [`ChangeFeed::run`] converts buffered and live watch events into
//!    `Added`/`Updated`/`Deleted` notifications. Objects that disappear
//!    across a relist are reported as `Deleted`.
//!
//! Core/v1 Events are watched alongside and forwarded as [`ClusterEvent`]s
//! with their owning workload resolved. Both paths run over bounded buffers
//! with their own consumer, so a stalled event stream slows the workload
//! watches without holding back cluster events.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements internal responsibilities for watcher

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Event as CoreEvent, Pod};
use kube::runtime::reflector::{self, ObjectRef as StoreKey, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::control_plane::ClusterEvent;
use crate::domain::workload::{
    Manifest, OwnedReplicaSet, WatchError, Workload, WorkloadEvent, WorkloadKind, WorkloadSource,
};

/// Watch events buffered per path before the feed consumes them.
const CHANGE_BUFFER: usize = 256;

/// Raw workload watch events, tagged by resource.
enum Change {
    DaemonSet(watcher::Event<DaemonSet>),
    Deployment(watcher::Event<Deployment>),
    StatefulSet(watcher::Event<StatefulSet>),
}

#[derive(Clone)]
struct Stores {
    daemon_sets: Store<DaemonSet>,
    deployments: Store<Deployment>,
    stateful_sets: Store<StatefulSet>,
    replica_sets: Store<ReplicaSet>,
    pods: Store<Pod>,
}

impl Stores {
    /// Pods in `namespace` with an owner reference to `owner_uid`.
    fn pods_owned_by(&self, namespace: &str, owner_uid: &str) -> Result<Vec<Manifest>, WatchError> {
        self.pods
            .state()
            .iter()
            .filter(|pod| is_owned_by(pod.as_ref(), namespace, owner_uid))
            .map(|pod| Manifest::from_json(pod.as_ref()).map_err(WatchError::from))
            .collect()
    }

    fn replica_sets_owned_by(
        &self,
        namespace: &str,
        owner_uid: &str,
    ) -> Result<Vec<OwnedReplicaSet>, WatchError> {
        self.replica_sets
            .state()
            .iter()
            .filter(|rs| is_owned_by(rs.as_ref(), namespace, owner_uid))
            .map(|rs| -> Result<OwnedReplicaSet, WatchError> {
                let uid = rs.uid().unwrap_or_default();
                Ok(OwnedReplicaSet {
                    manifest: Manifest::from_json(rs.as_ref())?,
                    pods: self.pods_owned_by(namespace, &uid)?,
                })
            })
            .collect()
    }

    fn workload_named(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Workload>, WatchError> {
        match kind {
            WorkloadKind::DaemonSet => self
                .daemon_sets
                .get(&StoreKey::new(name).within(namespace))
                .map(|ds| ds.to_workload(self))
                .transpose(),
            WorkloadKind::Deployment => self
                .deployments
                .get(&StoreKey::new(name).within(namespace))
                .map(|deploy| deploy.to_workload(self))
                .transpose(),
            WorkloadKind::StatefulSet => self
                .stateful_sets
                .get(&StoreKey::new(name).within(namespace))
                .map(|sts| sts.to_workload(self))
                .transpose(),
        }
    }

    /// Name of the Deployment owning ReplicaSet `name`.
    fn replica_set_owner(&self, name: &str, namespace: &str) -> Option<String> {
        let rs = self.replica_sets.get(&StoreKey::new(name).within(namespace))?;
        rs.owner_references().first().map(|owner| owner.name.clone())
    }

    /// Resolves the workload an Event is about: ReplicaSet → Deployment,
    /// Pod → ReplicaSet → Deployment, Pod → DaemonSet/StatefulSet.
    fn event_owner(&self, event: &CoreEvent) -> Result<Option<Workload>, WatchError> {
        let involved = &event.involved_object;
        let (Some(kind), Some(name)) = (involved.kind.as_deref(), involved.name.as_deref()) else {
            return Ok(None);
        };
        let namespace = involved.namespace.as_deref().unwrap_or_default();

        let (kind, name) = match kind {
            "ReplicaSet" => match self.replica_set_owner(name, namespace) {
                Some(deploy) => ("Deployment".to_string(), deploy),
                None => return Ok(None),
            },
            "Pod" => {
                let Some(pod) = self.pods.get(&StoreKey::new(name).within(namespace)) else {
                    return Ok(None);
                };
                let Some(owner) = pod.owner_references().first() else {
                    return Ok(None);
                };
                if owner.kind == "ReplicaSet" {
                    match self.replica_set_owner(&owner.name, namespace) {
                        Some(deploy) => ("Deployment".to_string(), deploy),
                        None => return Ok(None),
                    }
                } else {
                    (owner.kind.clone(), owner.name.clone())
                }
            }
            other => (other.to_string(), name.to_string()),
        };

        match WorkloadKind::from_kind(&kind) {
            Some(kind) => self.workload_named(kind, &name, namespace),
            None => Ok(None),
        }
    }
}

fn is_owned_by<K: Resource>(object: &K, namespace: &str, owner_uid: &str) -> bool {
    object.meta().namespace.as_deref() == Some(namespace)
        && object
            .owner_references()
            .iter()
            .any(|owner| owner.uid == owner_uid)
}

/// Workload resources the watcher reports.
trait WorkloadObject: Resource + serde::Serialize {
    fn to_workload(&self, stores: &Stores) -> Result<Workload, WatchError>;
}

impl WorkloadObject for DaemonSet {
    fn to_workload(&self, stores: &Stores) -> Result<Workload, WatchError> {
        Ok(Workload::DaemonSet {
            manifest: Manifest::from_json(self)?,
            pods: stores.pods_owned_by(&self.namespace().unwrap_or_default(), &self.uid().unwrap_or_default())?,
        })
    }
}

impl WorkloadObject for Deployment {
    fn to_workload(&self, stores: &Stores) -> Result<Workload, WatchError> {
        Ok(Workload::Deployment {
            manifest: Manifest::from_json(self)?,
            replica_sets: stores.replica_sets_owned_by(
                &self.namespace().unwrap_or_default(),
                &self.uid().unwrap_or_default(),
            )?,
        })
    }
}

impl WorkloadObject for StatefulSet {
    fn to_workload(&self, stores: &Stores) -> Result<Workload, WatchError> {
        Ok(Workload::StatefulSet {
            manifest: Manifest::from_json(self)?,
            pods: stores.pods_owned_by(&self.namespace().unwrap_or_default(), &self.uid().unwrap_or_default())?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Transition<K> {
    Added(K),
    Updated(K, K),
    Deleted(K),
}

/// Last observed version of every object, keyed by uid. Derives
/// add/update/delete transitions from the watcher's apply/delete/relist
/// events.
struct Tracker<K> {
    objects: HashMap<String, K>,
    relisted: Option<HashSet<String>>,
}

impl<K: Resource + Clone> Tracker<K> {
    fn new() -> Self {
        Self {
            objects: HashMap::new(),
            relisted: None,
        }
    }

    fn observe(&mut self, event: watcher::Event<K>) -> Vec<Transition<K>> {
        match event {
            watcher::Event::Apply(object) => self.upsert(object).into_iter().collect(),
            watcher::Event::Delete(object) => {
                if let Some(uid) = object.uid() {
                    self.objects.remove(&uid);
                }
                vec![Transition::Deleted(object)]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(object) => {
                if let (Some(seen), Some(uid)) = (self.relisted.as_mut(), object.uid()) {
                    seen.insert(uid);
                }
                self.upsert(object).into_iter().collect()
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<String> = self
                    .objects
                    .keys()
                    .filter(|uid| !seen.contains(*uid))
                    .cloned()
                    .collect();
                gone.iter()
                    .filter_map(|uid| self.objects.remove(uid))
                    .map(Transition::Deleted)
                    .collect()
            }
        }
    }

    fn upsert(&mut self, object: K) -> Option<Transition<K>> {
        let uid = object.uid()?;
        match self.objects.insert(uid, object.clone()) {
            None => Some(Transition::Added(object)),
            Some(old) if old.resource_version() == object.resource_version() => None,
            Some(old) => Some(Transition::Updated(old, object)),
        }
    }
}

pub struct KubeWorkloadWatcher {
    stores: Stores,
}

impl KubeWorkloadWatcher {
    /// Spawns one reflector per resource. They run until `shutdown` fires.
    pub fn start(client: Client, shutdown: CancellationToken) -> (Arc<Self>, ChangeFeed) {
        let (changes, workload_changes) = mpsc::channel(CHANGE_BUFFER);
        let (core_events, event_changes) = mpsc::channel(CHANGE_BUFFER);

        let stores = Stores {
            daemon_sets: reflect(Api::all(client.clone()), Some(Change::DaemonSet), &changes, &shutdown),
            deployments: reflect(Api::all(client.clone()), Some(Change::Deployment), &changes, &shutdown),
            stateful_sets: reflect(Api::all(client.clone()), Some(Change::StatefulSet), &changes, &shutdown),
            replica_sets: reflect(Api::all(client.clone()), None, &changes, &shutdown),
            pods: reflect(Api::all(client.clone()), None, &changes, &shutdown),
        };
        forward_events(Api::all(client), core_events, shutdown);

        let watcher = Arc::new(Self {
            stores: stores.clone(),
        });
        let feed = ChangeFeed {
            stores,
            workload_changes,
            event_changes,
        };
        (watcher, feed)
    }

    /// Waits for every store to finish its initial listing.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), WatchError> {
        info!("waiting for caches to sync");
        let stores = &self.stores;
        let synced = tokio::time::timeout(timeout, async {
            stores.daemon_sets.wait_until_ready().await?;
            stores.deployments.wait_until_ready().await?;
            stores.stateful_sets.wait_until_ready().await?;
            stores.replica_sets.wait_until_ready().await?;
            stores.pods.wait_until_ready().await
        })
        .await
        .map_err(|_| WatchError::SyncTimeout(timeout))?;

        synced.map_err(|e| WatchError::Api(e.to_string()))?;
        info!("caches synced");
        Ok(())
    }
}

#[async_trait]
impl WorkloadSource for KubeWorkloadWatcher {
    async fn list_all(&self) -> Result<Vec<Workload>, WatchError> {
        let stores = &self.stores;
        let mut workloads = Vec::new();
        for ds in stores.daemon_sets.state() {
            workloads.push(ds.to_workload(stores)?);
        }
        for deploy in stores.deployments.state() {
            workloads.push(deploy.to_workload(stores)?);
        }
        for sts in stores.stateful_sets.state() {
            workloads.push(sts.to_workload(stores)?);
        }
        Ok(workloads)
    }
}

/// Push side of the watcher.
pub struct ChangeFeed {
    stores: Stores,
    workload_changes: mpsc::Receiver<Change>,
    event_changes: mpsc::Receiver<watcher::Event<CoreEvent>>,
}

impl ChangeFeed {
    /// Delivers notifications until `shutdown` fires or a consumer goes away.
    /// Workload changes and cluster events are consumed independently.
    /// Call only after [`KubeWorkloadWatcher::wait_until_ready`].
    pub async fn run(
        self,
        workload_events: mpsc::Sender<WorkloadEvent>,
        cluster_events: mpsc::Sender<ClusterEvent>,
        shutdown: CancellationToken,
    ) {
        let ChangeFeed {
            stores,
            workload_changes,
            event_changes,
        } = self;

        tokio::join!(
            run_workloads(&stores, workload_changes, &workload_events, &shutdown),
            run_cluster_events(&stores, event_changes, &cluster_events, &shutdown),
        );

        info!("workload watcher stopped");
    }
}

async fn run_workloads(
    stores: &Stores,
    mut changes: mpsc::Receiver<Change>,
    workload_events: &mpsc::Sender<WorkloadEvent>,
    shutdown: &CancellationToken,
) {
    let mut daemon_sets = Tracker::new();
    let mut deployments = Tracker::new();
    let mut stateful_sets = Tracker::new();

    loop {
        let change = tokio::select! {
            _ = shutdown.cancelled() => break,
            change = changes.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };

        let delivered = match change {
            Change::DaemonSet(event) => {
                stores.deliver(daemon_sets.observe(event), workload_events, shutdown).await
            }
            Change::Deployment(event) => {
                stores.deliver(deployments.observe(event), workload_events, shutdown).await
            }
            Change::StatefulSet(event) => {
                stores.deliver(stateful_sets.observe(event), workload_events, shutdown).await
            }
        };
        if !delivered {
            break;
        }
    }
}

async fn run_cluster_events(
    stores: &Stores,
    mut changes: mpsc::Receiver<watcher::Event<CoreEvent>>,
    cluster_events: &mpsc::Sender<ClusterEvent>,
    shutdown: &CancellationToken,
) {
    let mut events = Tracker::new();

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = changes.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if !stores.report(events.observe(event), cluster_events, shutdown).await {
            break;
        }
    }
}

impl Stores {

    async fn deliver<K: WorkloadObject>(
        &self,
        transitions: Vec<Transition<K>>,
        events: &mpsc::Sender<WorkloadEvent>,
        shutdown: &CancellationToken,
    ) -> bool {
        for transition in transitions {
            let event = match self.workload_event(&transition) {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "failed to encode workload");
                    continue;
                }
            };
            debug!(event = event.label(), "workload change");
            if !forward(events, event, shutdown).await {
                return false;
            }
        }
        true
    }

    fn workload_event<K: WorkloadObject>(&self, transition: &Transition<K>) -> Result<WorkloadEvent, WatchError> {
        Ok(match transition {
            Transition::Added(object) => WorkloadEvent::Added(object.to_workload(self)?),
            Transition::Updated(old, new) => WorkloadEvent::Updated {
                old: old.to_workload(self)?,
                new: new.to_workload(self)?,
                timestamp: Utc::now(),
            },
            Transition::Deleted(object) => WorkloadEvent::Deleted(object.to_workload(self)?),
        })
    }

    /// Forwards newly seen Events. Updates and deletions are not reported.
    async fn report(
        &self,
        transitions: Vec<Transition<CoreEvent>>,
        events: &mpsc::Sender<ClusterEvent>,
        shutdown: &CancellationToken,
    ) -> bool {
        for transition in transitions {
            let Transition::Added(event) = transition else {
                continue;
            };

            let owner = match self.event_owner(&event) {
                Ok(Some(owner)) => owner,
                Ok(None) => {
                    debug!(event = %event.name_any(), "non-workload event, skipping");
                    continue;
                }
                Err(err) => {
                    warn!(event = %event.name_any(), error = %err, "failed to resolve event owner");
                    continue;
                }
            };
            let manifest = match Manifest::from_json(&event) {
                Ok(manifest) => manifest,
                Err(err) => {
                    warn!(error = %err, "failed to encode event");
                    continue;
                }
            };

            let event = ClusterEvent {
                event: manifest,
                owner,
            };
            if !forward(events, event, shutdown).await {
                return false;
            }
        }
        true
    }
}

/// Sends `item`, giving up when `shutdown` fires or the receiver is gone.
async fn forward<T>(sender: &mpsc::Sender<T>, item: T, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        sent = sender.send(item) => sent.is_ok(),
    }
}

fn reflect<K>(
    api: Api<K>,
    tag: Option<fn(watcher::Event<K>) -> Change>,
    changes: &mpsc::Sender<Change>,
    shutdown: &CancellationToken,
) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()).default_backoff());
    let changes = changes.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    if let Some(tag) = tag {
                        if !forward(&changes, tag(event), &shutdown).await {
                            break;
                        }
                    }
                }
                Some(Err(err)) => warn!(resource = %K::kind(&()), error = %err, "watch error"),
                None => break,
            }
        }
    });

    reader
}

fn forward_events(
    api: Api<CoreEvent>,
    changes: mpsc::Sender<watcher::Event<CoreEvent>>,
    shutdown: CancellationToken,
) {
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    if !forward(&changes, event, &shutdown).await {
                        break;
                    }
                }
                Some(Err(err)) => warn!(resource = "Event", error = %err, "watch error"),
                None => break,
            }
        }
    });
}
