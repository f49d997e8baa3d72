//! Pod ownership index.
//!
//! An in-memory multimap from owning `Server` to the Pods that name it as
//! their controller. It holds no state of its own worth persisting: the
//! Pod watch refreshes it from a full listing on every (re)connect and keeps
//! it current from Pod change events in between.

use crate::error::ControllerError;
use crds::Server;
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use kube_runtime::watcher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Namespaced identity of a `Server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerKey {
    pub namespace: String,
    pub name: String,
}

impl ServerKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a Server object as delivered by a watch.
    pub fn from_server(server: &Server) -> Result<Self, ControllerError> {
        let namespace = server
            .metadata
            .namespace
            .clone()
            .ok_or(ControllerError::MissingObjectKey(".metadata.namespace"))?;
        let name = server
            .metadata
            .name
            .clone()
            .ok_or(ControllerError::MissingObjectKey(".metadata.name"))?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Returns the Server controlling a Pod, if any.
///
/// Only the controller owner reference counts, and only when its API group
/// and kind are exactly those of `Server`; the version is ignored. Pods
/// without such a reference index to nothing.
pub fn controlling_server(pod: &Pod) -> Option<ServerKey> {
    let namespace = pod.metadata.namespace.as_deref()?;
    let owner = pod
        .metadata
        .owner_references
        .as_deref()?
        .iter()
        .find(|owner| owner.controller == Some(true))?;

    let group = owner
        .api_version
        .rsplit_once('/')
        .map_or("", |(group, _version)| group);
    if group != Server::group(&()) || owner.kind != Server::kind(&()) {
        return None;
    }

    Some(ServerKey::new(namespace, owner.name.clone()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PodKey {
    namespace: String,
    name: String,
}

impl PodKey {
    fn of(pod: &Pod) -> Option<Self> {
        Some(Self {
            namespace: pod.metadata.namespace.clone()?,
            name: pod.metadata.name.clone()?,
        })
    }
}

#[derive(Debug, Default)]
struct IndexState {
    /// Owned Pods per Server, ordered by Pod name.
    by_owner: HashMap<ServerKey, BTreeMap<String, Arc<Pod>>>,
    /// Reverse link used to drop a Pod's previous entry.
    owner_of: HashMap<PodKey, ServerKey>,
    /// Pods seen between `Init` and `InitDone` of a relist.
    relist: Option<HashSet<PodKey>>,
}

impl IndexState {
    /// Indexes `pod` under its controlling Server.
    ///
    /// Returns the replaced entry when the Pod used to be indexed under a
    /// different Server, so that Server can be told it lost the Pod.
    fn upsert(&mut self, pod: Pod) -> Option<Arc<Pod>> {
        let pod_key = PodKey::of(&pod)?;
        let owner = controlling_server(&pod);
        let previous = self
            .remove(&pod_key)
            .filter(|previous| controlling_server(previous) != owner);

        if let Some(owner) = owner {
            self.by_owner
                .entry(owner.clone())
                .or_default()
                .insert(pod_key.name.clone(), Arc::new(pod));
            self.owner_of.insert(pod_key, owner);
        }
        previous
    }

    fn remove(&mut self, pod_key: &PodKey) -> Option<Arc<Pod>> {
        let owner = self.owner_of.remove(pod_key)?;
        let pods = self.by_owner.get_mut(&owner)?;
        let removed = pods.remove(&pod_key.name);
        if pods.is_empty() {
            self.by_owner.remove(&owner);
        }
        removed
    }

    #[cfg(test)]
    fn rebuild(&mut self, pods: impl IntoIterator<Item = Pod>) {
        self.by_owner.clear();
        self.owner_of.clear();
        for pod in pods {
            self.upsert(pod);
        }
    }

    /// Drops every indexed Pod the finished relist did not see.
    fn prune_unseen(&mut self, seen: &HashSet<PodKey>) -> Vec<Arc<Pod>> {
        let gone: Vec<PodKey> = self
            .owner_of
            .keys()
            .filter(|pod_key| !seen.contains(pod_key))
            .cloned()
            .collect();
        gone.iter().filter_map(|pod_key| self.remove(pod_key)).collect()
    }
}

/// Shared handle to the ownership index. Clones see the same index.
#[derive(Debug, Clone)]
pub struct OwnerIndex {
    state: Arc<RwLock<IndexState>>,
    synced: Arc<watch::Sender<bool>>,
}

impl Default for OwnerIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnerIndex {
    /// Creates an empty, unsynced index.
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            state: Arc::new(RwLock::new(IndexState::default())),
            synced: Arc::new(synced),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pods controlled by the given Server, ordered by Pod name.
    pub fn owned_by(&self, namespace: &str, name: &str) -> Vec<Arc<Pod>> {
        let key = ServerKey::new(namespace, name);
        self.read()
            .by_owner
            .get(&key)
            .map(|pods| pods.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Replaces the whole index with the owners found in `pods`.
    #[cfg(test)]
    pub fn rebuild(&self, pods: impl IntoIterator<Item = Pod>) {
        self.write().rebuild(pods);
        self.synced.send_replace(true);
    }

    /// Applies one Pod watch event and returns the Pods it touched.
    ///
    /// The returned Pods carry the owner references of every Server whose
    /// set of owned Pods just changed, including the previous owner when a
    /// Pod moved and the owner of a Pod a relist found gone. The index is
    /// already updated when they are returned.
    ///
    /// A relist (`Init`, `InitApply`..., `InitDone`) updates entries as they
    /// arrive and drops the Pods it never saw at `InitDone`.
    pub fn apply_event(&self, event: watcher::Event<Pod>) -> Vec<Pod> {
        match event {
            watcher::Event::Init => {
                self.write().relist = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(pod) | watcher::Event::Apply(pod) => {
                let mut state = self.write();
                if let (Some(seen), Some(pod_key)) = (state.relist.as_mut(), PodKey::of(&pod)) {
                    seen.insert(pod_key);
                }
                let previous = state.upsert(pod.clone());
                drop(state);

                previous
                    .map(Arc::unwrap_or_clone)
                    .into_iter()
                    .chain(std::iter::once(pod))
                    .collect()
            }
            watcher::Event::InitDone => {
                let mut state = self.write();
                let gone = match state.relist.take() {
                    Some(seen) => state.prune_unseen(&seen),
                    None => Vec::new(),
                };
                drop(state);

                self.synced.send_replace(true);
                gone.into_iter().map(Arc::unwrap_or_clone).collect()
            }
            watcher::Event::Delete(pod) => {
                if let Some(pod_key) = PodKey::of(&pod) {
                    self.write().remove(&pod_key);
                }
                vec![pod]
            }
        }
    }

    /// Whether the initial listing has completed.
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the initial listing has completed.
    pub async fn wait_synced(&self, timeout: Duration) -> Result<(), ControllerError> {
        let mut synced = self.synced.subscribe();
        let initial_listing = async move { synced.wait_for(|synced| *synced).await.map(|_| ()) };
        match tokio::time::timeout(timeout, initial_listing).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ControllerError::IndexNotSynced(e.to_string())),
            Err(_) => Err(ControllerError::IndexNotSynced(format!(
                "no initial Pod listing within {}s",
                timeout.as_secs()
            ))),
        }
    }
}
