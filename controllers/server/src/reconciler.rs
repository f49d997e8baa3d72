//! Reconciliation logic for Server CRDs.
//!
//! Reconciliation is level-triggered: each run looks only at the current
//! Server, the Pods the ownership index says it controls, and nothing about
//! the event that caused the run. Running it again with nothing changed
//! creates nothing and writes nothing.

use crate::error::ControllerError;
use crate::ownership::{OwnerIndex, ServerKey};
use crate::pod_factory;
use crate::store::ClusterStore;
use crds::{Server, ServerStatus, POD_PHASE_RUNNING};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Status a Server should report for the Pod realizing it.
///
/// `running` is true only for the exact `Running` phase; a missing status
/// or phase counts as not running.
pub fn observed_status(pod: &Pod) -> ServerStatus {
    let phase = pod.status.as_ref().and_then(|status| status.phase.as_deref());
    ServerStatus {
        pod_name: pod.name_any(),
        running: phase == Some(POD_PHASE_RUNNING),
    }
}

/// Whether the Server's recorded status differs from `desired`.
pub fn status_needs_update(current: Option<&ServerStatus>, desired: &ServerStatus) -> bool {
    current != Some(desired)
}

/// Reconciles Server resources against their Pods.
#[derive(Debug)]
pub struct Reconciler<S> {
    store: S,
    index: OwnerIndex,
}

impl<S: ClusterStore> Reconciler<S> {
    /// Creates a reconciler reading owned Pods from `index`.
    pub fn new(store: S, index: OwnerIndex) -> Self {
        Self { store, index }
    }

    /// Reconciles one Server.
    ///
    /// This method:
    /// 1. Fetches the Server (gone means nothing to do)
    /// 2. Looks up the Pods it controls in the ownership index
    /// 3. Creates a Pod if there is none, otherwise adopts the first
    /// 4. Writes the Pod's name and running state to the Server status
    ///
    /// Store errors abort the run and are returned unchanged; retrying is
    /// left to the caller.
    #[instrument(skip(self, key), fields(server = %key))]
    pub async fn reconcile(&self, key: &ServerKey) -> Result<Action, ControllerError> {
        let server = match self.store.get_server(key).await {
            Ok(Some(server)) => server,
            Ok(None) => {
                debug!("Server not found, assuming it was deleted");
                return Ok(Action::await_change());
            }
            Err(e) => {
                error!(error = %e, "unable to fetch Server");
                return Err(e);
            }
        };

        let pod = self.ensure_pod(key, &server).await?;

        let status = observed_status(&pod);
        if !status_needs_update(server.status.as_ref(), &status) {
            debug!(pod = %status.pod_name, "Server status up to date");
            return Ok(Action::await_change());
        }

        if let Err(e) = self.store.update_server_status(&server, &status).await {
            error!(error = %e, pod = %status.pod_name, "unable to update Server status");
            return Err(e);
        }
        info!(pod = %status.pod_name, running = status.running, "updated Server status");

        Ok(Action::await_change())
    }

    /// Returns the Pod realizing `server`, creating it if none exists.
    ///
    /// With more than one owned Pod the first by name wins; the others are
    /// left alone.
    async fn ensure_pod(&self, key: &ServerKey, server: &Server) -> Result<Arc<Pod>, ControllerError> {
        let owned = self.index.owned_by(&key.namespace, &key.name);
        if let Some(existing) = owned.first() {
            if owned.len() > 1 {
                warn!(
                    count = owned.len(),
                    pod = %existing.name_any(),
                    "Server controls more than one Pod, adopting the first"
                );
            } else {
                debug!(pod = %existing.name_any(), "adopting existing Pod");
            }
            return Ok(Arc::clone(existing));
        }

        let pod = pod_factory::render(server).inspect_err(|e| {
            error!(error = %e, "unable to render Pod for Server");
        })?;
        match self.store.create_pod(&key.namespace, &pod).await {
            Ok(created) => {
                info!(pod = %created.name_any(), "created Pod for Server");
                Ok(Arc::new(created))
            }
            Err(e) => {
                error!(error = %e, "unable to create Pod for Server");
                Err(e)
            }
        }
    }
}
