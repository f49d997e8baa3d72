//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the ownership
//! index, the reconciler, and the Server controller loop together.

use crate::backoff::RetryTracker;
use crate::config::Config;
use crate::error::ControllerError;
use crate::ownership::OwnerIndex;
use crate::reconciler::Reconciler;
use crate::store::KubeClusterStore;
use crate::watcher::{self, Context};
use crds::Server;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use kube_runtime::controller::Config as DispatchConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for Server management.
#[derive(Debug)]
pub struct Controller {
    server_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    ///
    /// Startup fails if the Pod ownership index does not complete its
    /// initial listing within `config.index_sync_timeout`.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Server Controller");

        let kube_client = Client::try_default().await?;

        let (server_api, pod_api): (Api<Server>, Api<Pod>) = match config.namespace.as_deref() {
            Some(ns) => (
                Api::namespaced(kube_client.clone(), ns),
                Api::namespaced(kube_client.clone(), ns),
            ),
            None => (Api::all(kube_client.clone()), Api::all(kube_client.clone())),
        };

        let index = OwnerIndex::new();
        let ctx = Arc::new(Context {
            reconciler: Reconciler::new(KubeClusterStore::new(kube_client), index.clone()),
            retries: RetryTracker::new(config.backoff_min_minutes, config.backoff_max_minutes),
            index: index.clone(),
            index_sync_timeout: config.index_sync_timeout,
        });

        let dispatch_config = DispatchConfig::default()
            .debounce(config.debounce)
            .concurrency(config.concurrency);

        // The controller drives the Pod watch that fills the index; reconciles
        // wait for it, startup gives up if it never completes.
        let server_watcher = tokio::spawn(async move {
            watcher::watch_servers(server_api, pod_api, ctx, dispatch_config).await
        });

        info!("Waiting for Pod ownership index to sync...");
        if let Err(e) = index.wait_synced(config.index_sync_timeout).await {
            server_watcher.abort();
            return Err(e);
        }

        Ok(Self { server_watcher })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Server Controller running");

        self.server_watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("Server watcher panicked: {}", e)))?
    }
}
