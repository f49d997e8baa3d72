//! Kubernetes resource watchers.
//!
//! `kube_runtime::Controller` runs over Servers. Pods reach it through a
//! single watch that updates the ownership index first and only then hands
//! the touched Pods on as owner triggers, so a reconcile caused by a Pod
//! change always reads an index that already holds that change.
//!
//! Queueing, debounce, and requeue after errors all belong to
//! `kube_runtime::Controller`; the reconciler itself never retries.

use crate::backoff::RetryTracker;
use crate::error::ControllerError;
use crate::ownership::{OwnerIndex, ServerKey};
use crate::reconciler::Reconciler;
use crate::store::KubeClusterStore;
use crds::Server;
use futures::{future, stream, Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube_runtime::{
    controller::{self, Action, Config as DispatchConfig},
    reflector::ObjectRef,
    watcher, Controller, WatchStreamExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// State shared by every reconciliation the controller runs.
#[derive(Debug)]
pub struct Context {
    pub reconciler: Reconciler<KubeClusterStore>,
    pub retries: RetryTracker,
    pub index: OwnerIndex,
    pub index_sync_timeout: Duration,
}

/// Applies Pod watch events to `index` and yields the Pods each event touched.
///
/// Every yielded Pod is emitted after its event is in the index.
pub fn index_pod_events<S>(
    events: S,
    index: OwnerIndex,
) -> impl Stream<Item = Result<Pod, watcher::Error>> + Send + 'static
where
    S: Stream<Item = Result<watcher::Event<Pod>, watcher::Error>> + Send + 'static,
{
    events
        .map_ok(move |event| {
            let first_sync = matches!(event, watcher::Event::InitDone) && !index.is_synced();
            let relisted = matches!(event, watcher::Event::InitDone);
            let touched = index.apply_event(event);
            if first_sync {
                info!("Pod ownership index synced");
            } else if relisted {
                debug!(dropped = touched.len(), "Pod ownership index relisted");
            }
            stream::iter(touched.into_iter().map(Ok::<Pod, watcher::Error>))
        })
        .try_flatten()
}

async fn reconcile(server: Arc<Server>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = ServerKey::from_server(&server)?;
    // Before the first listing every Server would look like it owns no Pod.
    ctx.index.wait_synced(ctx.index_sync_timeout).await?;
    let action = ctx.reconciler.reconcile(&key).await?;
    ctx.retries.reset(&key);
    Ok(action)
}

fn error_policy(server: Arc<Server>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let delay = match ServerKey::from_server(&server) {
        Ok(key) => {
            let delay = ctx.retries.next_delay(&key);
            error!(server = %key, error = %error, requeue_secs = delay.as_secs(), "Reconciliation failed");
            delay
        }
        Err(_) => {
            error!(error = %error, "Reconciliation failed for Server without identity");
            ctx.retries.min_delay()
        }
    };
    Action::requeue(delay)
}

/// Logs one controller result.
///
/// A Server deleted while a retry was pending surfaces as `ObjectNotFound`
/// when that retry fires; its failure count is dropped then.
fn report(
    result: Result<(ObjectRef<Server>, Action), controller::Error<ControllerError, watcher::Error>>,
    retries: &RetryTracker,
) {
    match result {
        Ok((server, _action)) => debug!(server = %server, "Reconciled Server"),
        Err(controller::Error::ObjectNotFound(obj_ref)) => {
            let key = ServerKey::new(obj_ref.namespace.clone().unwrap_or_default(), obj_ref.name.clone());
            retries.reset(&key);
            debug!(server = %key, "Server gone, dropped its retry state");
        }
        Err(e) => warn!(error = %e, "Server controller error"),
    }
}

/// Runs the Server controller until it is shut down by a signal.
///
/// Servers trigger reconciliation directly; Pods trigger reconciliation of
/// the Server named by their controller owner reference, after the Pod
/// change is in `ctx.index`.
pub async fn watch_servers(
    server_api: Api<Server>,
    pod_api: Api<Pod>,
    ctx: Arc<Context>,
    config: DispatchConfig,
) -> Result<(), ControllerError> {
    info!("Starting Server controller");

    let pod_events = watcher(pod_api, watcher::Config::default()).default_backoff();
    let owned_pods = index_pod_events(pod_events, ctx.index.clone());

    let report_ctx = Arc::clone(&ctx);
    Controller::new(server_api, watcher::Config::default())
        .owns_stream(owned_pods)
        .with_config(config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(move |result| {
            report(result, &report_ctx.retries);
            future::ready(())
        })
        .await;

    info!("Server controller stopped");
    Ok(())
}
