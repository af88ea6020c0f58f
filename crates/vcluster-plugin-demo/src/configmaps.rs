//! Live syncer copying labelled ConfigMaps from the virtual cluster into the
//! target namespace of the physical cluster.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, ObjectMeta, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, ResourceExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use vcluster_plugin::{
    BoxError, Capabilities, CachedClient, ControllerFuture, RegisterContext, Syncer,
};

/// Only ConfigMaps carrying this label are synced
pub const SYNC_LABEL: &str = "demo.vcluster.io/sync";

/// Finalizer holding virtual ConfigMaps until their physical copy is gone
pub const FINALIZER: &str = "demo.vcluster.io/configmap";

/// Field manager for server-side apply
const FIELD_MANAGER: &str = "vcluster-plugin-demo";

/// Label on physical copies naming the virtual namespace
const VIRTUAL_NAMESPACE_LABEL: &str = "vcluster.loft.sh/object-namespace";

/// Label on physical copies naming the virtual object
const VIRTUAL_NAME_LABEL: &str = "vcluster.loft.sh/object-name";

/// Requeue interval for drift detection
const REQUEUE_SUCCESS_SECS: u64 = 300;

/// Requeue interval after a failed reconcile
const REQUEUE_ERROR_SECS: u64 = 30;

/// Errors while syncing a ConfigMap
#[derive(Debug, Error)]
pub enum SyncError {
    /// Kubernetes API call failed
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    /// The virtual object has no namespace
    #[error("configmap {0} has no namespace")]
    MissingNamespace(String),
}

/// Shared state of the running controller
struct SyncContext {
    plugin: Arc<RegisterContext>,
    physical: CachedClient<ConfigMap>,
}

/// Syncs labelled ConfigMaps to the physical cluster
#[derive(Debug, Default)]
pub struct ConfigMapSyncer;

#[async_trait]
impl Syncer for ConfigMapSyncer {
    fn name(&self) -> &str {
        "configmaps"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::live().with_indices()
    }

    async fn register_indices(&self, ctx: &RegisterContext) -> Result<(), BoxError> {
        // Physical copies are read from cache, so the informer must exist
        // before the managers start
        let _ = ctx.physical_manager.cached::<ConfigMap>();
        Ok(())
    }

    fn controller(&self, ctx: Arc<RegisterContext>) -> Result<ControllerFuture, BoxError> {
        let virtual_configmaps: Api<ConfigMap> = Api::all(ctx.virtual_manager.client());
        let sync_ctx = Arc::new(SyncContext {
            physical: ctx.physical_manager.cached::<ConfigMap>(),
            plugin: ctx,
        });

        Ok(Box::pin(
            Controller::new(virtual_configmaps, WatcherConfig::default().labels(SYNC_LABEL))
                .run(reconcile, error_policy, sync_ctx)
                .for_each(|result| async move {
                    match result {
                        Ok(action) => debug!(?action, "ConfigMap reconciliation completed"),
                        Err(e) => warn!(error = ?e, "ConfigMap reconciliation error"),
                    }
                }),
        ))
    }
}

async fn reconcile(cm: Arc<ConfigMap>, ctx: Arc<SyncContext>) -> Result<Action, SyncError> {
    let name = cm.name_any();
    let namespace = cm
        .namespace()
        .ok_or_else(|| SyncError::MissingNamespace(name.clone()))?;
    let target = &ctx.plugin.target_namespace;
    let physical_name = ctx.plugin.physical_name(&name, &namespace);
    let physical_api = ctx.physical.api(target);
    let virtual_api: Api<ConfigMap> = Api::namespaced(ctx.plugin.virtual_manager.client(), &namespace);

    if cm.metadata.deletion_timestamp.is_some() {
        if ctx.physical.get(target, &physical_name).is_some() {
            info!(configmap = %name, namespace = %namespace, physical = %physical_name, "Deleting physical copy");
            match physical_api.delete(&physical_name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        set_finalizers(&virtual_api, &cm, without_finalizer(&cm)).await?;
        return Ok(Action::await_change());
    }

    if !cm.finalizers().iter().any(|f| f == FINALIZER) {
        let mut finalizers = cm.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        set_finalizers(&virtual_api, &cm, finalizers).await?;
    }

    let copy = physical_copy(&cm, &physical_name, target, &namespace);
    physical_api
        .patch(
            &physical_name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&copy),
        )
        .await?;
    debug!(configmap = %name, namespace = %namespace, physical = %physical_name, "Synced");

    Ok(Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)))
}

fn error_policy(_cm: Arc<ConfigMap>, error: &SyncError, _ctx: Arc<SyncContext>) -> Action {
    warn!(error = %error, "ConfigMap sync failed, will retry");
    Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
}

async fn set_finalizers(
    api: &Api<ConfigMap>,
    cm: &ConfigMap,
    finalizers: Vec<String>,
) -> Result<(), SyncError> {
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&cm.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn without_finalizer(cm: &ConfigMap) -> Vec<String> {
    cm.finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect()
}

/// The physical object for a virtual ConfigMap
fn physical_copy(cm: &ConfigMap, physical_name: &str, target: &str, namespace: &str) -> ConfigMap {
    let mut labels: BTreeMap<String, String> = cm.labels().clone();
    labels.insert(VIRTUAL_NAMESPACE_LABEL.to_string(), namespace.to_string());
    labels.insert(VIRTUAL_NAME_LABEL.to_string(), cm.name_any());

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(physical_name.to_string()),
            namespace: Some(target.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        data: cm.data.clone(),
        binary_data: cm.binary_data.clone(),
        immutable: cm.immutable,
    }
}
