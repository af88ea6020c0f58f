//! Fake syncer publishing plugin details inside the virtual cluster
//!
//! Nothing on the physical side backs this object; it is synthesized from the
//! register context so workloads in the virtual cluster can discover where
//! their objects end up.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ObjectMeta, Patch, PatchParams};
use kube::Api;
use tracing::{info, warn};

use vcluster_plugin::{BoxError, Capabilities, ControllerFuture, RegisterContext, Syncer};

/// Virtual namespace the info ConfigMap is published in
pub const INFO_NAMESPACE: &str = "default";

/// Publishes a ConfigMap describing the plugin
#[derive(Debug)]
pub struct PluginInfoSyncer {
    plugin_name: String,
}

impl PluginInfoSyncer {
    /// Create a syncer for the named plugin
    pub fn new(plugin_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
        }
    }

    fn configmap_name(&self) -> String {
        format!("{}-info", self.plugin_name)
    }

    fn desired(&self, ctx: &RegisterContext) -> ConfigMap {
        let data = BTreeMap::from([
            ("plugin".to_string(), self.plugin_name.clone()),
            ("vcluster".to_string(), ctx.translator.suffix().to_string()),
            ("targetNamespace".to_string(), ctx.target_namespace.clone()),
            ("currentNamespace".to_string(), ctx.current_namespace.clone()),
        ]);
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.configmap_name()),
                namespace: Some(INFO_NAMESPACE.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(data),
            ..ConfigMap::default()
        }
    }
}

#[async_trait]
impl Syncer for PluginInfoSyncer {
    fn name(&self) -> &str {
        "plugin-info"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::fake().with_init()
    }

    async fn init(&self, ctx: &RegisterContext) -> Result<(), BoxError> {
        if ctx.target_namespace.is_empty() {
            return Err("host did not report a target namespace".into());
        }
        Ok(())
    }

    fn fake_controller(&self, ctx: Arc<RegisterContext>) -> Result<ControllerFuture, BoxError> {
        let desired = self.desired(&ctx);
        let name = self.configmap_name();

        Ok(Box::pin(async move {
            let api: Api<ConfigMap> = Api::namespaced(ctx.virtual_manager.client(), INFO_NAMESPACE);
            let params = PatchParams::apply("vcluster-plugin-demo").force();
            match api.patch(&name, &params, &Patch::Apply(&desired)).await {
                Ok(_) => info!(configmap = %name, namespace = INFO_NAMESPACE, "Published plugin info"),
                Err(e) => warn!(configmap = %name, error = %e, "Failed to publish plugin info"),
            }
            ctx.token.cancelled().await;
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configmap_name() {
        assert_eq!(PluginInfoSyncer::new("demo").configmap_name(), "demo-info");
    }

    #[test]
    fn test_is_a_fake_initializer() {
        let caps = PluginInfoSyncer::new("demo").capabilities();
        assert!(caps.initializer);
        assert!(!caps.indices);
        assert_eq!(caps.activation, Some(vcluster_plugin::Activation::Fake));
    }
}
