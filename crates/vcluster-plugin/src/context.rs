//! The context handed to every syncer

use tokio_util::sync::CancellationToken;

use crate::dispatcher::FatalSlot;
use crate::manager::ClusterManager;
use crate::options::VirtualClusterOptions;
use crate::translate::NameTranslator;

/// Everything a syncer needs to talk to both clusters
///
/// Built once during init and shared read-only by all syncers.
#[derive(Clone, Debug)]
pub struct RegisterContext {
    /// Lifetime token; cancelled when the plugin shuts down
    pub token: CancellationToken,
    /// Options the host runs with
    pub options: VirtualClusterOptions,
    /// Virtual-to-physical name mapping
    pub translator: NameTranslator,
    /// Physical namespace synced objects are created in
    pub target_namespace: String,
    /// Namespace the plugin runs in
    pub current_namespace: String,
    /// Physical cluster access scoped to the current namespace. Shares the
    /// physical manager's cache when both namespaces are the same.
    pub current_namespace_client: ClusterManager,
    /// Physical cluster, scoped to the target namespace
    pub physical_manager: ClusterManager,
    /// Virtual cluster, all namespaces
    pub virtual_manager: ClusterManager,
    /// Connection settings for the privileged syncer identity
    pub syncer_config: kube::Config,
    /// Failure of a background manager, reported by `start`
    pub(crate) fatal: FatalSlot,
}

impl RegisterContext {
    /// Physical name of a virtual object
    pub fn physical_name(&self, name: &str, namespace: &str) -> String {
        self.translator.physical_name(name, namespace)
    }

    /// Returns true once the plugin is shutting down
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
