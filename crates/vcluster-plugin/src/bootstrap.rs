//! Cluster bootstrap: from connection material to a [`RegisterContext`]
//!
//! The host hands out three kubeconfigs and an options blob. Bootstrap parses
//! each of them, builds throttled clients for both clusters, wires up the
//! managers, and prepares access to the namespace the plugin runs in.
//!
//! Every failure names the piece of material it came from, so a broken syncer
//! kubeconfig is never reported as a broken physical one.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{client::ClientBuilder, Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ClientLimits, PluginOptions};
use crate::context::RegisterContext;
use crate::dispatcher::{watch_manager, FatalSlot};
use crate::error::ConfigStage;
use crate::host::ConnectionMaterial;
use crate::manager::ClusterManager;
use crate::options::VirtualClusterOptions;
use crate::throttle::ThrottleLayer;
use crate::translate::NameTranslator;
use crate::{Error, Result};

/// Builds Kubernetes clients from parsed configs
#[cfg_attr(test, mockall::automock)]
pub trait ClientFactory: Send + Sync {
    /// Build a client that stays within `limits`
    fn build(&self, config: Config, limits: ClientLimits) -> std::result::Result<Client, kube::Error>;
}

/// Production factory: kube clients behind a token bucket.
///
/// TLS needs a process-wide rustls crypto provider, which the embedding binary
/// installs at startup.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThrottledClientFactory;

impl ThrottledClientFactory {
    /// Adjust a parsed config for long-lived watches
    pub fn prepare(mut config: Config) -> Config {
        config.read_timeout = None;
        config
    }
}

impl ClientFactory for ThrottledClientFactory {
    fn build(
        &self,
        config: Config,
        limits: ClientLimits,
    ) -> std::result::Result<Client, kube::Error> {
        let client = ClientBuilder::try_from(Self::prepare(config))?
            .with_layer(&ThrottleLayer::new(limits))
            .build();
        Ok(client)
    }
}

/// Parse a kubeconfig document into a client config
pub async fn parse_kubeconfig(raw: &str, stage: ConfigStage) -> Result<Config> {
    let kubeconfig: Kubeconfig =
        serde_yaml::from_str(raw).map_err(|e| Error::config(stage, e))?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::config(stage, e))
}

/// Turns connection material into a ready [`RegisterContext`]
#[derive(Clone)]
pub struct ClusterBootstrap {
    factory: Arc<dyn ClientFactory>,
    physical_limits: ClientLimits,
    virtual_limits: ClientLimits,
}

impl ClusterBootstrap {
    /// Create a bootstrapper using the limits from `options`
    pub fn new(factory: Arc<dyn ClientFactory>, options: &PluginOptions) -> Self {
        Self {
            factory,
            physical_limits: options.physical_limits,
            virtual_limits: options.virtual_limits,
        }
    }

    /// Build the context syncers run with.
    ///
    /// When the plugin runs outside the target namespace this blocks until the
    /// current-namespace cache is warm, or until `token` is cancelled.
    pub async fn build_context(
        &self,
        material: &ConnectionMaterial,
        token: &CancellationToken,
    ) -> Result<RegisterContext> {
        let options = VirtualClusterOptions::from_json(&material.options)?;
        let translator = NameTranslator::for_cluster(&options.name);

        let physical_config = parse_kubeconfig(&material.physical_config, ConfigStage::Physical).await?;
        let virtual_config = parse_kubeconfig(&material.virtual_config, ConfigStage::Virtual).await?;
        let syncer_config = parse_kubeconfig(&material.syncer_config, ConfigStage::Syncer).await?;

        let physical_client =
            self.build_client(physical_config, self.physical_limits, ConfigStage::Physical)?;
        let virtual_client =
            self.build_client(virtual_config, self.virtual_limits, ConfigStage::Virtual)?;

        let target_namespace = material.target_namespace.clone();
        let current_namespace = material.current_namespace.clone();
        // The options decide what the physical cache watches
        let watched_namespace = if options.target_namespace.is_empty() {
            target_namespace.clone()
        } else {
            options.target_namespace.clone()
        };
        let fatal = FatalSlot::default();

        let physical_manager = ClusterManager::new(
            "physical",
            physical_client.clone(),
            Some(watched_namespace.clone()),
        );
        let virtual_manager = ClusterManager::new("virtual", virtual_client, None);

        let current_namespace_client = if current_namespace == watched_namespace {
            debug!(namespace = %current_namespace, "Reusing physical cache for current namespace");
            ClusterManager::with_cache("current-namespace", physical_manager.cache().clone())
        } else {
            current_namespace_manager(physical_client, &current_namespace, token, &fatal).await?
        };

        info!(
            suffix = %translator.suffix(),
            target_namespace = %target_namespace,
            current_namespace = %current_namespace,
            "Cluster context ready"
        );

        Ok(RegisterContext {
            token: token.clone(),
            options,
            translator,
            target_namespace,
            current_namespace,
            current_namespace_client,
            physical_manager,
            virtual_manager,
            syncer_config,
            fatal,
        })
    }

    fn build_client(
        &self,
        config: Config,
        limits: ClientLimits,
        stage: ConfigStage,
    ) -> Result<Client> {
        if !limits.is_valid() {
            return Err(Error::config(
                stage,
                format!("client qps must be a positive number, got {}", limits.qps),
            ));
        }
        self.factory
            .build(config, limits)
            .map_err(|e| Error::config(stage, e))
    }
}

/// Separate cache for the namespace the plugin runs in.
///
/// The host creates its service records there, so the `Service` informer is
/// registered up front. Once warm, a later failure of the cache is recorded
/// in `fatal` and cancels `token`.
async fn current_namespace_manager(
    client: Client,
    namespace: &str,
    token: &CancellationToken,
    fatal: &FatalSlot,
) -> Result<ClusterManager> {
    let manager = ClusterManager::new("current-namespace", client, Some(namespace.to_string()));
    let _ = manager.cached::<Service>();

    let mut runner = {
        let manager = manager.clone();
        let token = token.clone();
        tokio::spawn(async move { manager.start(token).await })
    };

    info!(namespace = %namespace, "Waiting for current namespace cache to sync");
    tokio::select! {
        synced = manager.wait_for_cache_sync(token) => match synced {
            Ok(()) => {
                watch_manager(manager.name().to_string(), runner, token.clone(), fatal.clone());
                Ok(manager)
            }
            Err(e @ Error::Cancelled { .. }) => Err(e),
            Err(e) => Err(Error::config(ConfigStage::CurrentNamespace, e)),
        },
        stopped = &mut runner => {
            if token.is_cancelled() {
                return Err(Error::cancelled("waiting for current namespace cache sync"));
            }
            let message = match stopped {
                Ok(Ok(())) => "cache stopped before it was warm".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            Err(Error::config(ConfigStage::CurrentNamespace, message))
        }
    }
}
