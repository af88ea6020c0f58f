//! Plugin lifecycle: init, register, start
//!
//! [`PluginManager`] is the entry point for plugin binaries. The usual flow:
//!
//! ```ignore
//! let plugin = PluginManager::new();
//! let ctx = plugin.init("my-plugin").await?;
//! plugin.register(Arc::new(MySyncer::new(&ctx)))?;
//! plugin.start().await?; // returns on shutdown
//! ```
//!
//! State transitions happen under one mutex that is never held across an
//! await; the network-bound work of init and start runs outside it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bootstrap::{ClientFactory, ClusterBootstrap, ThrottledClientFactory};
use crate::config::PluginOptions;
use crate::context::RegisterContext;
use crate::dispatcher::Dispatcher;
use crate::host::{GrpcHostConnector, HostConnector};
use crate::leader::LeaderGate;
use crate::session::init_session;
use crate::syncer::{RegisteredSyncer, Syncer};
use crate::{Error, Result};

#[derive(Default)]
struct State {
    /// Set when init begins; cleared again if init fails
    initialized: bool,
    started: bool,
    name: String,
    context: Option<Arc<RegisterContext>>,
    leader: Option<LeaderGate>,
    syncers: Vec<RegisteredSyncer>,
}

/// Drives one plugin through its lifecycle
pub struct PluginManager {
    connector: Option<Arc<dyn HostConnector>>,
    factory: Arc<dyn ClientFactory>,
    token: CancellationToken,
    state: Mutex<State>,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager {
    /// Manager that dials the host over gRPC and builds throttled kube clients
    pub fn new() -> Self {
        Self {
            connector: None,
            factory: Arc::new(ThrottledClientFactory),
            token: CancellationToken::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Manager with a custom host transport and client factory
    pub fn with_host(connector: Arc<dyn HostConnector>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            connector: Some(connector),
            factory,
            token: CancellationToken::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Bind the plugin lifetime to an existing token
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// The lifetime token shared with every syncer
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop the plugin; [`start`](Self::start) returns once everything has
    /// wound down
    pub fn shutdown(&self) {
        info!("Shutting down plugin");
        self.token.cancel();
    }

    /// Name the plugin registered with, once init has begun
    pub fn name(&self) -> Option<String> {
        let state = self.state.lock();
        (!state.name.is_empty()).then(|| state.name.clone())
    }

    /// The context built by init, if init has completed
    pub fn context(&self) -> Option<Arc<RegisterContext>> {
        self.state.lock().context.clone()
    }

    /// Number of registered syncers
    pub fn syncer_count(&self) -> usize {
        self.state.lock().syncers.len()
    }

    /// [`init_with_options`](Self::init_with_options) with default options
    pub async fn init(&self, name: &str) -> Result<Arc<RegisterContext>> {
        self.init_with_options(name, PluginOptions::default()).await
    }

    /// Register with the host and build the cluster context.
    ///
    /// Blocks until the host answers. Fails with
    /// [`Error::AlreadyInitialized`] when called a second time.
    pub async fn init_with_options(
        &self,
        name: &str,
        options: PluginOptions,
    ) -> Result<Arc<RegisterContext>> {
        if name.is_empty() {
            return Err(Error::invalid_argument("please provide a plugin name"));
        }
        {
            let mut state = self.state.lock();
            if state.initialized {
                return Err(Error::AlreadyInitialized);
            }
            state.initialized = true;
            state.name = name.to_string();
        }

        match self.connect_and_bootstrap(name, &options).await {
            Ok((ctx, leader)) => {
                let mut state = self.state.lock();
                state.context = Some(ctx.clone());
                state.leader = Some(leader);
                Ok(ctx)
            }
            Err(e) => {
                error!(plugin = %name, error = %e, "Plugin init failed");
                let mut state = self.state.lock();
                state.initialized = false;
                state.name.clear();
                Err(e)
            }
        }
    }

    async fn connect_and_bootstrap(
        &self,
        name: &str,
        options: &PluginOptions,
    ) -> Result<(Arc<RegisterContext>, LeaderGate)> {
        let connector = self.connector.clone().unwrap_or_else(|| {
            Arc::new(GrpcHostConnector::new(
                options.address(),
                options.handshake.attempt_timeout,
            ))
        });

        let material = init_session(name, connector.as_ref(), &options.handshake, &self.token).await?;
        let ctx = ClusterBootstrap::new(self.factory.clone(), options)
            .build_context(&material, &self.token)
            .await?;

        Ok((
            Arc::new(ctx),
            LeaderGate::new(connector, options.leader.clone()),
        ))
    }

    /// Add a syncer. Fails with [`Error::AlreadyStarted`] once start has
    /// begun.
    pub fn register(&self, syncer: Arc<dyn Syncer>) -> Result<()> {
        let mut state = self.state.lock();
        if state.started {
            return Err(Error::AlreadyStarted);
        }
        let registered = RegisteredSyncer::new(syncer);
        info!(syncer = %registered.name(), capabilities = ?registered.capabilities(), "Registered syncer");
        state.syncers.push(registered);
        Ok(())
    }

    /// Wait for leadership, bring every syncer online, and run until shutdown.
    ///
    /// Returns `Ok` once the lifetime token is cancelled, including a shutdown
    /// while still waiting for leadership or warm caches. A syncer failing to
    /// start or a manager failing ends the plugin with an error.
    pub async fn start(&self) -> Result<()> {
        let (ctx, leader, syncers) = {
            let mut state = self.state.lock();
            if state.started {
                return Err(Error::AlreadyStarted);
            }
            let (Some(ctx), Some(leader)) = (state.context.clone(), state.leader.clone()) else {
                return Err(Error::NotInitialized);
            };
            state.started = true;
            (ctx, leader, state.syncers.clone())
        };

        if let Err(e) = leader.wait_for_leadership(&self.token).await {
            return self.stopped_early(&ctx, e);
        }

        let dispatched = match Dispatcher::new(ctx.clone()).run(&syncers).await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                let outcome = self.stopped_early(&ctx, e);
                if let Err(e) = &outcome {
                    error!(error = %e, "Failed to start syncers");
                }
                // Stop managers that may already be running
                self.token.cancel();
                return outcome;
            }
        };

        info!(syncers = dispatched.activated(), "Plugin started");
        dispatched.wait().await
    }

    /// Outcome of a start that ended before every syncer was running.
    ///
    /// A background manager failure wins; a plain shutdown is a clean stop.
    fn stopped_early(&self, ctx: &RegisterContext, err: Error) -> Result<()> {
        if let Some(fatal) = ctx.fatal.take() {
            return Err(fatal);
        }
        match err {
            Error::Cancelled { .. } if self.token.is_cancelled() => {
                info!("Plugin shut down before syncers started");
                Ok(())
            }
            other => Err(other),
        }
    }
}

/// Initialize `plugin` with default options
pub async fn init(plugin: &PluginManager, name: &str) -> Result<Arc<RegisterContext>> {
    plugin.init(name).await
}

/// Register a syncer with `plugin`
pub fn register(plugin: &PluginManager, syncer: Arc<dyn Syncer>) -> Result<()> {
    plugin.register(syncer)
}

/// Start `plugin` and run until shutdown
pub async fn start(plugin: &PluginManager) -> Result<()> {
    plugin.start().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::bootstrap::MockClientFactory;
    use crate::cache::testing::mock_client;
    use crate::error::SyncerPhase;
    use crate::host::{ConnectionMaterial, HostSession, MockHostConnector, MockHostSession};
    use crate::syncer::testing::{CallLog, RecordingSyncer};
    use crate::syncer::Capabilities;

    const KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: cluster
  cluster:
    server: http://127.0.0.1:6443
users:
- name: plugin
  user:
    token: secret
contexts:
- name: default
  context:
    cluster: cluster
    user: plugin
current-context: default
"#;

    fn material() -> ConnectionMaterial {
        ConnectionMaterial {
            physical_config: KUBECONFIG.to_string(),
            virtual_config: KUBECONFIG.to_string(),
            syncer_config: KUBECONFIG.to_string(),
            options: r#"{"name":"demo","targetNamespace":"team-a"}"#.to_string(),
            current_namespace: "team-a".to_string(),
            target_namespace: "team-a".to_string(),
        }
    }

    fn fast_options() -> PluginOptions {
        PluginOptions::default()
            .with_handshake_timing(Duration::from_millis(5), Duration::from_millis(100))
            .with_leader_timing(Duration::from_millis(5), Duration::from_millis(100))
    }

    /// A host that registers immediately and reports leadership
    fn host(leader: bool) -> Arc<dyn HostConnector> {
        let mut connector = MockHostConnector::new();
        connector.expect_connect().returning(move || {
            let mut session = MockHostSession::new();
            session.expect_register().returning(|_| Ok(material()));
            session.expect_is_leader().returning(move || Ok(leader));
            Ok(Box::new(session) as Box<dyn HostSession>)
        });
        Arc::new(connector)
    }

    fn clients() -> Arc<dyn ClientFactory> {
        let mut factory = MockClientFactory::new();
        factory.expect_build().returning(|_, _| Ok(mock_client().0));
        Arc::new(factory)
    }

    fn plugin(leader: bool) -> PluginManager {
        PluginManager::with_host(host(leader), clients())
    }

    /// Story: init happens once
    ///
    /// A second init must not dial the host again or replace the context
    /// syncers were built against.
    #[tokio::test]
    async fn story_init_twice_keeps_the_first_context() {
        let plugin = plugin(true);
        let first = plugin.init_with_options("demo", fast_options()).await.unwrap();

        let err = plugin
            .init_with_options("demo", fast_options())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized));
        assert!(Arc::ptr_eq(&first, &plugin.context().unwrap()));
        assert_eq!(plugin.name().as_deref(), Some("demo"));
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected_without_consuming_init() {
        let plugin = plugin(true);
        assert!(matches!(
            plugin.init("").await,
            Err(Error::InvalidArgument { .. })
        ));
        assert!(plugin.init_with_options("demo", fast_options()).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_init_can_be_retried() {
        let mut connector = MockHostConnector::new();
        let mut attempts = 0;
        connector.expect_connect().returning(move || {
            attempts += 1;
            let mut bad = material();
            if attempts == 1 {
                bad.options = "{not json".to_string();
            }
            let mut session = MockHostSession::new();
            session.expect_register().return_once(move |_| Ok(bad));
            Ok(Box::new(session) as Box<dyn HostSession>)
        });
        let plugin = PluginManager::with_host(Arc::new(connector), clients());

        let err = plugin
            .init_with_options("demo", fast_options())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(plugin.context().is_none());

        assert!(plugin.init_with_options("demo", fast_options()).await.is_ok());
    }

    #[tokio::test]
    async fn test_start_before_init_fails() {
        let plugin = plugin(true);
        assert!(matches!(plugin.start().await, Err(Error::NotInitialized)));

        // The rejected start did not mark the plugin as started
        plugin.init_with_options("demo", fast_options()).await.unwrap();
        plugin.shutdown();
        assert!(plugin.start().await.is_ok());
        assert!(matches!(plugin.start().await, Err(Error::AlreadyStarted)));
    }

    /// Story: a standby replica stopped by SIGTERM exits cleanly
    ///
    /// The replica never becomes leader; shutting it down while it waits is an
    /// ordinary stop, not a failure.
    #[tokio::test]
    async fn story_standby_shutdown_is_a_clean_stop() {
        let plugin = Arc::new(plugin(false));
        plugin.init_with_options("demo", fast_options()).await.unwrap();

        let task = {
            let plugin = plugin.clone();
            tokio::spawn(async move { plugin.start().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        plugin.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_while_caches_warm_is_a_clean_stop() {
        let log = CallLog::default();
        let plugin = Arc::new(plugin(true));
        let ctx = plugin.init_with_options("demo", fast_options()).await.unwrap();
        // The mock API never answers, so this cache stays cold
        let _ = ctx
            .physical_manager
            .cached::<k8s_openapi::api::core::v1::ConfigMap>();
        plugin
            .register(Arc::new(RecordingSyncer::new("nodes", Capabilities::fake(), &log)))
            .unwrap();

        let task = {
            let plugin = plugin.clone();
            tokio::spawn(async move { plugin.start().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        plugin.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(log.lock().is_empty());
    }

    /// Story: a background cache that died before start is not mistaken for
    /// a shutdown
    #[tokio::test]
    async fn story_background_manager_failure_is_reported_by_start() {
        let plugin = plugin(false);
        let ctx = plugin.init_with_options("demo", fast_options()).await.unwrap();

        ctx.fatal.report(
            Error::manager_fatal("current-namespace", "watch for Service ended unexpectedly"),
            &ctx.token,
        );

        let err = plugin.start().await.unwrap_err();
        assert!(matches!(err, Error::ManagerFatal { ref cluster, .. } if cluster == "current-namespace"));
    }

    /// Story: the registry freezes once start begins
    #[tokio::test]
    async fn story_register_after_start_is_rejected() {
        let log = CallLog::default();
        let plugin = Arc::new(plugin(false));
        plugin.init_with_options("demo", fast_options()).await.unwrap();

        plugin
            .register(Arc::new(RecordingSyncer::new("first", Capabilities::fake(), &log)))
            .unwrap();
        plugin
            .register(Arc::new(RecordingSyncer::new("second", Capabilities::fake(), &log)))
            .unwrap();
        assert_eq!(plugin.syncer_count(), 2);

        // Never leader, so start parks in the leader gate
        let task = {
            let plugin = plugin.clone();
            tokio::spawn(async move { plugin.start().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = plugin
            .register(Arc::new(RecordingSyncer::new("late", Capabilities::fake(), &log)))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyStarted));
        assert!(matches!(plugin.start().await, Err(Error::AlreadyStarted)));
        assert_eq!(plugin.syncer_count(), 2);

        plugin.shutdown();
        assert!(task.await.unwrap().is_ok());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_runs_until_shutdown() {
        let log = CallLog::default();
        let plugin = Arc::new(plugin(true));
        plugin.init_with_options("demo", fast_options()).await.unwrap();
        plugin
            .register(Arc::new(RecordingSyncer::new(
                "nodes",
                Capabilities::fake().with_init(),
                &log,
            )))
            .unwrap();

        let task = {
            let plugin = plugin.clone();
            tokio::spawn(async move { plugin.start().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());
        assert_eq!(*log.lock(), vec!["nodes:init", "nodes:fake"]);

        plugin.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_syncer_failure_aborts_start_and_stops_the_plugin() {
        let log = CallLog::default();
        let plugin = plugin(true);
        plugin.init_with_options("demo", fast_options()).await.unwrap();
        plugin
            .register(Arc::new(
                RecordingSyncer::new("broken", Capabilities::live().with_init(), &log)
                    .failing_in(SyncerPhase::Init),
            ))
            .unwrap();

        let err = plugin.start().await.unwrap_err();
        assert_eq!(err.syncer_name(), Some("broken"));
        assert!(plugin.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_free_functions_delegate() {
        let plugin = PluginManager::with_host(host(true), clients()).with_token(CancellationToken::new());
        let log = CallLog::default();

        register(
            &plugin,
            Arc::new(RecordingSyncer::new("early", Capabilities::default(), &log)),
        )
        .unwrap();
        assert_eq!(plugin.syncer_count(), 1);
        assert!(matches!(start(&plugin).await, Err(Error::NotInitialized)));
        assert!(matches!(init(&plugin, "").await, Err(Error::InvalidArgument { .. })));
    }
}
