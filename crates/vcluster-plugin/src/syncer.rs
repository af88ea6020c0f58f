//! The syncer contract
//!
//! A syncer declares up front which lifecycle hooks it takes part in. The
//! declaration is captured once at registration; the dispatcher never probes a
//! syncer for capabilities again.
//!
//! # Example
//!
//! ```ignore
//! struct Secrets;
//!
//! #[async_trait]
//! impl Syncer for Secrets {
//!     fn name(&self) -> &str { "secrets" }
//!
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities::live().with_indices()
//!     }
//!
//!     async fn register_indices(&self, ctx: &RegisterContext) -> Result<(), BoxError> {
//!         let _ = ctx.physical_manager.cached::<Secret>();
//!         Ok(())
//!     }
//!
//!     fn controller(&self, ctx: Arc<RegisterContext>) -> Result<ControllerFuture, BoxError> {
//!         Ok(Box::pin(run_secret_controller(ctx)))
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::context::RegisterContext;
use crate::error::{BoxError, SyncerPhase};
use crate::{Error, Result};

/// Long-running reconciliation work produced by an activated syncer
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// How a syncer is brought online once the caches are warm
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// Synthesizes virtual objects without watching the physical cluster
    Fake,
    /// Driven by watch events from both clusters
    Live,
}

/// Lifecycle hooks a syncer takes part in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Call [`Syncer::init`]
    pub initializer: bool,
    /// Call [`Syncer::register_indices`]
    pub indices: bool,
    /// Activation path, or `None` for an inert syncer
    pub activation: Option<Activation>,
}

impl Capabilities {
    /// A live syncer with no setup hooks
    pub fn live() -> Self {
        Self {
            activation: Some(Activation::Live),
            ..Self::default()
        }
    }

    /// A fake syncer with no setup hooks
    pub fn fake() -> Self {
        Self {
            activation: Some(Activation::Fake),
            ..Self::default()
        }
    }

    /// Also take part in the init phase
    pub fn with_init(mut self) -> Self {
        self.initializer = true;
        self
    }

    /// Also take part in the index phase
    pub fn with_indices(mut self) -> Self {
        self.indices = true;
        self
    }
}

/// A pluggable reconciliation unit
#[async_trait]
pub trait Syncer: Send + Sync {
    /// Stable name used in logs and errors
    fn name(&self) -> &str;

    /// Hooks this syncer takes part in; read once at registration
    fn capabilities(&self) -> Capabilities;

    /// One-time setup before any index is registered
    async fn init(&self, _ctx: &RegisterContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Register cache indices and informers before the managers start
    async fn register_indices(&self, _ctx: &RegisterContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Build the controller for [`Activation::Live`]
    fn controller(&self, _ctx: Arc<RegisterContext>) -> std::result::Result<ControllerFuture, BoxError> {
        Err(format!("{} does not provide a live controller", self.name()).into())
    }

    /// Build the controller for [`Activation::Fake`]. Only the virtual
    /// manager should be used.
    fn fake_controller(
        &self,
        _ctx: Arc<RegisterContext>,
    ) -> std::result::Result<ControllerFuture, BoxError> {
        Err(format!("{} does not provide a fake controller", self.name()).into())
    }
}

/// A syncer together with the capabilities it declared when registered
#[derive(Clone)]
pub struct RegisteredSyncer {
    name: String,
    capabilities: Capabilities,
    syncer: Arc<dyn Syncer>,
}

impl RegisteredSyncer {
    /// Capture the syncer's name and capabilities
    pub fn new(syncer: Arc<dyn Syncer>) -> Self {
        Self {
            name: syncer.name().to_string(),
            capabilities: syncer.capabilities(),
            syncer,
        }
    }

    /// Declared name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared capabilities
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub(crate) async fn init(&self, ctx: &RegisterContext) -> Result<()> {
        debug!(syncer = %self.name, "Initializing syncer");
        self.syncer
            .init(ctx)
            .await
            .map_err(|e| Error::syncer(&self.name, SyncerPhase::Init, e))
    }

    pub(crate) async fn register_indices(&self, ctx: &RegisterContext) -> Result<()> {
        debug!(syncer = %self.name, "Registering indices");
        self.syncer
            .register_indices(ctx)
            .await
            .map_err(|e| Error::syncer(&self.name, SyncerPhase::Indices, e))
    }

    /// Build and spawn the controller for this syncer's activation path.
    ///
    /// Returns `Ok(false)` for inert syncers. Spawned controllers stop when the
    /// lifetime token is cancelled.
    pub(crate) fn activate(
        &self,
        ctx: &Arc<RegisterContext>,
        controllers: &mut JoinSet<()>,
    ) -> Result<bool> {
        let Some(activation) = self.capabilities.activation else {
            debug!(syncer = %self.name, "Syncer has no activation, skipping");
            return Ok(false);
        };

        let future = match activation {
            Activation::Fake => self.syncer.fake_controller(ctx.clone()),
            Activation::Live => self.syncer.controller(ctx.clone()),
        }
        .map_err(|e| Error::syncer(&self.name, SyncerPhase::Activation, e))?;

        let token = ctx.token.clone();
        let name = self.name.clone();
        controllers.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = future => debug!(syncer = %name, "Controller finished"),
            }
        });

        info!(syncer = %self.name, ?activation, "Syncer started");
        Ok(true)
    }
}

impl std::fmt::Debug for RegisteredSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSyncer")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
