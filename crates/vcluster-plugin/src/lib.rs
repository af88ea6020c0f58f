//! SDK for vcluster plugins: handshake, cluster bootstrap, and syncer lifecycle
//!
//! A plugin runs as a sidecar of the vcluster container. It registers with the
//! container over gRPC, receives credentials for the physical and the virtual
//! cluster, waits until the container it is attached to leads, and then brings
//! its syncers online against warm caches of both clusters.
//!
//! ```text
//! handshake ──▶ bootstrap ──▶ RegisterContext ──▶ leader gate ──▶ dispatcher
//!  (session)    (clients,        (shared by         (IsLeader       (init, indices,
//!                managers)        all syncers)        polling)        managers, activation)
//! ```
//!
//! [`PluginManager`] ties these together; the modules are public for plugins
//! that need a different composition.

#![deny(missing_docs)]

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod leader;
pub mod manager;
pub mod options;
pub mod plugin;
pub mod poll;
pub mod session;
pub mod syncer;
pub mod throttle;
pub mod translate;

pub use config::{ClientLimits, PluginOptions, DEFAULT_LISTEN_ADDRESS};
pub use context::RegisterContext;
pub use error::{BoxError, ConfigStage, Error, SyncerPhase};
pub use manager::{CachedClient, ClusterManager};
pub use options::VirtualClusterOptions;
pub use plugin::PluginManager;
pub use syncer::{Activation, Capabilities, ControllerFuture, Syncer};
pub use translate::NameTranslator;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
