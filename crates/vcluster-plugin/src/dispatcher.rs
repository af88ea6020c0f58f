//! Syncer dispatcher
//!
//! Brings registered syncers online in a fixed order:
//!
//! 1. `init` on every syncer declaring the initializer capability
//! 2. `register_indices` on every syncer declaring the index capability
//! 3. start the physical and virtual managers
//! 4. wait until both caches are warm
//! 5. activate each syncer on its declared path
//!
//! A failure in any phase aborts the rest. Manager watch loops run under a
//! supervisor: if one stops with an error, the error is recorded in the
//! context's [`FatalSlot`] and the lifetime token is cancelled, so whoever
//! waits on [`Dispatched`] sees the failure.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::context::RegisterContext;
use crate::manager::ClusterManager;
use crate::syncer::RegisteredSyncer;
use crate::{Error, Result};

/// First fatal manager error of a plugin run.
///
/// Shared by every clone; the error is recorded before the lifetime token is
/// cancelled, so anyone woken by the cancellation can take it.
#[derive(Clone, Debug, Default)]
pub struct FatalSlot {
    error: Arc<Mutex<Option<Error>>>,
}

impl FatalSlot {
    /// Record `err` unless an earlier failure is already recorded, then
    /// cancel `token`
    pub fn report(&self, err: Error, token: &CancellationToken) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        token.cancel();
    }

    /// Take the recorded failure, if any
    pub fn take(&self) -> Option<Error> {
        self.error.lock().take()
    }
}

/// Drives syncers through startup against one context
pub struct Dispatcher {
    ctx: Arc<RegisterContext>,
}

/// Syncers and managers left running after a successful dispatch
pub struct Dispatched {
    token: CancellationToken,
    controllers: JoinSet<()>,
    managers: Vec<JoinHandle<()>>,
    fatal: FatalSlot,
    activated: usize,
}

impl Dispatcher {
    /// Create a dispatcher for `ctx`
    pub fn new(ctx: Arc<RegisterContext>) -> Self {
        Self { ctx }
    }

    /// Run all five phases.
    pub async fn run(&self, syncers: &[RegisteredSyncer]) -> Result<Dispatched> {
        let ctx = &self.ctx;

        for syncer in syncers.iter().filter(|s| s.capabilities().initializer) {
            syncer.init(ctx).await?;
        }

        for syncer in syncers.iter().filter(|s| s.capabilities().indices) {
            syncer.register_indices(ctx).await?;
        }

        let managers = vec![
            supervise(ctx.physical_manager.clone(), ctx.token.clone(), ctx.fatal.clone()),
            supervise(ctx.virtual_manager.clone(), ctx.token.clone(), ctx.fatal.clone()),
        ];

        info!("Waiting for caches to sync...");
        let synced = futures::future::try_join(
            ctx.physical_manager.wait_for_cache_sync(&ctx.token),
            ctx.virtual_manager.wait_for_cache_sync(&ctx.token),
        )
        .await;
        if let Err(e) = synced {
            // A manager failure cancels the token; report the failure instead
            return Err(ctx.fatal.take().unwrap_or(e));
        }
        info!("Caches synced");

        let mut controllers = JoinSet::new();
        let mut activated = 0;
        for syncer in syncers {
            if syncer.activate(ctx, &mut controllers)? {
                activated += 1;
            }
        }

        Ok(Dispatched {
            token: ctx.token.clone(),
            controllers,
            managers,
            fatal: ctx.fatal.clone(),
            activated,
        })
    }
}

impl Dispatched {
    /// Number of syncers that were activated
    pub fn activated(&self) -> usize {
        self.activated
    }

    /// Block until the lifetime token is cancelled, then wait for controllers
    /// and managers to stop.
    ///
    /// Returns the manager failure that caused the cancellation, if any.
    pub async fn wait(mut self) -> Result<()> {
        self.token.cancelled().await;
        let outcome = self.fatal.take().map_or(Ok(()), Err);

        while self.controllers.join_next().await.is_some() {}
        for manager in self.managers {
            let _ = manager.await;
        }
        info!("All syncers stopped");
        outcome
    }
}

/// Run a manager in the background. An error or panic is recorded in `fatal`
/// and cancels `token`.
pub(crate) fn supervise(
    manager: ClusterManager,
    token: CancellationToken,
    fatal: FatalSlot,
) -> JoinHandle<()> {
    let name = manager.name().to_string();
    let run = {
        let token = token.clone();
        tokio::spawn(async move { manager.start(token).await })
    };
    watch_manager(name, run, token, fatal)
}

/// Report the outcome of an already running manager task
pub(crate) fn watch_manager(
    name: String,
    run: JoinHandle<Result<()>>,
    token: CancellationToken,
    fatal: FatalSlot,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let err = match run.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(e) => Error::manager_fatal(&name, e.to_string()),
        };
        error!(manager = %name, error = %err, "Manager stopped, shutting down plugin");
        fatal.report(err, &token);
    })
}
