//! Watch-driven object caches
//!
//! An [`ObjectCache`] mirrors resources of one cluster into memory. Each
//! resource type gets its own informer (a kube reflector plus the watch stream
//! feeding it), registered the first time someone asks for that type's store.
//! Syncers usually ask during index registration so the informer is already
//! running when the cache is started; informers registered after start are
//! spawned immediately.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Failures of a cache's watch loops
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// `start` was called on a cache that is already running
    #[error("cache already started")]
    AlreadyStarted,

    /// An informer's watch stream ended while the cache was still wanted
    #[error("watch for {kind} ended unexpectedly")]
    WatchEnded {
        /// Resource kind being watched
        kind: String,
    },

    /// An informer task panicked or was aborted
    #[error("informer task failed: {message}")]
    TaskFailed {
        /// Join error description
        message: String,
    },

    /// The reflector feeding a store went away before it was populated
    #[error("{kind} store will never become ready")]
    NeverReady {
        /// Resource kind of the store
        kind: String,
    },

    /// The lifetime token was cancelled while waiting for the cache
    #[error("cancelled while waiting for cache sync")]
    Cancelled,
}

/// A single resource type's watch loop and local store
pub trait Informer: Send + Sync {
    /// Resource kind, for logs and errors
    fn kind(&self) -> &str;

    /// Drive the watch until `token` is cancelled
    fn run(&self, token: CancellationToken) -> BoxFuture<'static, Result<(), CacheError>>;

    /// Resolve once the initial list has been applied to the store
    fn wait_synced(&self) -> BoxFuture<'static, Result<(), CacheError>>;

    /// Downcast support for typed store access
    fn as_any(&self) -> &dyn Any;
}

/// Informer backed by a kube reflector
pub struct ReflectorInformer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    kind: String,
    api: Api<K>,
    reader: Store<K>,
    writer: Mutex<Option<Writer<K>>>,
}

impl<K> ReflectorInformer<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// Create an informer watching `api`
    pub fn new(api: Api<K>) -> Self {
        let (reader, writer) = reflector::store::<K>();
        Self {
            kind: K::kind(&()).into_owned(),
            api,
            reader,
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Read handle to the mirrored objects
    pub fn store(&self) -> Store<K> {
        self.reader.clone()
    }
}

impl<K> Informer for ReflectorInformer<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    fn run(&self, token: CancellationToken) -> BoxFuture<'static, Result<(), CacheError>> {
        let kind = self.kind.clone();
        let Some(writer) = self.writer.lock().take() else {
            return futures::future::ready(Err(CacheError::AlreadyStarted)).boxed();
        };
        let api = self.api.clone();

        async move {
            debug!(kind = %kind, "Starting informer");
            let stream = watcher(api, watcher::Config::default())
                .default_backoff()
                .reflect(writer)
                .for_each(|event| {
                    if let Err(e) = event {
                        warn!(kind = %kind, error = %e, "Watch error, backing off");
                    }
                    futures::future::ready(())
                });

            tokio::select! {
                _ = token.cancelled() => Ok(()),
                _ = stream => Err(CacheError::WatchEnded { kind: kind.clone() }),
            }
        }
        .boxed()
    }

    fn wait_synced(&self) -> BoxFuture<'static, Result<(), CacheError>> {
        let reader = self.reader.clone();
        let kind = self.kind.clone();
        async move {
            reader
                .wait_until_ready()
                .await
                .map_err(|_| CacheError::NeverReady { kind })
        }
        .boxed()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Running {
    token: CancellationToken,
    late: mpsc::UnboundedSender<Arc<dyn Informer>>,
}

#[derive(Default)]
struct CacheState {
    informers: HashMap<TypeId, Arc<dyn Informer>>,
    running: Option<Running>,
}

/// In-memory mirror of one cluster's resources
pub struct ObjectCache {
    client: Client,
    namespace: Option<String>,
    state: Mutex<CacheState>,
}

impl ObjectCache {
    /// Create a cache over `client`, restricted to `namespace` when given
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self {
            client,
            namespace,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// The client informers list and watch with
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The namespace this cache is restricted to, if any
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Store for `K`, registering an informer on first use
    pub fn store<K>(&self) -> Store<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        let mut state = self.state.lock();
        if let Some(existing) = state.informers.get(&TypeId::of::<K>()) {
            if let Some(informer) = existing.as_any().downcast_ref::<ReflectorInformer<K>>() {
                return informer.store();
            }
        }

        let api: Api<K> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let informer = Arc::new(ReflectorInformer::new(api));
        let store = informer.store();
        debug!(kind = %informer.kind(), namespace = ?self.namespace, "Registered informer");

        state
            .informers
            .insert(TypeId::of::<K>(), informer.clone() as Arc<dyn Informer>);
        if let Some(running) = &state.running {
            // Started caches pick new informers up right away
            let _ = running.late.send(informer as Arc<dyn Informer>);
        }
        store
    }

    /// Number of registered informers
    pub fn informer_count(&self) -> usize {
        self.state.lock().informers.len()
    }

    /// Returns true once `start` has been called
    pub fn is_started(&self) -> bool {
        self.state.lock().running.is_some()
    }

    /// Run every informer until `token` is cancelled.
    ///
    /// Returns `Ok` on cancellation and an error as soon as any informer fails.
    pub async fn start(&self, token: CancellationToken) -> Result<(), CacheError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let initial: Vec<Arc<dyn Informer>> = {
            let mut state = self.state.lock();
            if state.running.is_some() {
                return Err(CacheError::AlreadyStarted);
            }
            state.running = Some(Running {
                token: token.clone(),
                late: tx,
            });
            state.informers.values().cloned().collect()
        };

        info!(
            namespace = ?self.namespace,
            informers = initial.len(),
            "Starting object cache"
        );

        let mut tasks = JoinSet::new();
        for informer in initial {
            tasks.spawn(informer.run(token.clone()));
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tasks.shutdown().await;
                    return Ok(());
                }
                Some(informer) = rx.recv() => {
                    tasks.spawn(informer.run(token.clone()));
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(e),
                    Err(e) => return Err(CacheError::TaskFailed { message: e.to_string() }),
                },
            }
        }
    }

    /// Block until every registered informer has completed its initial list.
    pub async fn wait_for_cache_sync(&self, token: &CancellationToken) -> Result<(), CacheError> {
        let pending: Vec<_> = {
            let state = self.state.lock();
            state.informers.values().map(|i| i.wait_synced()).collect()
        };

        tokio::select! {
            _ = token.cancelled() => Err(CacheError::Cancelled),
            synced = futures::future::try_join_all(pending) => synced.map(|_| ()),
        }
    }

    /// The token passed to `start`, once started
    pub fn token(&self) -> Option<CancellationToken> {
        self.state.lock().running.as_ref().map(|r| r.token.clone())
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ObjectCache")
            .field("namespace", &self.namespace)
            .field("informers", &state.informers.len())
            .field("started", &state.running.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake API server plumbing shared by cache, manager and bootstrap tests

    use http::{Request, Response};
    use kube::client::Body;
    use kube::Client;

    pub type ApiHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

    /// A client whose requests are answered by the returned handle
    pub fn mock_client() -> (Client, ApiHandle) {
        let (service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        (Client::new(service, "default"), handle)
    }

    /// Answer list requests with an empty list and leave watches hanging
    pub fn serve_empty_lists(mut handle: ApiHandle) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut watches = Vec::new();
            while let Some((request, send)) = handle.next_request().await {
                let query = request.uri().query().unwrap_or_default();
                if query.contains("watch=true") {
                    // Keep the watch open without events
                    watches.push(send);
                    continue;
                }
                let body = serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "List",
                    "metadata": { "resourceVersion": "1" },
                    "items": []
                });
                let response = Response::builder()
                    .status(200)
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap();
                send.send_response(response);
            }
        })
    }

    /// Accept requests but never answer them
    pub fn serve_nothing(mut handle: ApiHandle) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut pending = Vec::new();
            while let Some((_, send)) = handle.next_request().await {
                pending.push(send);
            }
        })
    }
}
