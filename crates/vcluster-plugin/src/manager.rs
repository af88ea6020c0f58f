//! Per-cluster managers
//!
//! A [`ClusterManager`] bundles a throttled client with the object cache built
//! on it. Managers are cheap to clone; clones share the cache.

use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{CacheError, ObjectCache};
use crate::{Error, Result};

/// Client and cache for one cluster
#[derive(Clone)]
pub struct ClusterManager {
    name: String,
    client: Client,
    cache: Arc<ObjectCache>,
}

impl ClusterManager {
    /// Create a manager with its own cache, restricted to `namespace` when given
    pub fn new(name: impl Into<String>, client: Client, namespace: Option<String>) -> Self {
        let cache = Arc::new(ObjectCache::new(client.clone(), namespace));
        Self::with_cache(name, cache)
    }

    /// Create a manager over an existing cache
    pub fn with_cache(name: impl Into<String>, cache: Arc<ObjectCache>) -> Self {
        Self {
            name: name.into(),
            client: cache.client().clone(),
            cache,
        }
    }

    /// Name used in logs and errors ("physical", "virtual", ...)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct API client for writes and uncached reads
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// The shared cache
    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    /// Namespace the cache is restricted to, if any
    pub fn namespace(&self) -> Option<&str> {
        self.cache.namespace()
    }

    /// Cache-backed client for `K`, registering its informer on first use
    pub fn cached<K>(&self) -> CachedClient<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        CachedClient {
            store: self.cache.store::<K>(),
            client: self.client.clone(),
        }
    }

    /// Run the cache until `token` is cancelled.
    ///
    /// Any informer failure is fatal for the manager.
    pub async fn start(&self, token: CancellationToken) -> Result<()> {
        info!(manager = %self.name, namespace = ?self.namespace(), "Starting manager");
        self.cache
            .start(token)
            .await
            .map_err(|e| Error::manager_fatal(&self.name, e.to_string()))
    }

    /// Block until every informer of the cache is warm
    pub async fn wait_for_cache_sync(&self, token: &CancellationToken) -> Result<()> {
        match self.cache.wait_for_cache_sync(token).await {
            Ok(()) => Ok(()),
            Err(CacheError::Cancelled) => Err(Error::cancelled(format!(
                "waiting for {} cache sync",
                self.name
            ))),
            Err(e) => Err(Error::manager_fatal(&self.name, e.to_string())),
        }
    }
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("name", &self.name)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Reads from a cache, writes through the API
#[derive(Clone)]
pub struct CachedClient<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
    client: Client,
}

impl<K> CachedClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + 'static,
{
    /// Cached object by namespace and name
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.store.get(&ObjectRef::new(name).within(namespace))
    }

    /// Every cached object
    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    /// Cached objects in one namespace
    pub fn list_in(&self, namespace: &str) -> Vec<Arc<K>> {
        self.store
            .state()
            .into_iter()
            .filter(|obj| obj.meta().namespace.as_deref() == Some(namespace))
            .collect()
    }

    /// API handle for writes in `namespace`
    pub fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// The underlying store
    pub fn store(&self) -> &Store<K> {
        &self.store
    }
}
