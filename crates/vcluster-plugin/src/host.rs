//! Connection to the vcluster container hosting the plugin
//!
//! The host is reached through two small traits so the handshake and leader
//! loops can be tested without a gRPC server:
//!
//! - [`HostConnector`] dials the host and yields a session
//! - [`HostSession`] performs the two unary calls on an established connection
//!
//! [`GrpcHostConnector`] is the production implementation. Connections are
//! plaintext; the host only listens on a pod-local address.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use vcluster_plugin_proto::plugin_initializer_client::PluginInitializerClient;
use vcluster_plugin_proto::{Context as HostContext, Empty, PluginInfo};

/// Connection material issued by the host on registration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionMaterial {
    /// Kubeconfig for the physical (backing) cluster
    pub physical_config: String,
    /// Kubeconfig for the virtual cluster
    pub virtual_config: String,
    /// Kubeconfig for the privileged syncer identity
    pub syncer_config: String,
    /// JSON-encoded virtual cluster options
    pub options: String,
    /// Namespace the plugin process runs in
    pub current_namespace: String,
    /// Namespace synced resources are created in on the physical cluster
    pub target_namespace: String,
}

impl From<HostContext> for ConnectionMaterial {
    fn from(ctx: HostContext) -> Self {
        Self {
            physical_config: ctx.physical_cluster_config,
            virtual_config: ctx.virtual_cluster_config,
            syncer_config: ctx.syncer_config,
            options: ctx.options,
            current_namespace: ctx.current_namespace,
            target_namespace: ctx.target_namespace,
        }
    }
}

/// Transport-level failures talking to the host
///
/// None of these are fatal to the plugin; the poll loops absorb them.
#[derive(Debug, Error)]
pub enum HostError {
    /// The configured address is not a usable endpoint
    #[error("invalid host address {address}: {message}")]
    InvalidAddress {
        /// Address as configured
        address: String,
        /// Parse failure
        message: String,
    },

    /// The connection could not be established
    #[error("failed to connect to host at {address}: {message}")]
    Connect {
        /// Address that was dialed
        address: String,
        /// Transport failure
        message: String,
    },

    /// An RPC on an established connection failed
    #[error("host call {method} failed: {status}")]
    Rpc {
        /// RPC method name
        method: &'static str,
        /// Status returned by the transport or the host
        #[source]
        status: Box<tonic::Status>,
    },
}

/// An established connection to the host
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostSession: Send + Sync {
    /// Register the plugin by name and receive the connection material
    async fn register(&self, plugin_name: &str) -> Result<ConnectionMaterial, HostError>;

    /// Ask whether the host currently holds leadership
    async fn is_leader(&self) -> Result<bool, HostError>;
}

/// Dials the host
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostConnector: Send + Sync {
    /// Open a new session
    async fn connect(&self) -> Result<Box<dyn HostSession>, HostError>;
}

/// Dials the host over plaintext gRPC
#[derive(Clone, Debug)]
pub struct GrpcHostConnector {
    address: String,
    connect_timeout: Duration,
}

impl GrpcHostConnector {
    /// Create a connector for `address` (`host:port` or a full `http://` URI)
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    /// The address this connector dials
    pub fn address(&self) -> &str {
        &self.address
    }

    fn endpoint_uri(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("http://{}", self.address)
        }
    }
}

#[async_trait]
impl HostConnector for GrpcHostConnector {
    async fn connect(&self) -> Result<Box<dyn HostSession>, HostError> {
        let endpoint = Endpoint::from_shared(self.endpoint_uri())
            .map_err(|e| HostError::InvalidAddress {
                address: self.address.clone(),
                message: e.to_string(),
            })?
            .connect_timeout(self.connect_timeout);

        let channel = endpoint.connect().await.map_err(|e| HostError::Connect {
            address: self.address.clone(),
            message: e.to_string(),
        })?;

        debug!(address = %self.address, "Connected to vcluster host");
        Ok(Box::new(GrpcHostSession::new(channel)))
    }
}

/// Host session over a tonic channel
#[derive(Clone, Debug)]
pub struct GrpcHostSession {
    client: PluginInitializerClient<Channel>,
}

impl GrpcHostSession {
    /// Wrap an established channel
    pub fn new(channel: Channel) -> Self {
        Self {
            client: PluginInitializerClient::new(channel),
        }
    }
}

#[async_trait]
impl HostSession for GrpcHostSession {
    async fn register(&self, plugin_name: &str) -> Result<ConnectionMaterial, HostError> {
        let mut client = self.client.clone();
        let response = client
            .register(PluginInfo {
                name: plugin_name.to_string(),
            })
            .await
            .map_err(|status| HostError::Rpc {
                method: "Register",
                status: Box::new(status),
            })?;
        Ok(response.into_inner().into())
    }

    async fn is_leader(&self) -> Result<bool, HostError> {
        let mut client = self.client.clone();
        let response = client.is_leader(Empty {}).await.map_err(|status| HostError::Rpc {
            method: "IsLeader",
            status: Box::new(status),
        })?;
        Ok(response.into_inner().leader)
    }
}
