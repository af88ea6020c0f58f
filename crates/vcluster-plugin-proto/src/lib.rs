//! Protocol buffer definitions for the plugin handshake.
//!
//! This crate provides the message types and gRPC client used by a plugin to
//! talk to the vcluster container that hosts it.
//!
//! # Architecture
//!
//! The vcluster container owns every credential the plugin needs and decides
//! which replica is active. The plugin never receives connections; it dials the
//! host on a local address and performs two unary calls:
//!
//! ```text
//! ┌─────────────────────────┐
//! │   vcluster container    │
//! │                         │
//! │  ┌─────────────────┐    │
//! │  │PluginInitializer│◄───┼──── Register(PluginInfo) -> Context
//! │  │   gRPC server   │◄───┼──── IsLeader(Empty)      -> LeaderInfo
//! │  └─────────────────┘    │
//! └─────────────────────────┘
//!            ▲
//!            │ localhost:10099 (insecure)
//!            │
//! ┌──────────┴──────────────┐
//! │     Plugin process      │
//! └─────────────────────────┘
//! ```
//!
//! # Key Message Types
//!
//! - [`PluginInfo`]: the plugin name sent on registration
//! - [`Context`]: kubeconfigs for the physical cluster, the virtual cluster and
//!   the syncer identity, the namespaces involved, and the JSON options blob
//! - [`LeaderInfo`]: whether the host currently holds leadership
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use vcluster_plugin_proto::plugin_initializer_client::PluginInitializerClient;
//! use vcluster_plugin_proto::PluginInfo;
//!
//! let mut client = PluginInitializerClient::connect("http://localhost:10099").await?;
//! let context = client
//!     .register(PluginInfo { name: "my-plugin".to_string() })
//!     .await?
//!     .into_inner();
//! ```
//!
//! The generated code is checked in (see `src/remote.rs`) so building the
//! workspace does not require `protoc`.

// Generated protobuf code doesn't have docs
#![allow(missing_docs)]

/// Generated protobuf types from plugin.proto
pub mod remote;

pub use remote::*;
