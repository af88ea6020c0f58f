//! Plugin runtime configuration
//!
//! Everything here has a default that matches what the vcluster container
//! expects; an embedding application only overrides what it needs.

use std::time::Duration;

use crate::poll::PollConfig;

/// Address the vcluster container serves the plugin handshake on
pub const DEFAULT_LISTEN_ADDRESS: &str = "localhost:10099";

/// Request throughput allowed against a cluster's API server
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClientLimits {
    /// Sustained requests per second
    pub qps: f64,
    /// Requests that may be issued back to back before throttling
    pub burst: u32,
}

impl ClientLimits {
    /// Limits for the shared physical cluster, which other tenants also use
    pub const PHYSICAL: ClientLimits = ClientLimits {
        qps: 40.0,
        burst: 80,
    };

    /// Limits for the dedicated virtual cluster the plugin effectively owns
    pub const VIRTUAL: ClientLimits = ClientLimits {
        qps: 1000.0,
        burst: 2000,
    };

    /// Returns true when `qps` is a finite positive rate
    pub fn is_valid(&self) -> bool {
        self.qps.is_finite() && self.qps > 0.0
    }
}

/// Options for connecting a plugin to its host
#[derive(Clone, Debug, PartialEq)]
pub struct PluginOptions {
    /// Where to contact the vcluster plugin server. Defaults to `localhost:10099`
    pub listen_address: Option<String>,
    /// Retry timing for the initial handshake
    pub handshake: PollConfig,
    /// Polling timing for the leadership check
    pub leader: PollConfig,
    /// Throughput limits for the physical cluster client
    pub physical_limits: ClientLimits,
    /// Throughput limits for the virtual cluster client
    pub virtual_limits: ClientLimits,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            listen_address: None,
            handshake: PollConfig::default(),
            leader: PollConfig::default(),
            physical_limits: ClientLimits::PHYSICAL,
            virtual_limits: ClientLimits::VIRTUAL,
        }
    }
}

impl PluginOptions {
    /// Override the host address
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = Some(address.into());
        self
    }

    /// Override handshake retry timing
    pub fn with_handshake_timing(mut self, interval: Duration, attempt_timeout: Duration) -> Self {
        self.handshake = PollConfig::new(interval, attempt_timeout);
        self
    }

    /// Override leadership poll timing
    pub fn with_leader_timing(mut self, interval: Duration, attempt_timeout: Duration) -> Self {
        self.leader = PollConfig::new(interval, attempt_timeout);
        self
    }

    /// The address to dial, falling back to the default when unset or empty
    pub fn address(&self) -> &str {
        match self.listen_address.as_deref() {
            Some(addr) if !addr.is_empty() => addr,
            _ => DEFAULT_LISTEN_ADDRESS,
        }
    }
}
