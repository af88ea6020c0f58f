//! Error types for the plugin SDK
//!
//! Errors carry the stage, syncer, or cluster they relate to so a plugin author
//! can tell which credential set, which syncer, or which cluster is broken
//! without reading logs.

use std::fmt;

use thiserror::Error;

/// Boxed error returned by syncer callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which piece of host-supplied material failed to load
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigStage {
    /// The JSON options blob
    Options,
    /// The physical cluster kubeconfig
    Physical,
    /// The virtual cluster kubeconfig
    Virtual,
    /// The syncer identity kubeconfig
    Syncer,
    /// The client scoped to the namespace the plugin runs in
    CurrentNamespace,
}

impl fmt::Display for ConfigStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ConfigStage::Options => "vcluster options",
            ConfigStage::Physical => "physical kube config",
            ConfigStage::Virtual => "virtual kube config",
            ConfigStage::Syncer => "syncer kube config",
            ConfigStage::CurrentNamespace => "current namespace client",
        };
        f.write_str(stage)
    }
}

/// The dispatcher phase a syncer failed in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncerPhase {
    /// `Syncer::init`
    Init,
    /// `Syncer::register_indices`
    Indices,
    /// Fake or live activation
    Activation,
}

impl fmt::Display for SyncerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            SyncerPhase::Init => "init",
            SyncerPhase::Indices => "register indices",
            SyncerPhase::Activation => "start",
        };
        f.write_str(phase)
    }
}

/// Main error type for plugin lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input, e.g. an empty plugin name
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the input
        message: String,
    },

    /// Host-supplied credentials or options could not be loaded
    #[error("parse {stage}: {message}")]
    Config {
        /// Which piece of material failed
        stage: ConfigStage,
        /// Underlying parse or build failure
        message: String,
    },

    /// `init` was called a second time
    #[error("plugin manager is already initialized")]
    AlreadyInitialized,

    /// `register` or `start` was called after `start` began
    #[error("plugin manager already started")]
    AlreadyStarted,

    /// `start` was called before a successful `init`
    #[error("plugin manager is not initialized")]
    NotInitialized,

    /// A syncer callback failed during start
    #[error("{phase} syncer {name}: {source}")]
    Syncer {
        /// Name the syncer declared
        name: String,
        /// Phase the failure happened in
        phase: SyncerPhase,
        /// The syncer's own error
        #[source]
        source: BoxError,
    },

    /// A cluster manager's watch loop stopped with an error
    #[error("{cluster} manager failed: {message}")]
    ManagerFatal {
        /// Which manager failed ("physical", "virtual", ...)
        cluster: String,
        /// Description of the failure
        message: String,
    },

    /// The lifetime token was cancelled while waiting
    #[error("cancelled while {waiting_for}")]
    Cancelled {
        /// What the caller was blocked on
        waiting_for: String,
    },
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: msg.into(),
        }
    }

    /// Create a configuration error for the given stage
    pub fn config(stage: ConfigStage, msg: impl fmt::Display) -> Self {
        Self::Config {
            stage,
            message: msg.to_string(),
        }
    }

    /// Wrap a syncer failure with its name and phase
    pub fn syncer(name: impl Into<String>, phase: SyncerPhase, source: BoxError) -> Self {
        Self::Syncer {
            name: name.into(),
            phase,
            source,
        }
    }

    /// Create a fatal manager error
    pub fn manager_fatal(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ManagerFatal {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a cancellation error describing what was being waited on
    pub fn cancelled(waiting_for: impl Into<String>) -> Self {
        Self::Cancelled {
            waiting_for: waiting_for.into(),
        }
    }

    /// Returns true for errors caused by calling lifecycle methods out of order
    pub fn is_sequence_error(&self) -> bool {
        matches!(
            self,
            Error::AlreadyInitialized | Error::AlreadyStarted | Error::NotInitialized
        )
    }

    /// The config stage this error relates to, if any
    pub fn config_stage(&self) -> Option<ConfigStage> {
        match self {
            Error::Config { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The syncer name this error relates to, if any
    pub fn syncer_name(&self) -> Option<&str> {
        match self {
            Error::Syncer { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a broken kubeconfig names the credential set it came from
    ///
    /// The host hands out three kubeconfigs. When one is malformed the plugin
    /// author needs to know which one without digging through logs.
    #[test]
    fn story_config_errors_name_the_broken_credential() {
        let err = Error::config(ConfigStage::Physical, "invalid YAML at line 3");
        assert_eq!(
            err.to_string(),
            "parse physical kube config: invalid YAML at line 3"
        );
        assert_eq!(err.config_stage(), Some(ConfigStage::Physical));

        let err = Error::config(ConfigStage::Virtual, "missing clusters");
        assert!(err.to_string().contains("virtual kube config"));

        let err = Error::config(ConfigStage::Syncer, "missing users");
        assert!(err.to_string().contains("syncer kube config"));

        let err = Error::config(ConfigStage::Options, "expected value at line 1");
        assert!(err.to_string().contains("vcluster options"));
    }

    /// Story: a failing syncer is named together with the phase it failed in
    #[test]
    fn story_syncer_errors_carry_name_and_phase() {
        let err = Error::syncer("configmaps", SyncerPhase::Init, "boom".into());
        assert_eq!(err.to_string(), "init syncer configmaps: boom");
        assert_eq!(err.syncer_name(), Some("configmaps"));

        let err = Error::syncer("secrets", SyncerPhase::Indices, "no index".into());
        assert_eq!(
            err.to_string(),
            "register indices syncer secrets: no index"
        );

        let err = Error::syncer("services", SyncerPhase::Activation, "denied".into());
        assert_eq!(err.to_string(), "start syncer services: denied");

        // The syncer's own error stays reachable for callers that downcast
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("denied"));
    }

    /// Story: out-of-order lifecycle calls are programming errors, not outages
    #[test]
    fn story_sequence_errors_are_distinguishable() {
        assert!(Error::AlreadyInitialized.is_sequence_error());
        assert!(Error::AlreadyStarted.is_sequence_error());
        assert!(Error::NotInitialized.is_sequence_error());

        assert!(!Error::invalid_argument("empty name").is_sequence_error());
        assert!(!Error::manager_fatal("physical", "watch died").is_sequence_error());
        assert!(!Error::cancelled("waiting for leadership").is_sequence_error());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::invalid_argument("please provide a plugin name").to_string(),
            "invalid argument: please provide a plugin name"
        );
        assert_eq!(
            Error::manager_fatal("virtual", "cache already started").to_string(),
            "virtual manager failed: cache already started"
        );
        assert_eq!(
            Error::cancelled("waiting for leadership").to_string(),
            "cancelled while waiting for leadership"
        );
    }
}
