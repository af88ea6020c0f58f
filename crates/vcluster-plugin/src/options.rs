//! Virtual cluster options supplied by the host
//!
//! The host serializes its own runtime options to JSON and hands them to the
//! plugin during the handshake. Only the fields a plugin commonly needs are
//! modelled; anything else in the blob is ignored.

use serde::{Deserialize, Serialize};

use crate::error::ConfigStage;
use crate::{Error, Result};

/// Runtime options of the virtual cluster the plugin is attached to
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualClusterOptions {
    /// Name of the virtual cluster; used as the physical name suffix
    pub name: String,
    /// Namespace on the physical cluster that synced resources live in
    pub target_namespace: String,
    /// Name of the Service fronting the virtual cluster
    pub service_name: String,
    /// Namespace of that Service (the namespace the host runs in)
    pub service_namespace: String,
    /// Labels copied verbatim from virtual to physical objects
    pub sync_labels: Vec<String>,
    /// Node selector applied to synced pods, `key=value,...`
    pub node_selector: String,
    /// Whether `node_selector` is enforced on every synced pod
    pub enforce_node_selector: bool,
}

impl VirtualClusterOptions {
    /// Parse the JSON blob sent by the host
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::config(ConfigStage::Options, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_known_fields() {
        let raw = r#"{
            "name": "team-a",
            "targetNamespace": "vcluster-team-a",
            "serviceName": "team-a",
            "serviceNamespace": "vcluster-system",
            "syncLabels": ["app.kubernetes.io/name"],
            "nodeSelector": "pool=tenants",
            "enforceNodeSelector": true
        }"#;

        let opts = VirtualClusterOptions::from_json(raw).unwrap();
        assert_eq!(opts.name, "team-a");
        assert_eq!(opts.target_namespace, "vcluster-team-a");
        assert_eq!(opts.service_name, "team-a");
        assert_eq!(opts.service_namespace, "vcluster-system");
        assert_eq!(opts.sync_labels, vec!["app.kubernetes.io/name"]);
        assert_eq!(opts.node_selector, "pool=tenants");
        assert!(opts.enforce_node_selector);
    }

    #[test]
    fn test_unknown_and_missing_fields_are_tolerated() {
        let opts =
            VirtualClusterOptions::from_json(r#"{"targetNamespace":"ns","fakeNodes":true}"#)
                .unwrap();
        assert_eq!(opts.target_namespace, "ns");
        assert!(opts.name.is_empty());
        assert!(opts.sync_labels.is_empty());
    }

    #[test]
    fn test_malformed_json_is_an_options_config_error() {
        let err = VirtualClusterOptions::from_json("{not json").unwrap_err();
        assert_eq!(err.config_stage(), Some(ConfigStage::Options));
    }
}
