//! Physical name translation
//!
//! Objects from every virtual namespace land in a single physical namespace, so
//! their names must encode the virtual namespace and the owning virtual
//! cluster: `<name>-x-<namespace>-x-<suffix>`. Names longer than a DNS label
//! are truncated and disambiguated with a digest of the full name.
//!
//! The suffix is the virtual cluster name. It lives on [`NameTranslator`],
//! which is carried by the register context rather than held in a global.

use sha2::{Digest, Sha256};

/// Suffix used when the host does not report a virtual cluster name
pub const DEFAULT_SUFFIX: &str = "vcluster";

/// Maximum length of a Kubernetes DNS label
const MAX_NAME_LENGTH: usize = 63;

/// Length kept from the original name when truncating
const TRUNCATED_PREFIX_LENGTH: usize = 52;

/// Hex characters of the digest appended to truncated names
const DIGEST_LENGTH: usize = 10;

/// Translates virtual object names into physical ones
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameTranslator {
    suffix: String,
}

impl Default for NameTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX)
    }
}

impl NameTranslator {
    /// Create a translator with the given suffix
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    /// Create a translator from the host-reported name, keeping the default
    /// suffix when it is empty
    pub fn for_cluster(name: &str) -> Self {
        if name.is_empty() {
            Self::default()
        } else {
            Self::new(name)
        }
    }

    /// The suffix appended to physical names
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Physical name for a virtual object. Empty names stay empty.
    pub fn physical_name(&self, name: &str, namespace: &str) -> String {
        if name.is_empty() {
            return String::new();
        }
        safe_concat_name(&[name, "x", namespace, "x", &self.suffix])
    }

    /// Physical name for a cluster-scoped virtual object
    pub fn physical_name_cluster_scoped(&self, name: &str) -> String {
        if name.is_empty() {
            return String::new();
        }
        safe_concat_name(&[name, "x", &self.suffix])
    }
}

/// Join parts with `-`, truncating to a valid DNS label length.
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LENGTH {
        return full;
    }

    let digest = Sha256::digest(full.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    let prefix: String = full.chars().take(TRUNCATED_PREFIX_LENGTH).collect();
    format!("{}-{}", prefix, &hex[..DIGEST_LENGTH])
}
