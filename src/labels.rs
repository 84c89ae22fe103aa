//! # Resource Labels
//!
//! The label schema read from source ConfigMaps and written onto generated Secrets.
//!
//! ## Source ConfigMap
//!
//! - `target-secret` (required) - name of the Secret to produce
//! - `source-key` (default `.env`) - data entry holding the encrypted content
//! - `decryption-secret` (optional) - Secret in the same namespace holding the key
//! - `decryption-secret-key` (default `CONFIG_DECRYPTION_KEY`) - entry inside that Secret
//!
//! ## Generated Secret
//!
//! - `source-configmap` - name of the originating ConfigMap
//! - `source-configmap-version` - the ConfigMap's content version at generation time

use crate::constants::{
    DEFAULT_DECRYPTION_SECRET_KEY, DEFAULT_SOURCE_KEY, LABEL_DECRYPTION_SECRET,
    LABEL_DECRYPTION_SECRET_KEY, LABEL_SOURCE_CONFIGMAP, LABEL_SOURCE_CONFIGMAP_VERSION,
    LABEL_SOURCE_KEY, LABEL_TARGET_SECRET,
};
use std::collections::BTreeMap;

/// Labels carried by a source ConfigMap, with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLabels {
    pub target_secret: String,
    pub source_key: String,
    pub decryption: Option<DecryptionRef>,
}

/// Where to find the decryption key for a ConfigMap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionRef {
    pub secret_name: String,
    pub secret_key: String,
}

impl SourceLabels {
    /// Read the source labels from a ConfigMap's label set
    ///
    /// Returns `None` when `target-secret` is missing or empty.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        let target_secret = non_empty(labels, LABEL_TARGET_SECRET)?;
        let source_key =
            non_empty(labels, LABEL_SOURCE_KEY).unwrap_or_else(|| DEFAULT_SOURCE_KEY.to_string());
        let decryption = non_empty(labels, LABEL_DECRYPTION_SECRET).map(|secret_name| {
            DecryptionRef {
                secret_name,
                secret_key: non_empty(labels, LABEL_DECRYPTION_SECRET_KEY)
                    .unwrap_or_else(|| DEFAULT_DECRYPTION_SECRET_KEY.to_string()),
            }
        });

        Some(Self {
            target_secret,
            source_key,
            decryption,
        })
    }
}

/// Name of the Secret a ConfigMap's label set targets
pub fn target_secret(labels: &BTreeMap<String, String>) -> Option<String> {
    non_empty(labels, LABEL_TARGET_SECRET)
}

/// Content version stamped onto a generated Secret, if any
pub fn source_version(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels.get(LABEL_SOURCE_CONFIGMAP_VERSION).map(String::as_str)
}

/// Label set written onto a generated Secret
pub fn generated_labels(configmap_name: &str, version: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_SOURCE_CONFIGMAP.to_string(), configmap_name.to_string()),
        (
            LABEL_SOURCE_CONFIGMAP_VERSION.to_string(),
            version.to_string(),
        ),
    ])
}

/// Label selector matching source ConfigMaps
pub fn configmap_selector() -> &'static str {
    LABEL_TARGET_SECRET
}

/// Label selector matching generated Secrets
pub fn secret_selector() -> &'static str {
    LABEL_SOURCE_CONFIGMAP
}

fn non_empty(labels: &BTreeMap<String, String>, key: &str) -> Option<String> {
    labels
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_applied() {
        let parsed = SourceLabels::from_labels(&labels(&[("target-secret", "my-secret")])).unwrap();
        assert_eq!(parsed.target_secret, "my-secret");
        assert_eq!(parsed.source_key, ".env");
        assert!(parsed.decryption.is_none());
    }

    #[test]
    fn test_missing_target_secret() {
        assert!(SourceLabels::from_labels(&labels(&[("source-key", "app.env")])).is_none());
        assert!(SourceLabels::from_labels(&labels(&[("target-secret", "  ")])).is_none());
    }

    #[test]
    fn test_decryption_secret_key_default() {
        let parsed = SourceLabels::from_labels(&labels(&[
            ("target-secret", "my-secret"),
            ("decryption-secret", "keys"),
        ]))
        .unwrap();
        assert_eq!(
            parsed.decryption,
            Some(DecryptionRef {
                secret_name: "keys".to_string(),
                secret_key: "CONFIG_DECRYPTION_KEY".to_string(),
            })
        );
    }

    #[test]
    fn test_decryption_secret_key_override() {
        let parsed = SourceLabels::from_labels(&labels(&[
            ("target-secret", "my-secret"),
            ("source-key", "prod.env"),
            ("decryption-secret", "keys"),
            ("decryption-secret-key", "PROD_KEY"),
        ]))
        .unwrap();
        assert_eq!(parsed.source_key, "prod.env");
        assert_eq!(parsed.decryption.unwrap().secret_key, "PROD_KEY");
    }

    #[test]
    fn test_decryption_secret_key_without_secret_is_ignored() {
        let parsed = SourceLabels::from_labels(&labels(&[
            ("target-secret", "my-secret"),
            ("decryption-secret-key", "PROD_KEY"),
        ]))
        .unwrap();
        assert!(parsed.decryption.is_none());
    }

    #[test]
    fn test_generated_labels() {
        let generated = generated_labels("my-config", "12345");
        assert_eq!(generated.len(), 2);
        assert_eq!(generated["source-configmap"], "my-config");
        assert_eq!(source_version(&generated), Some("12345"));
    }
}
