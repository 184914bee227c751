// Keel Core - Object metadata
//
// Kubernetes-style metadata shared by every resource kind: identity,
// versioning counters used for optimistic concurrency, ownership links
// used for cascade deletion, and the label/annotation maps selectors and
// the tool-definition fallbacks read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata block carried by every resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique per (kind, namespace)
    pub name: String,

    /// Namespace; defaults to "default"
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Server-assigned unique id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Incremented by the cluster API on every spec change
    #[serde(default)]
    pub generation: i64,

    /// Opaque version token for optimistic concurrency
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Set instead of removal while finalizers are present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Whether deletion has been requested (finalizers still pending)
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// True when any owner reference points at the given object
    pub fn is_owned_by(&self, kind: &str, name: &str) -> bool {
        self.owner_references
            .iter()
            .any(|o| o.kind == kind && o.name == name)
    }
}

/// Link from an owned object back to its owner; drives cascade deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    pub fn controller_of(kind: impl Into<String>, meta: &ObjectMeta) -> Self {
        Self {
            kind: kind.into(),
            name: meta.name.clone(),
            uid: meta.uid.clone(),
            controller: true,
        }
    }
}

/// `namespace/name` pair identifying an object within a kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Label selector; an empty selector matches nothing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }

    /// All selector entries must be present with equal values
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        if self.match_labels.is_empty() {
            return false;
        }
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_defaults() {
        let meta: ObjectMeta = serde_json::from_str(r#"{"name": "a"}"#).unwrap();
        assert_eq!(meta.namespace, "default");
        assert_eq!(meta.generation, 0);
    }

    #[test]
    fn test_namespaced_name_display() {
        let nn = NamespacedName::new("prod", "writer");
        assert_eq!(nn.to_string(), "prod/writer");
    }

    #[test]
    fn test_label_selector_matches() {
        let selector: LabelSelector =
            serde_json::from_str(r#"{"matchLabels": {"team": "search"}}"#).unwrap();

        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "search".to_string());
        labels.insert("tier".to_string(), "web".to_string());
        assert!(selector.matches(&labels));

        labels.insert("team".to_string(), "ads".to_string());
        assert!(!selector.matches(&labels));
    }

    #[test]
    fn test_empty_selector_matches_nothing() {
        let selector = LabelSelector::default();
        assert!(!selector.matches(&BTreeMap::new()));
    }

    #[test]
    fn test_owner_reference_roundtrip() {
        let mut meta = ObjectMeta::named("srv", "default");
        meta.uid = Some("u-1".to_string());

        let owner = OwnerReference::controller_of("A2AServer", &meta);
        assert!(owner.controller);

        let mut owned = ObjectMeta::named("child", "default");
        owned.owner_references.push(owner);
        assert!(owned.is_owned_by("A2AServer", "srv"));
        assert!(!owned.is_owned_by("A2AServer", "other"));
    }
}
