//! Resource model.
//!
//! A [`Resource`] is a typed, named declarative document: an `apiVersion`
//! and `kind`, metadata (name, labels, annotations) and a spec payload.
//! Resources are immutable; every edit goes through a `with_*` method that
//! consumes the value and returns the updated one.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Annotations interpreted by the engine.
pub mod annotations {
    /// Marks a resource for deletion. Any value other than `"false"` enables it.
    pub const DELETE: &str = "drift.io/delete";
    /// Keeps changes for this resource out of change reporters.
    pub const NO_REPORT: &str = "drift.io/no-report";
    /// Transient resources are dropped before planning.
    pub const TRANSIENT: &str = "drift.io/transient";
}

/// Dispatch key for collectors and controllers: (group, version, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceType {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Build a type from a document's `apiVersion` and `kind`.
    ///
    /// `apiVersion` is either `group/version` or a bare `version` for the
    /// core (empty) group.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.rsplit_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    /// The `apiVersion` string for this type.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Error parsing a `apiVersion/Kind` string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid resource type '{0}', expected <apiVersion>/<Kind>")]
pub struct ParseResourceTypeError(pub String);

impl FromStr for ResourceType {
    type Err = ParseResourceTypeError;

    /// Parses the [`Display`](fmt::Display) form, e.g. `kafka.drift.io/v1/Topic`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (api_version, kind) = s
            .trim()
            .rsplit_once('/')
            .ok_or_else(|| ParseResourceTypeError(s.to_string()))?;
        if api_version.is_empty() || kind.is_empty() {
            return Err(ParseResourceTypeError(s.to_string()));
        }
        Ok(Self::from_api_version(api_version, kind))
    }
}

/// Resource metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Whether a boolean-ish annotation is set.
    pub fn has_flag(&self, key: &str) -> bool {
        self.annotations
            .get(key)
            .is_some_and(|v| !v.eq_ignore_ascii_case("false"))
    }
}

/// A typed, named declarative document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    api_version: String,
    kind: String,
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: Value,
}

impl Resource {
    /// Create a resource of the given type with an empty spec.
    pub fn new(resource_type: &ResourceType, name: impl Into<String>) -> Self {
        Self {
            api_version: resource_type.api_version(),
            kind: resource_type.kind.clone(),
            metadata: ObjectMeta::named(name),
            spec: Value::Object(Default::default()),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        ResourceType::from_api_version(&self.api_version, &self.kind)
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn spec(&self) -> &Value {
        &self.spec
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// Marked for deletion via [`annotations::DELETE`].
    pub fn is_marked_for_deletion(&self) -> bool {
        self.metadata.has_flag(annotations::DELETE)
    }

    /// Marked transient via [`annotations::TRANSIENT`].
    pub fn is_transient(&self) -> bool {
        self.metadata.has_flag(annotations::TRANSIENT)
    }

    /// Excluded from reporting via [`annotations::NO_REPORT`].
    pub fn is_no_report(&self) -> bool {
        self.metadata.has_flag(annotations::NO_REPORT)
    }

    /// Deserialize the spec into a typed value.
    pub fn spec_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.spec.clone())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    pub fn without_annotation(mut self, key: &str) -> Self {
        self.metadata.annotations.remove(key);
        self
    }

    pub fn with_metadata(mut self, metadata: ObjectMeta) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    /// Replace the spec with a serialized typed value.
    pub fn with_typed_spec<T: Serialize>(self, spec: &T) -> Result<Self, serde_json::Error> {
        let spec = serde_json::to_value(spec)?;
        Ok(self.with_spec(spec))
    }

    /// Re-tag the resource with another type, keeping metadata and spec.
    pub fn with_type(mut self, resource_type: &ResourceType) -> Self {
        self.api_version = resource_type.api_version();
        self.kind = resource_type.kind.clone();
        self
    }
}

/// Group resources by type, keeping types in first-appearance order and
/// resources in input order within each type.
pub fn group_by_type(resources: Vec<Resource>) -> Vec<(ResourceType, Vec<Resource>)> {
    let mut groups: Vec<(ResourceType, Vec<Resource>)> = Vec::new();
    for resource in resources {
        let ty = resource.resource_type();
        match groups.iter_mut().find(|(t, _)| *t == ty) {
            Some((_, group)) => group.push(resource),
            None => groups.push((ty, vec![resource])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn topic_type() -> ResourceType {
        ResourceType::new("kafka.drift.io", "v1", "Topic")
    }

    #[test]
    fn test_api_version_round_trip() {
        let ty = topic_type();
        assert_eq!(ty.api_version(), "kafka.drift.io/v1");
        assert_eq!(ResourceType::from_api_version("kafka.drift.io/v1", "Topic"), ty);

        let core = ResourceType::from_api_version("v1", "ConfigMap");
        assert_eq!(core.group, "");
        assert_eq!(core.api_version(), "v1");
    }

    #[test]
    fn test_parse_display_form() {
        let ty: ResourceType = "kafka.drift.io/v1/Topic".parse().unwrap();
        assert_eq!(ty, topic_type());
        assert_eq!(ty.to_string(), "kafka.drift.io/v1/Topic");
        assert!("Topic".parse::<ResourceType>().is_err());
        assert!("v1/".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_functional_update_leaves_original() {
        let original = Resource::new(&topic_type(), "t1");
        let updated = original
            .clone()
            .with_label("env", "prod")
            .with_spec(json!({"partitions": 3}));

        assert!(original.label("env").is_none());
        assert_eq!(updated.label("env"), Some("prod"));
        assert_eq!(updated.spec()["partitions"], 3);
    }

    #[test]
    fn test_annotation_flags() {
        let r = Resource::new(&topic_type(), "t1");
        assert!(!r.is_marked_for_deletion());

        let r = r.with_annotation(annotations::DELETE, "true");
        assert!(r.is_marked_for_deletion());

        let r = r.with_annotation(annotations::DELETE, "False");
        assert!(!r.is_marked_for_deletion());

        let r = r.with_annotation(annotations::NO_REPORT, "");
        assert!(r.is_no_report());
    }

    #[test]
    fn test_deserialize_document() {
        let doc = json!({
            "apiVersion": "kafka.drift.io/v1",
            "kind": "Topic",
            "metadata": {"name": "orders", "labels": {"team": "a"}},
            "spec": {"partitions": 6}
        });
        let r: Resource = serde_json::from_value(doc).unwrap();
        assert_eq!(r.resource_type(), topic_type());
        assert_eq!(r.name(), "orders");
        assert_eq!(r.label("team"), Some("a"));
    }

    #[test]
    fn test_group_by_type_keeps_order() {
        let acl = ResourceType::new("kafka.drift.io", "v1", "Acl");
        let groups = group_by_type(vec![
            Resource::new(&acl, "a1"),
            Resource::new(&topic_type(), "t1"),
            Resource::new(&acl, "a2"),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, acl);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1[0].name(), "t1");
    }
}
