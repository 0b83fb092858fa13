//! Converters and transformations applied to the input before selection.
//!
//! Converters normalize documents (one in, zero or more out); transformations
//! rewrite or drop single resources. Both run in registration order.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::context::ReconciliationContext;
use crate::resource::{Resource, ResourceType};

/// Trait for turning one input document into the resources it declares.
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, resource: &Resource) -> bool;

    fn convert(&self, resource: Resource) -> Result<Vec<Resource>, String>;
}

/// Trait for rewriting a resource. Returning `Ok(None)` drops it.
pub trait Transformation: Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, _resource_type: &ResourceType) -> bool {
        true
    }

    fn transform(
        &self,
        resource: Resource,
        context: &ReconciliationContext,
    ) -> Result<Option<Resource>, String>;
}

/// Rewrites a deprecated type into its current one.
pub struct ApiVersionConverter {
    from: ResourceType,
    to: ResourceType,
}

impl ApiVersionConverter {
    pub fn new(from: ResourceType, to: ResourceType) -> Self {
        Self { from, to }
    }
}

impl Converter for ApiVersionConverter {
    fn name(&self) -> &str {
        "api-version"
    }

    fn accepts(&self, resource: &Resource) -> bool {
        resource.resource_type() == self.from
    }

    fn convert(&self, resource: Resource) -> Result<Vec<Resource>, String> {
        Ok(vec![resource.with_type(&self.to)])
    }
}

/// Expands `kind: List` documents into their `spec.items`.
pub struct ListConverter;

impl ListConverter {
    pub const KIND: &'static str = "List";
}

impl Converter for ListConverter {
    fn name(&self) -> &str {
        "list"
    }

    fn accepts(&self, resource: &Resource) -> bool {
        resource.kind() == Self::KIND
    }

    fn convert(&self, resource: Resource) -> Result<Vec<Resource>, String> {
        let items = match resource.spec().get("items") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(_) => return Err("spec.items must be a list".to_string()),
        };
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item).map_err(|e| format!("item {}: {}", i, e))
            })
            .collect()
    }
}

/// Adds labels to every resource unless already set.
pub struct CommonLabels {
    labels: BTreeMap<String, String>,
}

impl CommonLabels {
    pub fn new(labels: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            labels: labels.into_iter().collect(),
        }
    }
}

impl Transformation for CommonLabels {
    fn name(&self) -> &str {
        "common-labels"
    }

    fn transform(
        &self,
        resource: Resource,
        _context: &ReconciliationContext,
    ) -> Result<Option<Resource>, String> {
        let mut resource = resource;
        for (key, value) in &self.labels {
            if resource.label(key).is_none() {
                resource = resource.with_label(key.clone(), value.clone());
            }
        }
        Ok(Some(resource))
    }
}

/// Fills missing top-level spec fields of one type with defaults.
pub struct SpecDefaults {
    resource_type: ResourceType,
    defaults: Map<String, Value>,
}

impl SpecDefaults {
    pub fn new(resource_type: ResourceType, defaults: Value) -> Result<Self, String> {
        match defaults {
            Value::Object(defaults) => Ok(Self {
                resource_type,
                defaults,
            }),
            _ => Err("spec defaults must be a map".to_string()),
        }
    }
}

impl Transformation for SpecDefaults {
    fn name(&self) -> &str {
        "spec-defaults"
    }

    fn accepts(&self, resource_type: &ResourceType) -> bool {
        *resource_type == self.resource_type
    }

    fn transform(
        &self,
        resource: Resource,
        _context: &ReconciliationContext,
    ) -> Result<Option<Resource>, String> {
        let mut spec = match resource.spec() {
            Value::Object(spec) => spec.clone(),
            Value::Null => Map::new(),
            _ => return Err("spec must be a map".to_string()),
        };
        for (key, value) in &self.defaults {
            spec.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(Some(resource.with_spec(Value::Object(spec))))
    }
}
