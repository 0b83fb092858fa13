//! Change computer: diffs actual resources against expected ones.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::change::{Operation, ResourceChange, StateChange};
use crate::compare::{FieldSpec, compare_specs};
use crate::error::{EngineError, Result};
use crate::resource::{Resource, ResourceType};

/// Extracts the identity key of a resource within its type.
pub type KeyExtractor = Arc<dyn Fn(&Resource) -> String + Send + Sync>;

/// Computes the changes needed to converge `actual` toward `expected`.
#[derive(Clone)]
pub struct ChangeComputer {
    key: KeyExtractor,
    fields: Vec<FieldSpec>,
    delete_orphans: bool,
}

impl Default for ChangeComputer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeComputer {
    /// Computer keyed by resource name, comparing every field by value.
    pub fn new() -> Self {
        Self {
            key: Arc::new(|r: &Resource| r.name().to_string()),
            fields: Vec::new(),
            delete_orphans: false,
        }
    }

    /// Use a custom identity key, e.g. for composite-key resources.
    pub fn with_key<F>(mut self, key: F) -> Self
    where
        F: Fn(&Resource) -> String + Send + Sync + 'static,
    {
        self.key = Arc::new(key);
        self
    }

    /// Identity key built from the name and the given spec fields, joined by `:`.
    pub fn with_composite_key(self, spec_fields: &[&str]) -> Self {
        let spec_fields: Vec<String> = spec_fields.iter().map(|f| f.to_string()).collect();
        self.with_key(move |r: &Resource| {
            let mut parts = vec![r.name().to_string()];
            for field in &spec_fields {
                let part = match r.spec().get(field) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(serde_json::Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                parts.push(part);
            }
            parts.join(":")
        })
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_delete_orphans(mut self, delete_orphans: bool) -> Self {
        self.delete_orphans = delete_orphans;
        self
    }

    pub fn delete_orphans(&self) -> bool {
        self.delete_orphans
    }

    pub fn key_of(&self, resource: &Resource) -> String {
        (self.key)(resource)
    }

    /// Compute the ordered list of changes.
    ///
    /// Expected resources come first in input order (ADD, UPDATE, NONE or
    /// annotated DELETE), then orphans in actual order when orphan deletion
    /// is enabled. Duplicate keys in `expected` are rejected.
    pub fn compute(
        &self,
        resource_type: &ResourceType,
        actual: &[Resource],
        expected: &[Resource],
    ) -> Result<Vec<ResourceChange>> {
        let mut actual_by_key: HashMap<String, &Resource> = HashMap::with_capacity(actual.len());
        for resource in actual {
            let key = self.key_of(resource);
            if actual_by_key.contains_key(&key) {
                warn!("Duplicate actual {} resource '{}', keeping the first", resource_type, key);
                continue;
            }
            actual_by_key.insert(key, resource);
        }

        let mut seen: HashSet<String> = HashSet::with_capacity(expected.len());
        let mut changes = Vec::with_capacity(expected.len());

        for resource in expected {
            let key = self.key_of(resource);
            if !seen.insert(key.clone()) {
                return Err(EngineError::DuplicateResource {
                    resource_type: resource_type.clone(),
                    key,
                });
            }

            let before = actual_by_key.get(&key).copied();
            let change = if resource.is_marked_for_deletion() {
                self.delete_change(resource_type, key, before.unwrap_or(resource), resource)
            } else {
                match before {
                    None => self.add_change(resource_type, key, resource),
                    Some(before) => self.update_change(resource_type, key, before, resource),
                }
            };
            changes.push(change);
        }

        if self.delete_orphans {
            for resource in actual {
                let key = self.key_of(resource);
                if seen.contains(&key) {
                    continue;
                }
                seen.insert(key.clone());
                changes.push(self.delete_change(resource_type, key, resource, resource));
            }
        }

        debug!(
            resource_type = %resource_type,
            actual = actual.len(),
            expected = expected.len(),
            changes = changes.len(),
            "Computed changes"
        );
        Ok(changes)
    }

    fn add_change(&self, ty: &ResourceType, key: String, after: &Resource) -> ResourceChange {
        let empty = serde_json::Value::Object(Default::default());
        let state_changes = compare_specs(&self.fields, &empty, after.spec());
        ResourceChange {
            resource_type: ty.clone(),
            key,
            metadata: after.metadata().clone(),
            operation: Operation::Add,
            state_changes,
            before: None,
            after: Some(after.clone()),
        }
    }

    fn update_change(
        &self,
        ty: &ResourceType,
        key: String,
        before: &Resource,
        after: &Resource,
    ) -> ResourceChange {
        let state_changes = compare_specs(&self.fields, before.spec(), after.spec());
        let operation = if state_changes.iter().any(|c| c.operation != Operation::None) {
            Operation::Update
        } else {
            Operation::None
        };
        ResourceChange {
            resource_type: ty.clone(),
            key,
            metadata: after.metadata().clone(),
            operation,
            state_changes,
            before: Some(before.clone()),
            after: Some(after.clone()),
        }
    }

    /// `before` is what gets deleted; `source` supplies the metadata so that
    /// annotations from the expected document reach handlers and reporters.
    fn delete_change(
        &self,
        ty: &ResourceType,
        key: String,
        before: &Resource,
        source: &Resource,
    ) -> ResourceChange {
        let empty = serde_json::Value::Object(Default::default());
        let state_changes: Vec<StateChange> = compare_specs(&self.fields, before.spec(), &empty);
        ResourceChange {
            resource_type: ty.clone(),
            key,
            metadata: source.metadata().clone(),
            operation: Operation::Delete,
            state_changes,
            before: Some(before.clone()),
            after: None,
        }
    }
}

impl fmt::Debug for ChangeComputer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeComputer")
            .field("fields", &self.fields)
            .field("delete_orphans", &self.delete_orphans)
            .finish_non_exhaustive()
    }
}
