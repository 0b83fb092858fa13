//! Resource validation rules and the chain that aggregates their errors.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::resource::{Resource, ResourceType};

static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("valid DNS label regex")
});

/// A single rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{resource_type} '{name}': {rule}: {message}")]
pub struct ValidationError {
    pub resource_type: ResourceType,
    pub name: String,
    pub rule: String,
    pub message: String,
}

/// Outcome of validating a set of resources. Every violation is listed, not
/// only the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// Number of resources checked.
    pub resources: usize,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "{} resources valid", self.resources);
        }
        write!(f, "{} errors in {} resources", self.errors.len(), self.resources)?;
        for error in &self.errors {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

/// Trait for a validation rule.
pub trait Validation: Send + Sync {
    /// Rule name, used in error messages.
    fn name(&self) -> &str;

    /// Whether the rule applies to resources of this type.
    fn accepts(&self, _resource_type: &ResourceType) -> bool {
        true
    }

    /// Check one resource, returning the violation message on failure.
    fn validate(&self, resource: &Resource) -> Result<(), String>;
}

/// Every resource must have a non-empty name.
pub struct NameRequired;

impl Validation for NameRequired {
    fn name(&self) -> &str {
        "name-required"
    }

    fn validate(&self, resource: &Resource) -> Result<(), String> {
        if resource.name().trim().is_empty() {
            return Err("metadata.name is required".to_string());
        }
        Ok(())
    }
}

/// Resource names must match a pattern, optionally only for some types.
pub struct NamePattern {
    pattern: Regex,
    types: Vec<ResourceType>,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        // Anchor so the whole name has to match.
        let pattern = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            pattern,
            types: Vec::new(),
        })
    }

    /// Names following DNS-1123 label rules.
    pub fn dns_label() -> Self {
        Self {
            pattern: DNS_LABEL.clone(),
            types: Vec::new(),
        }
    }

    pub fn for_type(mut self, resource_type: ResourceType) -> Self {
        self.types.push(resource_type);
        self
    }
}

impl Validation for NamePattern {
    fn name(&self) -> &str {
        "name-pattern"
    }

    fn accepts(&self, resource_type: &ResourceType) -> bool {
        self.types.is_empty() || self.types.contains(resource_type)
    }

    fn validate(&self, resource: &Resource) -> Result<(), String> {
        if self.pattern.is_match(resource.name()) {
            Ok(())
        } else {
            Err(format!(
                "name '{}' does not match {}",
                resource.name(),
                self.pattern.as_str()
            ))
        }
    }
}

/// Spec fields that must be present and non-null for a type.
pub struct RequiredSpecFields {
    resource_type: ResourceType,
    fields: Vec<String>,
}

impl RequiredSpecFields {
    pub fn new(resource_type: ResourceType, fields: &[&str]) -> Self {
        Self {
            resource_type,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl Validation for RequiredSpecFields {
    fn name(&self) -> &str {
        "required-spec-fields"
    }

    fn accepts(&self, resource_type: &ResourceType) -> bool {
        *resource_type == self.resource_type
    }

    fn validate(&self, resource: &Resource) -> Result<(), String> {
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| resource.spec().get(f.as_str()).is_none_or(|v| v.is_null()))
            .map(|f| f.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing spec fields: {}", missing.join(", ")))
        }
    }
}

/// Ordered set of validations applied to every resource.
#[derive(Clone, Default)]
pub struct ValidationChain {
    validations: Vec<Arc<dyn Validation>>,
}

impl ValidationChain {
    pub fn new(validations: Vec<Arc<dyn Validation>>) -> Self {
        Self { validations }
    }

    pub fn push(&mut self, validation: Arc<dyn Validation>) {
        self.validations.push(validation);
    }

    pub fn len(&self) -> usize {
        self.validations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validations.is_empty()
    }

    /// Run every applicable rule against every resource.
    pub fn validate(&self, resources: &[Resource]) -> ValidationResult {
        let mut errors = Vec::new();
        for resource in resources {
            let resource_type = resource.resource_type();
            for validation in self.validations.iter().filter(|v| v.accepts(&resource_type)) {
                if let Err(message) = validation.validate(resource) {
                    errors.push(ValidationError {
                        resource_type: resource_type.clone(),
                        name: resource.name().to_string(),
                        rule: validation.name().to_string(),
                        message,
                    });
                }
            }
        }
        ValidationResult {
            resources: resources.len(),
            errors,
        }
    }
}
