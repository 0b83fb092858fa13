//! Change model: drift between an actual and an expected resource, and the
//! outcome of applying it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::{ObjectMeta, Resource, ResourceType};

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Add,
    Update,
    Delete,
    /// No drift, nothing to do.
    None,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Add,
        Operation::Update,
        Operation::Delete,
        Operation::None,
    ];

    /// Derive the operation from the presence and equality of both sides.
    pub fn between<T: PartialEq + ?Sized>(before: Option<&T>, after: Option<&T>) -> Self {
        match (before, after) {
            (None, Some(_)) => Operation::Add,
            (Some(_), None) => Operation::Delete,
            (Some(b), Some(a)) if b != a => Operation::Update,
            _ => Operation::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "ADD",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::None => "NONE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-level change inside a [`ResourceChange`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub name: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

impl StateChange {
    /// Build a state change, deriving its operation from the two values.
    pub fn new(name: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        let operation = Operation::between(before.as_ref(), after.as_ref());
        Self {
            name: name.into(),
            operation,
            before,
            after,
        }
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Value>| match v {
            Some(v) => v.to_string(),
            None => "<none>".to_string(),
        };
        match self.operation {
            Operation::Add => write!(f, "+ {}: {}", self.name, show(&self.after)),
            Operation::Delete => write!(f, "- {}: {}", self.name, show(&self.before)),
            Operation::Update => write!(
                f,
                "~ {}: {} -> {}",
                self.name,
                show(&self.before),
                show(&self.after)
            ),
            Operation::None => write!(f, "  {}: {}", self.name, show(&self.after)),
        }
    }
}

/// One unit of drift for one resource instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChange {
    pub resource_type: ResourceType,
    pub key: String,
    pub metadata: ObjectMeta,
    pub operation: Operation,
    pub state_changes: Vec<StateChange>,
    /// Actual resource, when it exists (or the deleted document for an
    /// annotated delete of a missing resource).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Resource>,
    /// Expected resource, absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Resource>,
}

impl ResourceChange {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The resource the handler should act on: `after` if present, else `before`.
    pub fn resource(&self) -> Option<&Resource> {
        self.after.as_ref().or(self.before.as_ref())
    }

    pub fn is_no_report(&self) -> bool {
        self.metadata.has_flag(crate::resource::annotations::NO_REPORT)
    }

    /// Only the state changes that actually differ.
    pub fn drifted_fields(&self) -> impl Iterator<Item = &StateChange> {
        self.state_changes
            .iter()
            .filter(|c| c.operation != Operation::None)
    }
}

impl fmt::Display for ResourceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} '{}'", self.operation, self.resource_type, self.key)
    }
}

/// Outcome status of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeStatus {
    Ok,
    Failed,
}

/// Classification of an execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeErrorKind {
    /// The handler did not complete in time.
    Timeout,
    /// Remote system unavailable; retrying the run may succeed.
    Transient,
    /// The remote system refused the change.
    Rejected,
    /// The handler panicked.
    Panicked,
    /// No handler accepts this operation.
    Unsupported,
    /// The controller failed the whole batch before this change ran.
    Controller,
}

/// Error captured into a [`ChangeResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeError {
    pub kind: ChangeErrorKind,
    pub message: String,
}

impl ChangeError {
    pub fn new(kind: ChangeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ChangeErrorKind::Timeout | ChangeErrorKind::Transient)
    }
}

impl fmt::Display for ChangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of executing (or dry-running) one change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeResult {
    pub change: ResourceChange,
    pub status: ChangeStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ChangeError>,
    /// Human readable summary from the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChangeResult {
    pub fn ok(change: ResourceChange, started: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            change,
            status: ChangeStatus::Ok,
            timestamp: started,
            duration,
            errors: Vec::new(),
            description: None,
        }
    }

    pub fn failed(
        change: ResourceChange,
        started: DateTime<Utc>,
        duration: Duration,
        error: ChangeError,
    ) -> Self {
        Self {
            change,
            status: ChangeStatus::Failed,
            timestamp: started,
            duration,
            errors: vec![error],
            description: None,
        }
    }

    /// Result for a change that was not sent to the remote system.
    pub fn skipped(change: ResourceChange) -> Self {
        Self::ok(change, Utc::now(), Duration::ZERO)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ChangeStatus::Ok
    }

    pub fn is_failed(&self) -> bool {
        self.status == ChangeStatus::Failed
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
