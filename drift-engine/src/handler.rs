//! Change handlers apply one kind of change to the remote system.
//!
//! # Contract
//!
//! - A handler declares the operations it applies; the executor routes each
//!   change to the single handler declaring its operation.
//! - Deleting a resource that does not exist remotely is a success. Deletes
//!   of absent resources are emitted for resources annotated for deletion,
//!   and retries of a partially applied run hit the same case.
//! - Handlers do not retry internally unless their remote-call layer does;
//!   the executor never retries.
//! - Errors are reported as [`RemoteError`]; timeouts and unavailability
//!   must map to the transient variants so callers can retry the run.

use std::sync::Arc;

use async_trait::async_trait;

use crate::change::{Operation, ResourceChange};
use crate::remote::RemoteError;

/// Trait for applying changes of one or more operations.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    /// Operations this handler applies.
    fn operations(&self) -> &[Operation];

    /// Apply the change to the remote system.
    async fn apply(&self, change: &ResourceChange) -> Result<(), RemoteError>;

    /// One-line description of what applying the change does.
    fn describe(&self, change: &ResourceChange) -> String {
        match change.operation {
            Operation::Add => format!("Create {} '{}'", change.resource_type.kind, change.key),
            Operation::Update => {
                let fields: Vec<&str> = change.drifted_fields().map(|c| c.name.as_str()).collect();
                format!(
                    "Update {} '{}' ({})",
                    change.resource_type.kind,
                    change.key,
                    fields.join(", ")
                )
            }
            Operation::Delete => format!("Delete {} '{}'", change.resource_type.kind, change.key),
            Operation::None => {
                format!("{} '{}' is up to date", change.resource_type.kind, change.key)
            }
        }
    }
}

/// Handler that accepts changes and does nothing, for operations a type
/// cannot express remotely (e.g. updates of an immutable resource are
/// acknowledged but ignored).
pub struct NoopHandler {
    operations: Vec<Operation>,
}

impl NoopHandler {
    pub fn new(operations: impl Into<Vec<Operation>>) -> Self {
        Self {
            operations: operations.into(),
        }
    }

    pub fn shared(operations: impl Into<Vec<Operation>>) -> Arc<dyn ChangeHandler> {
        Arc::new(Self::new(operations))
    }
}

#[async_trait]
impl ChangeHandler for NoopHandler {
    fn operations(&self) -> &[Operation] {
        &self.operations
    }

    async fn apply(&self, _change: &ResourceChange) -> Result<(), RemoteError> {
        Ok(())
    }

    fn describe(&self, change: &ResourceChange) -> String {
        format!("Ignore {} of {} '{}'", change.operation, change.resource_type.kind, change.key)
    }
}
