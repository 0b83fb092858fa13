//! Change executor - routes each change to its handler and collects results.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info};

use crate::change::{ChangeError, ChangeErrorKind, ChangeResult, Operation, ResourceChange};
use crate::error::{EngineError, Result};
use crate::handler::ChangeHandler;
use crate::remote::{DEFAULT_TIMEOUT, RemoteError};
use crate::resource::ResourceType;

/// Operations that need a handler. `NONE` is settled by the executor itself.
const HANDLED: [Operation; 3] = [Operation::Add, Operation::Update, Operation::Delete];

/// Dispatches changes of one resource type to their handlers.
pub struct ChangeExecutor {
    resource_type: ResourceType,
    handlers: HashMap<Operation, Arc<dyn ChangeHandler>>,
    timeout: Duration,
}

impl ChangeExecutor {
    /// Build an executor, checking that every operation in `required` has
    /// exactly one handler and that no operation has more than one.
    pub fn new(
        resource_type: ResourceType,
        handlers: Vec<Arc<dyn ChangeHandler>>,
        required: &[Operation],
    ) -> Result<Self> {
        let mut routes = HashMap::new();
        for operation in HANDLED {
            let matching: Vec<&Arc<dyn ChangeHandler>> = handlers
                .iter()
                .filter(|h| h.operations().contains(&operation))
                .collect();
            let needed = required.contains(&operation);
            match matching.as_slice() {
                [handler] => {
                    routes.insert(operation, Arc::clone(handler));
                }
                [] if !needed => {}
                _ => {
                    return Err(EngineError::HandlerConfig {
                        resource_type: resource_type.clone(),
                        operation,
                        count: matching.len(),
                    });
                }
            }
        }
        Ok(Self {
            resource_type,
            handlers: routes,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Per-call deadline for handlers.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn handles(&self, operation: Operation) -> bool {
        operation == Operation::None || self.handlers.contains_key(&operation)
    }

    /// Execute changes in order, one result per change.
    ///
    /// A failing change never stops the batch. With `dry_run` no handler is
    /// called and every result is OK with zero duration.
    pub async fn execute(&self, changes: Vec<ResourceChange>, dry_run: bool) -> Vec<ChangeResult> {
        self.execute_within(changes, dry_run, self.timeout).await
    }

    /// Like [`execute`](Self::execute) with a per-call handler deadline.
    pub async fn execute_within(
        &self,
        changes: Vec<ResourceChange>,
        dry_run: bool,
        timeout: Duration,
    ) -> Vec<ChangeResult> {
        let mut results = Vec::with_capacity(changes.len());
        for change in changes {
            results.push(self.execute_one(change, dry_run, timeout).await);
        }

        let failed = results.iter().filter(|r| r.is_failed()).count();
        info!(
            "Executed {} changes for {} ({} failed, dry_run={})",
            results.len(),
            self.resource_type,
            failed,
            dry_run
        );
        results
    }

    async fn execute_one(
        &self,
        change: ResourceChange,
        dry_run: bool,
        timeout: Duration,
    ) -> ChangeResult {
        if change.operation == Operation::None {
            return ChangeResult::skipped(change);
        }

        let Some(handler) = self.handlers.get(&change.operation) else {
            let error = ChangeError::new(
                ChangeErrorKind::Unsupported,
                format!("no handler for {} on {}", change.operation, self.resource_type),
            );
            return ChangeResult::failed(change, Utc::now(), Duration::ZERO, error);
        };

        let description = handler.describe(&change);
        if dry_run {
            debug!("Dry run: {}", description);
            return ChangeResult::skipped(change).with_description(description);
        }

        debug!("Applying: {}", description);
        let started_at = Utc::now();
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(handler.apply(&change)).catch_unwind(),
        )
        .await;
        let elapsed = started.elapsed();

        let error = match outcome {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(ChangeError::from(e)),
            Ok(Err(panic)) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                Some(ChangeError::new(ChangeErrorKind::Panicked, message))
            }
            Err(_) => Some(ChangeError::from(RemoteError::Timeout {
                operation: format!("{} {}", change.operation, change.key),
                after: timeout,
            })),
        };

        match error {
            None => ChangeResult::ok(change, started_at, elapsed).with_description(description),
            Some(error) => {
                error!("{} failed: {}", description, error);
                ChangeResult::failed(change, started_at, elapsed, error)
                    .with_description(description)
            }
        }
    }
}
