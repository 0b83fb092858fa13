//! Controllers plan and execute changes for one resource type.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::change::{ChangeResult, Operation, ResourceChange};
use crate::collector::Collector;
use crate::computer::ChangeComputer;
use crate::config::{DELETE_ORPHANS, HANDLER_TIMEOUT_SECS};
use crate::context::{ReconciliationContext, ReconciliationMode};
use crate::error::{EngineError, Result};
use crate::executor::ChangeExecutor;
use crate::handler::ChangeHandler;
use crate::remote::with_timeout;
use crate::resource::{Resource, ResourceType};

/// Trait for reconciling one resource type.
#[async_trait]
pub trait Controller: Send + Sync {
    /// The type this controller reconciles.
    fn resource_type(&self) -> &ResourceType;

    /// Modes this controller can run in.
    fn supported_modes(&self) -> &[ReconciliationMode];

    fn supports(&self, mode: ReconciliationMode) -> bool {
        self.supported_modes().contains(&mode)
    }

    /// Compute the changes converging the remote state toward `resources`.
    /// Reads remote state only.
    async fn plan(
        &self,
        resources: Vec<Resource>,
        context: &ReconciliationContext,
    ) -> Result<Vec<ResourceChange>>;

    /// Apply changes, one result per change. With a dry-run context no
    /// remote state is touched.
    async fn execute(
        &self,
        changes: Vec<ResourceChange>,
        context: &ReconciliationContext,
    ) -> Result<Vec<ChangeResult>>;
}

/// Controller assembled from a collector, a change computer and handlers.
pub struct DefaultController {
    resource_type: ResourceType,
    collector: Arc<dyn Collector>,
    computer: ChangeComputer,
    executor: ChangeExecutor,
    modes: Vec<ReconciliationMode>,
}

impl DefaultController {
    pub fn builder(collector: Arc<dyn Collector>) -> DefaultControllerBuilder {
        DefaultControllerBuilder {
            collector,
            computer: ChangeComputer::new(),
            handlers: Vec::new(),
            modes: ReconciliationMode::ALL.to_vec(),
        }
    }

    pub fn computer(&self) -> &ChangeComputer {
        &self.computer
    }
}

#[async_trait]
impl Controller for DefaultController {
    fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    fn supported_modes(&self) -> &[ReconciliationMode] {
        &self.modes
    }

    async fn plan(
        &self,
        resources: Vec<Resource>,
        context: &ReconciliationContext,
    ) -> Result<Vec<ResourceChange>> {
        let configuration = context.configuration();
        let timeout = configuration.collector_timeout()?;
        let delete_orphans = configuration
            .try_get_bool(DELETE_ORPHANS)?
            .unwrap_or(self.computer.delete_orphans());

        let operation = format!("list {}", self.resource_type);
        let actual = with_timeout(
            &operation,
            timeout,
            self.collector.list(configuration, context.selectors()),
        )
        .await
        .map_err(|source| EngineError::Collector {
            resource_type: self.resource_type.clone(),
            source,
        })?;

        let actual = context.selectors().filter(actual);
        let expected = context.selectors().filter(resources);
        debug!(
            "Planning {}: {} actual, {} expected, delete_orphans={}",
            self.resource_type,
            actual.len(),
            expected.len(),
            delete_orphans
        );

        self.computer
            .clone()
            .with_delete_orphans(delete_orphans)
            .compute(&self.resource_type, &actual, &expected)
    }

    async fn execute(
        &self,
        changes: Vec<ResourceChange>,
        context: &ReconciliationContext,
    ) -> Result<Vec<ChangeResult>> {
        let timeout = context
            .configuration()
            .duration_secs(HANDLER_TIMEOUT_SECS, self.executor.timeout())?;
        info!(
            "Executing {} changes for {}{}",
            changes.len(),
            self.resource_type,
            if context.is_dry_run() { " (dry run)" } else { "" }
        );
        Ok(self
            .executor
            .execute_within(changes, context.is_dry_run(), timeout)
            .await)
    }
}

/// Builder for [`DefaultController`].
pub struct DefaultControllerBuilder {
    collector: Arc<dyn Collector>,
    computer: ChangeComputer,
    handlers: Vec<Arc<dyn ChangeHandler>>,
    modes: Vec<ReconciliationMode>,
}

impl DefaultControllerBuilder {
    pub fn computer(mut self, computer: ChangeComputer) -> Self {
        self.computer = computer;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn ChangeHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Restrict the supported modes (default: all).
    pub fn modes(mut self, modes: impl Into<Vec<ReconciliationMode>>) -> Self {
        self.modes = modes.into();
        self
    }

    /// Build the controller. Every operation a supported mode can produce
    /// must have exactly one handler.
    pub fn build(self) -> Result<DefaultController> {
        let resource_type = self.collector.resource_type().clone();
        let mut required: Vec<Operation> = Vec::new();
        for mode in &self.modes {
            for operation in mode.operations() {
                if !required.contains(operation) {
                    required.push(*operation);
                }
            }
        }
        let executor = ChangeExecutor::new(resource_type.clone(), self.handlers, &required)?;
        Ok(DefaultController {
            resource_type,
            collector: self.collector,
            computer: self.computer,
            executor,
            modes: self.modes,
        })
    }
}
