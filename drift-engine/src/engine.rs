//! Top-level reconciliation API.
//!
//! ```text
//! INPUT -> CONVERT -> TRANSFORM -> SELECT -> VALIDATE -> GROUP BY TYPE
//!       -> resolve controllers -> PLAN -> mode filter -> EXECUTE -> REPORT
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::try_join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::change::{ChangeError, ChangeErrorKind, ChangeResult, ResourceChange};
use crate::context::{ChangeFilter, ReconciliationContext, ReconciliationMode};
use crate::controller::Controller;
use crate::error::{EngineError, Result};
use crate::registry::{ProviderRegistry, Registry};
use crate::report::{
    ChangeList, ChangeReporter, ExcludedResource, ExclusionReason, ReconciliationReport,
};
use crate::resource::{Resource, ResourceType, group_by_type};
use crate::validation::ValidationResult;

/// Resources that survived conversion, transformation and selection.
struct Prepared {
    resources: Vec<Resource>,
    excluded: Vec<ExcludedResource>,
}

type Planned = Vec<(Arc<dyn Controller>, Vec<ResourceChange>)>;

/// The reconciliation engine. Holds no state across calls besides the
/// registry and reporters.
pub struct Engine {
    registry: ProviderRegistry,
    reporters: Vec<Arc<dyn ChangeReporter>>,
}

impl Engine {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ChangeReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Plan and apply the changes converging the remote state toward
    /// `resources`, restricted to the operations `mode` allows.
    pub async fn reconcile(
        &self,
        resources: Vec<Resource>,
        mode: ReconciliationMode,
        context: &ReconciliationContext,
    ) -> Result<ReconciliationReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            "Reconciling {} resources (mode={}, dry_run={})",
            resources.len(),
            mode,
            context.is_dry_run()
        );

        let registry = self.registry.get().await?;
        let prepared = self.prepare(registry, resources, context)?;
        self.check_valid(registry, &prepared.resources)?;

        let groups = self.resolve(registry, prepared.resources, Some(mode))?;
        let planned = self.plan(groups, context).await?;

        let mut excluded = prepared.excluded;
        let mut results: Vec<ChangeResult> = Vec::new();
        for (controller, changes) in planned {
            let (changes, dropped): (Vec<_>, Vec<_>) = changes
                .into_iter()
                .partition(|change| mode.allows(change.operation));
            if !dropped.is_empty() {
                debug!(
                    "Mode {} dropped {} of {} changes for {}",
                    mode,
                    dropped.len(),
                    changes.len() + dropped.len(),
                    controller.resource_type()
                );
            }
            excluded.extend(dropped.iter().map(|change| {
                ExcludedResource::from_change(
                    change,
                    ExclusionReason::Mode {
                        operation: change.operation,
                    },
                )
            }));
            results.extend(execute(controller.as_ref(), changes, context).await);
        }

        let report = ReconciliationReport {
            run_id,
            mode,
            dry_run: context.is_dry_run(),
            started_at,
            results,
            excluded,
        };
        info!(run_id = %run_id, "Reconciliation finished: {}", report.summary());

        if !report.dry_run {
            self.publish(&report).await;
        }
        Ok(report)
    }

    /// Plan only: the changes a FULL reconciliation would consider, kept by
    /// `filter`. Never mutates remote state.
    pub async fn get_diff(
        &self,
        resources: Vec<Resource>,
        filter: &ChangeFilter,
        context: &ReconciliationContext,
    ) -> Result<ChangeList> {
        info!("Computing diff for {} resources", resources.len());
        let registry = self.registry.get().await?;
        let prepared = self.prepare(registry, resources, context)?;
        self.check_valid(registry, &prepared.resources)?;

        let groups = self.resolve(registry, prepared.resources, None)?;
        let planned = self.plan(groups, context).await?;
        let changes = planned
            .into_iter()
            .flat_map(|(_, changes)| filter.apply(changes))
            .collect();

        Ok(ChangeList {
            changes,
            excluded: prepared.excluded,
        })
    }

    /// Run conversion, transformation, selection and every validation rule,
    /// returning all violations.
    pub async fn validate(
        &self,
        resources: Vec<Resource>,
        context: &ReconciliationContext,
    ) -> Result<ValidationResult> {
        let registry = self.registry.get().await?;
        let prepared = self.prepare(registry, resources, context)?;
        Ok(registry.validations().validate(&prepared.resources))
    }

    fn prepare(
        &self,
        registry: &Registry,
        resources: Vec<Resource>,
        context: &ReconciliationContext,
    ) -> Result<Prepared> {
        let resources = convert(registry, resources)?;
        let mut excluded = Vec::new();
        let resources = transform(registry, resources, context, &mut excluded)?;

        let mut selected = Vec::with_capacity(resources.len());
        for resource in resources {
            if !context.selectors().matches(&resource) {
                excluded.push(ExcludedResource::new(&resource, ExclusionReason::Selector));
            } else if resource.is_transient() {
                excluded.push(ExcludedResource::new(&resource, ExclusionReason::Transient));
            } else {
                selected.push(resource);
            }
        }

        if !excluded.is_empty() {
            debug!("Excluded {} resources before planning", excluded.len());
        }
        Ok(Prepared {
            resources: selected,
            excluded,
        })
    }

    fn check_valid(&self, registry: &Registry, resources: &[Resource]) -> Result<()> {
        let result = registry.validations().validate(resources);
        if result.is_valid() {
            Ok(())
        } else {
            warn!("Validation failed with {} errors", result.errors.len());
            Err(EngineError::Validation(result))
        }
    }

    /// Resolve one controller per type and check mode support before any
    /// remote call.
    fn resolve(
        &self,
        registry: &Registry,
        resources: Vec<Resource>,
        mode: Option<ReconciliationMode>,
    ) -> Result<Vec<(Arc<dyn Controller>, Vec<Resource>)>> {
        group_by_type(resources)
            .into_iter()
            .map(|(resource_type, resources)| {
                let controller = registry.resolve(&resource_type)?;
                if let Some(mode) = mode {
                    check_mode(controller.as_ref(), &resource_type, mode)?;
                }
                Ok((controller, resources))
            })
            .collect()
    }

    /// Plan all types concurrently; results keep the type order.
    async fn plan(
        &self,
        groups: Vec<(Arc<dyn Controller>, Vec<Resource>)>,
        context: &ReconciliationContext,
    ) -> Result<Planned> {
        try_join_all(groups.into_iter().map(|(controller, resources)| async move {
            let changes = controller.plan(resources, context).await?;
            Ok::<_, EngineError>((controller, changes))
        }))
        .await
    }

    async fn publish(&self, report: &ReconciliationReport) {
        let reportable: Vec<&ChangeResult> = report
            .results
            .iter()
            .filter(|r| !r.change.is_no_report())
            .collect();
        for reporter in &self.reporters {
            if let Err(e) = reporter.report(report, &reportable).await {
                warn!(error = %e, run_id = %report.run_id, "Change reporter failed");
            }
        }
    }
}

/// Execute one type's changes. A controller error fails every change of the
/// batch; it never aborts the run.
async fn execute(
    controller: &dyn Controller,
    changes: Vec<ResourceChange>,
    context: &ReconciliationContext,
) -> Vec<ChangeResult> {
    let started_at = Utc::now();
    let started = Instant::now();
    match controller.execute(changes.clone(), context).await {
        Ok(results) => results,
        Err(e) => {
            error!(
                error = %e,
                "Execution failed for {}, failing {} changes",
                controller.resource_type(),
                changes.len()
            );
            let kind = if e.is_transient() {
                ChangeErrorKind::Transient
            } else {
                ChangeErrorKind::Controller
            };
            let elapsed = started.elapsed();
            changes
                .into_iter()
                .map(|change| {
                    ChangeResult::failed(
                        change,
                        started_at,
                        elapsed,
                        ChangeError::new(kind, e.to_string()),
                    )
                })
                .collect()
        }
    }
}

fn check_mode(
    controller: &dyn Controller,
    resource_type: &ResourceType,
    mode: ReconciliationMode,
) -> Result<()> {
    if controller.supports(mode) {
        Ok(())
    } else {
        Err(EngineError::UnsupportedMode {
            resource_type: resource_type.clone(),
            mode,
        })
    }
}

/// Pass every resource through the converters in registration order.
fn convert(registry: &Registry, resources: Vec<Resource>) -> Result<Vec<Resource>> {
    let mut current = resources;
    for converter in registry.converters() {
        let mut next = Vec::with_capacity(current.len());
        for resource in current {
            if !converter.accepts(&resource) {
                next.push(resource);
                continue;
            }
            let resource_type = resource.resource_type();
            let name = resource.name().to_string();
            let converted = converter
                .convert(resource)
                .map_err(|reason| EngineError::Conversion {
                    resource_type,
                    name,
                    reason,
                })?;
            next.extend(converted);
        }
        current = next;
    }
    Ok(current)
}

fn transform(
    registry: &Registry,
    resources: Vec<Resource>,
    context: &ReconciliationContext,
    excluded: &mut Vec<ExcludedResource>,
) -> Result<Vec<Resource>> {
    let mut out = Vec::with_capacity(resources.len());
    'resources: for resource in resources {
        let mut resource = resource;
        for transformation in registry.transformations() {
            if !transformation.accepts(&resource.resource_type()) {
                continue;
            }
            let name = resource.name().to_string();
            let original = ExcludedResource::new(
                &resource,
                ExclusionReason::Transformation {
                    name: transformation.name().to_string(),
                },
            );
            match transformation.transform(resource, context) {
                Ok(Some(transformed)) => resource = transformed,
                Ok(None) => {
                    excluded.push(original);
                    continue 'resources;
                }
                Err(reason) => {
                    return Err(EngineError::Transformation {
                        transformation: transformation.name().to_string(),
                        name,
                        reason,
                    });
                }
            }
        }
        out.push(resource);
    }
    Ok(out)
}
