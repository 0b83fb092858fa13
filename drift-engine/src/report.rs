//! Reconciliation reports and the reporters that publish them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::change::{ChangeResult, ChangeStatus, Operation, ResourceChange};
use crate::context::ReconciliationMode;
use crate::resource::{Resource, ResourceType};

/// Why an input resource never reached execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Did not match the context selectors.
    Selector,
    /// Annotated as transient.
    Transient,
    /// Dropped by a transformation.
    Transformation { name: String },
    /// Planned, but the operation is outside the reconciliation mode.
    Mode { operation: Operation },
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::Selector => f.write_str("not selected"),
            ExclusionReason::Transient => f.write_str("transient"),
            ExclusionReason::Transformation { name } => write!(f, "dropped by {}", name),
            ExclusionReason::Mode { operation } => {
                write!(f, "{} not allowed by mode", operation)
            }
        }
    }
}

/// An input resource excluded before planning, or a planned change
/// filtered out by the mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedResource {
    pub resource_type: ResourceType,
    pub name: String,
    pub reason: ExclusionReason,
}

impl ExcludedResource {
    pub fn new(resource: &Resource, reason: ExclusionReason) -> Self {
        Self {
            resource_type: resource.resource_type(),
            name: resource.name().to_string(),
            reason,
        }
    }

    pub fn from_change(change: &ResourceChange, reason: ExclusionReason) -> Self {
        Self {
            resource_type: change.resource_type.clone(),
            name: change.key.clone(),
            reason,
        }
    }
}

/// Counts per operation and status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub operations: BTreeMap<Operation, usize>,
    pub ok: usize,
    pub failed: usize,
    pub excluded: usize,
}

impl Summary {
    pub fn count(&self, operation: Operation) -> usize {
        self.operations.get(&operation).copied().unwrap_or(0)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to update, {} to delete, {} unchanged",
            self.count(Operation::Add),
            self.count(Operation::Update),
            self.count(Operation::Delete),
            self.count(Operation::None)
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.excluded > 0 {
            write!(f, ", {} excluded", self.excluded)?;
        }
        Ok(())
    }
}

/// Outcome of a `reconcile` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub mode: ReconciliationMode,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub results: Vec<ChangeResult>,
    pub excluded: Vec<ExcludedResource>,
}

impl ReconciliationReport {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            excluded: self.excluded.len(),
            ..Default::default()
        };
        for result in &self.results {
            *summary.operations.entry(result.change.operation).or_default() += 1;
            match result.status {
                ChangeStatus::Ok => summary.ok += 1,
                ChangeStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn failed(&self) -> impl Iterator<Item = &ChangeResult> {
        self.results.iter().filter(|r| r.is_failed())
    }

    /// Whether every change succeeded.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(ChangeResult::is_ok)
    }
}

/// Outcome of a `get_diff` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeList {
    pub changes: Vec<ResourceChange>,
    pub excluded: Vec<ExcludedResource>,
}

impl ChangeList {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            excluded: self.excluded.len(),
            ..Default::default()
        };
        for change in &self.changes {
            *summary.operations.entry(change.operation).or_default() += 1;
        }
        summary
    }

    /// Whether any change requires action.
    pub fn has_drift(&self) -> bool {
        self.changes.iter().any(|c| c.operation != Operation::None)
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Trait for publishing the results of a non dry-run reconciliation.
#[async_trait]
pub trait ChangeReporter: Send + Sync {
    async fn report(
        &self,
        report: &ReconciliationReport,
        results: &[&ChangeResult],
    ) -> Result<(), ReportError>;
}

/// Emits every result as an audit event through `tracing`.
pub struct TracingReporter {
    component: String,
}

impl TracingReporter {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
        }
    }
}

impl Default for TracingReporter {
    fn default() -> Self {
        Self::new("drift")
    }
}

#[async_trait]
impl ChangeReporter for TracingReporter {
    async fn report(
        &self,
        report: &ReconciliationReport,
        results: &[&ChangeResult],
    ) -> Result<(), ReportError> {
        for result in results {
            let change = &result.change;
            let message = result
                .description
                .clone()
                .unwrap_or_else(|| change.to_string());
            match result.status {
                ChangeStatus::Ok => tracing::info!(
                    target: "audit",
                    component = %self.component,
                    run_id = %report.run_id,
                    operation = %change.operation,
                    object = %change.key,
                    "{}", message
                ),
                ChangeStatus::Failed => {
                    let errors: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
                    tracing::error!(
                        target: "audit",
                        component = %self.component,
                        run_id = %report.run_id,
                        operation = %change.operation,
                        object = %change.key,
                        errors = ?errors,
                        "{}", message
                    )
                }
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonLine<'a> {
    run_id: Uuid,
    mode: ReconciliationMode,
    #[serde(flatten)]
    result: &'a ChangeResult,
}

/// Appends one JSON object per result to a file.
pub struct JsonLinesReporter {
    path: PathBuf,
}

impl JsonLinesReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ChangeReporter for JsonLinesReporter {
    async fn report(
        &self,
        report: &ReconciliationReport,
        results: &[&ChangeResult],
    ) -> Result<(), ReportError> {
        let mut buf = Vec::new();
        for result in results {
            serde_json::to_writer(
                &mut buf,
                &JsonLine {
                    run_id: report.run_id,
                    mode: report.mode,
                    result,
                },
            )?;
            buf.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}
