//! Reconciliation context, modes and change filters.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::change::{Operation, ResourceChange};
use crate::config::Configuration;
use crate::selector::Selectors;

/// Restricts which operations a reconciliation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReconciliationMode {
    /// Only create missing resources.
    Create,
    /// Only delete resources.
    Delete,
    /// Only update existing resources.
    Update,
    /// Create, update and delete.
    Full,
}

impl ReconciliationMode {
    pub const ALL: [ReconciliationMode; 4] = [
        ReconciliationMode::Create,
        ReconciliationMode::Delete,
        ReconciliationMode::Update,
        ReconciliationMode::Full,
    ];

    /// Operations the mode allows besides `NONE`.
    pub fn operations(&self) -> &'static [Operation] {
        match self {
            ReconciliationMode::Create => &[Operation::Add],
            ReconciliationMode::Delete => &[Operation::Delete],
            ReconciliationMode::Update => &[Operation::Update],
            ReconciliationMode::Full => &[Operation::Add, Operation::Update, Operation::Delete],
        }
    }

    /// `NONE` is always allowed.
    pub fn allows(&self, operation: Operation) -> bool {
        operation == Operation::None || self.operations().contains(&operation)
    }

    /// Drop changes this mode does not allow.
    pub fn filter(&self, changes: Vec<ResourceChange>) -> Vec<ResourceChange> {
        changes
            .into_iter()
            .filter(|c| self.allows(c.operation))
            .collect()
    }
}

impl fmt::Display for ReconciliationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconciliationMode::Create => "CREATE",
            ReconciliationMode::Delete => "DELETE",
            ReconciliationMode::Update => "UPDATE",
            ReconciliationMode::Full => "FULL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reconciliation mode '{0}', expected one of create, delete, update, full")]
pub struct ParseModeError(pub String);

impl FromStr for ReconciliationMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(ReconciliationMode::Create),
            "DELETE" => Ok(ReconciliationMode::Delete),
            "UPDATE" => Ok(ReconciliationMode::Update),
            "FULL" | "APPLY" => Ok(ReconciliationMode::Full),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// Immutable per-call context threaded through every layer.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationContext {
    dry_run: bool,
    selectors: Selectors,
    configuration: Configuration,
}

impl ReconciliationContext {
    pub fn new(dry_run: bool, selectors: Selectors, configuration: Configuration) -> Self {
        Self {
            dry_run,
            selectors,
            configuration,
        }
    }

    /// A context that mutates nothing.
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Default::default()
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_selectors(mut self, selectors: Selectors) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn selectors(&self) -> &Selectors {
        &self.selectors
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }
}

/// Which changes a diff returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    /// Operations to keep; `None` keeps all.
    operations: Option<BTreeSet<Operation>>,
}

impl ChangeFilter {
    /// Keep every change.
    pub fn all() -> Self {
        Self::default()
    }

    /// Keep changes that require action (drop `NONE`).
    pub fn changed_only() -> Self {
        Self::operations([Operation::Add, Operation::Update, Operation::Delete])
    }

    pub fn operations(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            operations: Some(operations.into_iter().collect()),
        }
    }

    /// Filter matching what a mode would execute.
    pub fn for_mode(mode: ReconciliationMode) -> Self {
        Self::operations(
            mode.operations()
                .iter()
                .copied()
                .chain(std::iter::once(Operation::None)),
        )
    }

    pub fn accepts(&self, change: &ResourceChange) -> bool {
        self.operations
            .as_ref()
            .is_none_or(|ops| ops.contains(&change.operation))
    }

    pub fn apply(&self, changes: Vec<ResourceChange>) -> Vec<ResourceChange> {
        changes.into_iter().filter(|c| self.accepts(c)).collect()
    }
}
