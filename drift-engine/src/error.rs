//! Engine error types.

use thiserror::Error;

use crate::change::Operation;
use crate::config::ConfigError;
use crate::context::ReconciliationMode;
use crate::remote::RemoteError;
use crate::resource::ResourceType;
use crate::selector::SelectorError;
use crate::validation::ValidationResult;

/// Errors that abort a reconciliation call.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No controller registered for a type present in the input.
    #[error("no controller registered for {resource_type}")]
    ControllerNotFound { resource_type: ResourceType },

    /// More than one controller registered for a type.
    #[error("{count} controllers registered for {resource_type}, expected exactly one")]
    AmbiguousController {
        resource_type: ResourceType,
        count: usize,
    },

    /// The controller does not support the requested mode.
    #[error("controller for {resource_type} does not support reconciliation mode {mode}")]
    UnsupportedMode {
        resource_type: ResourceType,
        mode: ReconciliationMode,
    },

    /// Zero or several change handlers accept an operation.
    #[error("{count} change handlers for {operation} on {resource_type}, expected exactly one")]
    HandlerConfig {
        resource_type: ResourceType,
        operation: Operation,
        count: usize,
    },

    /// One or more resources failed validation.
    #[error("validation failed: {0}")]
    Validation(ValidationResult),

    /// Two expected resources share the same identity key.
    #[error("duplicate {resource_type} resource '{key}'")]
    DuplicateResource {
        resource_type: ResourceType,
        key: String,
    },

    /// A converter rejected a resource.
    #[error("conversion of {resource_type} '{name}' failed: {reason}")]
    Conversion {
        resource_type: ResourceType,
        name: String,
        reason: String,
    },

    /// A transformation rejected a resource.
    #[error("transformation '{transformation}' failed on '{name}': {reason}")]
    Transformation {
        transformation: String,
        name: String,
        reason: String,
    },

    /// Listing the actual state failed.
    #[error("collecting {resource_type} failed: {source}")]
    Collector {
        resource_type: ResourceType,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Selector(#[from] SelectorError),
}

impl EngineError {
    /// Whether retrying the whole reconciliation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Collector { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
