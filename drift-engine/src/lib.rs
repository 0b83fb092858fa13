//! drift reconciliation engine.
//!
//! Computes the difference between a declared set of typed resources and the
//! actual state of a remote system, then applies the changes converging them
//! through pluggable controllers and change handlers.

pub mod change;
pub mod collector;
pub mod compare;
pub mod computer;
pub mod config;
pub mod context;
pub mod controller;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handler;
pub mod memory;
pub mod registry;
pub mod remote;
pub mod report;
pub mod resource;
pub mod selector;
pub mod transform;
pub mod validation;

pub use change::{
    ChangeError, ChangeErrorKind, ChangeResult, ChangeStatus, Operation, ResourceChange,
    StateChange,
};
pub use collector::Collector;
pub use compare::{Absence, FieldComparator, FieldSpec};
pub use computer::ChangeComputer;
pub use config::{ConfigError, Configuration};
pub use context::{ChangeFilter, ReconciliationContext, ReconciliationMode};
pub use controller::{Controller, DefaultController};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use executor::ChangeExecutor;
pub use handler::ChangeHandler;
pub use memory::{MemoryBackend, MemoryProvider};
pub use registry::{Provider, ProviderRegistry, Registry, RegistryBuilder};
pub use remote::RemoteError;
pub use report::{
    ChangeList, ChangeReporter, ExcludedResource, ExclusionReason, JsonLinesReporter,
    ReconciliationReport, Summary, TracingReporter,
};
pub use resource::{ObjectMeta, Resource, ResourceType, annotations};
pub use selector::{MatchingStrategy, Selector, Selectors};
pub use transform::{Converter, Transformation};
pub use validation::{Validation, ValidationChain, ValidationError, ValidationResult};
