//! Provider registration table.
//!
//! Providers register controllers, converters, transformations and
//! validations into a [`RegistryBuilder`]. The [`ProviderRegistry`] runs the
//! registration once, on first use, and serves lookups from the frozen
//! [`Registry`] afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::controller::Controller;
use crate::error::{EngineError, Result};
use crate::resource::ResourceType;
use crate::transform::{Converter, Transformation};
use crate::validation::{Validation, ValidationChain};

/// A bundle of extensions registered together.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, registry: &mut RegistryBuilder) -> Result<()>;
}

/// Collects registrations before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    controllers: Vec<Arc<dyn Controller>>,
    converters: Vec<Arc<dyn Converter>>,
    transformations: Vec<Arc<dyn Transformation>>,
    validations: ValidationChain,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn controller(&mut self, controller: Arc<dyn Controller>) -> &mut Self {
        self.controllers.push(controller);
        self
    }

    pub fn converter(&mut self, converter: Arc<dyn Converter>) -> &mut Self {
        self.converters.push(converter);
        self
    }

    pub fn transformation(&mut self, transformation: Arc<dyn Transformation>) -> &mut Self {
        self.transformations.push(transformation);
        self
    }

    pub fn validation(&mut self, validation: Arc<dyn Validation>) -> &mut Self {
        self.validations.push(validation);
        self
    }

    /// Register every extension of a provider.
    pub fn provider(&mut self, provider: &dyn Provider) -> Result<&mut Self> {
        provider.register(self)?;
        debug!("Registered provider {}", provider.name());
        Ok(self)
    }

    pub fn build(self) -> Registry {
        let mut controllers: HashMap<ResourceType, Vec<Arc<dyn Controller>>> = HashMap::new();
        for controller in self.controllers {
            controllers
                .entry(controller.resource_type().clone())
                .or_default()
                .push(controller);
        }
        Registry {
            controllers,
            converters: self.converters,
            transformations: self.transformations,
            validations: self.validations,
        }
    }
}

/// Frozen registration table.
pub struct Registry {
    controllers: HashMap<ResourceType, Vec<Arc<dyn Controller>>>,
    converters: Vec<Arc<dyn Converter>>,
    transformations: Vec<Arc<dyn Transformation>>,
    validations: ValidationChain,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The single controller for a type.
    pub fn resolve(&self, resource_type: &ResourceType) -> Result<Arc<dyn Controller>> {
        match self.controllers.get(resource_type).map(Vec::as_slice) {
            Some([controller]) => Ok(Arc::clone(controller)),
            Some(controllers) if controllers.len() > 1 => Err(EngineError::AmbiguousController {
                resource_type: resource_type.clone(),
                count: controllers.len(),
            }),
            _ => Err(EngineError::ControllerNotFound {
                resource_type: resource_type.clone(),
            }),
        }
    }

    /// Registered types, sorted.
    pub fn resource_types(&self) -> Vec<&ResourceType> {
        let mut types: Vec<&ResourceType> = self.controllers.keys().collect();
        types.sort();
        types
    }

    pub fn converters(&self) -> &[Arc<dyn Converter>] {
        &self.converters
    }

    pub fn transformations(&self) -> &[Arc<dyn Transformation>] {
        &self.transformations
    }

    pub fn validations(&self) -> &ValidationChain {
        &self.validations
    }
}

/// Registry built from providers exactly once, on first use.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
    registry: OnceCell<Registry>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            providers,
            registry: OnceCell::new(),
        }
    }

    /// The registry, running provider registration if not done yet.
    ///
    /// Concurrent first callers wait for a single registration. A failed
    /// registration returns its error to the caller that ran it only; the
    /// next caller, waiting or new, runs registration again.
    pub async fn get(&self) -> Result<&Registry> {
        self.registry
            .get_or_try_init(|| async {
                let mut builder = RegistryBuilder::new();
                for provider in &self.providers {
                    builder.provider(provider.as_ref())?;
                }
                let registry = builder.build();
                info!(
                    "Registry initialized: {} providers, {} resource types",
                    self.providers.len(),
                    registry.controllers.len()
                );
                Ok::<_, EngineError>(registry)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeResult, ResourceChange};
    use crate::context::{ReconciliationContext, ReconciliationMode};
    use crate::resource::Resource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeController(ResourceType);

    #[async_trait]
    impl Controller for FakeController {
        fn resource_type(&self) -> &ResourceType {
            &self.0
        }

        fn supported_modes(&self) -> &[ReconciliationMode] {
            &ReconciliationMode::ALL
        }

        async fn plan(
            &self,
            _resources: Vec<Resource>,
            _context: &ReconciliationContext,
        ) -> Result<Vec<ResourceChange>> {
            Ok(vec![])
        }

        async fn execute(
            &self,
            _changes: Vec<ResourceChange>,
            _context: &ReconciliationContext,
        ) -> Result<Vec<ChangeResult>> {
            Ok(vec![])
        }
    }

    struct CountingProvider {
        calls: AtomicUsize,
        types: Vec<ResourceType>,
    }

    impl Provider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn register(&self, registry: &mut RegistryBuilder) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for ty in &self.types {
                registry.controller(Arc::new(FakeController(ty.clone())));
            }
            Ok(())
        }
    }

    /// Fails its first registration.
    struct FlakyProvider {
        calls: AtomicUsize,
    }

    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn register(&self, registry: &mut RegistryBuilder) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(EngineError::ControllerNotFound {
                    resource_type: topic_type(),
                });
            }
            registry.controller(Arc::new(FakeController(topic_type())));
            Ok(())
        }
    }

    fn topic_type() -> ResourceType {
        ResourceType::new("kafka.drift.io", "v1", "Topic")
    }

    #[test]
    fn test_resolve_not_found_and_ambiguous() {
        let acl = ResourceType::new("kafka.drift.io", "v1", "Acl");
        let mut builder = Registry::builder();
        builder
            .controller(Arc::new(FakeController(topic_type())))
            .controller(Arc::new(FakeController(acl.clone())))
            .controller(Arc::new(FakeController(acl.clone())));
        let registry = builder.build();

        assert!(registry.resolve(&topic_type()).is_ok());
        assert!(matches!(
            registry.resolve(&acl),
            Err(EngineError::AmbiguousController { count: 2, .. })
        ));
        let quota = ResourceType::new("kafka.drift.io", "v1", "Quota");
        match registry.resolve(&quota) {
            Err(e) => assert!(e.to_string().contains("kafka.drift.io/v1/Quota")),
            Ok(_) => panic!("expected not found"),
        }
    }

    #[tokio::test]
    async fn test_failed_registration_runs_again() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
        });
        let registry = ProviderRegistry::new(vec![provider.clone() as Arc<dyn Provider>]);

        assert!(registry.get().await.is_err());
        let types = registry.get().await.unwrap().resource_types().len();
        assert_eq!(types, 1);
        assert!(registry.get().await.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_initialized_once_under_concurrency() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            types: vec![topic_type()],
        });
        let registry = Arc::new(ProviderRegistry::new(vec![provider.clone() as Arc<dyn Provider>]));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get().await.map(|r| r.resource_types().len()) })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
