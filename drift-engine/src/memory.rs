//! In-memory provider.
//!
//! Serves any number of resource types from a [`MemoryBackend`], optionally
//! persisted as a JSON snapshot. Used by the `drift` CLI and by tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::change::{Operation, ResourceChange};
use crate::collector::Collector;
use crate::computer::ChangeComputer;
use crate::compare::FieldSpec;
use crate::config::{ConfigError, Configuration};
use crate::controller::DefaultController;
use crate::error::Result;
use crate::handler::ChangeHandler;
use crate::registry::{Provider, RegistryBuilder};
use crate::remote::{RemoteError, fan_out};
use crate::resource::{Resource, ResourceType};
use crate::selector::Selectors;

/// List of `apiVersion/Kind` types served by the memory provider.
pub const TYPES: &str = "memory.types";
/// Spec fields compared entry by entry (config maps).
pub const MAP_FIELDS: &str = "memory.map-fields";
/// Spec fields that, with the name, form the identity key.
pub const KEY_FIELDS: &str = "memory.key-fields";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredResource {
    key: String,
    resource: Resource,
}

/// Resource store keyed by type and identity key.
#[derive(Default)]
pub struct MemoryBackend {
    resources: RwLock<HashMap<ResourceType, BTreeMap<String, Resource>>>,
    poisoned: RwLock<HashSet<String>>,
    mutations: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`save`](Self::save). A missing file is an
    /// empty store.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let backend = Self::new();
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(backend),
            Err(e) => return Err(e.into()),
        };
        let stored: Vec<StoredResource> = serde_json::from_slice(&data)?;
        {
            let mut resources = backend.resources.write().await;
            for entry in stored {
                resources
                    .entry(entry.resource.resource_type())
                    .or_default()
                    .insert(entry.key, entry.resource);
            }
        }
        info!("Loaded {} resources from {}", backend.len().await, path.display());
        Ok(backend)
    }

    /// Write a snapshot, sorted by type and key.
    pub async fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let stored: Vec<StoredResource> = {
            let resources = self.resources.read().await;
            let mut types: Vec<&ResourceType> = resources.keys().collect();
            types.sort();
            types
                .into_iter()
                .flat_map(|ty| resources[ty].iter())
                .map(|(key, resource)| StoredResource {
                    key: key.clone(),
                    resource: resource.clone(),
                })
                .collect()
        };
        let data = serde_json::to_vec_pretty(&stored)?;
        tokio::fs::write(path, data).await?;
        debug!("Saved {} resources to {}", stored.len(), path.display());
        Ok(())
    }

    /// Stored keys of one type, sorted.
    pub async fn keys(&self, resource_type: &ResourceType) -> Vec<String> {
        self.resources
            .read()
            .await
            .get(resource_type)
            .map(|by_key| by_key.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn get(&self, resource_type: &ResourceType, key: &str) -> Option<Resource> {
        self.resources
            .read()
            .await
            .get(resource_type)
            .and_then(|by_key| by_key.get(key).cloned())
    }

    pub async fn len(&self) -> usize {
        self.resources.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert without going through a handler, e.g. to seed actual state.
    pub async fn insert(&self, key: impl Into<String>, resource: Resource) {
        self.resources
            .write()
            .await
            .entry(resource.resource_type())
            .or_default()
            .insert(key.into(), resource);
    }

    /// Reject every write to `key`, for exercising failure handling.
    pub async fn poison(&self, key: impl Into<String>) {
        self.poisoned.write().await.insert(key.into());
    }

    /// Number of writes applied through handlers.
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    async fn check_poisoned(&self, key: &str) -> std::result::Result<(), RemoteError> {
        if self.poisoned.read().await.contains(key) {
            return Err(RemoteError::Rejected(format!("writes to '{}' are rejected", key)));
        }
        Ok(())
    }

    async fn create(
        &self,
        ty: &ResourceType,
        key: &str,
        resource: Resource,
    ) -> std::result::Result<(), RemoteError> {
        self.check_poisoned(key).await?;
        let mut resources = self.resources.write().await;
        let by_key = resources.entry(ty.clone()).or_default();
        if by_key.contains_key(key) {
            return Err(RemoteError::Conflict(format!("{} '{}' already exists", ty, key)));
        }
        by_key.insert(key.to_string(), resource);
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace(
        &self,
        ty: &ResourceType,
        key: &str,
        resource: Resource,
    ) -> std::result::Result<(), RemoteError> {
        self.check_poisoned(key).await?;
        let mut resources = self.resources.write().await;
        let slot = resources
            .get_mut(ty)
            .and_then(|by_key| by_key.get_mut(key))
            .ok_or_else(|| RemoteError::NotFound(format!("{} '{}'", ty, key)))?;
        *slot = resource;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Returns whether anything was removed.
    async fn remove(&self, ty: &ResourceType, key: &str) -> std::result::Result<bool, RemoteError> {
        self.check_poisoned(key).await?;
        let removed = self
            .resources
            .write()
            .await
            .get_mut(ty)
            .and_then(|by_key| by_key.remove(key))
            .is_some();
        if removed {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}

/// Lists one type from the backend.
pub struct MemoryCollector {
    resource_type: ResourceType,
    backend: Arc<MemoryBackend>,
}

impl MemoryCollector {
    pub fn new(resource_type: ResourceType, backend: Arc<MemoryBackend>) -> Self {
        Self {
            resource_type,
            backend,
        }
    }
}

#[async_trait]
impl Collector for MemoryCollector {
    fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    async fn list(
        &self,
        _configuration: &Configuration,
        _selectors: &Selectors,
    ) -> std::result::Result<Vec<Resource>, RemoteError> {
        // Keys first, then one read per key, the way a remote API is listed.
        let keys = self.backend.keys(&self.resource_type).await;
        let backend = &self.backend;
        let resource_type = &self.resource_type;
        let found = fan_out(keys, |key| async move {
            Ok::<_, RemoteError>(backend.get(resource_type, &key).await)
        })
        .await?;
        // Keys removed between the two reads are gone.
        Ok(found.into_iter().flatten().collect())
    }
}

fn target(change: &ResourceChange) -> std::result::Result<Resource, RemoteError> {
    change
        .after
        .clone()
        .ok_or_else(|| RemoteError::Rejected(format!("{} has no expected resource", change)))
}

pub struct AddHandler {
    backend: Arc<MemoryBackend>,
}

#[async_trait]
impl ChangeHandler for AddHandler {
    fn operations(&self) -> &[Operation] {
        &[Operation::Add]
    }

    async fn apply(&self, change: &ResourceChange) -> std::result::Result<(), RemoteError> {
        self.backend
            .create(&change.resource_type, &change.key, target(change)?)
            .await
    }
}

pub struct UpdateHandler {
    backend: Arc<MemoryBackend>,
}

#[async_trait]
impl ChangeHandler for UpdateHandler {
    fn operations(&self) -> &[Operation] {
        &[Operation::Update]
    }

    async fn apply(&self, change: &ResourceChange) -> std::result::Result<(), RemoteError> {
        self.backend
            .replace(&change.resource_type, &change.key, target(change)?)
            .await
    }
}

pub struct DeleteHandler {
    backend: Arc<MemoryBackend>,
}

#[async_trait]
impl ChangeHandler for DeleteHandler {
    fn operations(&self) -> &[Operation] {
        &[Operation::Delete]
    }

    async fn apply(&self, change: &ResourceChange) -> std::result::Result<(), RemoteError> {
        if !self.backend.remove(&change.resource_type, &change.key).await? {
            debug!("{} '{}' already absent", change.resource_type, change.key);
        }
        Ok(())
    }
}

/// Registers a controller per configured type.
pub struct MemoryProvider {
    backend: Arc<MemoryBackend>,
    types: Vec<ResourceType>,
    map_fields: Vec<String>,
    key_fields: Vec<String>,
}

impl MemoryProvider {
    pub fn new(backend: Arc<MemoryBackend>, types: Vec<ResourceType>) -> Self {
        Self {
            backend,
            types,
            map_fields: Vec::new(),
            key_fields: Vec::new(),
        }
    }

    /// Read [`TYPES`], [`MAP_FIELDS`] and [`KEY_FIELDS`].
    pub fn from_configuration(
        backend: Arc<MemoryBackend>,
        configuration: &Configuration,
    ) -> std::result::Result<Self, ConfigError> {
        let types = configuration
            .try_get_string_list(TYPES)?
            .unwrap_or_default()
            .iter()
            .map(|s| ResourceType::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::new(backend, types)
            .with_map_fields(configuration.try_get_string_list(MAP_FIELDS)?.unwrap_or_default())
            .with_key_fields(configuration.try_get_string_list(KEY_FIELDS)?.unwrap_or_default()))
    }

    pub fn with_map_fields(mut self, fields: Vec<String>) -> Self {
        self.map_fields = fields;
        self
    }

    pub fn with_key_fields(mut self, fields: Vec<String>) -> Self {
        self.key_fields = fields;
        self
    }

    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    fn computer(&self) -> ChangeComputer {
        let mut computer = ChangeComputer::new();
        if !self.key_fields.is_empty() {
            let fields: Vec<&str> = self.key_fields.iter().map(String::as_str).collect();
            computer = computer.with_composite_key(&fields);
        }
        for field in &self.map_fields {
            computer = computer.with_field(FieldSpec::entries(field.clone()));
        }
        computer
    }
}

impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn register(&self, registry: &mut RegistryBuilder) -> Result<()> {
        for ty in &self.types {
            let controller = DefaultController::builder(Arc::new(MemoryCollector::new(
                ty.clone(),
                Arc::clone(&self.backend),
            )))
            .computer(self.computer())
            .handler(Arc::new(AddHandler {
                backend: Arc::clone(&self.backend),
            }))
            .handler(Arc::new(UpdateHandler {
                backend: Arc::clone(&self.backend),
            }))
            .handler(Arc::new(DeleteHandler {
                backend: Arc::clone(&self.backend),
            }))
            .build()?;
            registry.controller(Arc::new(controller));
        }
        Ok(())
    }
}
