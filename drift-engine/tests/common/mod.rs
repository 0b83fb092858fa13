//! Shared test utilities for drift-engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use drift_engine::memory::MemoryBackend;
use drift_engine::report::ReportError;
use drift_engine::{
    ChangeReporter, ChangeResult, Engine, MemoryProvider, Provider, ProviderRegistry,
    ReconciliationReport, Resource, ResourceType,
};
use serde_json::json;
use tokio::sync::Mutex;

pub fn topic_type() -> ResourceType {
    ResourceType::new("kafka.drift.io", "v1", "Topic")
}

pub fn acl_type() -> ResourceType {
    ResourceType::new("kafka.drift.io", "v1", "Acl")
}

pub fn topic(name: &str, partitions: u32) -> Resource {
    Resource::new(&topic_type(), name).with_spec(json!({ "partitions": partitions }))
}

/// Reporter that keeps what it was given.
#[derive(Default)]
pub struct RecordingReporter {
    pub reported: Mutex<Vec<String>>,
    pub calls: Mutex<usize>,
}

#[async_trait]
impl ChangeReporter for RecordingReporter {
    async fn report(
        &self,
        _report: &ReconciliationReport,
        results: &[&ChangeResult],
    ) -> Result<(), ReportError> {
        *self.calls.lock().await += 1;
        let mut reported = self.reported.lock().await;
        reported.extend(results.iter().map(|r| r.change.key.clone()));
        Ok(())
    }
}

/// Reporter that always fails.
pub struct FailingReporter;

#[async_trait]
impl ChangeReporter for FailingReporter {
    async fn report(
        &self,
        _report: &ReconciliationReport,
        _results: &[&ChangeResult],
    ) -> Result<(), ReportError> {
        Err(ReportError::Io(std::io::Error::other("disk full")))
    }
}

/// Engine over a memory backend serving topics and ACLs.
pub struct TestEngine {
    pub engine: Engine,
    pub backend: Arc<MemoryBackend>,
    pub reporter: Arc<RecordingReporter>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_providers(vec![])
    }

    /// Extra providers are registered after the memory provider.
    pub fn with_providers(extra: Vec<Arc<dyn Provider>>) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let memory = MemoryProvider::new(Arc::clone(&backend), vec![topic_type(), acl_type()]);
        let mut providers: Vec<Arc<dyn Provider>> = vec![Arc::new(memory)];
        providers.extend(extra);

        let reporter = Arc::new(RecordingReporter::default());
        let engine = Engine::new(ProviderRegistry::new(providers))
            .with_reporter(reporter.clone() as Arc<dyn ChangeReporter>);
        Self {
            engine,
            backend,
            reporter,
        }
    }

    /// Seed the actual state.
    pub async fn seed(&self, resources: &[Resource]) {
        for resource in resources {
            self.backend.insert(resource.name(), resource.clone()).await;
        }
    }

    pub async fn partitions(&self, name: &str) -> Option<u64> {
        self.backend
            .get(&topic_type(), name)
            .await
            .and_then(|t| t.spec()["partitions"].as_u64())
    }
}
