//! drift command line support: document loading, workspace setup and output
//! formatting.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use drift_engine::memory::MemoryBackend;
use drift_engine::{
    ChangeList, Configuration, Engine, JsonLinesReporter, MemoryProvider, Operation,
    ProviderRegistry, ReconciliationReport, Resource, TracingReporter, ValidationResult,
};
use serde::Deserialize;
use tabled::{Table, Tabled};
use tracing::{debug, info};

/// Parse a YAML stream of one or more documents. JSON parses as YAML.
/// Empty documents are skipped.
pub fn parse_documents(content: &str) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("document {} is not valid YAML", index + 1))?;
        if value.is_null() {
            continue;
        }
        let resource: Resource = serde_yaml::from_value(value)
            .with_context(|| format!("document {} is not a resource", index + 1))?;
        if resource.api_version().is_empty() || resource.kind().is_empty() {
            bail!("document {} is missing apiVersion or kind", index + 1);
        }
        resources.push(resource);
    }
    Ok(resources)
}

/// Read and parse every file, keeping file order.
pub async fn load_documents(paths: &[PathBuf]) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for path in paths {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed = parse_documents(&content).with_context(|| format!("in {}", path.display()))?;
        debug!("Loaded {} resources from {}", parsed.len(), path.display());
        resources.extend(parsed);
    }
    Ok(resources)
}

/// Configuration file (YAML) overlaid with `key=value` options.
pub async fn load_configuration(path: Option<&Path>, options: &[String]) -> Result<Configuration> {
    let mut configuration = match path {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            Configuration::from_yaml_str(&content)
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => Configuration::new(),
    };
    for option in options {
        configuration = configuration.with_option(option)?;
    }
    Ok(configuration)
}

/// Engine over a file-backed memory provider.
pub struct Workspace {
    pub engine: Engine,
    pub backend: Arc<MemoryBackend>,
    state: PathBuf,
}

impl Workspace {
    pub async fn open(
        state: &Path,
        configuration: &Configuration,
        report_file: Option<&Path>,
    ) -> Result<Self> {
        let backend = Arc::new(
            MemoryBackend::load(state)
                .await
                .with_context(|| format!("failed to load state from {}", state.display()))?,
        );
        let provider = MemoryProvider::from_configuration(Arc::clone(&backend), configuration)?;

        let mut engine = Engine::new(ProviderRegistry::new(vec![Arc::new(provider)]))
            .with_reporter(Arc::new(TracingReporter::default()));
        if let Some(path) = report_file {
            engine = engine.with_reporter(Arc::new(JsonLinesReporter::new(path)));
        }

        Ok(Self {
            engine,
            backend,
            state: state.to_path_buf(),
        })
    }

    /// Persist the memory state.
    pub async fn save(&self) -> Result<()> {
        self.backend
            .save(&self.state)
            .await
            .with_context(|| format!("failed to save state to {}", self.state.display()))?;
        info!("State saved to {}", self.state.display());
        Ok(())
    }
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "OPERATION")]
    operation: String,
    #[tabled(rename = "TYPE")]
    resource_type: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "CHANGES")]
    changes: String,
}

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "OPERATION")]
    operation: String,
    #[tabled(rename = "TYPE")]
    resource_type: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "DURATION")]
    duration: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

#[derive(Tabled)]
struct ErrorRow {
    #[tabled(rename = "TYPE")]
    resource_type: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "RULE")]
    rule: String,
    #[tabled(rename = "MESSAGE")]
    message: String,
}

pub fn format_changes(list: &ChangeList) -> String {
    let mut out = String::new();
    if list.changes.is_empty() {
        out.push_str("No changes\n");
    } else {
        let rows: Vec<ChangeRow> = list
            .changes
            .iter()
            .map(|c| ChangeRow {
                operation: c.operation.to_string(),
                resource_type: c.resource_type.to_string(),
                name: c.key.clone(),
                changes: if c.operation == Operation::None {
                    "-".to_string()
                } else {
                    c.drifted_fields()
                        .map(|s| s.to_string())
                        .collect::<Vec<_>>()
                        .join("\n")
                },
            })
            .collect();
        out.push_str(&Table::new(rows).to_string());
        out.push('\n');
    }
    for excluded in &list.excluded {
        out.push_str(&format!(
            "excluded {} '{}': {}\n",
            excluded.resource_type, excluded.name, excluded.reason
        ));
    }
    out.push_str(&list.summary().to_string());
    out.push('\n');
    out
}

pub fn format_report(report: &ReconciliationReport) -> String {
    let mut out = String::new();
    if !report.results.is_empty() {
        let rows: Vec<ResultRow> = report
            .results
            .iter()
            .map(|r| ResultRow {
                status: format!("{:?}", r.status).to_uppercase(),
                operation: r.change.operation.to_string(),
                resource_type: r.change.resource_type.to_string(),
                name: r.change.key.clone(),
                duration: format!("{}ms", r.duration.as_millis()),
                detail: if r.errors.is_empty() {
                    r.description.clone().unwrap_or_default()
                } else {
                    r.errors
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; ")
                },
            })
            .collect();
        out.push_str(&Table::new(rows).to_string());
        out.push('\n');
    }
    for excluded in &report.excluded {
        out.push_str(&format!(
            "excluded {} '{}': {}\n",
            excluded.resource_type, excluded.name, excluded.reason
        ));
    }
    out.push_str(&format!(
        "{}{}\n",
        if report.dry_run { "(dry run) " } else { "" },
        report.summary()
    ));
    out
}

pub fn format_validation(result: &ValidationResult) -> String {
    if result.is_valid() {
        return format!("{} resources valid\n", result.resources);
    }
    let rows: Vec<ErrorRow> = result
        .errors
        .iter()
        .map(|e| ErrorRow {
            resource_type: e.resource_type.to_string(),
            name: e.name.clone(),
            rule: e.rule.clone(),
            message: e.message.clone(),
        })
        .collect();
    format!(
        "{}\n{} errors in {} resources\n",
        Table::new(rows),
        result.errors.len(),
        result.resources
    )
}
