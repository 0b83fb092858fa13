//! drift: validate, diff and apply resource documents against a file-backed
//! memory provider.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use drift_cli::{
    Workspace, format_changes, format_report, format_validation, load_configuration,
    load_documents,
};
use drift_engine::{
    ChangeFilter, MatchingStrategy, ReconciliationContext, ReconciliationMode, Selectors,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// drift reconciliation engine
#[derive(Parser, Debug)]
#[command(name = "drift", version, about)]
struct Cli {
    /// State file of the memory provider
    #[arg(long, default_value = "drift-state.json")]
    state: PathBuf,

    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration override, key=value (repeatable)
    #[arg(short = 'o', long = "option")]
    options: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    output: Output,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate resource documents
    Validate {
        /// Resource files (YAML or JSON)
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,
    },

    /// Show the changes applying the documents would make
    Diff {
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,

        /// Selector expression (repeatable)
        #[arg(short = 'l', long = "selector")]
        selectors: Vec<String>,

        /// How selectors combine: all, any, none
        #[arg(long, default_value = "all")]
        strategy: String,

        /// Hide resources without changes
        #[arg(long)]
        changed_only: bool,
    },

    /// Reconcile the memory state toward the documents
    Apply {
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,

        /// Reconciliation mode: full, create, update or delete
        #[arg(short, long, default_value = "full")]
        mode: ReconciliationMode,

        /// Plan and report without changing state
        #[arg(long)]
        dry_run: bool,

        #[arg(short = 'l', long = "selector")]
        selectors: Vec<String>,

        #[arg(long, default_value = "all")]
        strategy: String,

        /// Append results as JSON lines to this file
        #[arg(long)]
        report_file: Option<PathBuf>,
    },
}

fn selectors(expressions: &[String], strategy: &str) -> Result<Selectors> {
    let strategy: MatchingStrategy = strategy.parse()?;
    Ok(Selectors::parse(expressions)?.with_strategy(strategy))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "drift=debug,drift_cli=debug,drift_engine=debug,audit=info"
    } else {
        "drift=info,drift_cli=info,drift_engine=info,audit=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let configuration = load_configuration(cli.config.as_deref(), &cli.options).await?;

    match cli.command {
        Commands::Validate { files } => {
            let resources = load_documents(&files).await?;
            let workspace = Workspace::open(&cli.state, &configuration, None).await?;
            let context = ReconciliationContext::default().with_configuration(configuration);
            let result = workspace.engine.validate(resources, &context).await?;
            match cli.output {
                Output::Table => print!("{}", format_validation(&result)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&result)?),
            }
            if !result.is_valid() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Diff {
            files,
            selectors: expressions,
            strategy,
            changed_only,
        } => {
            let resources = load_documents(&files).await?;
            let workspace = Workspace::open(&cli.state, &configuration, None).await?;
            let context = ReconciliationContext::dry_run()
                .with_selectors(selectors(&expressions, &strategy)?)
                .with_configuration(configuration);
            let filter = if changed_only {
                ChangeFilter::changed_only()
            } else {
                ChangeFilter::all()
            };
            let list = workspace.engine.get_diff(resources, &filter, &context).await?;
            match cli.output {
                Output::Table => print!("{}", format_changes(&list)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&list)?),
            }
        }

        Commands::Apply {
            files,
            mode,
            dry_run,
            selectors: expressions,
            strategy,
            report_file,
        } => {
            let resources = load_documents(&files).await?;
            let workspace =
                Workspace::open(&cli.state, &configuration, report_file.as_deref()).await?;
            let context = ReconciliationContext::new(
                dry_run,
                selectors(&expressions, &strategy)?,
                configuration,
            );
            let report = workspace.engine.reconcile(resources, mode, &context).await?;
            if !dry_run {
                workspace.save().await?;
            }
            match cli.output {
                Output::Table => print!("{}", format_report(&report)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            if !report.is_success() {
                let failed = report.failed().count();
                error!("{} changes failed", failed);
                return Ok(ExitCode::from(2));
            }
            info!("Run {} complete", report.run_id);
        }
    }

    Ok(ExitCode::SUCCESS)
}
