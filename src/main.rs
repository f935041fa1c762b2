use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;

use opsflow::api::{build_router, AppState};
use opsflow::config::Config;
use opsflow::engine::{Resumer, Runner, Services};
use opsflow::error::{Error, Result};
use opsflow::nodes::{DomainClient, ExecutorRegistry, HttpDomainClient};
use opsflow::shutdown::ShutdownCoordinator;
use opsflow::status::StatusHub;
use opsflow::storage::{SqliteStorage, StoredWorkflow};
use opsflow::telemetry::init_telemetry;
use opsflow::triggers::Scheduler;
use opsflow::workflow::{parse_workflow_file, validate_workflow};

#[derive(Parser)]
#[command(name = "opsflow")]
#[command(about = "Workflow execution engine for business-operations automation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (API + webhook ingress + scheduler + resumer)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Manage workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowActions,
    },
    /// Inspect and control runs
    Run {
        #[command(subcommand)]
        action: RunActions,
    },
    /// List available node kinds
    Nodes,
}

#[derive(Subcommand)]
enum WorkflowActions {
    /// Create or update a workflow from a YAML file
    Create {
        /// Path to workflow YAML file
        file: String,
        /// Owning tenant user
        #[arg(long, default_value = "default")]
        user: String,
    },
    /// List all workflows
    List,
    /// Trigger a workflow manually
    Trigger {
        /// Workflow name
        name: String,
        /// JSON trigger data
        #[arg(short, long)]
        input: Option<String>,
    },
}

#[derive(Subcommand)]
enum RunActions {
    /// Show a run
    Show { id: String },
    /// List recent runs
    List {
        #[arg(long)]
        workflow: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Resume a suspended run
    Resume { id: String },
}

fn build_services(config: &Config, storage: SqliteStorage) -> Services {
    let domain: Arc<dyn DomainClient> = Arc::new(HttpDomainClient::new(
        config.domain.endpoint.clone(),
        config.domain.secret.clone(),
    ));
    Services::new(storage, ExecutorRegistry::new(), StatusHub::new(), domain)
}

fn open_storage(config: &Config) -> Result<SqliteStorage> {
    let path = config.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    SqliteStorage::open(&path)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry();

    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Workflow { action } => workflow_command(config, action).await,
        Commands::Run { action } => run_command(config, action).await,
        Commands::Nodes => {
            let registry = ExecutorRegistry::new();
            let mut entries = registry.descriptions();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (kind, description) in entries {
                println!("{:<22} {}", kind, description);
            }
            Ok(())
        }
    }
}

async fn serve(mut config: Config, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }

    let storage = open_storage(&config)?;
    let shutdown = Arc::new(ShutdownCoordinator::new());
    shutdown.start_signal_listener();

    let services = Arc::new(build_services(&config, storage).with_shutdown(shutdown.clone()));

    let mut resumer =
        Resumer::new(services.clone()).with_poll_interval(config.engine.resumer_poll_ms);
    resumer.start();

    let scheduler = Scheduler::new(services.clone()).await?;
    scheduler.start().await?;

    let state = AppState {
        services: services.clone(),
        webhook_secret: config.ingress.webhook_secret.clone(),
    };
    let router = build_router(state).await;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("opsflow listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let shutdown_signal = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown_signal.wait_for_shutdown().await })
        .await?;

    scheduler.stop().await?;
    resumer.stop().await;
    tracing::info!("opsflow stopped");
    Ok(())
}

async fn workflow_command(config: Config, action: WorkflowActions) -> Result<()> {
    let storage = open_storage(&config)?;
    let services = Arc::new(build_services(&config, storage.clone()));

    match action {
        WorkflowActions::Create { file, user } => {
            let path = std::path::Path::new(&file);
            let workflow = parse_workflow_file(path)?;
            validate_workflow(&workflow, &services.registry)?;

            let now = Utc::now();
            let stored = StoredWorkflow {
                id: uuid::Uuid::new_v4().to_string(),
                name: workflow.name.clone(),
                user_id: user,
                definition: std::fs::read_to_string(path)?,
                enabled: true,
                created_at: now,
                updated_at: now,
            };
            storage.save_workflow(&stored).await?;
            println!("Saved workflow '{}'", stored.name);
        }
        WorkflowActions::List => {
            for workflow in storage.list_workflows().await? {
                let state = if workflow.enabled { "enabled" } else { "disabled" };
                println!("{}  [{}]", workflow.name, state);
            }
        }
        WorkflowActions::Trigger { name, input } => {
            let stored = storage
                .get_workflow(&name)
                .await?
                .ok_or_else(|| Error::Workflow(format!("Workflow not found: {}", name)))?;

            let trigger_data: Value = match input {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Value::Null,
            };

            let run = Runner::new(services).start(&stored, "manual", trigger_data).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
    }
    Ok(())
}

async fn run_command(config: Config, action: RunActions) -> Result<()> {
    let storage = open_storage(&config)?;
    let services = Arc::new(build_services(&config, storage.clone()));

    match action {
        RunActions::Show { id } => {
            let run = storage
                .get_run(&id)
                .await?
                .ok_or_else(|| Error::Workflow(format!("Run not found: {}", id)))?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        RunActions::List { workflow, limit } => {
            for run in storage.list_runs(workflow.as_deref(), limit).await? {
                println!(
                    "{}  {}  {}  [{}]",
                    run.id, run.workflow_name, run.trigger_kind, run.status
                );
            }
        }
        RunActions::Resume { id } => {
            let run = Runner::new(services).resume(&id).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
    }
    Ok(())
}
