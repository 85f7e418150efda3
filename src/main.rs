use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use conductor_core::config::AppConfig;
use conductor_core::execution::ExecutionStatus;
use conductor_core::types::DataMap;
use conductor_engine::AuditLogger;
use conductor_gateway::{GatewayServer, Services};

#[derive(Parser)]
#[command(name = "conductor", version, about = "Multi-agent workflow orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml", env = "CONDUCTOR_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the config and validate every workflow
    Validate,
    /// Execute a workflow once and print the final execution as JSON
    Run {
        /// Workflow id
        #[arg(short, long)]
        workflow: String,
        /// Execution input as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,
    },
    /// Start the REST gateway
    Serve,
    /// List configured agents and their worker bindings
    Agents,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `run` output stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("conductor=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "conductor", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load(&cli.config)?;
    info!(path = %cli.config.display(), "Config loaded");

    match cli.command {
        Commands::Validate => validate(&config),
        Commands::Run { workflow, input } => run_once(&config, &workflow, &input).await,
        Commands::Serve => serve(&config).await,
        Commands::Agents => {
            list_agents(&config);
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn validate(config: &AppConfig) -> anyhow::Result<()> {
    let services = Services::new(config);
    let orders = services.register_workflows(&config.workflows)?;
    for (id, order) in &orders {
        println!("{}: {}", id, order.join(" -> "));
    }
    println!(
        "{} agent(s), {} workflow(s) OK",
        services.registry.len(),
        orders.len()
    );
    Ok(())
}

fn parse_input(input: &str) -> anyhow::Result<DataMap> {
    match serde_json::from_str::<serde_json::Value>(input)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("--input must be a JSON object"),
    }
}

/// Start the audit logger if `[audit]` is configured and enabled.
fn start_audit(
    config: &AppConfig,
    services: &Services,
    cancel: &CancellationToken,
) -> Option<JoinHandle<()>> {
    let audit = config.audit.as_ref().filter(|a| a.enabled)?;
    Some(AuditLogger::new(audit).start(&services.event_bus, cancel.clone()))
}

async fn run_once(config: &AppConfig, workflow: &str, input: &str) -> anyhow::Result<()> {
    let input = parse_input(input)?;
    let services = Services::from_config(config)?;
    let cancel = CancellationToken::new();
    let audit = start_audit(config, &services, &cancel);

    let id = services.engine.execute_workflow(workflow, input).await?;
    let execution = services.engine.wait_for_completion(&id).await?;
    println!("{}", serde_json::to_string_pretty(&execution)?);

    // The audit logger stops once the last bus handle is gone and its queue is drained
    drop(services);
    if let Some(handle) = audit {
        handle.await.ok();
    }

    if execution.status == ExecutionStatus::Failed {
        anyhow::bail!("execution {} failed", execution.id);
    }
    Ok(())
}

async fn serve(config: &AppConfig) -> anyhow::Result<()> {
    let services = Services::from_config(config)?;
    let cancel = CancellationToken::new();
    let audit = start_audit(config, &services, &cancel);

    let gateway_config = config.gateway_or_default();
    info!(bind = %gateway_config.bind, "Starting REST gateway");
    let server = GatewayServer::new(gateway_config, services);

    let cancel_clone = cancel.clone();
    // Graceful shutdown on Ctrl-C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down gateway...");
        cancel_clone.cancel();
    });

    server.run(cancel).await?;
    if let Some(handle) = audit {
        handle.await.ok();
    }
    Ok(())
}

fn list_agents(config: &AppConfig) {
    if config.agents.is_empty() {
        println!("No agents configured.");
        return;
    }
    println!(
        "{:<24} {:<20} {:>6}  {:<8}  CAPABILITIES",
        "ID", "TYPE", "TRUST", "WORKER"
    );
    for agent in &config.agents {
        let worker = match &agent.worker {
            Some(conductor_core::config::WorkerConfig::Static { .. }) => "static",
            Some(conductor_core::config::WorkerConfig::Http { .. }) => "http",
            None => "-",
        };
        let caps: Vec<&str> = agent.capabilities.iter().map(String::as_str).collect();
        println!(
            "{:<24} {:<20} {:>6.2}  {:<8}  {}",
            agent.id,
            agent.agent_type,
            agent.to_record().trust_level,
            worker,
            caps.join(", ")
        );
    }
}
