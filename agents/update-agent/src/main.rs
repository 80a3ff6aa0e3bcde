//! Update Agent CLI Entry Point
//!
//! This is the main entry point for the Update Agent binary.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use update_agent::cli::config::{Config, LoggingConfig};
use update_agent::runtime::compose::project_name;
use update_agent::{
    Agent, AgentError, AgentSettings, ComposeRuntime, DockerAdapter, RedisBus, RpcListener,
};

#[derive(Parser)]
#[command(name = "update-agent")]
#[command(author, version, about = "Update Agent - announces and updates the workload running on this host")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/agent.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Workload directory (overrides the configuration file)
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Message bus host
    #[arg(long, env = "REDIS_HOST")]
    redis_host: Option<String>,

    /// Message bus port
    #[arg(long, env = "REDIS_PORT")]
    redis_port: Option<u16>,

    /// Message bus logical database index
    #[arg(long, env = "REDIS_DB")]
    redis_db: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent
    Start,
    /// Show the workload version and its containers
    Status,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)?;
    config
        .bus
        .apply_overrides(cli.redis_host, cli.redis_port, cli.redis_db);
    if let Some(directory) = cli.directory {
        config.workload.directory = directory;
    }

    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Start => {
            start_agent(config).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&logging.level))
            .with_context(|| format!("Invalid log level: {}", logging.level))?
    };

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match logging.format.as_str() {
        "json" => tracing::subscriber::set_global_default(builder.json().finish())?,
        "compact" => tracing::subscriber::set_global_default(builder.compact().finish())?,
        _ => tracing::subscriber::set_global_default(
            builder.with_file(true).with_line_number(true).finish(),
        )?,
    }

    Ok(())
}

async fn start_agent(config: Config) -> Result<()> {
    info!("Starting Update Agent...");

    let directory = config.workload.directory.clone();
    let store = config.workload.store();

    // Without its own identity the agent has nothing to announce
    let reference = store
        .load(&directory)
        .with_context(|| format!("Failed to read workload in {}", directory.display()))?;
    info!(
        app = %reference.application_name,
        version = %reference.version_tag,
        directory = %directory.display(),
        "Workload identified"
    );

    let url = config
        .bus
        .url()
        .ok_or_else(|| AgentError::TransportUnavailable("REDIS_HOST is not set".to_string()))?;

    probe_docker(config.runtime.docker_socket.as_deref()).await;

    let client = redis::Client::open(url.as_str())
        .with_context(|| format!("Invalid message bus URL: {}", url))?;
    let bus = RedisBus::connect(&client, &config.agent.node_name)
        .await
        .map_err(|e| AgentError::TransportUnavailable(format!("{:#}", e)))?;

    let runtime = ComposeRuntime::new(config.runtime.compose_command.clone(), store.clone());
    let agent = Agent::new(
        store,
        Arc::new(runtime),
        Arc::new(bus),
        AgentSettings {
            directory,
            version_channel: config.agent.version_channel.clone(),
            announce_interval: config.agent.announce_interval(),
        },
    );

    // Announce before taking any call off the bus
    agent
        .announce()
        .await
        .context("Initial version announcement failed")?;

    let (call_tx, call_rx) = mpsc::channel(config.agent.queue_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = RpcListener::new(
        client,
        &config.agent.node_name,
        &config.agent.rpc_name,
        config.bus.reconnect_interval(),
    );
    let listener_task = tokio::spawn(listener.run(call_tx, shutdown_rx.clone()));

    info!(
        node_name = %config.agent.node_name,
        rpc_name = %config.agent.rpc_name,
        "Agent serving update commands"
    );

    let serve = agent.serve(call_rx, shutdown_rx);
    tokio::pin!(serve);

    let interrupted = tokio::select! {
        _ = &mut serve => false,
        _ = shutdown_signal() => true,
    };

    if interrupted {
        info!("Shutdown signal received, finishing in-flight command");
        let _ = shutdown_tx.send(true);
        serve.await;
    }

    let _ = shutdown_tx.send(true);
    match listener_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "RPC listener failed"),
        Err(e) => warn!(error = %e, "RPC listener task panicked"),
    }

    if !interrupted {
        bail!("Command loop stopped unexpectedly");
    }

    info!("Update Agent stopped");
    Ok(())
}

/// Log whether the Docker daemon answers; the agent runs either way
async fn probe_docker(socket: Option<&str>) {
    match DockerAdapter::connect(socket) {
        Ok(docker) => match docker.version().await {
            Ok(version) => info!(docker_version = %version, "Docker runtime reachable"),
            Err(e) => warn!(error = %e, "Docker daemon did not answer"),
        },
        Err(e) => warn!(error = %e, "Docker daemon not available"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn show_status(config: &Config) -> Result<()> {
    let directory = &config.workload.directory;
    println!("Workload: {}", directory.display());

    match config.workload.store().load(directory) {
        Ok(reference) => {
            println!("  Application: {}", reference.application_name);
            println!("  Version:     {}", reference.version_tag);
            println!("  Image:       {}", reference.image());
        }
        Err(e) => println!("  Error: {}", e),
    }

    match DockerAdapter::connect(config.runtime.docker_socket.as_deref()) {
        Ok(docker) => {
            match docker.version().await {
                Ok(version) => println!("  Docker: {} (connected)", version),
                Err(e) => println!("  Docker: error - {:#}", e),
            }

            let project = project_name(directory);
            match docker.project_containers(&project).await {
                Ok(containers) if containers.is_empty() => {
                    println!("  Containers ({}): none", project)
                }
                Ok(containers) => {
                    println!("  Containers ({}):", project);
                    for container in containers {
                        println!(
                            "    {} {} [{}]",
                            container.name, container.image, container.status
                        );
                    }
                }
                Err(e) => println!("  Containers: unknown - {:#}", e),
            }
        }
        Err(e) => println!("  Docker: not available - {:#}", e),
    }

    match config.bus.url() {
        Some(url) => println!("  Message bus: {}", url),
        None => println!("  Message bus: not configured (set REDIS_HOST)"),
    }

    Ok(())
}

fn show_version() {
    println!("update-agent {}", env!("CARGO_PKG_VERSION"));
    println!("Per-host update agent for fleet workload rollouts");
    println!();
    println!("Features:");
    println!("  - Version announcements over Redis pub/sub");
    println!("  - Update and stop commands over Redis RPC");
    println!("  - In-place compose file image rewrites");
}
