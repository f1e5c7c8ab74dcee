//! RGM Daemon - Resource-group manager
//!
//! `rgmd run` keeps resource groups placed according to their failover
//! domains and dependencies. The other subcommands evaluate a cluster file
//! and a state snapshot offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rgm_daemon::{
    ClusterConfig, ClusterContext, DaemonConfig, GroupEngine, MembershipEvent, Reconciler, Simulation, StateFile,
};
use rgm_restree::ProcessExecutor;
use rgm_thread::GroupThreadManager;
use rgm_types::{NodeId, RequestKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// RGM Daemon CLI
#[derive(Parser)]
#[command(name = "rgmd")]
#[command(about = "RGM Daemon - Resource-group manager", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RGM_CONFIG", global = true)]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "RGM_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "RGM_LOG_JSON", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon
    Run {
        /// Cluster file (overrides node.cluster_file)
        #[arg(long)]
        cluster: Option<PathBuf>,
    },
    /// Validate a state snapshot
    Check {
        #[arg(long)]
        cluster: PathBuf,
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Compute the transition to an ideal state, or validate one operation
    Plan {
        #[arg(long)]
        cluster: PathBuf,
        #[arg(long)]
        state: Option<PathBuf>,
        /// Operation to validate (start, stop, disable, relocate, ...)
        #[arg(long, requires = "resource")]
        operation: Option<String>,
        #[arg(long)]
        resource: Option<String>,
        #[arg(long)]
        target: Option<u32>,
        /// Print JSON instead of text
        #[arg(long)]
        output_json: bool,
    },
    /// Print the dependency graph
    Graph {
        #[arg(long)]
        cluster: PathBuf,
        #[arg(long)]
        state: Option<PathBuf>,
        /// Graphviz DOT output
        #[arg(long)]
        dot: bool,
    },
    /// Print the resource tree
    Tree {
        #[arg(long)]
        cluster: PathBuf,
    },
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn simulation(config: &DaemonConfig, cluster: &Path, state: Option<&Path>) -> anyhow::Result<Simulation> {
    let cluster = ClusterConfig::load(cluster).with_context(|| format!("loading {}", cluster.display()))?;
    let snapshot = match state {
        Some(path) => StateFile::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => StateFile::default(),
    };
    Ok(Simulation::new(&cluster, &snapshot, config.planner.clone())?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = DaemonConfig::load(cli.config.as_deref()).context("loading daemon configuration")?;
    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level, cli.json || config.logging.json);

    match cli.command {
        Command::Run { cluster } => run(config, cluster).await,
        Command::Check { cluster, state } => {
            let mut sim = simulation(&config, &cluster, state.as_deref())?;
            let report = sim.check();
            print!("{}", report.cluster);
            for error in &report.errors {
                println!("{}", error);
            }
            println!("Score: {}", report.score);
            if report.score < 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Plan {
            cluster,
            state,
            operation,
            resource,
            target,
            output_json,
        } => {
            let mut sim = simulation(&config, &cluster, state.as_deref())?;
            let report = match (operation, resource) {
                (Some(op), Some(resource)) => {
                    let op: RequestKind = op.parse()?;
                    sim.plan_operation(&resource, op, target.map(NodeId::new))?
                }
                _ => sim.plan(),
            };
            if output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
            Ok(())
        }
        Command::Graph { cluster, state, dot } => {
            let mut sim = simulation(&config, &cluster, state.as_deref())?;
            if dot {
                print!("{}", sim.graph_dot());
            } else {
                print!("{}", sim.depends_text());
            }
            Ok(())
        }
        Command::Tree { cluster } => {
            let sim = simulation(&config, &cluster, None)?;
            print!("{}", sim.tree_text());
            Ok(())
        }
    }
}

async fn run(config: DaemonConfig, cluster: Option<PathBuf>) -> anyhow::Result<()> {
    let path = cluster
        .or_else(|| config.node.cluster_file.clone())
        .context("no cluster file configured (node.cluster_file or --cluster)")?;
    let cluster = ClusterConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;

    tracing::info!(node = config.node.id, cluster = %path.display(), "Starting rgmd");

    let context = ClusterContext::build(&cluster);
    let engine = Arc::new(GroupEngine::new(context, Arc::new(ProcessExecutor::new()), &config));
    let manager = GroupThreadManager::new(engine.clone());
    let (reconciler, events) = Reconciler::new(config, manager.clone());

    let loop_handle = tokio::spawn(reconciler.clone().start(events));

    #[cfg(unix)]
    let reload = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            let Ok(mut hup) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) else {
                tracing::warn!("Failed to install SIGHUP handler; reload disabled");
                return;
            };
            while hup.recv().await.is_some() {
                match ClusterConfig::load(&path) {
                    Ok(cluster) => {
                        tracing::info!("Reloading cluster configuration");
                        reconciler.notify(MembershipEvent::Reconfigure(Box::new(cluster))).await;
                    }
                    Err(e) => tracing::error!(error = %e, "Reload failed; keeping current configuration"),
                }
            }
        })
    };

    shutdown_signal().await;
    tracing::info!("rgmd shutting down");

    #[cfg(unix)]
    reload.abort();

    reconciler.stop().await;
    for group in engine.local_groups().await {
        if let Err(e) = reconciler.submit(&group, rgm_thread::GroupRequest::new(RequestKind::Exiting)) {
            tracing::warn!(group = %group, error = %e, "Failed to queue exit stop");
        }
    }
    manager.wait_idle().await;
    loop_handle.abort();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
