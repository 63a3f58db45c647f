use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::json;
use skiff_core::{Origin, ResourceObject};
use skiff_deploy::{DeploymentGraph, ExecutionStatus, Executor, ExecutorConfig, Strategy, StrategyAuto};
use skiff_kubehub::{ClusterApi, KubeCluster};
use tokio::signal;
use tracing::{info, warn};

mod load;

#[derive(Parser, Debug)]
#[command(name = "skiffctl", version, about = "Deploy Kubernetes manifests in dependency order")]
struct Cli {
    /// Manifest files or directories (repeatable)
    #[arg(short = 'f', long = "file", global = true)]
    files: Vec<PathBuf>,

    /// Namespace for objects that do not name one
    #[arg(long = "ns", global = true, env = "SKIFF_NAMESPACE")]
    namespace: Option<String>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the deployment levels
    Plan {
        /// Only check the graph for cycles
        #[arg(long = "validate", action = ArgAction::SetTrue)]
        validate: bool,
    },
    /// Show the action each object needs against the live cluster
    Diff,
    /// Apply all objects level by level, rolling back on failure
    Deploy {
        /// Do not wait for objects to become ready
        #[arg(long = "no-wait", action = ArgAction::SetTrue)]
        no_wait: bool,
        /// Add a Namespace object for --ns when none is declared
        #[arg(long = "create-namespace", action = ArgAction::SetTrue)]
        create_namespace: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("SKIFF_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SKIFF_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid SKIFF_METRICS_ADDR; expected host:port");
        }
    }
}

fn namespace_object(name: &str) -> Result<ResourceObject> {
    let doc = json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name}});
    Ok(ResourceObject::from_document(doc, Origin::Inline)?)
}

fn build_graph(cli: &Cli, create_namespace: bool) -> Result<DeploymentGraph> {
    if cli.files.is_empty() {
        bail!("no manifests given; pass -f <file|dir>");
    }
    let mut objects = load::load_paths(&cli.files)?;
    if let (true, Some(ns)) = (create_namespace, cli.namespace.as_deref()) {
        if !objects.iter().any(|o| o.kind() == "Namespace" && o.name() == ns) {
            objects.insert(0, namespace_object(ns)?);
        }
    }
    info!(objects = objects.len(), "manifests loaded");
    let graph = StrategyAuto.build_deployment_graph(objects)?;
    graph.validate()?;
    Ok(graph)
}

async fn connect() -> Result<Arc<dyn ClusterApi>> {
    let cluster = KubeCluster::try_default().await.context("connecting to cluster")?;
    Ok(Arc::new(cluster))
}

fn print_levels(graph: &DeploymentGraph, output: Output) -> Result<()> {
    let levels = graph.traverse_graph()?;
    match output {
        Output::Human => {
            for (i, level) in levels.iter().enumerate() {
                println!("Step {}:", i + 1);
                for id in level {
                    match &id.namespace {
                        Some(ns) => println!("  {} {} in {}", id.kind, id.name, ns),
                        None => println!("  {} {}", id.kind, id.name),
                    }
                }
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&levels)?),
    }
    Ok(())
}

fn print_statuses(ex: &Executor, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            for node in ex.graph().nodes() {
                println!("{:<18} {}", node.status.to_string(), node.id());
            }
            println!("deployment: {:?}", ex.status());
        }
        Output::Json => {
            let nodes: Vec<_> = ex.graph().nodes().map(|n| json!({"id": n.id(), "status": n.status})).collect();
            println!("{}", serde_json::to_string_pretty(&json!({"status": ex.status(), "nodes": nodes}))?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = cli.namespace.clone();

    match &cli.command {
        Commands::Plan { validate } => {
            let graph = build_graph(&cli, false)?;
            if *validate {
                println!("valid: {} objects, {} levels", graph.len(), graph.traverse_graph()?.len());
            } else {
                print_levels(&graph, cli.output)?;
            }
        }
        Commands::Diff => {
            let graph = build_graph(&cli, false)?;
            let ex = Executor::new(graph, connect().await?, ExecutorConfig::from_env());
            let plan = ex.plan(ns.as_deref()).await?;
            match cli.output {
                Output::Human => {
                    for node in plan.iter().flatten() {
                        let summary = node.comparison.as_ref().map(|c| c.summary()).unwrap_or_default();
                        println!("{:<8} {} (+{} ~{} -{})", node.action.name(), node.id, summary.adds, summary.updates, summary.removes);
                        for pc in node.comparison.iter().flat_map(|c| c.differences.considered.iter()) {
                            println!("    {}", pc.path);
                        }
                    }
                }
                Output::Json => {
                    let nodes: Vec<_> = plan
                        .iter()
                        .flatten()
                        .map(|n| json!({"id": n.id, "action": n.action, "differences": n.comparison.as_ref().map(|c| &c.differences)}))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&nodes)?);
                }
            }
        }
        Commands::Deploy { no_wait, create_namespace } => {
            let graph = build_graph(&cli, *create_namespace)?;
            let mut ex = Executor::new(graph, connect().await?, ExecutorConfig::from_env());
            let mut ready = true;
            if let Err(e) = ex.deploy(ns.as_deref()).await {
                warn!(error = %e, "deploy failed");
            } else if !*no_wait {
                tokio::select! {
                    res = ex.wait_for_all(ns.as_deref()) => {
                        if let Err(e) = res {
                            warn!(error = %e, "objects did not become ready");
                            ready = false;
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; no longer waiting for readiness");
                        ready = false;
                    }
                }
            }
            print_statuses(&ex, cli.output)?;
            if ex.status() != ExecutionStatus::Done {
                return Err(anyhow!("deployment finished as {:?}", ex.status()));
            }
            if !ready {
                bail!("deployment applied but not every object is ready");
            }
        }
    }
    Ok(())
}
