use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use concord::client::{ClientProcess, LoggingReceiver, MuxReceiver, NodeEndpoint, RunOutcome};
use concord::config::{load_cluster_config, ClusterConfig};
use concord::node::{FileStateStore, NodeServer, NodeStateStore, SettingsApplicator};
use concord::{
    Consistency, ConsistencyAnalyzer, LocalEndpoint, Liveness, OfflineEndpoint, RecoveryDecision,
};
use env_logger::Env;
use log::info;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_LOG_FILTER: &str = "warn,concord=info";

#[derive(Parser, Debug)]
#[command(name = "concord-repair", about = "Inspect and repair file-backed concord nodes")]
struct Cli {
    /// Path to the cluster configuration YAML
    #[arg(long)]
    config: PathBuf,

    /// env_logger-style filter string (e.g. "info,concord=debug"); overrides RUST_LOG/defaults
    #[arg(long)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover every node and classify the cluster state
    Diagnose,
    /// Complete an interrupted change on every reachable node
    Repair {
        /// Commit or roll back regardless of the derived decision
        #[arg(long, value_enum)]
        force: Option<ForceArg>,
    },
    /// Print the change history of one node
    History {
        #[arg(long)]
        node: String,
        /// Emit the records as JSON instead of one line each
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ForceArg {
    Commit,
    Rollback,
}

impl From<ForceArg> for RecoveryDecision {
    fn from(arg: ForceArg) -> Self {
        match arg {
            ForceArg::Commit => RecoveryDecision::Commit,
            ForceArg::Rollback => RecoveryDecision::Rollback,
        }
    }
}

fn init_logging(cli_filter: Option<&str>) {
    let env = Env::default().default_filter_or(DEFAULT_LOG_FILTER);
    let mut builder = env_logger::Builder::from_env(env);
    if let Some(filter) = cli_filter {
        builder.parse_filters(filter);
    }
    builder.format_timestamp_secs();
    builder.format(|buf, record| {
        let ts = buf.timestamp();
        writeln!(
            buf,
            "[{} {:<5} {}] {}",
            ts,
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder.init();
}

/// One configured node as seen by this tool.
struct NodeHandle {
    name: String,
    endpoint: Arc<dyn NodeEndpoint>,
    server: Option<Arc<NodeServer>>,
}

impl NodeHandle {
    fn liveness(&self) -> Liveness {
        if self.server.is_some() {
            Liveness::Online
        } else {
            Liveness::Offline
        }
    }
}

/// Opens every node whose state file exists; the others are treated as offline.
fn open_nodes(config: &ClusterConfig, config_path: &Path) -> Vec<NodeHandle> {
    config
        .nodes
        .iter()
        .map(|node| {
            let dir = config.state_dir(config_path, node);
            let store = FileStateStore::new(&dir);
            let opened = match store.load() {
                Ok(Some(_)) => NodeServer::open(
                    node.name.clone(),
                    Box::new(store),
                    Arc::new(SettingsApplicator::new()),
                )
                .map_err(|err| err.to_string()),
                Ok(None) => Err(format!("no state under {}", dir.display())),
                Err(err) => Err(err.to_string()),
            };
            match opened {
                Ok(server) => {
                    let server = Arc::new(server);
                    NodeHandle {
                        name: node.name.clone(),
                        endpoint: Arc::new(LocalEndpoint::new(server.clone())),
                        server: Some(server),
                    }
                }
                Err(reason) => {
                    info!("event=node_offline node={} reason=\"{}\"", node.name, reason);
                    NodeHandle {
                        name: node.name.clone(),
                        endpoint: Arc::new(OfflineEndpoint::new(node.name.clone(), reason)),
                        server: None,
                    }
                }
            }
        })
        .collect()
}

fn online_client(config: &ClusterConfig, nodes: &[NodeHandle]) -> ClientProcess {
    let endpoints = nodes
        .iter()
        .filter(|node| node.server.is_some())
        .map(|node| Arc::clone(&node.endpoint))
        .collect();
    ClientProcess::new(endpoints, config.identity()).with_fan_out(config.fan_out)
}

fn diagnose(config: &ClusterConfig, nodes: &[NodeHandle]) -> Result<()> {
    let mut analyzer =
        ConsistencyAnalyzer::new(nodes.iter().map(|node| (node.name.clone(), node.liveness())));
    let mut logging = LoggingReceiver;
    let discovered = {
        let mut mux = MuxReceiver::new().with(&mut logging).with(&mut analyzer);
        online_client(config, nodes).try_discovery(&mut mux)
    };

    for node in nodes {
        match discovered.as_ref().ok().and_then(|map| map.get(&node.name)) {
            Some(response) => {
                let latest = response
                    .latest_change
                    .as_ref()
                    .map(|details| {
                        format!("{} {} \"{}\"", details.uuid, details.state, details.summary)
                    })
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<16} ONLINE   mode={} mutative_message_count={} version={}/{} last_mutation={}@{} latest={}",
                    node.name,
                    response.mode,
                    response.mutative_message_count,
                    response.current_version,
                    response.highest_version,
                    response.last_mutation_user.as_deref().unwrap_or("-"),
                    response.last_mutation_host.as_deref().unwrap_or("-"),
                    latest
                );
            }
            None => match node.liveness() {
                Liveness::Online => println!("{:<16} ONLINE   (discovery failed)", node.name),
                Liveness::Offline => println!("{:<16} OFFLINE", node.name),
            },
        }
    }
    println!("{}", analyzer.describe());
    Ok(())
}

fn repair(config: &ClusterConfig, nodes: &[NodeHandle], force: Option<ForceArg>) -> Result<()> {
    let mut logging = LoggingReceiver;
    let outcome = online_client(config, nodes).try_recovery(
        &mut logging,
        config.nodes.len(),
        force.map(RecoveryDecision::from),
    );
    match outcome {
        RunOutcome::Done(Consistency::Consistent) => {
            println!("cluster is consistent");
            Ok(())
        }
        RunOutcome::Done(Consistency::MayNeedRecovery) => {
            bail!("repair did not reach every node; run repair again")
        }
        RunOutcome::Aborted(reason) => bail!("repair aborted: {reason}"),
    }
}

fn history(nodes: &[NodeHandle], name: &str, json: bool) -> Result<()> {
    let node = nodes
        .iter()
        .find(|node| node.name == name)
        .with_context(|| format!("node {name} is not in the cluster config"))?;
    let server = node
        .server
        .as_ref()
        .with_context(|| format!("node {name} has no readable state"))?;
    let records = server.history();
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    for record in records {
        println!(
            "v{:<4} {} {:<11} {}@{} {} \"{}\"",
            record.version,
            record.uuid,
            record.state.to_string(),
            record.creation_user,
            record.creation_host,
            record.creation_timestamp_ms,
            record.change.summary()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_filter.as_deref());
    let config = load_cluster_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let nodes = open_nodes(&config, &cli.config);

    match cli.command {
        Command::Diagnose => diagnose(&config, &nodes),
        Command::Repair { force } => repair(&config, &nodes, force),
        Command::History { node, json } => history(&nodes, &node, json),
    }
}
