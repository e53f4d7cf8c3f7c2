use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use lms_raft::client::{query_last_log_index, query_leader, ClusterClient};
use lms_raft::config::{parse_peers, ClientConfig, NodeConfig};
use lms_raft::node::Node;
use lms_raft::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "lms-raft")]
#[command(version)]
#[command(about = "Replicated log for the LMS backend, kept consistent with Raft")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a cluster node
    Server(ServerArgs),

    /// Append an entry to the replicated log through the current leader
    Propose {
        #[command(flatten)]
        client: ClientArgs,

        /// Opaque payload to replicate
        data: String,
    },

    /// Print the address of the current leader
    Leader {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Show leadership and log position of every node
    Status {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Node ID (unique name for this node)
    #[arg(long, env = "LMS_NODE_ID", default_value = "node-1")]
    node_id: String,

    /// Port to listen on for gRPC
    #[arg(long, env = "LMS_PORT", default_value = "50051")]
    port: u16,

    /// Address peers and clients reach this node at (default: 127.0.0.1:<port>)
    #[arg(long, env = "LMS_ADVERTISE_ADDR")]
    advertise_addr: Option<String>,

    /// Peer addresses (comma-separated, format: "host:port").
    /// This node's own address is skipped, so every node can share one list.
    /// Example: "127.0.0.1:50051,127.0.0.1:50052,127.0.0.1:50053"
    #[arg(long, env = "LMS_PEERS", default_value = "")]
    peers: String,

    /// Directory for the persisted log and hard state (default: data/<node-id>)
    #[arg(long, env = "LMS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Lower bound of the randomized election timeout
    #[arg(long, default_value = "150")]
    election_timeout_min_ms: u64,

    /// Upper bound of the randomized election timeout
    #[arg(long, default_value = "300")]
    election_timeout_max_ms: u64,

    /// Interval between leader heartbeats
    #[arg(long, default_value = "50")]
    heartbeat_interval_ms: u64,

    /// Timeout for each outbound Raft RPC
    #[arg(long, default_value = "100")]
    rpc_timeout_ms: u64,

    /// Only vote for candidates whose log is at least as up to date as ours
    #[arg(long)]
    check_vote_freshness: bool,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Cluster node addresses (comma-separated, format: "host:port")
    #[arg(
        long,
        short = 'n',
        env = "LMS_NODES",
        default_value = "127.0.0.1:50051,127.0.0.1:50052,127.0.0.1:50053"
    )]
    nodes: String,

    /// Stop searching for a leader after this many seconds
    #[arg(long)]
    discovery_timeout_secs: Option<u64>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

impl ClientArgs {
    fn client_config(&self) -> ClientConfig {
        let nodes = self
            .nodes
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        let mut config = ClientConfig::new(nodes);
        config.discovery_timeout = self.discovery_timeout_secs.map(Duration::from_secs);
        config
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct ProposeOutput {
    leader: Option<String>,
    committed: bool,
}

#[derive(Serialize)]
struct LeaderOutput {
    leader: String,
}

#[derive(Serialize)]
struct NodeStatusOutput {
    address: String,
    reachable: bool,
    is_leader: bool,
    last_log_index: Option<i64>,
    last_log_term: Option<u64>,
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let advertise_addr = args
        .advertise_addr
        .unwrap_or_else(|| format!("127.0.0.1:{}", args.port));
    let peers = parse_peers(&args.peers, &advertise_addr);
    let data_dir = args
        .data_dir
        .unwrap_or_else(|| PathBuf::from("data").join(&args.node_id));

    let config = NodeConfig {
        node_id: args.node_id,
        listen_addr,
        advertise_addr,
        peers,
        data_dir,
        election_timeout_min_ms: args.election_timeout_min_ms,
        election_timeout_max_ms: args.election_timeout_max_ms,
        heartbeat_interval_ms: args.heartbeat_interval_ms,
        rpc_timeout_ms: args.rpc_timeout_ms,
        check_vote_log_freshness: args.check_vote_freshness,
    };

    tracing::info!(
        node_id = %config.node_id,
        listen_addr = %config.listen_addr,
        advertise_addr = %config.advertise_addr,
        data_dir = %config.data_dir.display(),
        peers = ?config.peers.iter().map(|p| p.addr.as_str()).collect::<Vec<_>>(),
        "Starting lms-raft node"
    );

    let node = Node::new(config)?;
    let shutdown = install_shutdown_handler();
    node.run(None, shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_propose(
    client_args: &ClientArgs,
    data: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = ClusterClient::new(client_args.client_config());
    let committed = client.propose(data).await?;

    match client_args.output {
        OutputFormat::Json => {
            let output = ProposeOutput {
                leader: client.leader().map(str::to_string),
                committed,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if committed {
                println!("Entry committed by a majority");
            } else {
                println!("Entry appended on the leader but not committed");
            }
            if let Some(leader) = client.leader() {
                println!("Leader: {}", leader);
            }
        }
    }
    Ok(())
}

async fn handle_leader(client_args: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = ClusterClient::new(client_args.client_config());
    let leader = client.find_leader().await?;

    match client_args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&LeaderOutput { leader })?);
        }
        OutputFormat::Table => println!("Leader: {}", leader),
    }
    Ok(())
}

async fn handle_status(client_args: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = client_args.client_config();
    let mut nodes = Vec::new();

    for addr in &config.nodes {
        let leader = query_leader(addr, config.rpc_timeout).await;
        let position = query_last_log_index(addr, config.rpc_timeout).await.ok();
        nodes.push(NodeStatusOutput {
            address: addr.clone(),
            reachable: leader.is_ok() || position.is_some(),
            is_leader: matches!(leader, Ok(Some(_))),
            last_log_index: position.as_ref().map(|p| p.last_log_index),
            last_log_term: position.as_ref().map(|p| p.last_log_term),
        });
    }

    match client_args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&nodes)?);
        }
        OutputFormat::Table => {
            println!(
                "{:<24} {:<10} {:<8} {:>14} {:>10}",
                "ADDRESS", "REACHABLE", "LEADER", "LAST INDEX", "LAST TERM"
            );
            for node in &nodes {
                println!(
                    "{:<24} {:<10} {:<8} {:>14} {:>10}",
                    node.address,
                    if node.reachable { "yes" } else { "no" },
                    if node.is_leader { "*" } else { "" },
                    node.last_log_index
                        .map(|i| i.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    node.last_log_term
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging; client commands stay quiet unless RUST_LOG says otherwise
    let default_level = match args.command {
        Commands::Server(_) => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Propose { client, data } => {
            handle_propose(&client, data).await?;
        }
        Commands::Leader { client } => {
            handle_leader(&client).await?;
        }
        Commands::Status { client } => {
            handle_status(&client).await?;
        }
    }

    Ok(())
}
