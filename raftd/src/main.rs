//! `raftd`: start one or more cluster nodes, or run a single client command against a leader.

mod actors;
mod config;
mod network;
mod transport;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::Config;
use kvstore::KVStore;
use raft::{ClientAddress, Message, RaftNode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Start a node or run a client command.
#[derive(Parser, Debug)]
#[command(name = "raftd", about = "Start a node or run a client command")]
struct Args {
    /// Configuration file to be used for the cluster
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// The leader address for a client command, host:port
    #[arg(short, long)]
    leader: Option<String>,

    /// Node names to start, or the client command if --leader is given
    name: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Some(leader) = &args.leader {
        run_client(leader, args.name).await
    } else {
        run_server(&args).await
    }
}

async fn run_server(args: &Args) -> Result<()> {
    let config_path = args
        .config
        .as_ref()
        .ok_or_else(|| anyhow!("--config is required when starting nodes"))?;
    let config = Config::load(config_path)?;

    if args.name.is_empty() {
        return Err(anyhow!("at least one node name is required"));
    }

    let network = Arc::new(network::TcpNetwork::new(&config));

    for node_id in &args.name {
        let addr = config
            .addr_of(node_id)
            .ok_or_else(|| anyhow!("node {} is not listed in the cluster config", node_id))?;
        let peers: Vec<String> = config.cluster.keys().filter(|id| *id != node_id).cloned().collect();

        let handle = RaftNode::spawn(
            node_id.clone(),
            peers,
            config.storage_dir.join(node_id),
            network.clone(),
            Box::new(KVStore::new()),
            config.timers(),
        )
        .with_context(|| format!("opening durable state for node {}", node_id))?;

        actors::bind(addr, handle)
            .await
            .with_context(|| format!("binding listener for node {} at {}", node_id, addr))?;

        tracing::info!(node_id = %node_id, %addr, "node started");
    }

    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn run_client(leader: &str, command: Vec<String>) -> Result<()> {
    let leader_addr: SocketAddr = leader
        .parse()
        .with_context(|| format!("invalid leader address {}", leader))?;

    // An ephemeral local listener that only needs to live long enough to receive one
    // `ClientResponse`, mirroring the source's one-shot client actor.
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let client_addr = listener.local_addr()?;
    let client_address: ClientAddress = ("127.0.0.1".to_string(), client_addr.port());

    let item = serde_json::Value::Array(command.into_iter().map(serde_json::Value::String).collect());
    transport::send_message(
        leader_addr,
        &Message::ClientRequest {
            item,
            client_address,
        },
    )
    .await
    .with_context(|| format!("sending request to leader {}", leader_addr))?;

    let response = tokio::time::timeout(Duration::from_secs(5), async {
        let (mut stream, _) = listener.accept().await?;
        transport::read_frame(&mut stream).await
    })
    .await;

    match response {
        Ok(Ok(Some(Message::ClientResponse { result, .. }))) => {
            println!("{}", result);
        }
        Ok(Ok(Some(other))) => {
            return Err(anyhow!("unexpected response message: {:?}", other));
        }
        Ok(Ok(None)) => return Err(anyhow!("connection closed before a response arrived")),
        Ok(Err(err)) => return Err(err.into()),
        Err(_) => println!("Timeout waiting for response"),
    }
    Ok(())
}
