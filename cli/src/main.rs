// signalswarm — swarm formation demos and a signaling hub server.

mod hub_server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use signalswarm_core::connection::sim::{SimConnector, SimNetwork};
use signalswarm_core::hub::memory::MemoryHub;
use signalswarm_core::hub::ws::WsHub;
use signalswarm_core::{Swarm, SwarmConfig, SwarmEvent};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "signalswarm")]
#[command(about = "Peer swarm formation over a shared signaling hub", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a websocket signaling hub server
    Hub {
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        listen: SocketAddr,
    },
    /// Form an in-process swarm of simulated peers and print its events
    Demo {
        /// Number of participants to start
        #[arg(short, long, default_value = "3")]
        peers: usize,
        /// Per-participant connection cap
        #[arg(short, long)]
        max_peers: Option<usize>,
    },
    /// Join a swarm through a running hub server
    Join {
        /// Hub server url, e.g. ws://127.0.0.1:9001
        url: String,
        /// Connection cap for this participant
        #[arg(short, long)]
        max_peers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Hub { listen } => hub_server::run(listen).await,
        Commands::Demo { peers, max_peers } => cmd_demo(peers, max_peers).await,
        Commands::Join { url, max_peers } => cmd_join(url, max_peers).await,
    }
}

async fn cmd_demo(peers: usize, max_peers: Option<usize>) -> Result<()> {
    let hub = MemoryHub::new();
    let network = SimNetwork::new();

    let mut swarms = Vec::with_capacity(peers);
    for n in 0..peers {
        let connector = Arc::new(SimConnector::with_network(Arc::clone(&network)));
        let swarm = Swarm::join(
            Arc::new(hub.client()),
            connector,
            SwarmConfig {
                max_peers,
                local_id: Some(format!("demo-{n}")),
                ..SwarmConfig::default()
            },
        )
        .await?;
        watch_events(&swarm);
        swarms.push(swarm);
    }

    println!("{peers} participants joined; press ctrl-c to close the swarm");
    tokio::signal::ctrl_c().await?;

    for swarm in &swarms {
        swarm.close().await;
    }
    Ok(())
}

async fn cmd_join(url: String, max_peers: Option<usize>) -> Result<()> {
    let hub = Arc::new(WsHub::connect(&url).await?);
    let connector = Arc::new(SimConnector::new());
    let swarm = Swarm::join(
        hub,
        connector,
        SwarmConfig {
            max_peers,
            ..SwarmConfig::default()
        },
    )
    .await?;
    println!("joined {url} as {}", swarm.local_id());

    let mut events = swarm.events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SwarmEvent::PeerConnected { remote_id, .. }) => {
                    println!("connected to {remote_id}");
                }
                Ok(SwarmEvent::PeerDisconnected { remote_id, .. }) => {
                    println!("lost {remote_id}");
                }
                Ok(SwarmEvent::Closed) | Err(_) => break,
            },
        }
    }

    swarm.close().await;
    println!("left the swarm");
    Ok(())
}

/// Print one swarm's events until it closes.
fn watch_events(swarm: &Swarm) {
    let local = swarm.local_id().to_string();
    let mut events = swarm.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SwarmEvent::PeerConnected { remote_id, .. } => {
                    println!("[{local}] connected to {remote_id}");
                }
                SwarmEvent::PeerDisconnected { remote_id, .. } => {
                    println!("[{local}] lost {remote_id}");
                }
                SwarmEvent::Closed => {
                    println!("[{local}] closed");
                    break;
                }
            }
        }
    });
}
