//! `mqrpc` command-line entry point.
//!
//! The broker is in-process (`memory://<name>`), so every subcommand runs the
//! gateway, the backends and the caller inside this one process.
//!
//! ```bash
//! # Run broker, gateway and all backend services until Ctrl-C
//! mqrpc serve
//!
//! # One call through an in-process node
//! mqrpc call -s catalog -a search -p '{"query": "queen"}'
//!
//! # Scripted walkthrough of every service
//! mqrpc demo all
//! ```

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::info;

use mqrpc_core::{open_broker, BrokerPtr, GatewayClient, Params, DEFAULT_GATEWAY_QUEUE};
use mqrpc_server::logging::{init_tracing, LogFormat};
use mqrpc_server::{GatewayConfig, Node, NodeConfig};

/// Request/response RPC gateway over a message-queue broker.
#[derive(Parser, Debug)]
#[command(name = "mqrpc")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Broker endpoint. Only in-process `memory://<name>` brokers are supported.
    #[arg(long, env = "MQRPC_BROKER_HOST", default_value = "memory://localhost", global = true)]
    broker: String,

    /// Queue the gateway consumes.
    #[arg(long, env = "MQRPC_GATEWAY_QUEUE", default_value = DEFAULT_GATEWAY_QUEUE, global = true)]
    gateway_queue: String,

    /// Seconds the gateway waits for a backend reply.
    #[arg(
        long,
        env = "MQRPC_HOP_TIMEOUT_SECS",
        default_value_t = 15,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    hop_timeout_secs: u64,

    /// Seconds a caller waits for the gateway.
    #[arg(
        long,
        env = "MQRPC_CALL_TIMEOUT_SECS",
        default_value_t = 20,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    call_timeout_secs: u64,

    /// Concurrent forwarded calls before the gateway refuses new ones.
    #[arg(long, env = "MQRPC_MAX_IN_FLIGHT", global = true)]
    max_in_flight: Option<usize>,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway and every backend service until interrupted.
    ///
    /// The node is reachable only from inside this process.
    Serve,
    /// Issue a single call and print the reply.
    Call {
        #[arg(short, long)]
        service: String,
        #[arg(short, long)]
        action: String,
        /// Parameters as a JSON object.
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
    /// Run a scripted sequence of calls.
    Demo {
        #[arg(value_enum, default_value_t = DemoSuite::All)]
        suite: DemoSuite,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DemoSuite {
    Catalog,
    Playlist,
    Users,
    All,
}

impl Args {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            gateway: GatewayConfig {
                gateway_queue: self.gateway_queue.clone(),
                hop_timeout: Duration::from_secs(self.hop_timeout_secs),
                max_in_flight: self.max_in_flight,
                ..GatewayConfig::default()
            },
            ..NodeConfig::default()
        }
    }

    fn broker(&self) -> anyhow::Result<BrokerPtr> {
        open_broker(&self.broker).with_context(|| format!("opening broker {:?}", self.broker))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let broker = args.broker()?;
    let config = args.node_config();
    let call_timeout = Duration::from_secs(args.call_timeout_secs);

    match args.command {
        Command::Serve => serve(broker, config).await,
        Command::Call {
            service,
            action,
            params,
        } => {
            let params = parse_params(&params)?;
            let node = Node::new(broker, config).launch().await?;
            let client = node.client().clone().with_timeout(call_timeout);
            let reply = client.call(&service, &action, params).await;
            println!("{}", serde_json::to_string_pretty(&reply)?);
            node.stop().await
        }
        Command::Demo { suite } => {
            let node = Node::new(broker, config).launch().await?;
            let client = node.client().clone().with_timeout(call_timeout);
            run_demo(&client, suite).await?;
            node.stop().await
        }
    }
}

async fn serve(broker: BrokerPtr, config: NodeConfig) -> anyhow::Result<()> {
    let mut node = Node::new(broker, config);
    node.start().await?;
    info!("serving, press Ctrl-C to stop");
    node.serve(async {
        // An unavailable signal handler shuts down immediately.
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;
    Ok(())
}

fn parse_params(raw: &str) -> anyhow::Result<Params> {
    match serde_json::from_str(raw).context("params must be valid JSON")? {
        Value::Object(params) => Ok(params),
        other => bail!("params must be a JSON object, got {other}"),
    }
}

fn params(value: Value) -> Params {
    match value {
        Value::Object(params) => params,
        _ => Params::new(),
    }
}

async fn step(client: &GatewayClient, label: &str, service: &str, action: &str, args: Value) -> Value {
    let reply = client.call(service, action, params(args)).await;
    println!("{label}: {reply}");
    reply
}

async fn run_demo(client: &GatewayClient, suite: DemoSuite) -> anyhow::Result<()> {
    let all = suite == DemoSuite::All;

    if all || suite == DemoSuite::Catalog {
        println!("\n=== catalog ===");
        step(client, "search 'rock'", "catalog", "search", json!({"query": "rock", "limit": 5})).await;
        step(client, "tracks by Queen", "catalog", "list_by_artist", json!({"artist": "Queen"})).await;
        step(client, "details", "catalog", "get_details", json!({"music_id": "m001"})).await;
    }

    if all || suite == DemoSuite::Playlist {
        println!("\n=== playlist ===");
        let created = step(
            client,
            "created",
            "playlist",
            "create",
            json!({"user_id": "user123", "name": "Favourites", "description": "The best tracks"}),
        )
        .await;
        let Some(playlist_id) = created.get("playlist_id").and_then(Value::as_str) else {
            bail!("playlist creation failed: {created}");
        };
        step(
            client,
            "tracks added",
            "playlist",
            "add_music",
            json!({"playlist_id": playlist_id, "music_ids": ["m001", "m002", "m003"]}),
        )
        .await;
        step(client, "user playlists", "playlist", "list_user_playlists", json!({"user_id": "user123"})).await;
    }

    if all || suite == DemoSuite::Users {
        println!("\n=== users ===");
        step(client, "play recorded", "users", "play", json!({"user_id": "user123", "music_id": "m001"})).await;
        step(client, "history", "users", "get_history", json!({"user_id": "user123", "limit": 10})).await;
        step(client, "most played", "users", "most_played", json!({"user_id": "user123", "limit": 5})).await;
    }

    Ok(())
}
