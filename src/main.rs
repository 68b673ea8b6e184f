//! tapflow - declarative screen-automation pipelines
//!
//! Entry point for the tapflow CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tapflow_agent::{AgentServer, SocketDuplex};
use tapflow_engine::Resource;

/// tapflow CLI.
#[derive(Parser)]
#[command(name = "tapflow")]
#[command(about = "Declarative screen-automation pipeline framework")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a pipeline bundle directory
    Validate {
        /// Bundle directory (default_pipeline.json + pipeline/*.json)
        bundle: PathBuf,
    },

    /// Print the merged node graph of a bundle
    Dump {
        /// Bundle directory
        bundle: PathBuf,

        /// Dump a single node instead of the whole graph
        #[arg(long)]
        node: Option<String>,
    },

    /// Host an agent server on a Unix socket
    Serve {
        /// Socket path to bind
        socket: PathBuf,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn load_bundle(dir: &PathBuf) -> anyhow::Result<Resource> {
    let resource = Resource::new();
    resource
        .load_dir(dir)
        .with_context(|| format!("loading bundle '{}'", dir.display()))?;
    Ok(resource)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { bundle } => {
            let resource = load_bundle(&bundle)?;
            let graph = resource.graph_snapshot();
            info!(nodes = graph.len(), "bundle is valid");
            Ok(())
        }
        Commands::Dump { bundle, node } => {
            let resource = load_bundle(&bundle)?;
            let graph = resource.graph_snapshot();
            match node {
                Some(name) => {
                    let node = graph
                        .get(&name)
                        .with_context(|| format!("no node named '{name}'"))?;
                    println!("{}", serde_json::to_string_pretty(&node.to_json())?);
                }
                None => {
                    let mut doc = serde_json::Map::new();
                    for name in graph.names() {
                        if let Some(node) = graph.get(name) {
                            doc.insert(name.clone(), node.to_json());
                        }
                    }
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                }
            }
            Ok(())
        }
        Commands::Serve { socket } => {
            info!(socket = %socket.display(), "waiting for an agent client");
            let channel = SocketDuplex::listen(&socket)
                .await
                .with_context(|| format!("binding '{}'", socket.display()))?;
            // Embedders register callbacks through the library API; the bare
            // CLI host only answers the handshake.
            let server = AgentServer::new(Arc::new(channel));
            server.serve().await.context("agent serve loop")?;
            Ok(())
        }
    }
}
