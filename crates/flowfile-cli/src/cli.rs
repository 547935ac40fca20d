//! Command definitions and dispatch.
//!
//! Each subcommand operates on a single flow document file: load it (or
//! start empty for `new`), apply one mutation or query through
//! [`flowfile_core::Engine`], and write the document back. The engine's
//! in-memory run/undo/cache state lives only for the process's lifetime;
//! only the structural document persists across invocations.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowfile_core::{Engine, FlowDocument, InputLabel, NodeId, NodeKind, NodeSettings};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "flowfile")]
#[command(about = "Build and run flowfile transformation graphs", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new, empty flow document.
    New {
        /// Path to write the flow document to.
        file: PathBuf,
    },

    /// Add a node of the given kind, using default settings unless
    /// `--settings` supplies a JSON settings payload.
    AddNode {
        file: PathBuf,
        /// Node kind, e.g. `manual_input`, `filter`, `group_by`.
        kind: String,
        #[arg(long)]
        settings: Option<String>,
    },

    /// Replace a node's settings with a JSON payload.
    UpdateSettings {
        file: PathBuf,
        node: u64,
        settings: String,
    },

    /// Remove a node and its incident edges.
    DeleteNode { file: PathBuf, node: u64 },

    /// Connect one node's output to another's input.
    Connect {
        file: PathBuf,
        source: u64,
        target: u64,
        #[arg(long, default_value = "main")]
        label: String,
    },

    /// Remove a connection between two nodes.
    Disconnect {
        file: PathBuf,
        source: u64,
        target: u64,
        #[arg(long, default_value = "main")]
        label: String,
    },

    /// Run the flow to completion and print each node's final state.
    Run { file: PathBuf },

    /// Undo the most recent mutation.
    Undo { file: PathBuf },

    /// Redo the most recently undone mutation.
    Redo { file: PathBuf },

    /// Print the node list in topological order.
    Inspect { file: PathBuf },

    /// Emit the equivalent Python/Polars script to stdout.
    GenerateCode { file: PathBuf },
}

fn parse_label(s: &str) -> Result<InputLabel> {
    serde_json::from_value::<InputLabel>(serde_json::Value::String(s.to_string()))
        .with_context(|| format!("unknown input label '{s}' (expected main, left, or right)"))
}

fn parse_kind(s: &str) -> Result<NodeKind> {
    serde_json::from_value::<NodeKind>(serde_json::Value::String(s.to_string()))
        .with_context(|| format!("unknown node kind '{s}'"))
}

async fn load_or_create(engine: &Engine, path: &Path) -> Result<flowfile_core::FlowId> {
    if path.exists() {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(engine.load_flow(&bytes).await?)
    } else {
        Ok(engine.new_flow().await)
    }
}

async fn save(engine: &Engine, flow: flowfile_core::FlowId, path: &Path) -> Result<()> {
    let bytes = engine.save_flow(flow).await?;
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    let engine = Engine::new();

    match cli.command {
        Commands::New { file } => {
            if file.exists() {
                bail!("{} already exists", file.display());
            }
            let flow = engine.new_flow().await;
            save(&engine, flow, &file).await?;
            println!("created {}", file.display());
        }

        Commands::AddNode { file, kind, settings } => {
            let flow = load_or_create(&engine, &file).await?;
            let node_kind = parse_kind(&kind)?;
            let node_settings = match settings {
                Some(json) => serde_json::from_str::<NodeSettings>(&json).context("parsing --settings")?,
                None => NodeSettings::default_for(node_kind),
            };
            let node = engine.add_node(flow, node_settings).await?;
            save(&engine, flow, &file).await?;
            println!("added node {}", node.0);
        }

        Commands::UpdateSettings { file, node, settings } => {
            let flow = load_or_create(&engine, &file).await?;
            let node_settings = serde_json::from_str::<NodeSettings>(&settings).context("parsing settings")?;
            engine.update_settings(flow, NodeId(node), node_settings).await?;
            save(&engine, flow, &file).await?;
            println!("updated node {node}");
        }

        Commands::DeleteNode { file, node } => {
            let flow = load_or_create(&engine, &file).await?;
            engine.delete_node(flow, NodeId(node)).await?;
            save(&engine, flow, &file).await?;
            println!("deleted node {node}");
        }

        Commands::Connect { file, source, target, label } => {
            let flow = load_or_create(&engine, &file).await?;
            let input_label = parse_label(&label)?;
            engine.connect(flow, NodeId(source), NodeId(target), input_label).await?;
            save(&engine, flow, &file).await?;
            println!("connected {source} -> {target} ({label})");
        }

        Commands::Disconnect { file, source, target, label } => {
            let flow = load_or_create(&engine, &file).await?;
            let input_label = parse_label(&label)?;
            engine.disconnect(flow, NodeId(source), NodeId(target), input_label).await?;
            save(&engine, flow, &file).await?;
            println!("disconnected {source} -> {target} ({label})");
        }

        Commands::Run { file } => {
            let flow = load_or_create(&engine, &file).await?;
            let mut events = engine.subscribe(flow).await?;
            let watcher = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    println!("  {:?}", event.kind);
                }
            });
            let status = engine.run(flow).await?;
            let _ = watcher.await;
            save(&engine, flow, &file).await?;
            println!("run finished: {status:?}");
        }

        Commands::Undo { file } => {
            let flow = load_or_create(&engine, &file).await?;
            let applied = engine.undo(flow).await?;
            save(&engine, flow, &file).await?;
            println!("{}", if applied { "undone" } else { "nothing to undo" });
        }

        Commands::Redo { file } => {
            let flow = load_or_create(&engine, &file).await?;
            let applied = engine.redo(flow).await?;
            save(&engine, flow, &file).await?;
            println!("{}", if applied { "redone" } else { "nothing to redo" });
        }

        Commands::Inspect { file } => {
            let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let document = FlowDocument::from_json(&bytes)?;
            for node in &document.nodes {
                println!("{}: {:?}", node.id.0, node.settings.kind());
            }
            for edge in &document.edges {
                println!("{} -> {} ({})", edge.source.0, edge.target.0, edge.label);
            }
        }

        Commands::GenerateCode { file } => {
            let flow = load_or_create(&engine, &file).await?;
            let code = engine.generate_code(flow).await?;
            print!("{code}");
        }
    }

    Ok(())
}
