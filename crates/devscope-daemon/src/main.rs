//! devscope daemon - main entry point
//!
//! Runs the discovery feeds into the live index and serves it to UIs.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use devscope_core::TreeSnapshot;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "devscope")]
#[command(about = "Live index of discovered devices and association endpoints")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "devscope.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Replay the configured feeds, print the resulting tree and exit
    #[arg(long)]
    dump: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("devscope v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    let bind = config.daemon.bind.clone();
    let state = state::AppState::new(config).await?;

    if args.dump {
        info!("Waiting for feeds to settle");
        state.indexer.settle().await?;
        if let Some(snapshot) = state.indexer.snapshot().await {
            let mut out = String::new();
            render_tree(&snapshot, 0, &mut out);
            print!("{}", out);
        }
        state.indexer.shutdown().await;
    } else {
        server::run(state, &bind).await?;
    }

    Ok(())
}

/// Indented text rendering of a snapshot
fn render_tree(snapshot: &TreeSnapshot, depth: usize, out: &mut String) {
    let node = &snapshot.node;
    out.push_str(&"  ".repeat(depth));
    out.push_str(&node.name);
    if let Some(address) = &node.address {
        out.push_str(&format!(" [{}]", address));
    }
    if let Some(count) = node.received_count {
        out.push_str(&format!(" x{}", count));
    }
    if node.hidden {
        out.push_str(" (hidden)");
    }
    if let Some(error) = &node.error_text {
        out.push_str(&format!(" !{}", error));
    }
    out.push('\n');
    for child in &snapshot.children {
        render_tree(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devscope_core::{IndexTree, NodeKind, NodeSpec};

    #[test]
    fn test_render_tree() {
        let mut tree = IndexTree::new("Index");
        let root = tree.root();
        let group = tree
            .upsert(root, "endpoints", NodeSpec::new(NodeKind::Group, "Association Endpoints"))
            .unwrap()
            .id;
        let protocol = tree
            .upsert(
                group,
                "ble",
                NodeSpec::new(
                    NodeKind::ProtocolGroup {
                        protocol: devscope_core::guids::PROTOCOL_BLUETOOTH_LE,
                    },
                    "Bluetooth LE",
                ),
            )
            .unwrap()
            .id;
        tree.upsert(
            protocol,
            "ep1",
            NodeSpec::new(
                NodeKind::Endpoint {
                    address: Some("00:11:22:33:44:55".into()),
                },
                "Thermometer",
            ),
        )
        .unwrap();

        let mut out = String::new();
        render_tree(&tree.snapshot(root).unwrap(), 0, &mut out);
        assert_eq!(
            out,
            "Index\n  Association Endpoints\n    Bluetooth LE\n      Thermometer [00:11:22:33:44:55]\n"
        );
    }
}
