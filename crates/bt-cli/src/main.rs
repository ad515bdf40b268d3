//! bt - peer-to-peer chunked file distribution
//!
//! Seed a file, download it from every peer that seeds it, inspect a file's
//! chunk manifest, or run a provider registry.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use config::{Config, expand_tilde};
use progress::{TransferProgress, format_bytes, format_rate};

use bt_core::{BtError, Node, PROTOCOL_ID};
use bt_discovery::{RegistryDiscovery, RegistryServer};
use bt_files::{CHUNK_SIZE, ContentId, FileId, FileMetadata, chunker};
use bt_transport::{PeerId, PeerRef, StreamListener, TcpConnector};

/// bt - decentralized chunked file distribution
#[derive(Parser)]
#[command(name = "bt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/bt/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed a file until interrupted
    Seed {
        /// File to seed
        file: PathBuf,
    },

    /// Download a file from the peers seeding it
    Download {
        /// File ID printed by `bt seed`
        file_id: String,

        /// Number of chunks printed by `bt seed`
        chunk_count: u64,

        /// Where to write the file
        output_file: PathBuf,
    },

    /// Show a file's ID and chunk layout
    Info {
        /// File to inspect
        file: PathBuf,

        /// List every chunk with its SHA-256
        #[arg(long)]
        chunks: bool,
    },

    /// Run a provider registry node
    Registry {
        /// UDP address to listen on
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the flags when set
    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = expand_tilde(&cli.config);
    // A missing file is only tolerated at the default location
    let config = if config_path == Config::default_path() {
        Config::load_or_default()?
    } else {
        Config::load(&config_path)?
    };
    config.validate()?;

    match cli.command {
        Commands::Seed { file } => seed(file, &config).await,
        Commands::Download {
            file_id,
            chunk_count,
            output_file,
        } => download(&file_id, chunk_count, output_file, &config).await,
        Commands::Info { file, chunks } => info(file, chunks).await,
        Commands::Registry { bind } => run_registry(bind, &config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Cancel `token` on Ctrl+C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down...");
        }
        token.cancel();
    });
}

fn build_node(config: &Config, local: PeerRef) -> anyhow::Result<Node> {
    let discovery = RegistryDiscovery::new(
        config.discovery.registries.clone(),
        local,
        config.request_timeout(),
    );
    let node = Node::new(
        Arc::new(TcpConnector::new(config.transport_config())),
        Arc::new(discovery),
        config.node_config(),
    )?;
    Ok(node)
}

/// Seed a file until Ctrl+C
async fn seed(file: PathBuf, config: &Config) -> anyhow::Result<()> {
    let peer_id = PeerId::random();
    let mut listener = StreamListener::bind(config.network.listen_addr, &config.transport_config())
        .await
        .context("Failed to start listener")?;
    let listen_addr = listener.local_addr();
    tracing::info!("Starting seeder {} on {}", peer_id, listen_addr);

    let advertised = if config.network.advertise_addrs.is_empty() {
        vec![listen_addr]
    } else {
        config.network.advertise_addrs.clone()
    };
    let node = build_node(config, PeerRef::new(peer_id, advertised))?;

    let seeded = node
        .seed(&file)
        .await
        .with_context(|| format!("Failed to prepare {}", file.display()))?;
    listener.register(PROTOCOL_ID, seeded.server.clone());

    let meta = &seeded.metadata;
    println!("{}", style("Seeding").green().bold());
    println!("File: {}", meta.path.display());
    println!("Size: {}", format_bytes(meta.size));
    println!("File ID: {}", style(&meta.file_id).cyan());
    println!("Chunks: {}", meta.chunk_count);
    println!("Peer ID: {}", peer_id);
    println!("Listening on: {}", listen_addr);
    println!();
    println!("Download with:");
    println!("  bt download {} {} <output_file>", meta.file_id, meta.chunk_count);
    println!();
    println!("Press Ctrl+C to stop");

    let cancel = CancellationToken::new();
    let listener_task = tokio::spawn(listener.run(cancel.clone()));
    let provider_task = {
        let node = node.clone();
        let file_id = meta.file_id.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { node.provide_until_cancelled(&file_id, &cancel).await })
    };

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    cancel.cancel();
    let _ = tokio::join!(listener_task, provider_task);

    println!("Served {} chunks", seeded.server.served());
    Ok(())
}

/// Download a file by ID
async fn download(
    file_id: &str,
    chunk_count: u64,
    output: PathBuf,
    config: &Config,
) -> anyhow::Result<()> {
    let file_id = FileId::parse(file_id).context("Invalid file ID")?;
    tracing::info!("Starting download of {} ({} chunks)", file_id, chunk_count);
    let node = build_node(config, PeerRef::new(PeerId::random(), Vec::new()))?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    println!("{} {}", style("Looking for providers of").blue(), file_id);
    let session = node
        .prepare_download(&file_id, chunk_count, &output, &cancel)
        .await?;
    println!(
        "Downloading {} chunks from {} peers to {}",
        chunk_count,
        session.peers().len(),
        output.display()
    );

    let progress = TransferProgress::new(chunk_count * CHUNK_SIZE as u64, file_id.as_str());
    let done = CancellationToken::new();
    let ticker = {
        let session = session.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    () = done.cancelled() => break,
                    _ = interval.tick() => progress.update(session.bytes_written()),
                }
            }
            progress
        })
    };

    let result = node.scheduler(session.clone()).run(&cancel).await;
    done.cancel();
    let progress = ticker.await?;

    match result {
        Ok(report) => {
            progress.set_total(report.bytes);
            progress.update(report.bytes);
            progress.finish_with_message(format!("{file_id} complete"));
            println!(
                "{} {} in {:.2?} ({})",
                style("Download complete:").green().bold(),
                format_bytes(report.bytes),
                report.elapsed,
                format_rate(report.throughput())
            );
            if report.retried > 0 {
                println!("{} chunks needed a retry", report.retried);
            }
            Ok(())
        }
        Err(BtError::SessionIncomplete { failed }) => {
            progress.abandon();
            tracing::debug!("Incomplete chunks of {}: {:?}", file_id, failed);
            eprintln!(
                "{} {} chunks could not be downloaded: {:?}",
                style("Download incomplete:").red().bold(),
                failed.len(),
                failed
            );
            eprintln!("Partial output left at {}", output.display());
            anyhow::bail!("{} chunks failed", failed.len())
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

/// Print a file's ID and chunk manifest
async fn info(file: PathBuf, list_chunks: bool) -> anyhow::Result<()> {
    let (meta, manifest) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let meta = FileMetadata::from_path(&file, CHUNK_SIZE)?;
        let mut manifest = Vec::new();
        if list_chunks {
            let handle = std::fs::File::open(&meta.path)
                .with_context(|| format!("Failed to open {}", meta.path.display()))?;
            for index in 0..meta.chunk_count {
                manifest.push(chunker::chunk_info(&handle, index, meta.chunk_size)?);
            }
        }
        Ok((meta, manifest))
    })
    .await??;

    println!("File: {}", meta.path.display());
    println!("Size: {} ({} bytes)", format_bytes(meta.size), meta.size);
    println!("SHA-256: {}", hex::encode(meta.hash));
    println!("File ID: {}", style(&meta.file_id).cyan());
    println!("CID: {}", ContentId::for_file(&meta.file_id));
    println!(
        "Chunks: {} x {}",
        meta.chunk_count,
        format_bytes(meta.chunk_size as u64)
    );

    if list_chunks {
        println!();
        for chunk in &manifest {
            println!(
                "  {:>6}  {:>12}  {:>10}  {}",
                chunk.index,
                chunk.offset,
                chunk.length,
                hex::encode(chunk.hash)
            );
        }
    }
    Ok(())
}

/// Run a provider registry until Ctrl+C
async fn run_registry(bind: Option<SocketAddr>, config: &Config) -> anyhow::Result<()> {
    let server = Arc::new(
        RegistryServer::bind(config.registry_config(bind))
            .await
            .context("Failed to bind registry")?,
    );

    tracing::info!("Starting provider registry on {}", server.local_addr());
    println!("{}", style("Provider registry").green().bold());
    println!("Listening on: {}", server.local_addr());
    println!("Record TTL: {}s", config.discovery.record_ttl_secs);
    println!("Press Ctrl+C to stop");

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    server.run(cancel).await;

    println!("Registry stopped ({} live records)", server.record_count());
    Ok(())
}
