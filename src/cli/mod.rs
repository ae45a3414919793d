use crate::bencode::decode;
use crate::client::{ClientConfig, TorrentClient};
use crate::error::Result;
use crate::torrent::{load_torrent_file, TorrentMetadata};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

#[derive(Parser)]
#[command(name = "bitfetch")]
#[command(about = "Fetch a single-file torrent from one peer, verifying every piece", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    options: ClientOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ClientOptions {
    /// Port reported to the tracker
    #[arg(long, global = true, default_value = "6881")]
    port: u16,

    /// Maximum number of tracker peers to try
    #[arg(long, global = true, default_value = "50")]
    max_peers: usize,

    /// TCP connect and tracker request timeout, in seconds
    #[arg(long, global = true, default_value = "10")]
    connect_timeout: u64,

    /// Per-read timeout on peer connections, in seconds
    #[arg(long, global = true, default_value = "30")]
    read_timeout: u64,
}

impl ClientOptions {
    fn config(&self) -> ClientConfig {
        ClientConfig {
            listen_port: self.port,
            max_peers: self.max_peers,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a bencoded value and print it as JSON
    Decode {
        /// The bencoded value
        value: String,
    },

    /// Show information about a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },

    /// List the peers the tracker returns
    Peers {
        /// Path to the .torrent file
        torrent: PathBuf,
    },

    /// Handshake with a peer and print its peer id
    Handshake {
        /// Path to the .torrent file
        torrent: PathBuf,

        /// Peer address as ip:port
        peer: SocketAddr,
    },

    /// Download and verify one piece
    #[command(name = "download-piece")]
    DownloadPiece {
        /// Where to write the piece
        #[arg(short, long)]
        output: PathBuf,

        /// Path to the .torrent file
        torrent: PathBuf,

        /// Zero-based piece index
        piece: usize,
    },

    /// Download and verify the whole file
    Download {
        /// Where to write the file
        #[arg(short, long)]
        output: PathBuf,

        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Decode { value } => {
                let decoded = decode(value.as_bytes())?;
                let json = serde_json::to_string(&decoded)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                println!("{}", json);
            }

            Commands::Info { torrent } => {
                let metadata = load_torrent_file(torrent).await?;
                print_info(&metadata);
            }

            Commands::Peers { torrent } => {
                let metadata = load_torrent_file(torrent).await?;
                let client = self.client()?;
                for peer in client.discover_peers(&metadata).await? {
                    println!("{}", peer.addr);
                }
            }

            Commands::Handshake { torrent, peer } => {
                let metadata = load_torrent_file(torrent).await?;
                let peer_id = self.client()?.handshake(&metadata, *peer).await?;
                println!("Peer ID: {}", hex::encode(peer_id));
            }

            Commands::DownloadPiece {
                output,
                torrent,
                piece,
            } => {
                let metadata = load_torrent_file(torrent).await?;
                let data = self.client()?.download_piece(&metadata, *piece).await?;
                write_output(output, &data).await?;
                println!("Piece {} downloaded to {}.", piece, output.display());
            }

            Commands::Download { output, torrent } => {
                let metadata = load_torrent_file(torrent).await?;
                let data = self.client()?.download(&metadata).await?;
                write_output(output, &data).await?;
                println!("Downloaded {} to {}.", torrent.display(), output.display());
            }
        }

        Ok(())
    }

    fn client(&self) -> Result<TorrentClient> {
        TorrentClient::new(self.options.config())
    }
}

fn print_info(metadata: &TorrentMetadata) {
    if let Some(name) = &metadata.name {
        println!("Name: {}", name);
    }
    println!("Tracker URL: {}", metadata.tracker_url);
    println!("Length: {}", metadata.total_length);
    println!("Info Hash: {}", metadata.info_hash_hex());
    println!("Piece Length: {}", metadata.piece_length);
    println!("Piece Hashes:");
    for hash in metadata.piece_hashes.iter() {
        println!("{}", hash.to_hex());
    }
}

async fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, data).await?;
    info!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}
