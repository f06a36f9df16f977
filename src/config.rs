//! Runtime configuration and its documented defaults.
use clap::{Args, Parser, Subcommand};

/// Fixed block size used for all peer-wire block requests.
pub const BLOCK_SIZE: u32 = crate::torrent::piece::BLOCK_SIZE;

/// Default peer ID used when none is supplied on the command line.
pub const DEFAULT_PEER_ID: &str = "00112233445566778899";

/// Default TCP port advertised to trackers.
pub const DEFAULT_PORT: u16 = 6881;

#[derive(Debug, Clone)]
pub struct Config {
    pub peer_id: [u8; 20],
    pub port: u16,
    pub max_peers: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: peer_id_bytes(DEFAULT_PEER_ID),
            port: DEFAULT_PORT,
            max_peers: None,
        }
    }
}

impl Config {
    pub fn from_cli(cli: &DownloadArgs) -> Self {
        let peer_id = cli
            .peer_id
            .as_deref()
            .map(peer_id_bytes)
            .unwrap_or_else(|| peer_id_bytes(DEFAULT_PEER_ID));

        Self {
            peer_id,
            port: cli.port,
            max_peers: cli.max_peers,
        }
    }
}

/// Left-pads or truncates `s` to exactly 20 bytes, matching the
/// fixed-width peer_id the protocol expects.
fn peer_id_bytes(s: &str) -> [u8; 20] {
    let mut bytes = [0u8; 20];
    let src = s.as_bytes();
    let n = src.len().min(20);
    bytes[..n].copy_from_slice(&src[..n]);
    bytes
}

/// Top-level `rstc` CLI arguments.
#[derive(Debug, Parser)]
#[command(name = "rstc", about = "A BEP-3 single-file BitTorrent downloader")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download a single-file torrent to `output-path`.
    Download(DownloadArgs),
}

/// `rstc download <torrent-path> <output-path> [--port] [--max-peers] [--peer-id]`
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Path to the .torrent file.
    pub torrent_path: std::path::PathBuf,

    /// Path to write the downloaded file to.
    pub output_path: std::path::PathBuf,

    /// TCP port advertised to the tracker.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum number of peers to connect to. Unbounded if omitted.
    #[arg(long)]
    pub max_peers: Option<usize>,

    /// 20-byte client peer ID. Defaults to a fixed placeholder if omitted.
    #[arg(long)]
    pub peer_id: Option<String>,
}
