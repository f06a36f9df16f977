//! Thin async façade over the bencode/torrent/tracker/peer/scheduler
//! modules: `add`, `announce`, `connect_peers`, `download`, `close`.
//!
//! Module-internal errors stay `thiserror` enums; this boundary collapses
//! them into `anyhow::Result`, the teacher's convention for call sites
//! that compose several modules together.
use crate::config::Config;
use crate::scheduler::Scheduler;
use crate::torrent::{self, Meta};
use crate::tracker::{self, Peer};
use crate::bencode;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::instrument;

/// Drives a single torrent from `.torrent` file through to a completed
/// download. Call `add`, `announce`, and `download` in order.
pub struct Orchestrator {
    config: Config,
    meta: Option<Meta>,
    pieces: Vec<torrent::Piece>,
    peers: Vec<Peer>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            meta: None,
            pieces: Vec::new(),
            peers: Vec::new(),
        }
    }

    /// Reads and parses a `.torrent` file, computing its piece geometry.
    #[instrument(level = "info", skip(self), fields(path = %torrent_path.display()))]
    pub async fn add(&mut self, torrent_path: &Path) -> Result<()> {
        let data = tokio::fs::read(torrent_path)
            .await
            .with_context(|| format!("reading torrent file {}", torrent_path.display()))?;
        let (value, _) = bencode::decode(&data).context("decoding torrent file")?;
        let meta = Meta::parse(value).context("parsing torrent metadata")?;
        let pieces = torrent::pieces(&meta).context("computing piece geometry")?;

        tracing::info!(name = %meta.info.name, pieces = pieces.len(), "loaded torrent");
        self.pieces = pieces;
        self.meta = Some(meta);
        Ok(())
    }

    /// Announces to the torrent's tracker and records the peer list it
    /// returns, truncated to `config.max_peers` if set.
    #[instrument(level = "info", skip(self))]
    pub async fn announce(&mut self) -> Result<()> {
        let meta = self.meta.as_ref().context("no torrent added; call add() first")?;
        let client = tracker::Client::new(self.config.peer_id, self.config.port);
        let response = client.announce(meta, 0).await.context("tracker announce failed")?;

        let mut peers = response.peers;
        if let Some(max) = self.config.max_peers {
            peers.truncate(max);
        }
        tracing::info!(peer_count = peers.len(), interval = response.interval, "tracker returned peers");
        self.peers = peers;
        Ok(())
    }

    /// Returns the peer set to connect to. Actual TCP connections and
    /// handshakes happen lazily, one per worker task, inside `download`.
    pub fn connect_peers(&self) -> Result<Vec<Peer>> {
        if self.peers.is_empty() {
            bail!("no peers available; call announce() first");
        }
        Ok(self.peers.clone())
    }

    /// Downloads every piece and writes the assembled file to `output_path`.
    #[instrument(level = "info", skip(self), fields(path = %output_path.display()))]
    pub async fn download(&self, output_path: &Path) -> Result<()> {
        let meta = self.meta.as_ref().context("no torrent added; call add() first")?;
        let peers = self.connect_peers()?;

        let scheduler = Scheduler::new(
            meta.info_hash,
            self.config.peer_id,
            meta.info.piece_length,
            self.pieces.clone(),
        );
        scheduler
            .download(peers, output_path)
            .await
            .context("scheduler failed to complete download")?;

        tracing::info!(path = %output_path.display(), "download complete");
        Ok(())
    }

    /// Resets this orchestrator's state. Peer connections are owned by
    /// scheduler worker tasks and already exit on their own once the
    /// work/result channels close, so there is nothing else to tear down.
    pub fn close(&mut self) -> Result<()> {
        self.meta = None;
        self.pieces.clear();
        self.peers.clear();
        Ok(())
    }
}
