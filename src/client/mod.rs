mod peer_task;

pub use peer_task::drive;

use crate::config::ClientConfig;
use crate::download::Download;
use crate::error::{BittorrentError, Result};
use crate::peer::PeerSession;
use crate::torrent::{Metainfo, Torrent};
use crate::tracker::{
    generate_peer_id, TrackerClient, TrackerEvent, TrackerRequest, TrackerResponse,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Retry delay when no tracker answered
const ANNOUNCE_RETRY: Duration = Duration::from_secs(60);

/// Main BitTorrent client
pub struct TorrentClient {
    config: ClientConfig,
    peer_id: [u8; 20],
    tracker: TrackerClient,
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        let peer_id = generate_peer_id();
        info!("Client initialized with peer_id: {}", hex::encode(peer_id));

        Self {
            config,
            peer_id,
            tracker: TrackerClient::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Load a .torrent file and hash whatever of it is already on disk
    pub async fn open(&self, torrent_path: &Path) -> Result<(Metainfo, Arc<Download>)> {
        self.config.validate()?;

        let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;
        let torrent = Torrent::from_metainfo(&metainfo, self.config.block_size)?;

        info!("Torrent: {}", torrent.name());
        info!("Total size: {} bytes", torrent.total_size());
        info!("Pieces: {}", torrent.piece_count());
        info!("Info hash: {}", torrent.info_hash_hex());

        let download = Arc::new(Download::new(torrent, &self.config.download_dir)?);
        download.recheck().await?;
        Ok((metainfo, download))
    }

    /// Download a torrent, dialing tracker peers and `extra_peers`, and
    /// accepting inbound connections, until every piece is verified
    pub async fn download(&self, torrent_path: &Path, extra_peers: &[SocketAddr]) -> Result<()> {
        info!("Starting download for: {}", torrent_path.display());

        let (metainfo, download) = self.open(torrent_path).await?;
        if download.is_complete() {
            info!("{} is already complete", download.torrent().name());
            return Ok(());
        }
        download.storage().create_directories().await?;

        let trackers: Vec<String> = metainfo.trackers().into_iter().map(String::from).collect();
        if trackers.is_empty() && extra_peers.is_empty() {
            return Err(BittorrentError::InvalidArgument(
                "torrent names no tracker and no peers were given".to_string(),
            ));
        }

        let listener = match TcpListener::bind(("0.0.0.0", self.config.listen_port)).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!("Not accepting peers on port {}: {}", self.config.listen_port, e);
                None
            }
        };

        let mut completed = download.subscribe();
        let mut swarm = Swarm::new(self, download.clone());
        for addr in extra_peers {
            swarm.dial(*addr);
        }

        let mut next_announce = Instant::now();
        let mut event = Some(TrackerEvent::Started);

        loop {
            tokio::select! {
                _ = sleep_until(next_announce), if !trackers.is_empty() => {
                    let delay = match self.announce(&trackers, &download, event).await {
                        Some(response) => {
                            event = None;
                            for peer in response.peers {
                                swarm.dial(peer.addr);
                            }
                            Duration::from_secs(response.interval.max(1))
                        }
                        None => ANNOUNCE_RETRY,
                    };
                    next_announce = Instant::now() + delay;
                }
                accepted = accept(listener.as_ref()) => match accepted {
                    Ok((stream, addr)) => swarm.accept(stream, addr),
                    Err(e) => warn!("Accept failed: {}", e),
                },
                piece = completed.recv() => match piece {
                    Ok(piece) => {
                        info!(
                            "Piece {} verified ({:.1}% complete)",
                            piece,
                            download.fraction_verified() * 100.0
                        );
                        if download.is_complete() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) if download.is_complete() => break,
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
                Some(joined) = swarm.tasks.join_next() => swarm.finished(joined),
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping");
                    swarm.shutdown().await;
                    self.announce(&trackers, &download, Some(TrackerEvent::Stopped)).await;
                    return Ok(());
                }
            }
        }

        info!("Download complete: {}", download.torrent().name());
        swarm.shutdown().await;
        if !trackers.is_empty() {
            self.announce(&trackers, &download, Some(TrackerEvent::Completed))
                .await;
        }
        Ok(())
    }

    /// Try each tracker in turn until one answers
    async fn announce(
        &self,
        trackers: &[String],
        download: &Download,
        event: Option<TrackerEvent>,
    ) -> Option<TrackerResponse> {
        let request =
            TrackerRequest::for_download(download, self.peer_id, self.config.listen_port, event);
        for tracker in trackers {
            match self.tracker.announce(tracker, &request).await {
                Ok(response) => return Some(response),
                Err(e) => warn!("Tracker {} failed: {}", tracker, e),
            }
        }
        None
    }
}

impl Default for TorrentClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

async fn accept(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Connection tasks of one download
struct Swarm {
    download: Arc<Download>,
    config: ClientConfig,
    peer_id: [u8; 20],
    tasks: JoinSet<(SocketAddr, Result<()>)>,
    connected: HashSet<SocketAddr>,
}

impl Swarm {
    fn new(client: &TorrentClient, download: Arc<Download>) -> Self {
        Self {
            download,
            config: client.config.clone(),
            peer_id: client.peer_id,
            tasks: JoinSet::new(),
            connected: HashSet::new(),
        }
    }

    fn has_room(&self, addr: SocketAddr) -> bool {
        !self.connected.contains(&addr) && self.connected.len() < self.config.max_peers
    }

    fn dial(&mut self, addr: SocketAddr) {
        if !self.has_room(addr) {
            return;
        }
        self.connected.insert(addr);

        let download = self.download.clone();
        let config = self.config.clone();
        let peer_id = self.peer_id;
        self.tasks.spawn(async move {
            let result = match PeerSession::connect(addr, download, peer_id, &config).await {
                Ok(session) => drive(session, &config).await,
                Err(e) => Err(e),
            };
            (addr, result)
        });
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if !self.has_room(addr) {
            debug!("Turning away {}", addr);
            return;
        }
        self.connected.insert(addr);

        let download = self.download.clone();
        let config = self.config.clone();
        let peer_id = self.peer_id;
        self.tasks.spawn(async move {
            let label = addr.to_string();
            let result = match PeerSession::accept(stream, label, download, peer_id, &config).await
            {
                Ok(session) => drive(session, &config).await,
                Err(e) => Err(e),
            };
            (addr, result)
        });
    }

    fn finished(&mut self, joined: std::result::Result<(SocketAddr, Result<()>), JoinError>) {
        match joined {
            Ok((addr, result)) => {
                self.connected.remove(&addr);
                match result {
                    Ok(()) => debug!("Peer {} finished", addr),
                    Err(e) => debug!("Peer {} ended: {}", addr, e),
                }
            }
            Err(e) => error!("Peer task failed: {}", e),
        }
    }

    async fn shutdown(&mut self) {
        self.tasks.shutdown().await;
        self.connected.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{encode, BencodeValue};
    use crate::config::ClientConfig;
    use sha1::{Digest, Sha1};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use tempfile::tempdir;
    use tokio::time::timeout;

    const PIECE: usize = 32;

    fn content() -> Vec<u8> {
        (0..80u32).map(|i| (i * 13 % 256) as u8).collect()
    }

    fn string(s: &str) -> BencodeValue {
        BencodeValue::String(s.as_bytes().to_vec())
    }

    /// Write a single-file .torrent for `content()` and return its path
    fn write_torrent(dir: &Path) -> PathBuf {
        let pieces: Vec<u8> = content()
            .chunks(PIECE)
            .flat_map(|c| <[u8; 20]>::from(Sha1::digest(c)))
            .collect();

        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), BencodeValue::Integer(80));
        info.insert(b"name".to_vec(), string("blob.bin"));
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(PIECE as i64));
        info.insert(b"pieces".to_vec(), BencodeValue::String(pieces));

        let mut root = BTreeMap::new();
        // nothing listens on the discard port, so announces fail fast
        root.insert(b"announce".to_vec(), string("http://127.0.0.1:9/announce"));
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));

        let path = dir.join("blob.torrent");
        std::fs::write(&path, encode(&BencodeValue::Dict(root))).unwrap();
        path
    }

    fn client(download_dir: &Path) -> TorrentClient {
        TorrentClient::new(ClientConfig {
            download_dir: download_dir.to_path_buf(),
            listen_port: 0,
            block_size: 16,
            ..ClientConfig::default()
        })
    }

    #[tokio::test]
    async fn test_open_rechecks_existing_data() {
        let meta_dir = tempdir().unwrap();
        let data_dir = tempdir().unwrap();
        let torrent_path = write_torrent(meta_dir.path());
        std::fs::write(data_dir.path().join("blob.bin"), &content()[..70]).unwrap();

        let (metainfo, download) = client(data_dir.path()).open(&torrent_path).await.unwrap();
        assert_eq!(metainfo.info.name, "blob.bin");
        assert_eq!(download.state().verified(), vec![true, true, false]);
        assert_eq!(download.left(), 16);
    }

    #[tokio::test]
    async fn test_complete_download_returns_immediately() {
        let meta_dir = tempdir().unwrap();
        let data_dir = tempdir().unwrap();
        let torrent_path = write_torrent(meta_dir.path());
        std::fs::write(data_dir.path().join("blob.bin"), content()).unwrap();

        timeout(
            Duration::from_secs(5),
            client(data_dir.path()).download(&torrent_path, &[]),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_download_from_listed_peer() {
        let meta_dir = tempdir().unwrap();
        let seed_dir = tempdir().unwrap();
        let leech_dir = tempdir().unwrap();
        let torrent_path = write_torrent(meta_dir.path());
        std::fs::write(seed_dir.path().join("blob.bin"), content()).unwrap();

        let seeder = client(seed_dir.path());
        let (_, seed) = seeder.open(&torrent_path).await.unwrap();
        assert!(seed.is_complete());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = seeder.config().clone();
        let seed_task = tokio::spawn(async move {
            let (stream, remote) = listener.accept().await.unwrap();
            let session = PeerSession::accept(stream, remote.to_string(), seed, [7u8; 20], &config)
                .await
                .unwrap();
            drive(session, &config).await
        });

        timeout(
            Duration::from_secs(20),
            client(leech_dir.path()).download(&torrent_path, &[addr]),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(
            std::fs::read(leech_dir.path().join("blob.bin")).unwrap(),
            content()
        );
        seed_task.abort();
    }
}
