use crate::error::{BittorrentError, Result, StorageError};
use crate::piece::{DownloadState, PieceVerifier};
use crate::storage::Storage;
use crate::torrent::Torrent;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Everything the connections of one torrent share
pub struct Download {
    torrent: Arc<Torrent>,
    state: Arc<DownloadState>,
    storage: Arc<Storage>,
    verifier: Arc<PieceVerifier>,
    uploaded: AtomicU64,
    downloaded: AtomicU64,
}

impl Download {
    pub fn new(torrent: Torrent, download_dir: &Path) -> Result<Self> {
        let torrent = Arc::new(torrent);
        let state = Arc::new(DownloadState::new(torrent.layout())?);
        let storage = Arc::new(Storage::new(download_dir, &torrent, state.clone()));
        let verifier = Arc::new(PieceVerifier::new(
            torrent.clone(),
            storage.clone(),
            state.clone(),
        ));

        Ok(Self {
            torrent,
            state,
            storage,
            verifier,
            uploaded: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
        })
    }

    pub fn torrent(&self) -> &Arc<Torrent> {
        &self.torrent
    }

    pub fn state(&self) -> &Arc<DownloadState> {
        &self.state
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn verifier(&self) -> &Arc<PieceVerifier> {
        &self.verifier
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.torrent.info_hash()
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Bytes not yet verified
    pub fn left(&self) -> u64 {
        self.torrent.total_size() - self.state.verified_bytes()
    }

    pub fn add_uploaded(&self, bytes: u64) {
        self.uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn fraction_verified(&self) -> f64 {
        self.state.fraction_verified()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// Verified piece indices as they complete
    pub fn subscribe(&self) -> broadcast::Receiver<u32> {
        self.verifier.subscribe()
    }

    /// Hash every piece already present on disk. Pieces whose files are
    /// missing or too short are skipped. Returns the verified count.
    pub async fn recheck(&self) -> Result<u32> {
        for piece in 0..self.torrent.piece_count() {
            match self.verifier.verify(piece).await {
                Ok(_) => {}
                Err(BittorrentError::Storage(
                    StorageError::NotFound(_) | StorageError::ShortRead { .. },
                )) => {}
                Err(e) => return Err(e),
            }
        }

        let verified = self.state.verified_count();
        info!(
            "Recheck of {}: {}/{} pieces present",
            self.torrent.name(),
            verified,
            self.torrent.piece_count()
        );
        Ok(verified)
    }
}
