use super::DownloadState;
use crate::error::Result;
use crate::storage::Storage;
use crate::torrent::Torrent;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Checks piece contents on disk against the hashes in the metainfo
pub struct PieceVerifier {
    torrent: Arc<Torrent>,
    storage: Arc<Storage>,
    state: Arc<DownloadState>,
    completed: broadcast::Sender<u32>,
}

impl PieceVerifier {
    pub fn new(torrent: Arc<Torrent>, storage: Arc<Storage>, state: Arc<DownloadState>) -> Self {
        let capacity = (torrent.piece_count() as usize).clamp(16, 4096);
        let (completed, _) = broadcast::channel(capacity);
        Self {
            torrent,
            storage,
            state,
            completed,
        }
    }

    /// Stream of piece indices as they pass verification
    pub fn subscribe(&self) -> broadcast::Receiver<u32> {
        self.completed.subscribe()
    }

    /// Hash the piece as it is on disk and update the shared state.
    /// A mismatch is `Ok(false)`, not an error.
    pub async fn verify(&self, piece: u32) -> Result<bool> {
        let expected = *self.torrent.piece_hash(piece)?;
        let data = self.storage.read_piece(piece).await?;
        let actual: [u8; 20] = Sha1::digest(&data).into();

        if actual == expected {
            self.state.set_verified(piece)?;
            info!("Piece {} verified", piece);
            // no subscribers is fine
            let _ = self.completed.send(piece);
            Ok(true)
        } else {
            let cleared = self.state.reject(piece)?;
            warn!(
                "Piece {} failed verification{}",
                piece,
                if cleared { ", re-downloading" } else { "" }
            );
            Ok(false)
        }
    }

    /// Verify a fully acquired piece on a background task. Only the first
    /// caller for a piece starts a check; later callers get `None`. If the
    /// piece can't be read its blocks are cleared so it is downloaded again.
    pub fn spawn_verify(self: &Arc<Self>, piece: u32) -> Option<JoinHandle<Result<bool>>> {
        if !self.state.try_claim_verification(piece) {
            debug!("Piece {} already verified or being verified", piece);
            return None;
        }

        let verifier = Arc::clone(self);
        Some(tokio::spawn(async move {
            let result = verifier.verify(piece).await;
            if let Err(e) = &result {
                // an unreadable piece is fetched again, not left acquired
                warn!("Could not verify piece {}, re-downloading: {}", piece, e);
                if let Err(e) = verifier.state.reject(piece) {
                    debug!("Cannot reset piece {}: {}", piece, e);
                }
            }
            verifier.state.release_verification(piece);
            result
        }))
    }
}
