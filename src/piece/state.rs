use super::PieceLayout;
use crate::error::{BittorrentError, Result};
use parking_lot::RwLock;

struct Matrix {
    verified: Vec<bool>,
    acquired: Vec<Vec<bool>>,
    /// Pieces with a hash check claimed by some connection
    verifying: Vec<bool>,
}

/// Which pieces are verified and which blocks have been written.
///
/// Shared by every connection of a download. The lock is only ever taken
/// for in-memory bookkeeping and is never held across network or disk I/O.
pub struct DownloadState {
    layout: PieceLayout,
    matrix: RwLock<Matrix>,
}

impl DownloadState {
    pub fn new(layout: PieceLayout) -> Result<Self> {
        let acquired = (0..layout.piece_count())
            .map(|p| Ok(vec![false; layout.block_count(p)? as usize]))
            .collect::<Result<Vec<_>>>()?;
        let count = layout.piece_count() as usize;

        Ok(Self {
            layout,
            matrix: RwLock::new(Matrix {
                verified: vec![false; count],
                acquired,
                verifying: vec![false; count],
            }),
        })
    }

    pub fn layout(&self) -> PieceLayout {
        self.layout
    }

    fn check_block(&self, piece: u32, block: u32) -> Result<()> {
        let count = self.layout.block_count(piece)?;
        if block >= count {
            return Err(BittorrentError::IndexOutOfRange {
                index: block,
                count,
            });
        }
        Ok(())
    }

    pub fn is_verified(&self, piece: u32) -> bool {
        self.matrix
            .read()
            .verified
            .get(piece as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_block_acquired(&self, piece: u32, block: u32) -> bool {
        self.matrix
            .read()
            .acquired
            .get(piece as usize)
            .and_then(|blocks| blocks.get(block as usize))
            .copied()
            .unwrap_or(false)
    }

    /// True once every block of the piece has been written
    pub fn is_piece_acquired(&self, piece: u32) -> bool {
        self.matrix
            .read()
            .acquired
            .get(piece as usize)
            .map_or(false, |blocks| blocks.iter().all(|&b| b))
    }

    /// Record a durable block write. Acquisition is monotonic: marking an
    /// acquired block again changes nothing. Returns whether the whole piece
    /// is now acquired.
    pub fn mark_block_acquired(&self, piece: u32, block: u32) -> Result<bool> {
        self.check_block(piece, block)?;
        let mut matrix = self.matrix.write();
        let blocks = &mut matrix.acquired[piece as usize];
        blocks[block as usize] = true;
        Ok(blocks.iter().all(|&b| b))
    }

    /// Blocks of `piece` not yet written, in order
    pub fn missing_blocks(&self, piece: u32) -> Vec<u32> {
        self.matrix
            .read()
            .acquired
            .get(piece as usize)
            .map(|blocks| {
                blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, &acquired)| !acquired)
                    .map(|(b, _)| b as u32)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Claim the hash check of a fully acquired piece. Only the first caller
    /// gets `true`; verified pieces and pieces already being checked are
    /// refused.
    pub fn try_claim_verification(&self, piece: u32) -> bool {
        let mut matrix = self.matrix.write();
        let p = piece as usize;
        if p >= matrix.verified.len() || matrix.verified[p] || matrix.verifying[p] {
            return false;
        }
        matrix.verifying[p] = true;
        true
    }

    /// True while a hash check of the piece is in flight
    pub fn is_verifying(&self, piece: u32) -> bool {
        self.matrix
            .read()
            .verifying
            .get(piece as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn release_verification(&self, piece: u32) {
        if let Some(flag) = self.matrix.write().verifying.get_mut(piece as usize) {
            *flag = false;
        }
    }

    /// Hash matched: the piece is verified and all of its blocks count as
    /// acquired.
    pub fn set_verified(&self, piece: u32) -> Result<()> {
        self.layout.check_piece(piece)?;
        let mut matrix = self.matrix.write();
        let p = piece as usize;
        matrix.verified[p] = true;
        matrix.acquired[p].fill(true);
        Ok(())
    }

    /// Hash mismatched: the piece is not verified, and if every block had
    /// been acquired they are all cleared so the piece is fetched again.
    /// A partially acquired piece keeps its blocks. Returns whether the
    /// blocks were cleared.
    pub fn reject(&self, piece: u32) -> Result<bool> {
        self.layout.check_piece(piece)?;
        let mut matrix = self.matrix.write();
        let p = piece as usize;
        matrix.verified[p] = false;
        let complete = matrix.acquired[p].iter().all(|&b| b);
        if complete {
            matrix.acquired[p].fill(false);
        }
        Ok(complete)
    }

    pub fn verified(&self) -> Vec<bool> {
        self.matrix.read().verified.clone()
    }

    pub fn verified_count(&self) -> u32 {
        self.matrix.read().verified.iter().filter(|&&v| v).count() as u32
    }

    /// Total size of the verified pieces in bytes
    pub fn verified_bytes(&self) -> u64 {
        let verified = self.verified();
        verified
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .filter_map(|(p, _)| self.layout.piece_len(p as u32).ok())
            .map(u64::from)
            .sum()
    }

    /// Verified pieces as a fraction in `[0, 1]`
    pub fn fraction_verified(&self) -> f64 {
        match self.layout.piece_count() {
            0 => 0.0,
            count => self.verified_count() as f64 / count as f64,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.layout.piece_count() > 0 && self.verified_count() == self.layout.piece_count()
    }
}
