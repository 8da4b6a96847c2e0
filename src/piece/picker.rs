use super::DownloadState;
use std::collections::HashSet;

/// A block addressed by piece index and block index within the piece
pub type BlockRef = (u32, u32);

/// Selects which blocks to request from one peer, lowest piece first
pub struct BlockPicker<'a> {
    state: &'a DownloadState,
    /// Pieces the remote peer has announced
    remote_has: &'a [bool],
}

impl<'a> BlockPicker<'a> {
    pub fn new(state: &'a DownloadState, remote_has: &'a [bool]) -> Self {
        Self { state, remote_has }
    }

    fn candidate_pieces(&self) -> impl Iterator<Item = u32> + '_ {
        self.remote_has
            .iter()
            .enumerate()
            .filter(|(_, &has)| has)
            .map(|(p, _)| p as u32)
            .filter(|&p| !self.state.is_verified(p))
    }

    /// Whether the peer has anything we still need
    pub fn is_interesting(&self) -> bool {
        self.candidate_pieces().next().is_some()
    }

    /// Up to `limit` missing blocks not already in `pending`
    pub fn pick(&self, pending: &HashSet<BlockRef>, limit: usize) -> Vec<BlockRef> {
        let mut picked = Vec::with_capacity(limit);
        if limit == 0 {
            return picked;
        }

        for piece in self.candidate_pieces() {
            for block in self.state.missing_blocks(piece) {
                if pending.contains(&(piece, block)) {
                    continue;
                }
                picked.push((piece, block));
                if picked.len() == limit {
                    return picked;
                }
            }
        }
        picked
    }
}
