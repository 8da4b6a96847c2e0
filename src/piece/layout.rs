use crate::error::{BittorrentError, Result};

/// Offset arithmetic for a torrent's pieces and blocks.
///
/// Every piece is `piece_size` bytes except possibly the last, which holds
/// the remainder of `total_size`. Likewise every block of a piece is
/// `block_size` bytes except possibly the last block of that piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceLayout {
    total_size: u64,
    piece_size: u32,
    block_size: u32,
    piece_count: u32,
}

impl PieceLayout {
    pub fn new(total_size: u64, piece_size: u32, block_size: u32) -> Result<Self> {
        if piece_size == 0 || block_size == 0 {
            return Err(BittorrentError::InvalidArgument(
                "piece and block sizes must be positive".to_string(),
            ));
        }

        let piece_count = u32::try_from(total_size.div_ceil(piece_size as u64)).map_err(|_| {
            BittorrentError::InvalidArgument(format!(
                "{} bytes in {} byte pieces overflows the piece index",
                total_size, piece_size
            ))
        })?;

        Ok(Self {
            total_size,
            piece_size,
            block_size,
            piece_count,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn piece_size(&self) -> u32 {
        self.piece_size
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    pub fn check_piece(&self, piece: u32) -> Result<()> {
        if piece >= self.piece_count {
            return Err(BittorrentError::IndexOutOfRange {
                index: piece,
                count: self.piece_count,
            });
        }
        Ok(())
    }

    /// Byte position of the piece in the flattened content
    pub fn piece_offset(&self, piece: u32) -> u64 {
        piece as u64 * self.piece_size as u64
    }

    pub fn piece_len(&self, piece: u32) -> Result<u32> {
        self.check_piece(piece)?;
        let remaining = self.total_size - self.piece_offset(piece);
        Ok(remaining.min(self.piece_size as u64) as u32)
    }

    pub fn block_count(&self, piece: u32) -> Result<u32> {
        Ok(self.piece_len(piece)?.div_ceil(self.block_size))
    }

    pub fn block_len(&self, piece: u32, block: u32) -> Result<u32> {
        let piece_len = self.piece_len(piece)?;
        let count = piece_len.div_ceil(self.block_size);
        if block >= count {
            return Err(BittorrentError::IndexOutOfRange {
                index: block,
                count,
            });
        }
        let begin = block * self.block_size;
        Ok((piece_len - begin).min(self.block_size))
    }

    /// Byte position of the block in the flattened content
    pub fn block_offset(&self, piece: u32, block: u32) -> u64 {
        self.piece_offset(piece) + block as u64 * self.block_size as u64
    }

    /// Map a wire-level `begin` offset inside a piece to its block index.
    /// Offsets that don't fall on a block boundary have no block.
    pub fn block_at(&self, piece: u32, begin: u32) -> Result<u32> {
        let count = self.block_count(piece)?;
        if begin % self.block_size != 0 || begin / self.block_size >= count {
            return Err(BittorrentError::InvalidArgument(format!(
                "offset {} is not a block boundary of piece {}",
                begin, piece
            )));
        }
        Ok(begin / self.block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_piece_is_remainder() {
        let layout = PieceLayout::new(59616, 32768, 16384).unwrap();
        assert_eq!(layout.piece_count(), 2);
        assert_eq!(layout.piece_len(0).unwrap(), 32768);
        assert_eq!(layout.piece_len(1).unwrap(), 26848);
    }

    #[test]
    fn test_last_block_is_remainder() {
        let layout = PieceLayout::new(59616, 32768, 16384).unwrap();
        assert_eq!(layout.block_count(0).unwrap(), 2);
        assert_eq!(layout.block_count(1).unwrap(), 2);
        assert_eq!(layout.block_len(1, 0).unwrap(), 16384);
        assert_eq!(layout.block_len(1, 1).unwrap(), 26848 - 16384);
        assert_eq!(layout.block_offset(1, 1), 32768 + 16384);
    }

    #[test]
    fn test_exact_multiple_has_full_last_piece() {
        let layout = PieceLayout::new(65536, 32768, 16384).unwrap();
        assert_eq!(layout.piece_count(), 2);
        assert_eq!(layout.piece_len(1).unwrap(), 32768);
        assert_eq!(layout.block_len(1, 1).unwrap(), 16384);
    }

    #[test]
    fn test_out_of_range_indices() {
        let layout = PieceLayout::new(100, 40, 16).unwrap();
        assert_eq!(layout.piece_count(), 3);
        assert!(matches!(
            layout.piece_len(3),
            Err(BittorrentError::IndexOutOfRange { index: 3, count: 3 })
        ));
        // last piece is 20 bytes: one full block and a 4 byte tail
        assert_eq!(layout.block_len(2, 1).unwrap(), 4);
        assert!(layout.block_len(2, 2).is_err());
    }

    #[test]
    fn test_block_at_requires_boundary() {
        let layout = PieceLayout::new(59616, 32768, 16384).unwrap();
        assert_eq!(layout.block_at(0, 16384).unwrap(), 1);
        assert!(layout.block_at(0, 100).is_err());
        assert!(layout.block_at(0, 32768).is_err());
    }
}
