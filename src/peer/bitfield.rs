//! Packing of piece-availability flags into the wire bitfield: piece `i`
//! lives in byte `i / 8` at bit `7 - i % 8`, spare trailing bits are zero.

pub fn pack(pieces: &[bool]) -> Vec<u8> {
    let mut bitfield = vec![0u8; pieces.len().div_ceil(8)];
    for (i, _) in pieces.iter().enumerate().filter(|(_, &has)| has) {
        bitfield[i / 8] |= 1 << (7 - (i % 8));
    }
    bitfield
}

/// Flags for `piece_count` pieces. Pieces past the end of a short
/// bitfield stay `false`; spare bits past `piece_count` are ignored.
pub fn unpack(bitfield: &[u8], piece_count: usize) -> Vec<bool> {
    (0..piece_count)
        .map(|i| {
            bitfield
                .get(i / 8)
                .map_or(false, |byte| (byte >> (7 - (i % 8))) & 1 == 1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_is_msb_first() {
        let pieces = [true, false, false, false, false, false, false, true, true];
        assert_eq!(pack(&pieces), vec![0b1000_0001, 0b1000_0000]);
        assert!(pack(&[]).is_empty());
    }

    #[test]
    fn test_unpack_matches_pack() {
        let pieces = [false, true, true, false, true, false, false, false, false, true];
        assert_eq!(unpack(&pack(&pieces), pieces.len()), pieces.to_vec());
    }

    #[test]
    fn test_short_bitfield_leaves_trailing_pieces_false() {
        assert_eq!(
            unpack(&[0xff], 10),
            vec![true, true, true, true, true, true, true, true, false, false]
        );
    }
}
