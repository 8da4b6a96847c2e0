use crate::error::ProtocolError;

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Bytes in a handshake besides the protocol string itself
pub const HANDSHAKE_FIXED_LEN: usize = 49;

/// Handshake message for peer wire protocol
/// Format: <pstrlen><pstr><reserved><info_hash><peer_id>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// 1 to 255 bytes, so its length always fits the prefix byte
    pstr: Vec<u8>,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            pstr: PROTOCOL_STRING.to_vec(),
            info_hash,
            peer_id,
        }
    }

    /// Handshake with a protocol string other than the standard one
    pub fn with_protocol(
        pstr: impl Into<Vec<u8>>,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<Self, ProtocolError> {
        let pstr = pstr.into();
        if pstr.is_empty() {
            return Err(ProtocolError::ZeroProtocolLength);
        }
        if pstr.len() > u8::MAX as usize {
            return Err(ProtocolError::ProtocolStringTooLong { len: pstr.len() });
        }
        Ok(Self {
            pstr,
            info_hash,
            peer_id,
        })
    }

    pub fn pstr(&self) -> &[u8] {
        &self.pstr
    }

    /// Serialized length: 49 + pstrlen
    pub fn encoded_len(&self) -> usize {
        HANDSHAKE_FIXED_LEN + self.pstr.len()
    }

    /// Reserved bytes are always written as zero
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.pstr.len() as u8);
        buf.extend_from_slice(&self.pstr);
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        buf
    }

    /// The length check comes first; a buffer that is long enough but
    /// declares an empty protocol string still fails.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        let pstrlen = *buf.first().ok_or(ProtocolError::TooShort {
            got: 0,
            expected: HANDSHAKE_FIXED_LEN,
        })? as usize;

        let expected = HANDSHAKE_FIXED_LEN + pstrlen;
        if buf.len() < expected {
            return Err(ProtocolError::TooShort {
                got: buf.len(),
                expected,
            });
        }
        if pstrlen == 0 {
            return Err(ProtocolError::ZeroProtocolLength);
        }

        let pstr = buf[1..1 + pstrlen].to_vec();
        // skip the 8 reserved bytes
        let hashes = &buf[1 + pstrlen + 8..expected];

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&hashes[..20]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&hashes[20..]);

        Ok(Handshake {
            pstr,
            info_hash,
            peer_id,
        })
    }
}
