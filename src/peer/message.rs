use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the big-endian length prefix on every message
pub const LENGTH_PREFIX: usize = 4;

/// Message type ids of the peer wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl MessageId {
    pub fn from_u8(id: u8) -> Option<Self> {
        Some(match id {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            _ => return None,
        })
    }
}

/// One length-prefixed frame. The id is kept as the raw byte so that
/// unknown ids survive framing and are left to the session to judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u8,
    pub payload: Bytes,
}

impl Message {
    pub fn new(id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id as u8,
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> Option<MessageId> {
        MessageId::from_u8(self.id)
    }
}

/// Frame a message; `None` is a keep-alive and yields four zero bytes
pub fn serialize(message: Option<&Message>) -> Vec<u8> {
    let Some(message) = message else {
        return vec![0u8; LENGTH_PREFIX];
    };

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + 1 + message.payload.len());
    buf.put_u32((1 + message.payload.len()) as u32);
    buf.put_u8(message.id);
    buf.put_slice(&message.payload);
    buf.to_vec()
}

/// Parse the frame at the start of `buf`. A zero length is a keep-alive
/// (`None`). Bytes past the end of the frame are not looked at.
pub fn parse(buf: &[u8]) -> Result<Option<Message>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX {
        return Err(ProtocolError::TooShortForLength { got: buf.len() });
    }

    let mut cursor = buf;
    let length = cursor.get_u32() as usize;
    if length == 0 {
        return Ok(None);
    }

    if cursor.len() < length {
        return Err(ProtocolError::IncompleteMessage {
            expected: LENGTH_PREFIX + length,
            got: buf.len(),
        });
    }

    let id = cursor.get_u8();
    Ok(Some(Message {
        id,
        payload: Bytes::copy_from_slice(&cursor[..length - 1]),
    }))
}

/// Information about a block within a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    pub piece_index: u32,
    /// Byte offset within the piece
    pub begin: u32,
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, begin: u32, length: u32) -> Self {
        Self {
            piece_index,
            begin,
            length,
        }
    }
}

/// A frame decoded into what it means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Bytes },
    Request { block: BlockInfo },
    Piece {
        piece_index: u32,
        begin: u32,
        data: Bytes,
    },
    Cancel { block: BlockInfo },
    /// Id outside the known set; carried through untouched
    Unknown { id: u8, payload: Bytes },
}

fn expect_len(id: MessageId, payload: &Bytes, len: usize) -> Result<(), ProtocolError> {
    if payload.len() != len {
        return Err(ProtocolError::InvalidPayload {
            id: id as u8,
            len: payload.len(),
        });
    }
    Ok(())
}

fn block_info(mut payload: Bytes) -> BlockInfo {
    BlockInfo::new(payload.get_u32(), payload.get_u32(), payload.get_u32())
}

impl PeerMessage {
    /// Known message id; `None` for keep-alives and unknown ids
    pub fn id(&self) -> Option<MessageId> {
        match self {
            PeerMessage::KeepAlive | PeerMessage::Unknown { .. } => None,
            PeerMessage::Choke => Some(MessageId::Choke),
            PeerMessage::Unchoke => Some(MessageId::Unchoke),
            PeerMessage::Interested => Some(MessageId::Interested),
            PeerMessage::NotInterested => Some(MessageId::NotInterested),
            PeerMessage::Have { .. } => Some(MessageId::Have),
            PeerMessage::Bitfield { .. } => Some(MessageId::Bitfield),
            PeerMessage::Request { .. } => Some(MessageId::Request),
            PeerMessage::Piece { .. } => Some(MessageId::Piece),
            PeerMessage::Cancel { .. } => Some(MessageId::Cancel),
        }
    }

    /// Check the payload against the message id and pull out its fields
    pub fn decode(frame: Option<Message>) -> Result<Self, ProtocolError> {
        let Some(Message { id, mut payload }) = frame else {
            return Ok(PeerMessage::KeepAlive);
        };
        let Some(kind) = MessageId::from_u8(id) else {
            return Ok(PeerMessage::Unknown { id, payload });
        };

        match kind {
            MessageId::Choke
            | MessageId::Unchoke
            | MessageId::Interested
            | MessageId::NotInterested => expect_len(kind, &payload, 0)?,
            MessageId::Have => expect_len(kind, &payload, 4)?,
            MessageId::Request | MessageId::Cancel => expect_len(kind, &payload, 12)?,
            MessageId::Piece if payload.len() < 8 => {
                return Err(ProtocolError::InvalidPayload {
                    id,
                    len: payload.len(),
                })
            }
            MessageId::Piece | MessageId::Bitfield => {}
        }

        Ok(match kind {
            MessageId::Choke => PeerMessage::Choke,
            MessageId::Unchoke => PeerMessage::Unchoke,
            MessageId::Interested => PeerMessage::Interested,
            MessageId::NotInterested => PeerMessage::NotInterested,
            MessageId::Have => PeerMessage::Have {
                piece_index: payload.get_u32(),
            },
            MessageId::Bitfield => PeerMessage::Bitfield { bitfield: payload },
            MessageId::Request => PeerMessage::Request {
                block: block_info(payload),
            },
            MessageId::Cancel => PeerMessage::Cancel {
                block: block_info(payload),
            },
            MessageId::Piece => PeerMessage::Piece {
                piece_index: payload.get_u32(),
                begin: payload.get_u32(),
                data: payload,
            },
        })
    }

    /// The frame for this message; keep-alive has none
    pub fn encode(&self) -> Option<Message> {
        let block_payload = |block: &BlockInfo| {
            let mut buf = BytesMut::with_capacity(12);
            buf.put_u32(block.piece_index);
            buf.put_u32(block.begin);
            buf.put_u32(block.length);
            buf.freeze()
        };

        let message = match self {
            PeerMessage::KeepAlive => return None,
            PeerMessage::Choke => Message::new(MessageId::Choke, Bytes::new()),
            PeerMessage::Unchoke => Message::new(MessageId::Unchoke, Bytes::new()),
            PeerMessage::Interested => Message::new(MessageId::Interested, Bytes::new()),
            PeerMessage::NotInterested => Message::new(MessageId::NotInterested, Bytes::new()),
            PeerMessage::Have { piece_index } => {
                Message::new(MessageId::Have, piece_index.to_be_bytes().to_vec())
            }
            PeerMessage::Bitfield { bitfield } => {
                Message::new(MessageId::Bitfield, bitfield.clone())
            }
            PeerMessage::Request { block } => {
                Message::new(MessageId::Request, block_payload(block))
            }
            PeerMessage::Cancel { block } => Message::new(MessageId::Cancel, block_payload(block)),
            PeerMessage::Piece {
                piece_index,
                begin,
                data,
            } => {
                let mut buf = BytesMut::with_capacity(8 + data.len());
                buf.put_u32(*piece_index);
                buf.put_u32(*begin);
                buf.put_slice(data);
                Message::new(MessageId::Piece, buf.freeze())
            }
            PeerMessage::Unknown { id, payload } => Message {
                id: *id,
                payload: payload.clone(),
            },
        };
        Some(message)
    }

    /// Wire bytes including the length prefix
    pub fn to_bytes(&self) -> Vec<u8> {
        serialize(self.encode().as_ref())
    }
}
