use super::bitfield;
use super::message::{self, LENGTH_PREFIX};
use super::{
    BlockInfo, Handshake, PeerFlags, PeerMessage, SessionEvent, SessionState, HANDSHAKE_FIXED_LEN,
};
use crate::config::{ClientConfig, HavePolicy};
use crate::download::Download;
use crate::error::{BittorrentError, ProtocolError, Result};
use crate::piece::{BlockPicker, BlockRef};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Largest block we serve for a single `Request`
pub const MAX_REQUEST_LEN: u32 = 128 * 1024;

/// Largest frame we are willing to buffer
pub const MAX_FRAME_LEN: usize = (1 << 20) + 13;

/// One peer connection: handshake, flags, the remote's pieces, and the
/// frames in both directions
pub struct PeerSession<S> {
    /// Peer address or other name for logs
    label: String,
    stream: S,
    download: Arc<Download>,
    local_id: [u8; 20],
    remote_id: Option<[u8; 20]>,
    state: SessionState,
    flags: PeerFlags,
    has_pieces: Vec<bool>,
    /// Blocks requested from the peer and not yet received
    pending: HashSet<BlockRef>,
    read_buf: BytesMut,
    last_active: Instant,
    last_sent: Instant,
    have_policy: HavePolicy,
}

/// Errors that end the connection. Contract violations by our own caller
/// and local disk trouble don't.
fn is_fatal(err: &BittorrentError) -> bool {
    matches!(
        err,
        BittorrentError::Protocol(_) | BittorrentError::IoError(_) | BittorrentError::PeerError(_)
    )
}

impl PeerSession<TcpStream> {
    /// Dial `addr`, bounded by the configured connect timeout, and run the
    /// handshake and bitfield exchange
    pub async fn connect(
        addr: SocketAddr,
        download: Arc<Download>,
        local_id: [u8; 20],
        config: &ClientConfig,
    ) -> Result<Self> {
        info!("Connecting to peer: {}", addr);

        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(BittorrentError::PeerError(format!(
                    "Failed to connect to {}: {}",
                    addr, e
                )))
            }
            Err(_) => {
                return Err(BittorrentError::PeerError(format!(
                    "Timed out connecting to {}",
                    addr
                )))
            }
        };

        Self::initiate(stream, addr.to_string(), download, local_id, config).await
    }
}

impl<S> PeerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(
        stream: S,
        label: String,
        download: Arc<Download>,
        local_id: [u8; 20],
        config: &ClientConfig,
    ) -> Self {
        let piece_count = download.torrent().piece_count() as usize;
        let now = Instant::now();
        Self {
            label,
            stream,
            download,
            local_id,
            remote_id: None,
            state: SessionState::Connecting,
            flags: PeerFlags::default(),
            has_pieces: vec![false; piece_count],
            pending: HashSet::new(),
            read_buf: BytesMut::with_capacity(32 * 1024),
            last_active: now,
            last_sent: now,
            have_policy: config.have_policy,
        }
    }

    /// Outbound side: send our handshake, check theirs, send our bitfield
    pub async fn initiate(
        stream: S,
        label: impl Into<String>,
        download: Arc<Download>,
        local_id: [u8; 20],
        config: &ClientConfig,
    ) -> Result<Self> {
        let mut session = Self::new(stream, label.into(), download, local_id, config);
        let result = session.outbound_handshake().await;
        session.settle(result)?;

        info!("Successfully connected to peer: {}", session.label);
        Ok(session)
    }

    /// Inbound side: check the remote handshake before revealing anything,
    /// then reply with our handshake and bitfield
    pub async fn accept(
        stream: S,
        label: impl Into<String>,
        download: Arc<Download>,
        local_id: [u8; 20],
        config: &ClientConfig,
    ) -> Result<Self> {
        let mut session = Self::new(stream, label.into(), download, local_id, config);
        let result = session.inbound_handshake().await;
        session.settle(result)?;

        info!("Accepted peer: {}", session.label);
        Ok(session)
    }

    async fn outbound_handshake(&mut self) -> Result<()> {
        self.write_handshake().await?;
        self.advance(SessionEvent::HandshakeWritten)?;
        debug!("Sent handshake to {}", self.label);

        let remote = self.read_handshake().await?;
        self.confirm(&remote)?;
        self.send_bitfield().await
    }

    async fn inbound_handshake(&mut self) -> Result<()> {
        let remote = self.read_handshake().await?;
        if remote.info_hash != self.download.info_hash() {
            return Err(ProtocolError::InfoHashMismatch.into());
        }

        self.write_handshake().await?;
        self.advance(SessionEvent::HandshakeWritten)?;
        self.confirm(&remote)?;
        self.send_bitfield().await
    }

    async fn write_handshake(&mut self) -> Result<()> {
        let handshake = Handshake::new(self.download.info_hash(), self.local_id);
        self.stream.write_all(&handshake.serialize()).await?;
        self.stream.flush().await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    async fn read_handshake(&mut self) -> Result<Handshake> {
        let mut pstrlen = [0u8; 1];
        self.stream.read_exact(&mut pstrlen).await?;
        if pstrlen[0] == 0 {
            return Err(ProtocolError::ZeroProtocolLength.into());
        }

        let mut buf = vec![0u8; HANDSHAKE_FIXED_LEN + pstrlen[0] as usize];
        buf[0] = pstrlen[0];
        self.stream.read_exact(&mut buf[1..]).await?;
        self.last_active = Instant::now();

        Ok(Handshake::parse(&buf)?)
    }

    /// The remote id is only kept once the info hash matched
    fn confirm(&mut self, remote: &Handshake) -> Result<()> {
        if remote.info_hash != self.download.info_hash() {
            return Err(ProtocolError::InfoHashMismatch.into());
        }
        if remote.pstr() != super::PROTOCOL_STRING {
            debug!(
                "Peer {} speaks {:?}",
                self.label,
                String::from_utf8_lossy(remote.pstr())
            );
        }

        self.advance(SessionEvent::HandshakeVerified)?;
        self.remote_id = Some(remote.peer_id);
        Ok(())
    }

    async fn send_bitfield(&mut self) -> Result<()> {
        let packed = bitfield::pack(&self.download.state().verified());
        let message = PeerMessage::Bitfield {
            bitfield: Bytes::from(packed),
        };
        self.write_message(&message).await?;
        self.advance(SessionEvent::BitfieldSent)
    }

    fn check_event(&self, event: SessionEvent) -> Result<SessionState> {
        self.state.next(event).ok_or_else(|| {
            ProtocolError::UnexpectedEvent {
                state: format!("{:?}", self.state),
                event: format!("{:?}", event),
            }
            .into()
        })
    }

    fn advance(&mut self, event: SessionEvent) -> Result<()> {
        self.state = self.check_event(event)?;
        Ok(())
    }

    /// Fatal errors move the session to `Disconnected`
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if is_fatal(e) && self.state != SessionState::Disconnected {
                warn!("Dropping peer {}: {}", self.label, e);
                self.state = SessionState::Disconnected;
            }
        }
        result
    }

    async fn write_message(&mut self, message: &PeerMessage) -> Result<()> {
        self.stream.write_all(&message.to_bytes()).await?;
        self.stream.flush().await?;
        self.last_sent = Instant::now();
        debug!("Sent message to {}: {:?}", self.label, message.id());
        Ok(())
    }

    async fn send(&mut self, message: &PeerMessage) -> Result<()> {
        let result = match self.check_event(SessionEvent::Sent(message.id())) {
            Ok(_) => self.write_message(message).await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    /// Read the next frame. Cancel-safe: bytes of a partly received frame
    /// stay buffered for the next call.
    pub async fn read_message(&mut self) -> Result<PeerMessage> {
        let result = self.read_frame().await;
        self.settle(result)
    }

    async fn read_frame(&mut self) -> Result<PeerMessage> {
        self.check_event(SessionEvent::Received(None))?;

        loop {
            if self.read_buf.len() >= LENGTH_PREFIX {
                let b = &self.read_buf;
                let declared = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize;
                if declared > MAX_FRAME_LEN {
                    return Err(ProtocolError::FrameTooLarge { len: declared }.into());
                }
            }

            match message::parse(&self.read_buf) {
                Ok(frame) => {
                    let consumed = frame
                        .as_ref()
                        .map_or(LENGTH_PREFIX, |m| LENGTH_PREFIX + 1 + m.payload.len());
                    self.read_buf.advance(consumed);
                    self.last_active = Instant::now();

                    let message = PeerMessage::decode(frame)?;
                    self.advance(SessionEvent::Received(message.id()))?;
                    return Ok(message);
                }
                Err(ProtocolError::TooShortForLength { .. })
                | Err(ProtocolError::IncompleteMessage { .. }) => {
                    if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                        return Err(ProtocolError::ConnectionClosed.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply an inbound message to the session. Block writes run on their
    /// own task, so dropping this future never abandons a half-done write.
    pub async fn handle_message(&mut self, message: &PeerMessage) -> Result<()> {
        let result = self.apply(message).await;
        self.settle(result)
    }

    /// `read_message` followed by `handle_message`
    pub async fn receive(&mut self) -> Result<PeerMessage> {
        let message = self.read_message().await?;
        self.handle_message(&message).await?;
        Ok(message)
    }

    async fn apply(&mut self, message: &PeerMessage) -> Result<()> {
        self.check_event(SessionEvent::Received(message.id()))?;

        match message {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => {
                self.flags.am_choked = true;
                // a choking peer drops our outstanding requests
                self.pending.clear();
            }
            PeerMessage::Unchoke => self.flags.am_choked = false,
            PeerMessage::Interested => self.flags.peer_interested = true,
            PeerMessage::NotInterested => self.flags.peer_interested = false,
            PeerMessage::Have { piece_index } => self.record_have(*piece_index)?,
            PeerMessage::Bitfield { bitfield: bits } => {
                self.has_pieces = bitfield::unpack(bits, self.has_pieces.len());
            }
            PeerMessage::Request { block } => self.serve(*block).await?,
            PeerMessage::Piece {
                piece_index,
                begin,
                data,
            } => self.store_block(*piece_index, *begin, data.clone()).await,
            PeerMessage::Cancel { block } => {
                debug!("Peer {} cancelled {:?}", self.label, block);
            }
            PeerMessage::Unknown { id, .. } => {
                debug!("Ignoring message id {} from {}", id, self.label);
            }
        }
        Ok(())
    }

    fn record_have(&mut self, piece: u32) -> Result<()> {
        match self.has_pieces.get_mut(piece as usize) {
            Some(has) => *has = true,
            None if self.have_policy == HavePolicy::Reject => {
                return Err(ProtocolError::HaveOutOfRange { index: piece }.into());
            }
            None => debug!("Ignoring have {} from {}", piece, self.label),
        }
        Ok(())
    }

    async fn serve(&mut self, block: BlockInfo) -> Result<()> {
        if self.flags.peer_choked {
            debug!("Refusing request from choked peer {}", self.label);
            return Ok(());
        }
        if block.length == 0 || block.length > MAX_REQUEST_LEN {
            warn!("Ignoring request of {} bytes from {}", block.length, self.label);
            return Ok(());
        }
        if !self.download.state().is_verified(block.piece_index) {
            debug!(
                "Peer {} requested piece {} we don't have",
                self.label, block.piece_index
            );
            return Ok(());
        }

        let data = match self
            .download
            .storage()
            .read_block(block.piece_index, block.begin, block.length)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                warn!("Cannot serve {:?} to {}: {}", block, self.label, e);
                return Ok(());
            }
        };

        self.send(&PeerMessage::Piece {
            piece_index: block.piece_index,
            begin: block.begin,
            data: Bytes::from(data),
        })
        .await?;
        self.download.add_uploaded(block.length as u64);
        Ok(())
    }

    /// Hand a received block to storage. A block that can't be stored stays
    /// unacquired and will be requested again. Blocks we never asked this
    /// peer for, and blocks of pieces already written in full, are dropped
    /// so nothing lands under a hash check in progress.
    async fn store_block(&mut self, piece: u32, begin: u32, data: Bytes) {
        let block = match self.download.torrent().layout().block_at(piece, begin) {
            Ok(block) => block,
            Err(e) => {
                warn!("Discarding block from {}: {}", self.label, e);
                return;
            }
        };
        if !self.pending.remove(&(piece, block)) {
            debug!(
                "Dropping unrequested block {}/{} from {}",
                piece, block, self.label
            );
            return;
        }

        let state = self.download.state();
        if state.is_verified(piece)
            || state.is_verifying(piece)
            || state.is_block_acquired(piece, block)
        {
            debug!("Block {}/{} no longer needed, dropping", piece, block);
            return;
        }

        let len = data.len() as u64;
        let storage = Arc::clone(self.download.storage());
        let write = tokio::spawn(async move { storage.write_block(piece, block, &data).await });

        match write.await {
            Ok(Ok(complete)) => {
                self.download.add_downloaded(len);
                debug!("Stored block {}/{} from {}", piece, block, self.label);
                if complete && self.download.verifier().spawn_verify(piece).is_some() {
                    debug!("Piece {} fully acquired, verifying", piece);
                }
            }
            Ok(Err(e)) => warn!(
                "Failed to store block {}/{} from {}: {}",
                piece, block, self.label, e
            ),
            Err(e) => warn!("Block write task for piece {} failed: {}", piece, e),
        }
    }

    pub async fn send_keep_alive(&mut self) -> Result<()> {
        self.send(&PeerMessage::KeepAlive).await
    }

    pub async fn send_interested(&mut self) -> Result<()> {
        self.send(&PeerMessage::Interested).await?;
        self.flags.am_interested = true;
        Ok(())
    }

    pub async fn send_not_interested(&mut self) -> Result<()> {
        self.send(&PeerMessage::NotInterested).await?;
        self.flags.am_interested = false;
        Ok(())
    }

    pub async fn send_choke(&mut self) -> Result<()> {
        self.send(&PeerMessage::Choke).await?;
        self.flags.peer_choked = true;
        Ok(())
    }

    pub async fn send_unchoke(&mut self) -> Result<()> {
        self.send(&PeerMessage::Unchoke).await?;
        self.flags.peer_choked = false;
        Ok(())
    }

    pub async fn send_have(&mut self, piece: u32) -> Result<()> {
        self.download.torrent().layout().check_piece(piece)?;
        self.send(&PeerMessage::Have { piece_index: piece }).await
    }

    fn block_info(&self, piece: u32, block: u32) -> Result<BlockInfo> {
        let layout = self.download.torrent().layout();
        let length = layout.block_len(piece, block)?;
        Ok(BlockInfo::new(piece, block * layout.block_size(), length))
    }

    /// Ask the peer for one block. Refused while the peer chokes us.
    pub async fn request_block(&mut self, piece: u32, block: u32) -> Result<()> {
        if self.flags.am_choked {
            return Err(BittorrentError::Choked);
        }
        let info = self.block_info(piece, block)?;
        self.send(&PeerMessage::Request { block: info }).await?;
        self.pending.insert((piece, block));
        Ok(())
    }

    pub async fn cancel_block(&mut self, piece: u32, block: u32) -> Result<()> {
        let info = self.block_info(piece, block)?;
        self.send(&PeerMessage::Cancel { block: info }).await?;
        self.pending.remove(&(piece, block));
        Ok(())
    }

    /// Close the connection. Writes already handed to storage finish on
    /// their own.
    pub async fn disconnect(&mut self) {
        if self.state != SessionState::Disconnected {
            info!("Disconnecting from peer: {}", self.label);
            self.state = SessionState::Disconnected;
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.label, e);
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn flags(&self) -> PeerFlags {
        self.flags
    }

    pub fn remote_id(&self) -> Option<[u8; 20]> {
        self.remote_id
    }

    pub fn has_pieces(&self) -> &[bool] {
        &self.has_pieces
    }

    pub fn pending(&self) -> &HashSet<BlockRef> {
        &self.pending
    }

    pub fn download(&self) -> &Arc<Download> {
        &self.download
    }

    /// Whether the peer has a piece we still need
    pub fn is_interesting(&self) -> bool {
        BlockPicker::new(self.download.state(), &self.has_pieces).is_interesting()
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    /// Time since the last frame arrived
    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// Time since we last wrote anything
    pub fn quiet_for(&self) -> Duration {
        self.last_sent.elapsed()
    }
}
