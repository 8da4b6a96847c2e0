pub mod bitfield;
mod handshake;
pub mod message;
mod session;

pub use handshake::{Handshake, HANDSHAKE_FIXED_LEN, PROTOCOL_STRING};
pub use message::{BlockInfo, Message, MessageId, PeerMessage};
pub use session::{PeerSession, MAX_FRAME_LEN, MAX_REQUEST_LEN};

/// Choke and interest flags of one connection. Each flips only on an
/// explicit message: the `am_*` choke flag and `peer_interested` on what
/// the peer sends, `am_interested` and `peer_choked` on what we send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerFlags {
    /// Whether the peer is choking us
    pub am_choked: bool,
    /// Whether we are interested in the peer
    pub am_interested: bool,
    /// Whether we are choking the peer
    pub peer_choked: bool,
    /// Whether the peer is interested in us
    pub peer_interested: bool,
}

impl Default for PeerFlags {
    fn default() -> Self {
        Self {
            am_choked: true,
            am_interested: false,
            peer_choked: true,
            peer_interested: false,
        }
    }
}

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HandshakeSent,
    HandshakeConfirmed,
    Active,
    /// Terminal
    Disconnected,
}

/// What happened on a connection, as fed to the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    HandshakeWritten,
    /// The remote handshake arrived and named our info hash
    HandshakeVerified,
    BitfieldSent,
    /// A frame arrived; `None` for keep-alives and unknown ids
    Received(Option<MessageId>),
    /// We wrote a message after the bitfield
    Sent(Option<MessageId>),
    Failed,
}

impl SessionState {
    /// The state after `event`, or `None` when the event is not allowed here
    pub fn next(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (_, Failed) => Some(Disconnected),
            (Connecting, HandshakeWritten) => Some(HandshakeSent),
            (HandshakeSent, HandshakeVerified) => Some(HandshakeConfirmed),
            (HandshakeConfirmed, BitfieldSent) => Some(Active),
            (Active, Received(_)) | (Active, Sent(_)) => Some(Active),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_path() {
        let state = SessionState::Connecting
            .next(SessionEvent::HandshakeWritten)
            .and_then(|s| s.next(SessionEvent::HandshakeVerified))
            .and_then(|s| s.next(SessionEvent::BitfieldSent));
        assert_eq!(state, Some(SessionState::Active));
    }

    #[test]
    fn test_frames_only_in_active() {
        let have = SessionEvent::Received(Some(MessageId::Have));
        assert_eq!(SessionState::HandshakeSent.next(have), None);
        assert_eq!(SessionState::HandshakeConfirmed.next(have), None);
        assert_eq!(SessionState::Disconnected.next(have), None);
        assert_eq!(SessionState::Active.next(have), Some(SessionState::Active));
    }

    #[test]
    fn test_failure_from_anywhere_is_terminal() {
        for state in [
            SessionState::Connecting,
            SessionState::HandshakeSent,
            SessionState::HandshakeConfirmed,
            SessionState::Active,
        ] {
            assert_eq!(
                state.next(SessionEvent::Failed),
                Some(SessionState::Disconnected)
            );
        }
        assert_eq!(
            SessionState::Disconnected.next(SessionEvent::HandshakeWritten),
            None
        );
    }

    #[test]
    fn test_default_flags_start_choked() {
        let flags = PeerFlags::default();
        assert!(flags.am_choked && flags.peer_choked);
        assert!(!flags.am_interested && !flags.peer_interested);
    }
}
