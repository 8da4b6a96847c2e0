//! Piece exchange for the BitTorrent peer wire protocol: piece and block
//! bookkeeping, multi-file storage, SHA-1 verification, the wire codec and
//! per-peer sessions, plus the tracker and client plumbing around them.

pub mod bencode;
pub mod cli;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod peer;
pub mod piece;
pub mod storage;
pub mod torrent;
pub mod tracker;

pub use config::ClientConfig;
pub use download::Download;
pub use error::{BittorrentError, Result};
