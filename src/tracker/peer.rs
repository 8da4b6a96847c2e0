use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// A peer address handed out by a tracker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub addr: SocketAddr,
    pub peer_id: Option<[u8; 20]>,
}

impl Peer {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: None,
        }
    }

    /// Parse compact IPv4 peers (4 byte address + 2 byte port each).
    /// A trailing partial entry is dropped.
    pub fn from_compact_v4(data: &[u8]) -> Vec<Self> {
        data.chunks_exact(6)
            .map(|c| {
                let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
                Self::new(IpAddr::V4(ip), u16::from_be_bytes([c[4], c[5]]))
            })
            .collect()
    }

    /// Parse compact IPv6 peers (16 byte address + 2 byte port each)
    pub fn from_compact_v6(data: &[u8]) -> Vec<Self> {
        data.chunks_exact(18)
            .map(|c| {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&c[..16]);
                Self::new(
                    IpAddr::V6(Ipv6Addr::from(octets)),
                    u16::from_be_bytes([c[16], c[17]]),
                )
            })
            .collect()
    }
}
