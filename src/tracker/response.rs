use super::Peer;
use crate::bencode::BencodeValue;
use crate::error::{BittorrentError, Result};
use std::net::IpAddr;

/// Response from a tracker
#[derive(Debug, Clone)]
pub struct TrackerResponse {
    /// Seconds to wait before the next announce
    pub interval: u64,
    pub min_interval: Option<u64>,
    pub tracker_id: Option<String>,
    /// Seeders
    pub complete: Option<u64>,
    /// Leechers
    pub incomplete: Option<u64>,
    pub peers: Vec<Peer>,
}

fn tracker_error(message: &str) -> BittorrentError {
    BittorrentError::TrackerError(message.to_string())
}

fn optional_count(value: &BencodeValue, key: &str) -> Option<u64> {
    value
        .get(key)
        .and_then(BencodeValue::as_integer)
        .and_then(|i| u64::try_from(i).ok())
}

impl TrackerResponse {
    pub fn from_bencode(value: &BencodeValue) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(tracker_error("response must be a dict"));
        }

        if let Some(failure) = value.get("failure reason") {
            let reason = failure.as_str().unwrap_or("unknown failure");
            return Err(BittorrentError::TrackerError(reason.to_string()));
        }

        let interval =
            optional_count(value, "interval").ok_or_else(|| tracker_error("missing 'interval'"))?;

        let mut peers = match value.get("peers") {
            Some(BencodeValue::String(compact)) => Peer::from_compact_v4(compact),
            Some(BencodeValue::List(list)) => parse_peer_list(list)?,
            Some(_) => return Err(tracker_error("invalid 'peers' format")),
            None => Vec::new(),
        };
        if let Some(compact) = value.get("peers6").and_then(BencodeValue::as_bytes) {
            peers.extend(Peer::from_compact_v6(compact));
        }

        Ok(TrackerResponse {
            interval,
            min_interval: optional_count(value, "min interval"),
            tracker_id: value
                .get("tracker id")
                .and_then(BencodeValue::as_str)
                .map(String::from),
            complete: optional_count(value, "complete"),
            incomplete: optional_count(value, "incomplete"),
            peers,
        })
    }
}

fn parse_peer_list(list: &[BencodeValue]) -> Result<Vec<Peer>> {
    list.iter()
        .map(|entry| {
            let ip: IpAddr = entry
                .get("ip")
                .and_then(BencodeValue::as_str)
                .ok_or_else(|| tracker_error("missing peer 'ip'"))?
                .parse()
                .map_err(|_| tracker_error("invalid peer IP address"))?;

            let port = entry
                .get("port")
                .and_then(BencodeValue::as_integer)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| tracker_error("missing or invalid peer 'port'"))?;

            let mut peer = Peer::new(ip, port);
            peer.peer_id = entry
                .get("peer id")
                .and_then(BencodeValue::as_bytes)
                .and_then(|id| <[u8; 20]>::try_from(id).ok());
            Ok(peer)
        })
        .collect()
}
