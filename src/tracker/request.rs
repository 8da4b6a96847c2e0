use crate::download::Download;
use url::form_urlencoded::byte_serialize;

/// Events sent to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }
}

/// Parameters of one announce
#[derive(Debug, Clone)]
pub struct TrackerRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    /// Port we accept connections on
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Bytes not yet verified
    pub left: u64,
    pub event: Option<TrackerEvent>,
}

impl TrackerRequest {
    /// Snapshot the transfer counters of `download`
    pub fn for_download(
        download: &Download,
        peer_id: [u8; 20],
        port: u16,
        event: Option<TrackerEvent>,
    ) -> Self {
        Self {
            info_hash: download.info_hash(),
            peer_id,
            port,
            uploaded: download.uploaded(),
            downloaded: download.downloaded(),
            left: download.left(),
            event,
        }
    }

    /// Query string for the announce URL. Binary fields are encoded byte
    /// by byte; the result must not be passed through another encoder.
    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            encode_bytes(&self.info_hash),
            encode_bytes(&self.peer_id),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
        );

        if let Some(event) = self.event {
            query.push_str("&event=");
            query.push_str(event.as_str());
        }
        query
    }
}

fn encode_bytes(bytes: &[u8]) -> String {
    byte_serialize(bytes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(event: Option<TrackerEvent>) -> TrackerRequest {
        let mut info_hash = [0u8; 20];
        info_hash[0] = 0x12;
        info_hash[1] = b'a';
        info_hash[19] = 0xff;
        TrackerRequest {
            info_hash,
            peer_id: *b"-SK0001-abcdefghijkl",
            port: 6881,
            uploaded: 10,
            downloaded: 20,
            left: 30,
            event,
        }
    }

    #[test]
    fn test_binary_fields_encoded_once() {
        let query = request(None).to_query_string();
        assert!(query.starts_with(
            "info_hash=%12a%00%00%00%00%00%00%00%00%00%00%00%00%00%00%00%00%00%FF&"
        ));
        assert!(query.contains("&peer_id=-SK0001-abcdefghijkl&"));
        assert!(!query.contains("%25"));
        assert!(query.ends_with("&port=6881&uploaded=10&downloaded=20&left=30&compact=1"));
    }

    #[test]
    fn test_event_appended() {
        let query = request(Some(TrackerEvent::Completed)).to_query_string();
        assert!(query.ends_with("&compact=1&event=completed"));
    }
}
