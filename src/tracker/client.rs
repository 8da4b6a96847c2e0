use super::{TrackerRequest, TrackerResponse};
use crate::bencode::decode;
use crate::error::{BittorrentError, Result};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, info};

/// HTTP announce client for a single tracker URL at a time
pub struct TrackerClient {
    client: Client,
}

impl TrackerClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Announce to `tracker_url` and return its peer list
    pub async fn announce(
        &self,
        tracker_url: &str,
        request: &TrackerRequest,
    ) -> Result<TrackerResponse> {
        info!("Announcing to tracker: {}", tracker_url);

        let url = announce_url(tracker_url, request)?;
        debug!("Tracker request URL: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!("Tracker response status: {}, body length: {}", status, body.len());

        if !status.is_success() {
            return Err(BittorrentError::TrackerError(format!(
                "HTTP error: {}",
                status
            )));
        }

        let tracker_response = TrackerResponse::from_bencode(&decode(&body)?)?;
        info!(
            "Received {} peers from tracker (interval: {}s)",
            tracker_response.peers.len(),
            tracker_response.interval
        );
        Ok(tracker_response)
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Append the announce parameters to any query the tracker URL already has
fn announce_url(tracker_url: &str, request: &TrackerRequest) -> Result<Url> {
    let mut url = Url::parse(tracker_url)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(BittorrentError::TrackerError(format!(
            "unsupported tracker scheme: {}",
            url.scheme()
        )));
    }

    let ours = request.to_query_string();
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, ours),
        _ => ours,
    };
    url.set_query(Some(&query));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request() -> TrackerRequest {
        TrackerRequest {
            info_hash: [0xab; 20],
            peer_id: *b"-SK0001-000000000000",
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 100,
            event: None,
        }
    }

    #[test]
    fn test_existing_query_kept() {
        let url = announce_url("http://t.example/announce?key=abc", &request()).unwrap();
        let query = url.query().unwrap();
        assert!(query.starts_with("key=abc&info_hash=%AB%AB"));
        assert!(!query.contains("%25"));
    }

    #[test]
    fn test_udp_tracker_rejected() {
        assert!(announce_url("udp://t.example:80", &request()).is_err());
    }

    #[tokio::test]
    async fn test_announce_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).to_string();

            let body: &[u8] = b"d8:intervali900e5:peers6:\x0a\x00\x00\x01\x1a\xe1e";
            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            head
        });

        let client = TrackerClient::new();
        let response = client
            .announce(&format!("http://{}/announce", addr), &request())
            .await
            .unwrap();
        assert_eq!(response.interval, 900);
        assert_eq!(response.peers[0].addr, "10.0.0.1:6881".parse().unwrap());

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /announce?info_hash=%AB%AB"));
        assert!(head.contains("&left=100&compact=1 HTTP/1.1"));
    }
}
