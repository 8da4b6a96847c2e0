use crate::error::{BittorrentError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Standard block size (16 KiB)
pub const DEFAULT_BLOCK_SIZE: u32 = 16 * 1024;

/// What to do with a `Have` naming a piece index we don't know about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HavePolicy {
    /// Drop the announcement and keep the connection
    #[default]
    Ignore,
    /// Treat it as a protocol violation
    Reject,
}

/// Configuration for the BitTorrent client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub download_dir: PathBuf,
    pub listen_port: u16,
    pub max_peers: usize,
    /// Request granularity within a piece
    pub block_size: u32,
    pub connect_timeout: Duration,
    /// Idle bound after which the peer driver drops a connection
    pub peer_timeout: Duration,
    pub keep_alive_interval: Duration,
    /// Outstanding block requests per connection
    pub max_pending_requests: usize,
    pub have_policy: HavePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            listen_port: 6881,
            max_peers: 50,
            block_size: DEFAULT_BLOCK_SIZE,
            connect_timeout: Duration::from_secs(10),
            peer_timeout: Duration::from_secs(120),
            keep_alive_interval: Duration::from_secs(90),
            max_pending_requests: 5,
            have_policy: HavePolicy::Ignore,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(BittorrentError::InvalidArgument(
                "block size must be positive".to_string(),
            ));
        }
        if self.max_pending_requests == 0 {
            return Err(BittorrentError::InvalidArgument(
                "at least one pending request must be allowed".to_string(),
            ));
        }
        if self.connect_timeout.is_zero()
            || self.peer_timeout.is_zero()
            || self.keep_alive_interval.is_zero()
        {
            return Err(BittorrentError::InvalidArgument(
                "timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_size, 16384);
        assert_eq!(config.have_policy, HavePolicy::Ignore);
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let config = ClientConfig {
            block_size: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BittorrentError::InvalidArgument(_))
        ));
    }
}
