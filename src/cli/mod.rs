use crate::client::TorrentClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::torrent::Torrent;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "swarmkit")]
#[command(about = "Piece-exchange client for the BitTorrent peer wire protocol", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a torrent
    Download {
        /// Path to the .torrent file
        #[arg(short, long)]
        torrent: PathBuf,

        /// Download directory
        #[arg(short, long, default_value = "./downloads")]
        output: PathBuf,

        /// Port to listen on
        #[arg(short, long, default_value = "6881")]
        port: u16,

        /// Maximum number of peers to connect to
        #[arg(short, long, default_value = "50")]
        max_peers: usize,

        /// Additional peer to dial, as ip:port (repeatable)
        #[arg(long = "peer")]
        peers: Vec<SocketAddr>,
    },

    /// Show information about a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },

    /// Hash the data already on disk and report how much of it is valid
    Check {
        /// Path to the .torrent file
        #[arg(short, long)]
        torrent: PathBuf,

        /// Download directory
        #[arg(short, long, default_value = "./downloads")]
        output: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Download {
                torrent,
                output,
                port,
                max_peers,
                peers,
            } => {
                let config = ClientConfig {
                    download_dir: output.clone(),
                    listen_port: *port,
                    max_peers: *max_peers,
                    ..ClientConfig::default()
                };

                let client = TorrentClient::new(config);
                client.download(torrent, peers).await?;
            }

            Commands::Info { torrent } => {
                show_torrent_info(torrent).await?;
            }

            Commands::Check { torrent, output } => {
                let config = ClientConfig {
                    download_dir: output.clone(),
                    ..ClientConfig::default()
                };
                let (_, download) = TorrentClient::new(config).open(torrent).await?;

                println!(
                    "{}: {}/{} pieces verified ({:.1}%)",
                    download.torrent().name(),
                    download.state().verified_count(),
                    download.torrent().piece_count(),
                    download.fraction_verified() * 100.0
                );
            }
        }

        Ok(())
    }
}

async fn show_torrent_info(torrent_path: &Path) -> Result<()> {
    let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;
    let torrent = Torrent::from_metainfo(&metainfo, ClientConfig::default().block_size)?;
    let layout = torrent.layout();

    println!("Torrent Information");
    println!("==================");
    println!("Name: {}", torrent.name());
    println!("Total Size: {} bytes", torrent.total_size());
    println!("Piece Length: {} bytes", layout.piece_size());
    println!("Number of Pieces: {}", layout.piece_count());
    println!("Block Size: {} bytes", layout.block_size());
    println!("Info Hash: {}", torrent.info_hash_hex());
    if metainfo.info.private {
        println!("Private: yes");
    }
    if let Some(comment) = &metainfo.comment {
        println!("Comment: {}", comment);
    }
    if let Some(created_by) = &metainfo.created_by {
        println!("Created By: {}", created_by);
    }

    println!("\nTrackers:");
    for tracker in metainfo.trackers() {
        println!("  - {}", tracker);
    }

    println!("\nFiles:");
    for (i, file) in torrent.files().iter().enumerate() {
        println!(
            "  {}: {} ({} bytes at offset {})",
            i + 1,
            file.path.display(),
            file.size,
            file.offset
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_arguments() {
        let cli = Cli::try_parse_from([
            "swarmkit",
            "download",
            "--torrent",
            "a.torrent",
            "--peer",
            "10.0.0.1:6881",
            "--peer",
            "10.0.0.2:51413",
        ])
        .unwrap();

        match cli.command {
            Commands::Download {
                torrent,
                output,
                port,
                peers,
                ..
            } => {
                assert_eq!(torrent, PathBuf::from("a.torrent"));
                assert_eq!(output, PathBuf::from("./downloads"));
                assert_eq!(port, 6881);
                assert_eq!(peers.len(), 2);
            }
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn test_bad_peer_address_rejected() {
        assert!(Cli::try_parse_from(["swarmkit", "download", "-t", "a", "--peer", "nope"]).is_err());
    }
}
