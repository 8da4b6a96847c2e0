use super::Metainfo;
use crate::error::{BittorrentError, Result};
use crate::piece::PieceLayout;
use std::path::{Path, PathBuf};

/// A file's place in the torrent's flattened byte space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the torrent root directory
    pub path: PathBuf,
    pub size: u64,
    /// Starting byte of this file in the flattened content
    pub offset: u64,
}

impl FileEntry {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Validated, immutable description of one torrent's content
#[derive(Debug, Clone)]
pub struct Torrent {
    name: String,
    info_hash: [u8; 20],
    piece_hashes: Vec<[u8; 20]>,
    files: Vec<FileEntry>,
    layout: PieceLayout,
}

impl Torrent {
    /// Build a descriptor from already-parsed parts. `files` are given in
    /// content order; their offsets are assigned contiguously.
    pub fn new(
        name: impl Into<String>,
        info_hash: [u8; 20],
        piece_size: u32,
        block_size: u32,
        piece_hashes: Vec<[u8; 20]>,
        files: Vec<(PathBuf, u64)>,
    ) -> Result<Self> {
        if piece_size == 0 {
            return Err(BittorrentError::InvalidTorrent(
                "piece size must be positive".to_string(),
            ));
        }
        if files.is_empty() {
            return Err(BittorrentError::InvalidTorrent(
                "torrent must have at least one file".to_string(),
            ));
        }
        if piece_hashes.is_empty() {
            return Err(BittorrentError::InvalidTorrent(
                "torrent must have at least one piece".to_string(),
            ));
        }

        let mut offset = 0u64;
        let mut entries = Vec::with_capacity(files.len());
        for (path, size) in files {
            entries.push(FileEntry { path, size, offset });
            offset = offset.checked_add(size).ok_or_else(|| {
                BittorrentError::InvalidTorrent("file sizes overflow".to_string())
            })?;
        }
        let files = entries;

        let layout = PieceLayout::new(offset, piece_size, block_size)?;
        if layout.piece_count() as usize != piece_hashes.len() {
            return Err(BittorrentError::InvalidTorrent(format!(
                "{} bytes in {} byte pieces needs {} hashes, found {}",
                offset,
                piece_size,
                layout.piece_count(),
                piece_hashes.len()
            )));
        }

        Ok(Self {
            name: name.into(),
            info_hash,
            piece_hashes,
            files,
            layout,
        })
    }

    pub fn from_metainfo(metainfo: &Metainfo, block_size: u32) -> Result<Self> {
        let info = &metainfo.info;
        let piece_size = u32::try_from(info.piece_length).map_err(|_| {
            BittorrentError::InvalidTorrent(format!(
                "piece length {} is too large",
                info.piece_length
            ))
        })?;

        // single-file torrents store the file directly in the download dir
        let files = info
            .files
            .iter()
            .map(|f| (f.path.iter().collect::<PathBuf>(), f.length))
            .collect();

        let torrent = Self::new(
            info.name.clone(),
            metainfo.info_hash,
            piece_size,
            block_size,
            info.pieces.clone(),
            files,
        )?;

        if info.multi_file && torrent.files.len() == 1 {
            // one-entry `files` list still lives under the torrent name
            return Ok(torrent.into_directory());
        }
        Ok(torrent)
    }

    fn into_directory(mut self) -> Self {
        let root = PathBuf::from(&self.name);
        for file in &mut self.files {
            file.path = root.join(&file.path);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    pub fn layout(&self) -> PieceLayout {
        self.layout
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn total_size(&self) -> u64 {
        self.layout.total_size()
    }

    pub fn piece_count(&self) -> u32 {
        self.layout.piece_count()
    }

    pub fn piece_hash(&self, piece: u32) -> Result<&[u8; 20]> {
        self.layout.check_piece(piece)?;
        Ok(&self.piece_hashes[piece as usize])
    }

    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1
    }

    /// Directory the files are laid out under: the torrent's own name when
    /// there is more than one file, the download directory itself otherwise
    pub fn content_root(&self, download_dir: &Path) -> PathBuf {
        if self.is_multi_file() {
            download_dir.join(&self.name)
        } else {
            download_dir.to_path_buf()
        }
    }
}
