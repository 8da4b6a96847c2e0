use crate::error::{BittorrentError, Result, StorageError};
use crate::piece::{DownloadState, PieceLayout};
use crate::torrent::Torrent;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Maps the torrent's flattened byte space onto its files on disk
pub struct Storage {
    /// Directory the file entries are relative to
    root: PathBuf,
    files: Vec<StoredFile>,
    layout: PieceLayout,
    state: Arc<DownloadState>,
}

struct StoredFile {
    path: PathBuf,
    size: u64,
    /// Global offset in the torrent
    offset: u64,
    /// Serializes writers of this file only
    lock: Mutex<()>,
}

/// The part of a global range that falls inside one file
struct Span<'a> {
    file: &'a StoredFile,
    /// Position inside the file
    file_start: u64,
    /// Position inside the caller's buffer
    buf_start: usize,
    len: usize,
}

impl Storage {
    pub fn new(download_dir: &Path, torrent: &Torrent, state: Arc<DownloadState>) -> Self {
        let root = torrent.content_root(download_dir);
        let files = torrent
            .files()
            .iter()
            .map(|entry| StoredFile {
                path: root.join(&entry.path),
                size: entry.size,
                offset: entry.offset,
                lock: Mutex::new(()),
            })
            .collect();

        Self {
            root,
            files,
            layout: torrent.layout(),
            state,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create every directory the files will be written into. Run once
    /// before any download starts; `write` never creates directories.
    pub async fn create_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        for file in &self.files {
            if let Some(parent) = file.path.parent() {
                fs::create_dir_all(parent).await?;
            }
        }

        info!(
            "Storage initialized under {}: {} files, {} bytes total",
            self.root.display(),
            self.files.len(),
            self.layout.total_size()
        );
        Ok(())
    }

    /// Files overlapping `[start, start+len)`, in offset order
    fn spans(&self, start: u64, len: usize) -> Result<Vec<Span<'_>>> {
        let end = start
            .checked_add(len as u64)
            .filter(|&end| end <= self.layout.total_size())
            .ok_or(StorageError::OutOfBounds {
                start,
                length: len as u64,
                total: self.layout.total_size(),
            })?;

        Ok(self
            .files
            .iter()
            .filter(|file| end > file.offset && start < file.offset + file.size)
            .map(|file| {
                let overlap_start = start.max(file.offset);
                let overlap_end = end.min(file.offset + file.size);
                Span {
                    file,
                    file_start: overlap_start - file.offset,
                    buf_start: (overlap_start - start) as usize,
                    len: (overlap_end - overlap_start) as usize,
                }
            })
            .collect())
    }

    /// Read `length` bytes starting at global offset `start`, possibly
    /// spanning several files. Either every requested byte is returned or
    /// the call fails.
    pub async fn read(&self, start: u64, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];

        for span in self.spans(start, length)? {
            let path = &span.file.path;
            let mut file = match File::open(path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StorageError::NotFound(path.clone()).into())
                }
                Err(e) => return Err(e.into()),
            };
            file.seek(SeekFrom::Start(span.file_start)).await?;

            let target = &mut buf[span.buf_start..span.buf_start + span.len];
            let mut filled = 0;
            while filled < target.len() {
                match file.read(&mut target[filled..]).await? {
                    0 => break,
                    n => filled += n,
                }
            }

            if filled != span.len {
                return Err(StorageError::ShortRead {
                    path: path.clone(),
                    expected: span.len,
                    got: filled,
                }
                .into());
            }
        }

        Ok(buf)
    }

    /// Write `data` at global offset `start`, possibly spanning several
    /// files. Only the locks of the touched files are held, one at a time,
    /// and only around the seek and write.
    pub async fn write(&self, start: u64, data: &[u8]) -> Result<()> {
        let spans = self.spans(start, data.len())?;

        for span in &spans {
            if let Some(dir) = span.file.path.parent() {
                if !fs::try_exists(dir).await? {
                    return Err(StorageError::MissingDirectory(dir.to_path_buf()).into());
                }
            }
        }

        let mut written = 0usize;
        for span in spans {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&span.file.path)
                .await?;

            let _guard = span.file.lock.lock().await;
            file.seek(SeekFrom::Start(span.file_start)).await?;
            file.write_all(&data[span.buf_start..span.buf_start + span.len])
                .await?;
            file.flush().await?;
            written += span.len;

            debug!(
                "Wrote {} bytes to {:?} at offset {}",
                span.len, span.file.path, span.file_start
            );
        }

        if written != data.len() {
            return Err(StorageError::PartialWrite {
                start,
                expected: data.len(),
                written,
            }
            .into());
        }
        Ok(())
    }

    pub async fn read_piece(&self, piece: u32) -> Result<Vec<u8>> {
        let len = self.layout.piece_len(piece)?;
        self.read(self.layout.piece_offset(piece), len as usize).await
    }

    /// Read `length` bytes at `begin` inside a piece, as asked for by a
    /// `Request`
    pub async fn read_block(&self, piece: u32, begin: u32, length: u32) -> Result<Vec<u8>> {
        let piece_len = self.layout.piece_len(piece)?;
        if begin as u64 + length as u64 > piece_len as u64 {
            return Err(BittorrentError::InvalidArgument(format!(
                "range {}+{} exceeds piece {} of {} bytes",
                begin, length, piece, piece_len
            )));
        }
        self.read(self.layout.piece_offset(piece) + begin as u64, length as usize)
            .await
    }

    /// Write one block and, only once the bytes are on disk, mark it
    /// acquired. Returns whether the piece is now fully acquired.
    pub async fn write_block(&self, piece: u32, block: u32, data: &[u8]) -> Result<bool> {
        let expected = self.layout.block_len(piece, block)?;
        if data.len() != expected as usize {
            return Err(BittorrentError::InvalidArgument(format!(
                "block {} of piece {} is {} bytes, got {}",
                block,
                piece,
                expected,
                data.len()
            )));
        }

        self.write(self.layout.block_offset(piece, block), data).await?;
        self.state.mark_block_acquired(piece, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn two_file_torrent() -> Torrent {
        Torrent::new(
            "pair",
            [0u8; 20],
            8,
            4,
            vec![[0u8; 20]; 3],
            vec![("a".into(), 10), ("b".into(), 10)],
        )
        .unwrap()
    }

    fn storage_for(dir: &Path, torrent: &Torrent) -> (Storage, Arc<DownloadState>) {
        let state = Arc::new(DownloadState::new(torrent.layout()).unwrap());
        (Storage::new(dir, torrent, state.clone()), state)
    }

    #[tokio::test]
    async fn test_read_spans_two_files() {
        let dir = tempdir().unwrap();
        let torrent = two_file_torrent();
        let (storage, _) = storage_for(dir.path(), &torrent);

        let root = dir.path().join("pair");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a"), (0u8..10).collect::<Vec<_>>()).unwrap();
        std::fs::write(root.join("b"), (100u8..110).collect::<Vec<_>>()).unwrap();

        let bytes = storage.read(5, 10).await.unwrap();
        assert_eq!(bytes, vec![5, 6, 7, 8, 9, 100, 101, 102, 103, 104]);
    }

    #[tokio::test]
    async fn test_write_spans_two_files() {
        let dir = tempdir().unwrap();
        let torrent = two_file_torrent();
        let (storage, _) = storage_for(dir.path(), &torrent);
        storage.create_directories().await.unwrap();

        storage.write(0, &[1u8; 20]).await.unwrap();
        storage.write(8, &[7u8, 7, 7, 7]).await.unwrap();

        let a = std::fs::read(dir.path().join("pair/a")).unwrap();
        let b = std::fs::read(dir.path().join("pair/b")).unwrap();
        assert_eq!(a, vec![1, 1, 1, 1, 1, 1, 1, 1, 7, 7]);
        assert_eq!(b, vec![7, 7, 1, 1, 1, 1, 1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let torrent = two_file_torrent();
        let (storage, _) = storage_for(dir.path(), &torrent);

        let err = storage.read(0, 4).await.unwrap_err();
        assert!(matches!(
            err,
            BittorrentError::Storage(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_file_is_short_read() {
        let dir = tempdir().unwrap();
        let torrent = two_file_torrent();
        let (storage, _) = storage_for(dir.path(), &torrent);

        let root = dir.path().join("pair");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a"), [0u8; 6]).unwrap();

        let err = storage.read(0, 8).await.unwrap_err();
        assert!(matches!(
            err,
            BittorrentError::Storage(StorageError::ShortRead {
                expected: 8,
                got: 6,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_range_past_end_rejected() {
        let dir = tempdir().unwrap();
        let torrent = two_file_torrent();
        let (storage, _) = storage_for(dir.path(), &torrent);
        storage.create_directories().await.unwrap();

        let err = storage.write(18, &[0u8; 4]).await.unwrap_err();
        assert!(matches!(
            err,
            BittorrentError::Storage(StorageError::OutOfBounds { .. })
        ));
        assert!(!dir.path().join("pair/a").exists());
    }

    #[tokio::test]
    async fn test_failed_block_write_leaves_block_unacquired() {
        let dir = tempdir().unwrap();
        let torrent = two_file_torrent();
        let (storage, state) = storage_for(dir.path(), &torrent);

        // directories were never created, so the write cannot land
        let err = storage.write_block(1, 0, &[9u8; 4]).await.unwrap_err();
        assert!(matches!(
            err,
            BittorrentError::Storage(StorageError::MissingDirectory(_))
        ));
        assert!(!state.is_block_acquired(1, 0));
    }

    #[tokio::test]
    async fn test_write_block_marks_acquired_after_write() {
        let dir = tempdir().unwrap();
        let torrent = two_file_torrent();
        let (storage, state) = storage_for(dir.path(), &torrent);
        storage.create_directories().await.unwrap();

        // last piece is 4 bytes: a single short block
        assert!(storage.write_block(2, 0, &[3u8; 4]).await.unwrap());
        assert!(state.is_piece_acquired(2));
        assert_eq!(storage.read_piece(2).await.unwrap(), vec![3u8; 4]);

        assert!(!storage.write_block(0, 1, &[4u8; 4]).await.unwrap());
        assert!(storage.write_block(0, 1, &[4u8; 3]).await.is_err());
        assert_eq!(storage.read_block(0, 4, 4).await.unwrap(), vec![4u8; 4]);
        assert!(storage.read_block(0, 6, 4).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_block_writes_all_land() {
        let dir = tempdir().unwrap();
        let torrent = two_file_torrent();
        let (storage, state) = storage_for(dir.path(), &torrent);
        let storage = Arc::new(storage);
        storage.create_directories().await.unwrap();
        let content: Vec<u8> = (1u8..=20).collect();

        // blocks of 4 bytes: (1, 0) straddles the two files, the rest
        // share a file with a neighbour
        let mut writes = tokio::task::JoinSet::new();
        for (piece, block) in [(0, 0), (0, 1), (1, 0), (1, 1), (2, 0)] {
            let storage = storage.clone();
            let start = (piece * 8 + block * 4) as usize;
            let data = content[start..start + 4].to_vec();
            writes.spawn(async move { storage.write_block(piece, block, &data).await });
        }
        while let Some(result) = writes.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(storage.read(0, 20).await.unwrap(), content);
        assert!((0..3).all(|p| state.is_piece_acquired(p)));
    }

    #[tokio::test]
    async fn test_failed_rewrite_keeps_block_acquired() {
        let dir = tempdir().unwrap();
        let torrent = two_file_torrent();
        let (storage, state) = storage_for(dir.path(), &torrent);
        storage.create_directories().await.unwrap();
        storage.write_block(0, 0, &[5u8; 4]).await.unwrap();

        std::fs::remove_dir_all(dir.path().join("pair")).unwrap();
        assert!(storage.write_block(0, 0, &[6u8; 4]).await.is_err());
        assert!(state.is_block_acquired(0, 0));
    }
}
