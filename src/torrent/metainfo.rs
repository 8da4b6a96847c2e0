use crate::bencode::{decode, raw_value, BencodeValue};
use crate::error::{BittorrentError, Result};
use sha1::{Digest, Sha1};

/// A file listed in the info dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Path components relative to the torrent root
    pub path: Vec<String>,
    pub length: u64,
}

/// Contents of the `info` dictionary
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Suggested name for the file or directory
    pub name: String,
    /// Number of bytes in each piece
    pub piece_length: u64,
    /// SHA1 hashes of all pieces
    pub pieces: Vec<[u8; 20]>,
    pub files: Vec<FileInfo>,
    pub total_length: u64,
    pub private: bool,
    /// True when the info dictionary used the `files` list
    pub multi_file: bool,
}

fn invalid(what: &str) -> BittorrentError {
    BittorrentError::InvalidTorrent(what.to_string())
}

fn non_negative(value: Option<&BencodeValue>, field: &str) -> Result<u64> {
    let n = value
        .and_then(BencodeValue::as_integer)
        .ok_or_else(|| invalid(&format!("missing or invalid '{}'", field)))?;
    u64::try_from(n).map_err(|_| invalid(&format!("'{}' must not be negative", field)))
}

/// A path component must name something inside its parent directory
fn checked_component(value: &BencodeValue) -> Result<String> {
    let component = value
        .as_str()
        .ok_or_else(|| invalid("path component is not a UTF-8 string"))?;

    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\'])
    {
        return Err(invalid(&format!("unsafe path component '{}'", component)));
    }
    Ok(component.to_string())
}

fn split_piece_hashes(bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
    if bytes.len() % 20 != 0 {
        return Err(invalid("pieces length must be a multiple of 20"));
    }

    Ok(bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

impl TorrentInfo {
    fn from_bencode(value: &BencodeValue) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(invalid("info must be a dictionary"));
        }

        let name_value = value
            .get("name")
            .ok_or_else(|| invalid("missing 'name'"))?;
        let name = checked_component(name_value)?;

        let piece_length = non_negative(value.get("piece length"), "piece length")?;

        let pieces = value
            .get("pieces")
            .and_then(BencodeValue::as_bytes)
            .ok_or_else(|| invalid("missing 'pieces'"))
            .and_then(split_piece_hashes)?;

        let private = value
            .get("private")
            .and_then(BencodeValue::as_integer)
            .map_or(false, |flag| flag == 1);

        let (files, multi_file) = match (value.get("length"), value.get("files")) {
            (Some(length), None) => {
                let file = FileInfo {
                    path: vec![name.clone()],
                    length: non_negative(Some(length), "length")?,
                };
                (vec![file], false)
            }
            (None, Some(list)) => {
                let entries = list
                    .as_list()
                    .ok_or_else(|| invalid("'files' must be a list"))?;
                let files = entries
                    .iter()
                    .map(|entry| {
                        let path = entry
                            .get("path")
                            .and_then(BencodeValue::as_list)
                            .filter(|components| !components.is_empty())
                            .ok_or_else(|| invalid("missing file 'path'"))?
                            .iter()
                            .map(checked_component)
                            .collect::<Result<Vec<_>>>()?;
                        let length = non_negative(entry.get("length"), "length")?;
                        Ok(FileInfo { path, length })
                    })
                    .collect::<Result<Vec<_>>>()?;
                (files, true)
            }
            _ => return Err(invalid("exactly one of 'length' or 'files' is required")),
        };

        let total_length = files
            .iter()
            .try_fold(0u64, |total, f| total.checked_add(f.length))
            .ok_or_else(|| invalid("total length overflows"))?;

        Ok(TorrentInfo {
            name,
            piece_length,
            pieces,
            files,
            total_length,
            private,
            multi_file,
        })
    }
}

/// Top-level metainfo structure from a .torrent file
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub announce: String,
    /// Tiers of additional tracker URLs
    pub announce_list: Option<Vec<Vec<String>>>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<i64>,
    pub info: TorrentInfo,
    /// SHA1 of the info dictionary exactly as it appears in the file
    pub info_hash: [u8; 20],
}

impl Metainfo {
    /// Parse a whole .torrent file. The info hash covers the raw bytes of
    /// the `info` value, so key order and spelling in the file are kept.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value = decode(data)?;
        let info_bytes = raw_value(data, b"info")?.ok_or_else(|| invalid("missing 'info'"))?;
        let info_hash: [u8; 20] = Sha1::digest(info_bytes).into();
        Self::from_bencode(&value, info_hash)
    }

    fn from_bencode(value: &BencodeValue, info_hash: [u8; 20]) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(invalid("torrent must be a dictionary"));
        }

        let announce = value
            .get("announce")
            .and_then(BencodeValue::as_str)
            .ok_or_else(|| invalid("missing 'announce'"))?
            .to_string();

        let announce_list = value.get("announce-list").and_then(|tiers| {
            let tiers: Vec<Vec<String>> = tiers
                .as_list()?
                .iter()
                .filter_map(|tier| {
                    let urls: Vec<String> = tier
                        .as_list()?
                        .iter()
                        .filter_map(|url| url.as_str().map(String::from))
                        .collect();
                    (!urls.is_empty()).then_some(urls)
                })
                .collect();
            (!tiers.is_empty()).then_some(tiers)
        });

        let text = |key: &str| value.get(key).and_then(BencodeValue::as_str).map(String::from);

        let info_value = value.get("info").ok_or_else(|| invalid("missing 'info'"))?;
        let info = TorrentInfo::from_bencode(info_value)?;

        Ok(Metainfo {
            announce,
            announce_list,
            comment: text("comment"),
            created_by: text("created by"),
            creation_date: value.get("creation date").and_then(BencodeValue::as_integer),
            info,
            info_hash,
        })
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Primary tracker first, then every tier in order
    pub fn trackers(&self) -> Vec<&str> {
        let mut trackers = vec![self.announce.as_str()];
        if let Some(tiers) = &self.announce_list {
            for url in tiers.iter().flatten() {
                if !trackers.contains(&url.as_str()) {
                    trackers.push(url);
                }
            }
        }
        trackers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_file_torrent() -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"d8:announce18:http://tracker/ann7:comment2:hi4:infod");
        raw.extend_from_slice(b"6:lengthi59616e4:name8:file.bin12:piece lengthi32768e6:pieces40:");
        raw.extend_from_slice(&[0xaa; 20]);
        raw.extend_from_slice(&[0xbb; 20]);
        raw.extend_from_slice(b"ee");
        raw
    }

    #[test]
    fn test_parse_single_file() {
        let raw = single_file_torrent();
        let meta = Metainfo::from_bytes(&raw).unwrap();

        assert_eq!(meta.announce, "http://tracker/ann");
        assert_eq!(meta.comment.as_deref(), Some("hi"));
        assert_eq!(meta.info.name, "file.bin");
        assert_eq!(meta.info.piece_length, 32768);
        assert_eq!(meta.info.pieces, vec![[0xaa; 20], [0xbb; 20]]);
        assert_eq!(meta.info.total_length, 59616);
        assert!(!meta.info.multi_file);
        assert_eq!(meta.info.files[0].path, vec!["file.bin".to_string()]);
    }

    #[test]
    fn test_info_hash_covers_info_dict_only() {
        let raw = single_file_torrent();
        let meta = Metainfo::from_bytes(&raw).unwrap();

        let start = raw.windows(6).position(|w| w == b"4:info").unwrap() + 6;
        let info_bytes = &raw[start..raw.len() - 1];
        let expected: [u8; 20] = Sha1::digest(info_bytes).into();
        assert_eq!(meta.info_hash, expected);
    }

    #[test]
    fn test_info_hash_keeps_file_key_order() {
        // keys out of sorted order: a re-encoding would reorder them
        let mut info = Vec::new();
        info.extend_from_slice(b"d4:name8:file.bin6:lengthi16e12:piece lengthi16e6:pieces20:");
        info.extend_from_slice(&[0xcc; 20]);
        info.extend_from_slice(b"e");
        let mut raw = b"d8:announce3:url4:info".to_vec();
        raw.extend_from_slice(&info);
        raw.extend_from_slice(b"e");

        let meta = Metainfo::from_bytes(&raw).unwrap();
        let expected: [u8; 20] = Sha1::digest(&info).into();
        assert_eq!(meta.info_hash, expected);
        assert_eq!(meta.info.total_length, 16);
    }

    #[test]
    fn test_overflowing_file_lengths_rejected() {
        let huge = i64::MAX.to_string();
        let mut raw = b"d8:announce3:url4:infod5:filesl".to_vec();
        for name in ["a", "b", "c"] {
            raw.extend_from_slice(format!("d6:lengthi{}e4:pathl1:{}ee", huge, name).as_bytes());
        }
        raw.extend_from_slice(b"e4:name3:dir12:piece lengthi16e6:pieces20:");
        raw.extend_from_slice(&[0u8; 20]);
        raw.extend_from_slice(b"ee");

        let err = Metainfo::from_bytes(&raw).unwrap_err();
        assert!(matches!(err, BittorrentError::InvalidTorrent(_)));
    }

    #[test]
    fn test_multi_file_paths() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"d8:announce3:url4:infod5:filesl");
        raw.extend_from_slice(b"d6:lengthi10e4:pathl1:a5:x.txtee");
        raw.extend_from_slice(b"d6:lengthi10e4:pathl5:y.txtee");
        raw.extend_from_slice(b"e4:name3:dir12:piece lengthi16e6:pieces40:");
        raw.extend_from_slice(&[0u8; 40]);
        raw.extend_from_slice(b"ee");

        let meta = Metainfo::from_bytes(&raw).unwrap();
        assert!(meta.info.multi_file);
        assert_eq!(meta.info.total_length, 20);
        assert_eq!(meta.info.files[0].path, vec!["a", "x.txt"]);
        assert_eq!(meta.info.files[1].path, vec!["y.txt"]);
    }

    #[test]
    fn test_traversal_component_rejected() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"d8:announce3:url4:infod5:filesl");
        raw.extend_from_slice(b"d6:lengthi10e4:pathl2:..6:passwdee");
        raw.extend_from_slice(b"e4:name3:dir12:piece lengthi16e6:pieces20:");
        raw.extend_from_slice(&[0u8; 20]);
        raw.extend_from_slice(b"ee");

        let err = Metainfo::from_bytes(&raw).unwrap_err();
        assert!(matches!(err, BittorrentError::InvalidTorrent(_)));
    }

    #[test]
    fn test_ragged_pieces_rejected() {
        assert!(split_piece_hashes(&[0u8; 30]).is_err());
        assert_eq!(split_piece_hashes(&[7u8; 40]).unwrap().len(), 2);
    }
}
