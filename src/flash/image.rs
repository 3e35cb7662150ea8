//! Raw binary program images

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::transport::{Word, WORD_BYTES};

/// Flat binary loaded at address 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    bytes: Vec<u8>,
    path: Option<PathBuf>,
}

impl BinaryImage {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        Ok(Self {
            bytes,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of words to transmit; a trailing partial word counts as one
    pub fn word_count(&self) -> usize {
        self.bytes.len().div_ceil(WORD_BYTES)
    }

    /// Words in memory order. Each word is assembled little-endian from the
    /// file bytes; the last one is zero-padded.
    pub fn words(&self) -> impl Iterator<Item = Word> + '_ {
        self.bytes.chunks(WORD_BYTES).map(|chunk| {
            let mut buf = [0u8; WORD_BYTES];
            buf[..chunk.len()].copy_from_slice(chunk);
            Word::from_le_bytes(buf)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_word_count_rounds_up() {
        assert_eq!(BinaryImage::from_bytes(vec![]).word_count(), 0);
        assert_eq!(BinaryImage::from_bytes(vec![1]).word_count(), 1);
        assert_eq!(BinaryImage::from_bytes(vec![0; WORD_BYTES]).word_count(), 1);
        assert_eq!(BinaryImage::from_bytes(vec![0; WORD_BYTES + 1]).word_count(), 2);
    }

    #[cfg(not(feature = "rv64"))]
    #[test]
    fn test_words_little_endian_with_padding() {
        let image = BinaryImage::from_bytes(vec![0x13, 0x05, 0xA0, 0x00, 0xEF, 0xBE]);
        let words: Vec<Word> = image.words().collect();
        assert_eq!(words, vec![0x00A0_0513, 0x0000_BEEF]);
    }

    #[test]
    fn test_open_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xAA; 10]).unwrap();

        let image = BinaryImage::open(file.path()).unwrap();
        assert_eq!(image.len(), 10);
        assert_eq!(image.path(), Some(file.path()));
        assert_eq!(image.words().count(), image.word_count());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BinaryImage::open(dir.path().join("missing.bin")).is_err());
    }
}
