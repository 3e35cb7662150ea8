//! Formatting helpers shared by reports and the shell

use crate::transport::{Word, WORD_BYTES};

/// `0x`-prefixed, zero-padded hex at the native word width
pub fn format_word(word: Word) -> String {
    format!("0x{:0width$X}", word, width = WORD_BYTES * 2)
}

/// Bytes to kilobytes (1 kB = 1024 bytes)
pub fn kilobytes(bytes: usize) -> f64 {
    bytes as f64 / 1024.0
}
