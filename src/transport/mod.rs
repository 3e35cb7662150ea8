//! Byte-serial transport abstraction
//!
//! The engine only ever talks to a [`Transport`]. It never opens or configures
//! the underlying channel: callers hand it an already-open, raw-mode link.

pub mod serial;
pub mod sim;

use std::io;
use std::time::Duration;

pub use serial::SerialTransport;
pub use sim::SimulatedTarget;

/// Atomic unit of the wire protocol (32-bit targets).
#[cfg(not(feature = "rv64"))]
pub type Word = u32;

/// Atomic unit of the wire protocol (64-bit targets).
#[cfg(feature = "rv64")]
pub type Word = u64;

/// Size of a [`Word`] on the wire, in bytes.
pub const WORD_BYTES: usize = std::mem::size_of::<Word>();

/// Exclusively-owned channel to the target.
///
/// Words travel big-endian. `wait_readable` is the only blocking wait; every
/// receive performed by the engine is preceded by it.
pub trait Transport {
    /// Transmit one word.
    fn send_word(&mut self, word: Word) -> io::Result<()>;

    /// Block until at least one byte can be read or `timeout` expires.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Receive one word. Only call after `wait_readable` returned `true`.
    fn recv_word(&mut self) -> io::Result<Word>;

    /// Transmit a single byte (legacy handshake).
    fn send_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Receive a single byte (legacy handshake, console text).
    fn recv_byte(&mut self) -> io::Result<u8>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_word(&mut self, word: Word) -> io::Result<()> {
        (**self).send_word(word)
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        (**self).wait_readable(timeout)
    }

    fn recv_word(&mut self) -> io::Result<Word> {
        (**self).recv_word()
    }

    fn send_byte(&mut self, byte: u8) -> io::Result<()> {
        (**self).send_byte(byte)
    }

    fn recv_byte(&mut self) -> io::Result<u8> {
        (**self).recv_byte()
    }
}

/// Encode a word in wire (network) byte order.
pub fn encode_word(word: Word) -> [u8; WORD_BYTES] {
    word.to_be_bytes()
}

/// Decode a word from wire (network) byte order.
pub fn decode_word(bytes: [u8; WORD_BYTES]) -> Word {
    Word::from_be_bytes(bytes)
}
