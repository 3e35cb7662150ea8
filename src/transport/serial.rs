//! Serial port transport
//!
//! Raw 8N1 link without flow control. Words are written and read big-endian;
//! the port's own read timeout bounds the gap between bytes of one word, while
//! [`Transport::wait_readable`] bounds the wait for the first byte.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{decode_word, encode_word, Transport, Word, WORD_BYTES};
use crate::error::{DebugError, Result};

/// How often `wait_readable` re-checks the receive queue.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Transport over a host serial device (e.g. `/dev/ttyUSB0`)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialTransport {
    /// Open `path` in raw mode and discard anything already buffered.
    pub fn open(path: &str, baud_rate: u32, inter_byte_timeout: Duration) -> Result<Self> {
        info!("Opening serial port {} at {} baud", path, baud_rate);

        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(inter_byte_timeout)
            .open()
            .map_err(|e| {
                DebugError::ConnectionFailed(format!("Failed to open serial port {}: {}", path, e))
            })?;

        port.clear(ClearBuffer::All).map_err(|e| {
            DebugError::ConnectionFailed(format!("Failed to flush serial port {}: {}", path, e))
        })?;

        debug!("Serial port {} ready", path);
        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    /// Device path this transport was opened on
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for SerialTransport {
    fn send_word(&mut self, word: Word) -> io::Result<()> {
        self.port.write_all(&encode_word(word))?;
        self.port.flush()
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.port.bytes_to_read()? > 0 {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn recv_word(&mut self) -> io::Result<Word> {
        let mut buf = [0u8; WORD_BYTES];
        self.port.read_exact(&mut buf)?;
        Ok(decode_word(buf))
    }

    fn send_byte(&mut self, byte: u8) -> io::Result<()> {
        self.port.write_all(&[byte])?;
        self.port.flush()
    }

    fn recv_byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.port.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}
