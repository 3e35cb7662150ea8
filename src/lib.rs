//! UART Debug Controller
//!
//! Host side of a word-oriented debug protocol spoken by a small debug
//! controller on the target MCU. Every word sent is echoed back for
//! integrity checking; commands carry an opcode, an address and a data word
//! and are answered with a value and a status word.
//!
//! On top of the protocol engine sit the command façade with its host-side
//! breakpoint table, symbolic address resolution, a connection quality test
//! and a batch programmer for raw memory images.

pub mod config;
pub mod debugger;
pub mod error;
pub mod flash;
pub mod link;
pub mod protocol;
pub mod shell;
pub mod symbols;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use debugger::{Session, TargetState};
pub use error::{DebugError, Result};
pub use protocol::{EngineConfig, ErrorCode, Opcode, ProtocolEngine};
pub use transport::{SerialTransport, SimulatedTarget, Transport, Word, WORD_BYTES};
