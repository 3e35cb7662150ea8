//! Word-oriented command/reply protocol
//!
//! Every command is a three-word frame (opcode, address, data). The target
//! echoes each word as it arrives, executes the command, then answers with a
//! value word and a status word:
//!
//! ```text
//!   HOST                       TARGET
//!   opcode  ------------------->
//!           <------------------- echo
//!   address ------------------->
//!           <------------------- echo
//!   data    ------------------->
//!           <------------------- echo
//!                                 executes...
//!           <------------------- value
//!           <------------------- status
//! ```

pub mod engine;

use std::fmt;

use crate::transport::Word;

pub use engine::{EngineConfig, ProtocolEngine};

/// Word sent to switch the target's serial driver into streaming programmer mode.
pub const PROGRAM_MODE_SENTINEL: Word = 0x0000_000F;

/// Command identifiers agreed with the target firmware. Values are wire constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    None = 0x00,
    Pause = 0x01,
    Resume = 0x02,
    Step = 0x03,
    Reset = 0x04,
    Status = 0x05,
    MemReadByte = 0x06,
    MemReadWord = 0x07,
    RegRead = 0x08,
    BreakpointAdd = 0x09,
    BreakpointRemove = 0x0A,
    MemWriteByte = 0x0B,
    MemWriteWord = 0x0C,
    RegWrite = 0x0D,
}

impl Opcode {
    pub const ALL: [Opcode; 14] = [
        Opcode::None,
        Opcode::Pause,
        Opcode::Resume,
        Opcode::Step,
        Opcode::Reset,
        Opcode::Status,
        Opcode::MemReadByte,
        Opcode::MemReadWord,
        Opcode::RegRead,
        Opcode::BreakpointAdd,
        Opcode::BreakpointRemove,
        Opcode::MemWriteByte,
        Opcode::MemWriteWord,
        Opcode::RegWrite,
    ];

    /// Wire value of this opcode
    pub fn code(self) -> Word {
        self as Word
    }

    /// Decode a wire value
    pub fn from_code(code: Word) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    /// Number of argument words the target must echo back verbatim.
    pub fn arity(self) -> usize {
        match self {
            Opcode::None
            | Opcode::Pause
            | Opcode::Resume
            | Opcode::Step
            | Opcode::Reset
            | Opcode::Status => 0,
            Opcode::MemReadByte
            | Opcode::MemReadWord
            | Opcode::RegRead
            | Opcode::BreakpointAdd
            | Opcode::BreakpointRemove => 1,
            Opcode::MemWriteByte | Opcode::MemWriteWord | Opcode::RegWrite => 2,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::None => "none",
            Opcode::Pause => "pause",
            Opcode::Resume => "resume",
            Opcode::Step => "step",
            Opcode::Reset => "reset",
            Opcode::Status => "status",
            Opcode::MemReadByte => "mem-read-byte",
            Opcode::MemReadWord => "mem-read-word",
            Opcode::RegRead => "reg-read",
            Opcode::BreakpointAdd => "breakpoint-add",
            Opcode::BreakpointRemove => "breakpoint-remove",
            Opcode::MemWriteByte => "mem-write-byte",
            Opcode::MemWriteWord => "mem-write-word",
            Opcode::RegWrite => "reg-write",
        };
        write!(f, "{}", name)
    }
}

/// Outcome classification shared by host and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    /// Detected locally: echo mismatch, bad argument, transport failure
    ClientError,
    /// Target signaled failure in its status word
    McuError,
    /// No reply within the wait window
    Timeout,
}

impl ErrorCode {
    /// Status word value used on the wire
    pub fn to_status(self) -> Word {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::ClientError => 1,
            ErrorCode::McuError => 2,
            ErrorCode::Timeout => 3,
        }
    }

    /// Classify a status word received from the target. Unknown non-zero
    /// values count as target failures.
    pub fn from_status(status: Word) -> Self {
        match status {
            0 => ErrorCode::Ok,
            1 => ErrorCode::ClientError,
            3 => ErrorCode::Timeout,
            _ => ErrorCode::McuError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Ok => write!(f, "ok"),
            ErrorCode::ClientError => write!(f, "client error"),
            ErrorCode::McuError => write!(f, "MCU error"),
            ErrorCode::Timeout => write!(f, "timeout"),
        }
    }
}

/// Position of a word within an exchange, used in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Opcode,
    Address,
    Data,
    Value,
    Status,
    /// Bare word exchange outside a command frame
    Raw,
    /// Single-byte legacy handshake
    Legacy,
    Console,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Opcode => "opcode",
            Phase::Address => "address",
            Phase::Data => "data",
            Phase::Value => "value reply",
            Phase::Status => "status reply",
            Phase::Raw => "raw",
            Phase::Legacy => "legacy",
            Phase::Console => "console",
        };
        write!(f, "{}", name)
    }
}

/// One logical command. `address` and `data` are always transmitted; the
/// opcode's arity decides whether their echoes are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub opcode: Opcode,
    pub address: Word,
    pub data: Word,
}

impl CommandFrame {
    pub fn new(opcode: Opcode, address: Word, data: Word) -> Self {
        Self { opcode, address, data }
    }

    /// Frame for an opcode that takes no arguments
    pub fn bare(opcode: Opcode) -> Self {
        Self::new(opcode, 0, 0)
    }

    pub fn arity(&self) -> usize {
        self.opcode.arity()
    }
}

/// Final two words of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub value: Word,
    pub status: ErrorCode,
    /// Status word exactly as received
    pub raw_status: Word,
}
