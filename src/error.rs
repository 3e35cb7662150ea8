//! Error types for the UART debug controller

use thiserror::Error;

use crate::link::LinkReport;
use crate::protocol::{ErrorCode, Phase};
use crate::transport::Word;

/// Main error type for the debug controller
#[derive(Error, Debug)]
pub enum DebugError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Breakpoint(#[from] BreakpointError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    LinkTest(#[from] LinkTestError),

    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DebugError {
    /// Protocol-level classification of this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            DebugError::Protocol(e) => e.code(),
            DebugError::Breakpoint(BreakpointError::Protocol(e)) => e.code(),
            DebugError::Program(ProgramError::WordWrite { source, .. })
            | DebugError::Program(ProgramError::Stream { source, .. })
            | DebugError::Program(ProgramError::Sequence(source)) => source.code(),
            _ => ErrorCode::ClientError,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DebugError>;

/// Failures of a single command exchange
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Echo did not match {phase} word (sent 0x{sent:08X}, received 0x{received:08X})")]
    EchoMismatch {
        phase: Phase,
        sent: Word,
        received: Word,
    },

    #[error("No {phase} word received within {timeout_ms}ms")]
    Timeout { phase: Phase, timeout_ms: u64 },

    #[error("Transport failure during {phase}: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: std::io::Error,
    },

    #[error("MCU reported an error to debug controller (status 0x{status:X})")]
    Mcu { status: Word },

    #[error("Debug controller reported timeout")]
    TargetTimeout,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::EchoMismatch { .. }
            | ProtocolError::Transport { .. }
            | ProtocolError::InvalidArgument(_) => ErrorCode::ClientError,
            ProtocolError::Timeout { .. } | ProtocolError::TargetTimeout => ErrorCode::Timeout,
            ProtocolError::Mcu { .. } => ErrorCode::McuError,
        }
    }
}

/// Breakpoint table errors
#[derive(Error, Debug)]
pub enum BreakpointError {
    #[error("Max number of breakpoints reached ({0})")]
    Full(usize),

    #[error("Breakpoint {0} does not exist")]
    NotFound(usize),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Symbol and number resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Unknown variable or malformed number: '{0}'")]
    NotFound(String),

    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
}

/// Connection test errors
#[derive(Error, Debug)]
pub enum LinkTestError {
    #[error("Connection test failed due to low transmission accuracy ({:.2} < {threshold:.2})", .report.accuracy())]
    AccuracyTooLow { report: LinkReport, threshold: f64 },

    #[error("Connection test needs at least one iteration")]
    NoIterations,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Batch programming errors
#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("Could not read program image: {0}")]
    Image(#[from] std::io::Error),

    #[error("Failed to write word {index} at 0x{address:08X}: {source}")]
    WordWrite {
        index: usize,
        address: Word,
        #[source]
        source: ProtocolError,
    },

    #[error("Failed to send word {index}: {source}")]
    Stream {
        index: usize,
        #[source]
        source: ProtocolError,
    },

    #[error("Programming sequence failed: {0}")]
    Sequence(#[source] ProtocolError),

    #[error("Operator confirmation failed: {0}")]
    Confirmation(#[source] std::io::Error),
}
