//! Command execution over a [`Transport`]
//!
//! A command is a strict four-phase exchange. Each transmitted word must come
//! back unchanged; this echo is the only integrity check on the link. Every
//! receive is bounded by the reply timeout and nothing is retried here: a
//! caller that wants another attempt issues a fresh command.

use std::time::Duration;
use tracing::{debug, warn};

use super::{CommandFrame, ErrorCode, Opcode, Phase, Reply};
use crate::error::ProtocolError;
use crate::transport::{Transport, Word};

/// Engine timing and retry settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for every receive step
    pub reply_timeout: Duration,
    /// Attempts for the legacy byte handshake (1 = no retry)
    pub legacy_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_millis(200),
            legacy_attempts: 1,
        }
    }
}

/// Drives the wire protocol on an exclusively owned transport
pub struct ProtocolEngine<T: Transport> {
    transport: T,
    config: EngineConfig,
}

impl<T: Transport> ProtocolEngine<T> {
    pub fn new(transport: T, config: EngineConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back, e.g. to restore port settings on exit
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Execute `opcode` and return its value word. Arity comes from the opcode.
    pub fn execute_command(
        &mut self,
        opcode: Opcode,
        address: Word,
        data: Word,
    ) -> Result<Word, ProtocolError> {
        self.execute(CommandFrame::new(opcode, address, data))
    }

    /// Execute a frame and turn a non-Ok status into an error.
    pub fn execute(&mut self, frame: CommandFrame) -> Result<Word, ProtocolError> {
        let reply = self.transact(frame)?;
        match reply.status {
            ErrorCode::Ok => Ok(reply.value),
            ErrorCode::Timeout => {
                warn!("Debug controller reported timeout for {}", frame.opcode);
                Err(ProtocolError::TargetTimeout)
            }
            ErrorCode::McuError | ErrorCode::ClientError => {
                warn!(
                    "MCU reported an error for {} (status 0x{:X})",
                    frame.opcode, reply.raw_status
                );
                Err(ProtocolError::Mcu {
                    status: reply.raw_status,
                })
            }
        }
    }

    /// Run the full exchange for `frame` and return the raw reply, whatever
    /// its status. Local failures (echo, timeout, I/O) are errors.
    pub fn transact(&mut self, frame: CommandFrame) -> Result<Reply, ProtocolError> {
        debug!(
            "Command {} (0x{:02X}) addr=0x{:08X} data=0x{:08X} arity={}",
            frame.opcode,
            frame.opcode.code(),
            frame.address,
            frame.data,
            frame.arity()
        );

        self.send_checked(Phase::Opcode, frame.opcode.code(), true)?;
        self.send_checked(Phase::Address, frame.address, frame.arity() >= 1)?;
        self.send_checked(Phase::Data, frame.data, frame.arity() >= 2)?;

        let value = self.receive(Phase::Value)?;
        let raw_status = self.receive(Phase::Status)?;

        debug!("Reply value=0x{:08X} status=0x{:X}", value, raw_status);
        Ok(Reply {
            value,
            status: ErrorCode::from_status(raw_status),
            raw_status,
        })
    }

    /// Send one word and return whatever came back, without comparing.
    pub fn exchange(&mut self, word: Word) -> Result<Word, ProtocolError> {
        self.send(Phase::Raw, word)?;
        self.receive(Phase::Raw)
    }

    /// Transmit a word without waiting for any reply.
    pub fn send_raw(&mut self, word: Word) -> Result<(), ProtocolError> {
        self.send(Phase::Raw, word)
    }

    /// Discard up to `count` pending reply words. Stops quietly at the first
    /// one that does not arrive in time; returns how many were read.
    pub fn drain(&mut self, count: usize) -> Result<usize, ProtocolError> {
        for drained in 0..count {
            if !self.readable(Phase::Raw)? {
                return Ok(drained);
            }
            let word = self
                .transport
                .recv_word()
                .map_err(|source| ProtocolError::Transport {
                    phase: Phase::Raw,
                    source,
                })?;
            debug!("Drained 0x{:08X}", word);
        }
        Ok(count)
    }

    /// Single-byte command handshake used by early target firmware: send the
    /// opcode as one byte and expect it echoed.
    pub fn issue_legacy(&mut self, opcode: Opcode) -> Result<(), ProtocolError> {
        // Opcodes all fit in one byte.
        let byte = opcode.code() as u8;
        let attempts = self.config.legacy_attempts.max(1);
        let mut last = ProtocolError::Timeout {
            phase: Phase::Legacy,
            timeout_ms: self.timeout_ms(),
        };

        for attempt in 1..=attempts {
            debug!("Legacy {} attempt {}/{}", opcode, attempt, attempts);
            self.transport
                .send_byte(byte)
                .map_err(|source| ProtocolError::Transport {
                    phase: Phase::Legacy,
                    source,
                })?;

            if !self.readable(Phase::Legacy)? {
                last = ProtocolError::Timeout {
                    phase: Phase::Legacy,
                    timeout_ms: self.timeout_ms(),
                };
                continue;
            }
            let echo = self
                .transport
                .recv_byte()
                .map_err(|source| ProtocolError::Transport {
                    phase: Phase::Legacy,
                    source,
                })?;
            if echo == byte {
                return Ok(());
            }
            last = ProtocolError::EchoMismatch {
                phase: Phase::Legacy,
                sent: Word::from(byte),
                received: Word::from(echo),
            };
        }

        warn!("MCU failed to echo legacy {}: {}", opcode, last);
        Err(last)
    }

    /// True if the target has unsolicited data waiting (no blocking).
    pub fn pending(&mut self) -> Result<bool, ProtocolError> {
        self.transport
            .wait_readable(Duration::ZERO)
            .map_err(|source| ProtocolError::Transport {
                phase: Phase::Console,
                source,
            })
    }

    /// Read bytes until a NUL terminator, each bounded by the reply timeout.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let mut bytes = Vec::new();
        loop {
            if !self.readable(Phase::Console)? {
                return Err(ProtocolError::Timeout {
                    phase: Phase::Console,
                    timeout_ms: self.timeout_ms(),
                });
            }
            let byte = self
                .transport
                .recv_byte()
                .map_err(|source| ProtocolError::Transport {
                    phase: Phase::Console,
                    source,
                })?;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn send_checked(&mut self, phase: Phase, word: Word, check: bool) -> Result<(), ProtocolError> {
        self.send(phase, word)?;
        let echo = self.receive(phase)?;
        if check && echo != word {
            warn!("Echo did not match {} word: sent 0x{:08X}, received 0x{:08X}", phase, word, echo);
            return Err(ProtocolError::EchoMismatch {
                phase,
                sent: word,
                received: echo,
            });
        }
        Ok(())
    }

    fn send(&mut self, phase: Phase, word: Word) -> Result<(), ProtocolError> {
        self.transport
            .send_word(word)
            .map_err(|source| ProtocolError::Transport { phase, source })
    }

    fn receive(&mut self, phase: Phase) -> Result<Word, ProtocolError> {
        if !self.readable(phase)? {
            return Err(ProtocolError::Timeout {
                phase,
                timeout_ms: self.timeout_ms(),
            });
        }
        self.transport
            .recv_word()
            .map_err(|source| ProtocolError::Transport { phase, source })
    }

    fn readable(&mut self, phase: Phase) -> Result<bool, ProtocolError> {
        self.transport
            .wait_readable(self.config.reply_timeout)
            .map_err(|source| ProtocolError::Transport { phase, source })
    }

    fn timeout_ms(&self) -> u64 {
        self.config.reply_timeout.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedTarget;

    fn engine_for(target: SimulatedTarget) -> ProtocolEngine<SimulatedTarget> {
        ProtocolEngine::new(target, EngineConfig::default())
    }

    #[test]
    fn test_arity_zero_checks_only_opcode_echo() {
        let mut target = SimulatedTarget::new();
        // Corrupt the address and data echoes; pause ignores both.
        target.set_corruption(|index, word| if index % 3 == 0 { word } else { word ^ 0xFF });
        let mut engine = engine_for(target);

        let pc = engine.execute_command(Opcode::Pause, 0x1234, 0x5678).unwrap();
        assert_eq!(pc, engine.transport().pc());
    }

    #[test]
    fn test_opcode_echo_mismatch_is_client_error() {
        let mut target = SimulatedTarget::new();
        target.set_corruption(|index, word| if index == 0 { word + 1 } else { word });
        let mut engine = engine_for(target);

        let err = engine.execute_command(Opcode::Status, 0, 0).unwrap_err();
        assert!(matches!(err, ProtocolError::EchoMismatch { phase: Phase::Opcode, .. }));
        assert_eq!(err.code(), ErrorCode::ClientError);
        // Aborted after the first phase
        assert_eq!(engine.transport().sent_words(), &[Opcode::Status.code()]);
    }

    #[test]
    fn test_arity_one_checks_address_but_not_data() {
        let mut target = SimulatedTarget::new();
        target.set_corruption(|index, word| if index == 2 { word ^ 1 } else { word });
        let mut engine = engine_for(target);
        assert!(engine.execute_command(Opcode::MemReadWord, 0x100, 0).is_ok());

        let mut target = SimulatedTarget::new();
        target.set_corruption(|index, word| if index == 1 { word ^ 1 } else { word });
        let mut engine = engine_for(target);
        let err = engine.execute_command(Opcode::MemReadWord, 0x100, 0).unwrap_err();
        assert!(matches!(err, ProtocolError::EchoMismatch { phase: Phase::Address, .. }));
    }

    #[test]
    fn test_arity_two_data_mismatch_is_client_error() {
        let mut target = SimulatedTarget::new();
        target.set_corruption(|index, word| if index == 2 { word ^ 0x8000 } else { word });
        let mut engine = engine_for(target);

        let err = engine
            .execute_command(Opcode::MemWriteWord, 0x1000, 0xDEADBEEF)
            .unwrap_err();
        match err {
            ProtocolError::EchoMismatch { phase, sent, received } => {
                assert_eq!(phase, Phase::Data);
                assert_eq!(sent, 0xDEADBEEF);
                assert_eq!(received, 0xDEADBEEF ^ 0x8000);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(engine.transport().sent_words().len(), 3);
    }

    #[test]
    fn test_silent_target_times_out() {
        let mut target = SimulatedTarget::new();
        target.set_muted(true);
        let mut engine = engine_for(target);

        let err = engine.execute_command(Opcode::Pause, 0, 0).unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout { phase: Phase::Opcode, .. }));
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(engine.transport().sent_words().len(), 1);
    }

    #[test]
    fn test_mcu_status_is_surfaced() {
        let mut target = SimulatedTarget::new();
        target.fail_opcode(Opcode::RegRead, ErrorCode::McuError);
        let mut engine = engine_for(target);

        let err = engine.execute_command(Opcode::RegRead, 5, 0).unwrap_err();
        assert!(matches!(err, ProtocolError::Mcu { status: 2 }));
        assert_eq!(err.code(), ErrorCode::McuError);
    }

    #[test]
    fn test_target_timeout_status() {
        let mut target = SimulatedTarget::new();
        target.fail_opcode(Opcode::Step, ErrorCode::Timeout);
        let mut engine = engine_for(target);

        let err = engine.execute_command(Opcode::Step, 0, 0).unwrap_err();
        assert!(matches!(err, ProtocolError::TargetTimeout));
    }

    #[test]
    fn test_transact_returns_reply_with_failed_status() {
        let mut target = SimulatedTarget::new();
        target.fail_opcode(Opcode::Status, ErrorCode::McuError);
        let mut engine = engine_for(target);

        let reply = engine.transact(CommandFrame::bare(Opcode::Status)).unwrap();
        assert_eq!(reply.status, ErrorCode::McuError);
        assert_eq!(reply.raw_status, 2);
    }

    #[test]
    fn test_exchange_and_drain() {
        let mut engine = engine_for(SimulatedTarget::new());
        assert_eq!(engine.exchange(0).unwrap(), 0);
        assert_eq!(engine.exchange(0xABCD).unwrap(), 0xABCD);
        assert_eq!(engine.exchange(0x1234).unwrap(), 0x1234);
        // Frame complete: value and status are pending
        assert_eq!(engine.drain(2).unwrap(), 2);
        assert_eq!(engine.drain(2).unwrap(), 0);
    }

    #[test]
    fn test_legacy_handshake() {
        let mut engine = engine_for(SimulatedTarget::new());
        engine.issue_legacy(Opcode::Pause).unwrap();
        assert_eq!(engine.transport().sent_bytes(), &[0x01]);
    }

    #[test]
    fn test_legacy_handshake_no_retry_by_default() {
        let mut target = SimulatedTarget::new();
        target.set_muted(true);
        let mut engine = engine_for(target);

        assert!(engine.issue_legacy(Opcode::Resume).is_err());
        assert_eq!(engine.transport().sent_bytes().len(), 1);
    }

    #[test]
    fn test_legacy_handshake_configured_retries() {
        let mut target = SimulatedTarget::new();
        target.set_muted(true);
        let config = EngineConfig {
            legacy_attempts: 5,
            ..EngineConfig::default()
        };
        let mut engine = ProtocolEngine::new(target, config);

        assert!(engine.issue_legacy(Opcode::Pause).is_err());
        assert_eq!(engine.transport().sent_bytes().len(), 5);
    }

    #[test]
    fn test_read_console_string() {
        let mut target = SimulatedTarget::new();
        target.queue_console("hello from target");
        let mut engine = engine_for(target);

        assert!(engine.pending().unwrap());
        assert_eq!(engine.read_string().unwrap(), "hello from target");
        assert!(!engine.pending().unwrap());
    }
}
