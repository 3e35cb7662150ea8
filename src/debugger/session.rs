//! Debug session: the command façade over the protocol engine
//!
//! Each operation maps to one command (or a short fixed sequence). Register
//! and memory access, and single-stepping, pause the target themselves first,
//! so callers never see a "must be paused" error.

use std::fmt;
use tracing::{debug, info};

use super::breakpoints::BreakpointTable;
use crate::error::{BreakpointError, ProtocolError};
use crate::protocol::{EngineConfig, Opcode, ProtocolEngine};
use crate::symbols::{Resolver, REGISTER_COUNT};
use crate::transport::{Transport, Word};

type OpResult<T> = std::result::Result<T, ProtocolError>;

/// Execution state as last acknowledged by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Running,
    Paused,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Running => write!(f, "running"),
            TargetState::Paused => write!(f, "paused"),
        }
    }
}

/// One connected target
pub struct Session<T: Transport> {
    engine: ProtocolEngine<T>,
    state: TargetState,
    breakpoints: BreakpointTable,
    resolver: Resolver,
}

impl<T: Transport> Session<T> {
    /// Start a session. The target is assumed to be running.
    pub fn new(transport: T, config: EngineConfig) -> Self {
        Self {
            engine: ProtocolEngine::new(transport, config),
            state: TargetState::Running,
            breakpoints: BreakpointTable::default(),
            resolver: Resolver::default(),
        }
    }

    pub fn with_breakpoint_capacity(mut self, capacity: usize) -> Self {
        self.breakpoints = BreakpointTable::new(capacity);
        self
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == TargetState::Paused
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn engine(&self) -> &ProtocolEngine<T> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ProtocolEngine<T> {
        &mut self.engine
    }

    pub fn into_transport(self) -> T {
        self.engine.into_transport()
    }

    // =========================================================================
    // Execution control
    // =========================================================================

    /// Halt the target; returns the program counter where it stopped.
    pub fn pause(&mut self) -> OpResult<Word> {
        let pc = self.engine.execute_command(Opcode::Pause, 0, 0)?;
        self.state = TargetState::Paused;
        info!("Target paused at pc=0x{:08X}", pc);
        Ok(pc)
    }

    pub fn resume(&mut self) -> OpResult<()> {
        self.engine.execute_command(Opcode::Resume, 0, 0)?;
        self.state = TargetState::Running;
        info!("Target resumed");
        Ok(())
    }

    /// Execute a single instruction; the target stays paused.
    pub fn step(&mut self) -> OpResult<()> {
        self.pause()?;
        self.engine.execute_command(Opcode::Step, 0, 0)?;
        info!("Target stepped");
        Ok(())
    }

    /// Pause, reset, resume. Net effect: running from the reset vector.
    pub fn reset(&mut self) -> OpResult<()> {
        self.pause()?;
        self.engine.execute_command(Opcode::Reset, 0, 0)?;
        info!("Target reset");
        self.resume()
    }

    /// Raw status word reported by the target
    pub fn status(&mut self) -> OpResult<Word> {
        let status = self.engine.execute_command(Opcode::Status, 0, 0)?;
        debug!("Target status 0x{:08X}", status);
        Ok(status)
    }

    // =========================================================================
    // Registers and memory
    // =========================================================================

    pub fn reg_read(&mut self, index: Word) -> OpResult<Word> {
        let index = check_register(index)?;
        self.pause()?;
        let value = self.engine.execute_command(Opcode::RegRead, index, 0)?;
        debug!("x{} = 0x{:08X}", index, value);
        Ok(value)
    }

    pub fn reg_write(&mut self, index: Word, value: Word) -> OpResult<()> {
        let index = check_register(index)?;
        self.pause()?;
        self.engine.execute_command(Opcode::RegWrite, index, value)?;
        debug!("x{} <- 0x{:08X}", index, value);
        Ok(())
    }

    pub fn mem_read_word(&mut self, address: Word) -> OpResult<Word> {
        self.pause()?;
        self.engine.execute_command(Opcode::MemReadWord, address, 0)
    }

    pub fn mem_read_byte(&mut self, address: Word) -> OpResult<u8> {
        self.pause()?;
        let value = self.engine.execute_command(Opcode::MemReadByte, address, 0)?;
        Ok(value as u8)
    }

    pub fn mem_write_word(&mut self, address: Word, value: Word) -> OpResult<()> {
        self.pause()?;
        self.engine.execute_command(Opcode::MemWriteWord, address, value)?;
        Ok(())
    }

    pub fn mem_write_byte(&mut self, address: Word, value: u8) -> OpResult<()> {
        self.pause()?;
        self.engine
            .execute_command(Opcode::MemWriteByte, address, Word::from(value))?;
        Ok(())
    }

    // =========================================================================
    // Breakpoints
    // =========================================================================

    /// Set a hardware breakpoint; returns its slot.
    pub fn add_breakpoint(&mut self, address: Word) -> Result<usize, BreakpointError> {
        let engine = &mut self.engine;
        let slot = self.breakpoints.add(address, |_, address| {
            engine
                .execute_command(Opcode::BreakpointAdd, address, 0)
                .map(drop)
        })?;
        info!("Breakpoint {} set at 0x{:08X}", slot, address);
        Ok(slot)
    }

    /// Delete the breakpoint in `slot`; returns the address it held.
    pub fn remove_breakpoint(&mut self, slot: usize) -> Result<Word, BreakpointError> {
        let engine = &mut self.engine;
        let address = self
            .breakpoints
            .remove(slot, |slot, _| remove_on_target(engine, slot))?;
        info!("Breakpoint {} at 0x{:08X} deleted", slot, address);
        Ok(address)
    }

    /// Delete every breakpoint, stopping at the first failure.
    pub fn clear_breakpoints(&mut self) -> Result<usize, BreakpointError> {
        let engine = &mut self.engine;
        let removed = self
            .breakpoints
            .clear(|slot, _| remove_on_target(engine, slot))?;
        info!("Cleared {} breakpoints", removed);
        Ok(removed)
    }

    /// Occupied breakpoint slots in index order
    pub fn breakpoints(&self) -> Vec<(usize, Word)> {
        self.breakpoints.list()
    }

    pub fn breakpoint_capacity(&self) -> usize {
        self.breakpoints.capacity()
    }

    // =========================================================================
    // Console
    // =========================================================================

    /// Read one unsolicited console string if the target sent any.
    pub fn poll_console(&mut self) -> OpResult<Option<String>> {
        if !self.engine.pending()? {
            return Ok(None);
        }
        let line = self.engine.read_string()?;
        debug!("Target console: {}", line);
        Ok(Some(line))
    }
}

fn check_register(index: Word) -> OpResult<Word> {
    if (index as u64) < REGISTER_COUNT as u64 {
        Ok(index)
    } else {
        Err(ProtocolError::InvalidArgument(format!(
            "register x{} out of range (0..{})",
            index, REGISTER_COUNT
        )))
    }
}

fn remove_on_target<T: Transport>(engine: &mut ProtocolEngine<T>, slot: usize) -> OpResult<()> {
    engine
        .execute_command(Opcode::BreakpointRemove, slot as Word, 0)
        .map(drop)
}
