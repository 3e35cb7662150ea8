//! In-memory target model
//!
//! Implements the target side of the wire protocol (echo, execute, reply) on
//! a small RISC-V-like machine state. Hooks allow corrupting echoes, muting
//! the link and forcing error statuses, so host behavior can be exercised
//! without hardware.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;

use super::{Transport, Word, WORD_BYTES};
use crate::protocol::{CommandFrame, ErrorCode, Opcode, PROGRAM_MODE_SENTINEL};

const REGISTER_COUNT: usize = 32;
const DEFAULT_BREAKPOINT_SLOTS: usize = 8;

type Corruption = Box<dyn FnMut(u64, Word) -> Word>;

/// Simulated MCU behind a perfect (or deliberately imperfect) link
pub struct SimulatedTarget {
    registers: [Word; REGISTER_COUNT],
    memory: HashMap<Word, u8>,
    breakpoints: Vec<Option<Word>>,
    pc: Word,
    paused: bool,
    frame: Vec<Word>,
    program_address: Option<Word>,
    program_limit: Option<usize>,
    programmed: usize,
    outbound: VecDeque<Word>,
    outbound_bytes: VecDeque<u8>,
    sent: Vec<Word>,
    sent_bytes: Vec<u8>,
    executed: Vec<CommandFrame>,
    echo_count: u64,
    corruption: Option<Corruption>,
    failures: HashMap<Opcode, ErrorCode>,
    muted: bool,
}

impl SimulatedTarget {
    pub fn new() -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            memory: HashMap::new(),
            breakpoints: vec![None; DEFAULT_BREAKPOINT_SLOTS],
            pc: 0,
            paused: false,
            frame: Vec::with_capacity(3),
            program_address: None,
            program_limit: None,
            programmed: 0,
            outbound: VecDeque::new(),
            outbound_bytes: VecDeque::new(),
            sent: Vec::new(),
            sent_bytes: Vec::new(),
            executed: Vec::new(),
            echo_count: 0,
            corruption: None,
            failures: HashMap::new(),
            muted: false,
        }
    }

    /// Rewrite echoed words. The closure receives the running echo index
    /// (0-based across the whole session) and the word that was sent.
    pub fn set_corruption<F>(&mut self, corruption: F)
    where
        F: FnMut(u64, Word) -> Word + 'static,
    {
        self.corruption = Some(Box::new(corruption));
    }

    pub fn clear_corruption(&mut self) {
        self.corruption = None;
    }

    /// A muted target swallows everything and never answers.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Make every execution of `opcode` reply with `code` instead of Ok.
    pub fn fail_opcode(&mut self, opcode: Opcode, code: ErrorCode) {
        self.failures.insert(opcode, code);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Queue an unsolicited NUL-terminated console string.
    pub fn queue_console(&mut self, text: &str) {
        self.outbound_bytes.extend(text.bytes());
        self.outbound_bytes.push_back(0);
    }

    /// Leave streaming programmer mode (the firmware does this on its own
    /// once the image is complete).
    pub fn finish_programming(&mut self) {
        self.program_address = None;
    }

    /// Leave programmer mode on our own after `words` streamed words.
    pub fn set_program_limit(&mut self, words: Option<usize>) {
        self.program_limit = words;
    }

    pub fn is_programming(&self) -> bool {
        self.program_address.is_some()
    }

    pub fn pc(&self) -> Word {
        self.pc
    }

    pub fn set_pc(&mut self, pc: Word) {
        self.pc = pc;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn register(&self, index: usize) -> Word {
        self.registers[index]
    }

    pub fn set_register(&mut self, index: usize, value: Word) {
        if index != 0 {
            self.registers[index] = value;
        }
    }

    pub fn memory_byte(&self, address: Word) -> u8 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    pub fn memory_word(&self, address: Word) -> Word {
        let mut bytes = [0u8; WORD_BYTES];
        for (offset, byte) in bytes.iter_mut().enumerate() {
            *byte = self.memory_byte(address.wrapping_add(offset as Word));
        }
        Word::from_le_bytes(bytes)
    }

    pub fn set_memory_word(&mut self, address: Word, value: Word) {
        for (offset, byte) in value.to_le_bytes().iter().enumerate() {
            self.memory.insert(address.wrapping_add(offset as Word), *byte);
        }
    }

    /// Breakpoint slots as the target sees them
    pub fn breakpoints(&self) -> &[Option<Word>] {
        &self.breakpoints
    }

    /// Every word the host transmitted, in order
    pub fn sent_words(&self) -> &[Word] {
        &self.sent
    }

    /// Every byte the host transmitted through the byte interface
    pub fn sent_bytes(&self) -> &[u8] {
        &self.sent_bytes
    }

    /// Completed command frames, in execution order
    pub fn executed(&self) -> &[CommandFrame] {
        &self.executed
    }

    fn push_word(&mut self, word: Word) {
        if !self.muted {
            self.outbound.push_back(word);
        }
    }

    fn echo(&mut self, word: Word) {
        let index = self.echo_count;
        self.echo_count += 1;
        let echoed = match self.corruption.as_mut() {
            Some(corrupt) => corrupt(index, word),
            None => word,
        };
        self.push_word(echoed);
    }

    fn execute(&mut self, opcode: Word, address: Word, data: Word) -> (Word, ErrorCode) {
        let Some(opcode) = Opcode::from_code(opcode) else {
            return (0, ErrorCode::McuError);
        };
        self.executed.push(CommandFrame::new(opcode, address, data));

        if let Some(code) = self.failures.get(&opcode) {
            return (0, *code);
        }

        match opcode {
            Opcode::None => (0, ErrorCode::Ok),
            Opcode::Pause => {
                self.paused = true;
                (self.pc, ErrorCode::Ok)
            }
            Opcode::Resume => {
                self.paused = false;
                (0, ErrorCode::Ok)
            }
            Opcode::Step => {
                self.pc = self.pc.wrapping_add(4);
                (0, ErrorCode::Ok)
            }
            Opcode::Reset => {
                self.pc = 0;
                self.registers = [0; REGISTER_COUNT];
                (0, ErrorCode::Ok)
            }
            Opcode::Status => (Word::from(self.paused), ErrorCode::Ok),
            Opcode::MemReadByte => (Word::from(self.memory_byte(address)), ErrorCode::Ok),
            Opcode::MemReadWord => (self.memory_word(address), ErrorCode::Ok),
            Opcode::MemWriteByte => {
                self.memory.insert(address, data as u8);
                (0, ErrorCode::Ok)
            }
            Opcode::MemWriteWord => {
                self.set_memory_word(address, data);
                (0, ErrorCode::Ok)
            }
            Opcode::RegRead => match usize::try_from(address) {
                Ok(index) if index < REGISTER_COUNT => (self.registers[index], ErrorCode::Ok),
                _ => (0, ErrorCode::McuError),
            },
            Opcode::RegWrite => match usize::try_from(address) {
                Ok(index) if index < REGISTER_COUNT => {
                    self.set_register(index, data);
                    (0, ErrorCode::Ok)
                }
                _ => (0, ErrorCode::McuError),
            },
            Opcode::BreakpointAdd => match self.breakpoints.iter().position(Option::is_none) {
                Some(slot) => {
                    self.breakpoints[slot] = Some(address);
                    (0, ErrorCode::Ok)
                }
                None => (0, ErrorCode::McuError),
            },
            Opcode::BreakpointRemove => {
                let slot = usize::try_from(address)
                    .ok()
                    .and_then(|slot| self.breakpoints.get_mut(slot));
                match slot {
                    Some(entry) if entry.is_some() => {
                        *entry = None;
                        (0, ErrorCode::Ok)
                    }
                    _ => (0, ErrorCode::McuError),
                }
            }
        }
    }
}

impl Default for SimulatedTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedTarget {
    fn send_word(&mut self, word: Word) -> io::Result<()> {
        self.sent.push(word);

        if let Some(address) = self.program_address {
            self.set_memory_word(address, word);
            self.program_address = Some(address.wrapping_add(WORD_BYTES as Word));
            self.programmed += 1;
            if self.program_limit == Some(self.programmed) {
                self.program_address = None;
            }
            return Ok(());
        }

        if self.frame.is_empty() && word == PROGRAM_MODE_SENTINEL {
            self.program_address = Some(0);
            self.programmed = 0;
            return Ok(());
        }

        self.echo(word);
        self.frame.push(word);
        if self.frame.len() == 3 {
            let (opcode, address, data) = (self.frame[0], self.frame[1], self.frame[2]);
            self.frame.clear();
            let (value, status) = self.execute(opcode, address, data);
            self.push_word(value);
            self.push_word(status.to_status());
        }
        Ok(())
    }

    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(!self.outbound.is_empty() || !self.outbound_bytes.is_empty())
    }

    fn recv_word(&mut self) -> io::Result<Word> {
        self.outbound
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no word pending"))
    }

    fn send_byte(&mut self, byte: u8) -> io::Result<()> {
        self.sent_bytes.push(byte);
        if !self.muted {
            self.outbound_bytes.push_back(byte);
        }
        Ok(())
    }

    fn recv_byte(&mut self) -> io::Result<u8> {
        self.outbound_bytes
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no byte pending"))
    }
}
