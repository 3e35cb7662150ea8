//! Line-oriented command shell
//!
//! Each input line is tokenized on whitespace and parsed with clap, so every
//! command has a long name plus the short alias operators type. Argument
//! tokens are resolved through the session's [`Resolver`](crate::symbols::Resolver)
//! and may be numbers or variable names.

use clap::{error::ErrorKind, Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::debugger::Session;
use crate::error::{DebugError, LinkTestError, ProgramError, Result};
use crate::flash::{BinaryImage, ProgramMode, Programmer};
use crate::link::{LinkTestConfig, LinkTester};
use crate::symbols::register_name;
use crate::transport::{Transport, Word};
use crate::utils::format_word;

const PROMPT: &str = "(uart-debug) ";
const PAUSED_PROMPT: &str = "(uart-debug paused) ";

#[derive(Parser, Debug)]
#[command(name = "", no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum ShellCommand {
    /// Halt the target
    #[command(visible_alias = "p")]
    Pause,
    /// Let the target run
    #[command(visible_alias = "r")]
    Resume,
    /// Execute one instruction
    #[command(visible_alias = "s")]
    Step,
    /// Restart the target from its reset vector
    #[command(visible_alias = "rst")]
    Reset,
    /// Query the target status word
    #[command(visible_alias = "st")]
    Status,
    /// Set a breakpoint at an address
    #[command(visible_alias = "b")]
    Break { address: String },
    /// Delete the breakpoint in a slot
    #[command(visible_alias = "del")]
    Delete { slot: String },
    /// Delete all breakpoints
    #[command(visible_alias = "bc")]
    Clear,
    /// List breakpoints
    #[command(visible_alias = "bl")]
    List,
    /// Read a register (x0-x31 or ABI name)
    #[command(visible_alias = "rr")]
    RegRead { register: String },
    /// Write a register
    #[command(visible_alias = "rw")]
    RegWrite {
        register: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Read a memory word
    #[command(visible_alias = "mrw")]
    MemReadWord { address: String },
    /// Write a memory word
    #[command(visible_alias = "mww")]
    MemWriteWord {
        address: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Read a memory byte
    #[command(visible_alias = "mrb")]
    MemReadByte { address: String },
    /// Write a memory byte
    #[command(visible_alias = "mwb")]
    MemWriteByte { address: String, value: String },
    /// Run a connection test
    #[command(visible_alias = "t")]
    Test {
        iterations: usize,
        /// Write every exchange to the test log
        #[arg(long)]
        log: bool,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Program a binary image and reset
    #[command(visible_alias = "pr")]
    Program {
        file: PathBuf,
        /// Stream without acknowledgement
        #[arg(short, long)]
        fast: bool,
    },
    /// Show loaded variables
    Vars,
    /// Leave the shell
    #[command(visible_aliases = ["q", "exit"])]
    Quit,
}

/// What the loop should do after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Interactive front end over a [`Session`]
pub struct Shell<T: Transport> {
    session: Session<T>,
    link_test: LinkTestConfig,
}

impl<T: Transport> Shell<T> {
    /// `link_test.log_file` is the log used when a test asks for `--log`.
    pub fn new(session: Session<T>, link_test: LinkTestConfig) -> Self {
        Self { session, link_test }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn into_session(self) -> Session<T> {
        self.session
    }

    /// Read lines until `quit` or end of input. Command failures are printed
    /// and the loop carries on; only output errors end it early.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> Result<()> {
        loop {
            self.print_console(&mut out)?;
            let prompt = if self.session.is_paused() { PAUSED_PROMPT } else { PROMPT };
            write!(out, "{}", prompt)?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                return Ok(());
            }

            match self.execute_line(&line, &mut input, &mut out) {
                Ok(Flow::Quit) => return Ok(()),
                Ok(Flow::Continue) => {}
                Err(e) => writeln!(out, "Error: {}", e)?,
            }
        }
    }

    /// Print any console strings the target sent since the last command.
    pub fn print_console<W: Write>(&mut self, out: &mut W) -> Result<()> {
        loop {
            match self.session.poll_console() {
                Ok(Some(text)) => writeln!(out, "TARGET: {}", text)?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!("Dropped target console output: {}", e);
                    return Ok(());
                }
            }
        }
    }

    /// Parse and run one line. `input` is only read for operator
    /// confirmation after fast programming.
    pub fn execute_line<R: BufRead, W: Write>(
        &mut self,
        line: &str,
        input: &mut R,
        out: &mut W,
    ) -> Result<Flow> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Flow::Continue);
        }

        let command = match ShellLine::try_parse_from(tokens.iter().copied()) {
            Ok(parsed) => parsed.command,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand) => {
                write!(out, "{}", e.render())?;
                return Ok(Flow::Continue);
            }
            Err(e) => {
                let message = e.render().to_string();
                let first = message.lines().next().unwrap_or_default();
                return Err(DebugError::InvalidCommand(
                    first.trim_start_matches("error: ").to_string(),
                ));
            }
        };

        debug!("Shell command: {:?}", command);
        self.dispatch(command, input, out)
    }

    fn dispatch<R: BufRead, W: Write>(
        &mut self,
        command: ShellCommand,
        input: &mut R,
        out: &mut W,
    ) -> Result<Flow> {
        match command {
            ShellCommand::Pause => {
                let pc = self.session.pause()?;
                writeln!(out, "Paused at pc = {}", format_word(pc))?;
            }
            ShellCommand::Resume => {
                self.session.resume()?;
                writeln!(out, "Resumed")?;
            }
            ShellCommand::Step => {
                self.session.step()?;
                writeln!(out, "Stepped")?;
            }
            ShellCommand::Reset => {
                self.session.reset()?;
                writeln!(out, "Reset")?;
            }
            ShellCommand::Status => {
                let status = self.session.status()?;
                writeln!(out, "Status: {} ({})", status, format_word(status))?;
            }
            ShellCommand::Break { address } => {
                let address = self.number(&address)?;
                let slot = self.session.add_breakpoint(address)?;
                writeln!(out, "Add breakpoint {} @ pc = {}", slot, format_word(address))?;
            }
            ShellCommand::Delete { slot } => {
                let slot = self.slot(&slot)?;
                let address = self.session.remove_breakpoint(slot)?;
                writeln!(out, "Delete breakpoint {} @ pc = {}", slot, format_word(address))?;
            }
            ShellCommand::Clear => {
                let before = self.session.breakpoints();
                let result = self.session.clear_breakpoints();
                let after = self.session.breakpoints();
                for (slot, address) in before.iter().filter(|entry| !after.contains(entry)) {
                    writeln!(out, "Delete breakpoint {} @ pc = {}", slot, format_word(*address))?;
                }
                result?;
            }
            ShellCommand::List => self.list_breakpoints(out)?,
            ShellCommand::RegRead { register } => {
                let index = self.register(&register)?;
                let value = self.session.reg_read(index)?;
                writeln!(out, "{} = {} ({})", register_label(index), value, format_word(value))?;
            }
            ShellCommand::RegWrite { register, value } => {
                let index = self.register(&register)?;
                let value = self.number(&value)?;
                self.session.reg_write(index, value)?;
                writeln!(out, "{} <- {} ({})", register_label(index), value, format_word(value))?;
            }
            ShellCommand::MemReadWord { address } => {
                let address = self.number(&address)?;
                let value = self.session.mem_read_word(address)?;
                writeln!(out, "MEM[{}] = {} ({})", format_word(address), value, format_word(value))?;
            }
            ShellCommand::MemWriteWord { address, value } => {
                let address = self.number(&address)?;
                let value = self.number(&value)?;
                self.session.mem_write_word(address, value)?;
                writeln!(out, "MEM[{}] <- {} ({})", format_word(address), value, format_word(value))?;
            }
            ShellCommand::MemReadByte { address } => {
                let address = self.number(&address)?;
                let value = self.session.mem_read_byte(address)?;
                writeln!(out, "MEM[{}] = {} (0x{:02X})", format_word(address), value, value)?;
            }
            ShellCommand::MemWriteByte { address, value } => {
                let address = self.number(&address)?;
                let raw = self.number(&value)?;
                let value = u8::try_from(raw)
                    .map_err(|_| DebugError::InvalidCommand(format!("byte value {} out of range", value)))?;
                self.session.mem_write_byte(address, value)?;
                writeln!(out, "MEM[{}] <- {} (0x{:02X})", format_word(address), value, value)?;
            }
            ShellCommand::Test {
                iterations,
                log,
                seed,
            } => self.link_test(iterations, log, seed, out)?,
            ShellCommand::Program { file, fast } => {
                let image = BinaryImage::open(&file).map_err(ProgramError::Image)?;
                let mode = if fast {
                    ProgramMode::Fast
                } else {
                    ProgramMode::Acknowledged
                };
                writeln!(out, "Programming {} ({} words, {} mode)", file.display(), image.word_count(), mode)?;
                let result = Programmer::flash(&mut self.session, &image, mode, || {
                    write!(out, "Programming complete! Press enter to continue... ")?;
                    out.flush()?;
                    let mut line = String::new();
                    input.read_line(&mut line).map(drop)
                })?;
                writeln!(
                    out,
                    "Programmed {} bytes in {}ms",
                    result.bytes_programmed, result.programming_time_ms
                )?;
            }
            ShellCommand::Vars => {
                let variables = self.session.resolver().variables();
                if variables.is_empty() {
                    writeln!(out, "No variables loaded")?;
                }
                for (name, value) in variables.iter() {
                    writeln!(out, "{} = {}", name, format_word(value))?;
                }
            }
            ShellCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn list_breakpoints<W: Write>(&self, out: &mut W) -> Result<()> {
        let breakpoints = self.session.breakpoints();
        if breakpoints.is_empty() {
            writeln!(out, "No breakpoints set")?;
            return Ok(());
        }
        writeln!(out, "NUM  |  PC")?;
        for (slot, address) in breakpoints {
            writeln!(out, " {:<3} |  {}", slot, format_word(address))?;
        }
        Ok(())
    }

    fn link_test<W: Write>(
        &mut self,
        iterations: usize,
        log: bool,
        seed: Option<u64>,
        out: &mut W,
    ) -> Result<()> {
        let config = LinkTestConfig {
            log_file: if log { self.link_test.log_file.clone() } else { None },
            seed,
            ..self.link_test.clone()
        };
        match LinkTester::new(config).run(self.session.engine_mut(), iterations) {
            Ok(report) => {
                writeln!(out, "{}", report)?;
                if let Some(path) = &report.log_file {
                    writeln!(out, "See details in {}", path.display())?;
                }
                Ok(())
            }
            Err(LinkTestError::AccuracyTooLow { report, threshold }) => {
                writeln!(out, "{}", report)?;
                Err(LinkTestError::AccuracyTooLow { report, threshold }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn number(&self, token: &str) -> Result<Word> {
        Ok(self.session.resolver().resolve_number_or_variable(token)?)
    }

    fn register(&self, token: &str) -> Result<Word> {
        Ok(self.session.resolver().resolve_register_token(token)?)
    }

    fn slot(&self, token: &str) -> Result<usize> {
        let value = self.number(token)?;
        usize::try_from(value)
            .map_err(|_| DebugError::InvalidCommand(format!("breakpoint slot {} out of range", token)))
    }
}

fn register_label(index: Word) -> String {
    match usize::try_from(index).ok().and_then(register_name) {
        Some(name) => format!("x{} ({})", index, name),
        None => format!("x{}", index),
    }
}
