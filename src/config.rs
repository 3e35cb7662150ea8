//! Configuration management for the UART debug controller

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::debugger::DEFAULT_CAPACITY;
use crate::error::{DebugError, Result};
use crate::link::{LinkTestConfig, DEFAULT_LOG_FILE, DEFAULT_MIN_ACCURACY};
use crate::protocol::EngineConfig;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "uart-debug")]
#[command(about = "Debug controller for embedded targets over a UART link")]
#[command(version)]
pub struct Args {
    /// Serial device the target is attached to
    #[arg(env = "UART_DEBUG_DEVICE")]
    pub device: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial baud rate
    #[arg(long)]
    pub baud_rate: Option<u32>,

    /// Reply timeout per received word in milliseconds
    #[arg(long)]
    pub reply_timeout: Option<u64>,

    /// Attempts for the legacy byte handshake
    #[arg(long)]
    pub legacy_attempts: Option<u32>,

    /// Number of hardware breakpoint slots on the target
    #[arg(long)]
    pub breakpoint_slots: Option<usize>,

    /// Connection test iterations run on startup (0 disables)
    #[arg(long)]
    pub test_iterations: Option<usize>,

    /// Minimum connection test accuracy (0.0 - 1.0)
    #[arg(long)]
    pub min_accuracy: Option<f64>,

    /// Variable definitions file
    #[arg(long)]
    pub variables: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Generate default configuration file
    #[arg(long)]
    pub generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,

    /// Show current configuration and exit
    #[arg(long)]
    pub show_config: bool,
}

/// One-shot operations; without one the interactive shell starts
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a connection test and exit
    Test {
        /// Number of test commands
        iterations: usize,

        /// Write every exchange to the test log
        #[arg(long)]
        log: bool,

        /// RNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Program a raw binary image at address 0, then reset the target
    Program {
        file: PathBuf,

        /// Stream without acknowledgement (target programmer mode)
        #[arg(long)]
        fast: bool,
    },

    /// Run a single shell command line
    Exec {
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        line: Vec<String>,
    },
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub protocol: ProtocolConfig,
    pub breakpoints: BreakpointConfig,
    pub link_test: LinkTestSettings,
    pub variables: VariablesConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| DebugError::InvalidConfig(format!("Failed to read config file: {}", e)))?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| DebugError::InvalidConfig(format!("Invalid TOML syntax: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Merge command line arguments into configuration. Only options given
    /// on the command line override file values.
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(device) = &args.device {
            self.serial.port = device.clone();
        }
        if let Some(baud_rate) = args.baud_rate {
            self.serial.baud_rate = baud_rate;
        }
        if let Some(timeout) = args.reply_timeout {
            self.protocol.reply_timeout_ms = timeout;
        }
        if let Some(attempts) = args.legacy_attempts {
            self.protocol.legacy_attempts = attempts;
        }
        if let Some(slots) = args.breakpoint_slots {
            self.breakpoints.capacity = slots;
        }
        if let Some(iterations) = args.test_iterations {
            self.link_test.startup_iterations = iterations;
        }
        if let Some(accuracy) = args.min_accuracy {
            self.link_test.min_accuracy = accuracy;
        }
        if let Some(path) = &args.variables {
            self.variables.path = Some(path.clone());
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.log_file.is_some() {
            self.logging.file = args.log_file.clone();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(DebugError::InvalidConfig("serial.port must not be empty".to_string()));
        }
        if self.serial.baud_rate == 0 {
            return Err(DebugError::InvalidConfig("serial.baud_rate must be > 0".to_string()));
        }
        if self.protocol.reply_timeout_ms == 0 {
            return Err(DebugError::InvalidConfig(
                "protocol.reply_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.protocol.legacy_attempts == 0 {
            return Err(DebugError::InvalidConfig(
                "protocol.legacy_attempts must be > 0".to_string(),
            ));
        }
        if self.breakpoints.capacity == 0 {
            return Err(DebugError::InvalidConfig("breakpoints.capacity must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.link_test.min_accuracy) {
            return Err(DebugError::InvalidConfig(
                "link_test.min_accuracy must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate TOML configuration string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DebugError::InvalidConfig(format!("Failed to serialize config: {}", e)))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            reply_timeout: Duration::from_millis(self.protocol.reply_timeout_ms),
            legacy_attempts: self.protocol.legacy_attempts,
        }
    }

    /// Tester settings; the exchange log is only written when `log` is set.
    pub fn link_test_config(&self, log: bool, seed: Option<u64>) -> LinkTestConfig {
        LinkTestConfig {
            min_accuracy: self.link_test.min_accuracy,
            log_file: log.then(|| self.link_test.log_file.clone()),
            seed,
        }
    }

    /// Variables file to load, falling back to the per-user default
    pub fn variables_path(&self) -> Option<PathBuf> {
        self.variables.path.clone().or_else(default_variables_path)
    }
}

fn default_variables_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("uart-debug")
            .join("variables")
    })
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub inter_byte_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            inter_byte_timeout_ms: 1000,
        }
    }
}

impl SerialConfig {
    pub fn inter_byte_timeout(&self) -> Duration {
        Duration::from_millis(self.inter_byte_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProtocolConfig {
    pub reply_timeout_ms: u64,
    pub legacy_attempts: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            reply_timeout_ms: engine.reply_timeout.as_millis() as u64,
            legacy_attempts: engine.legacy_attempts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BreakpointConfig {
    pub capacity: usize,
}

impl Default for BreakpointConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LinkTestSettings {
    pub startup_iterations: usize,
    pub min_accuracy: f64,
    pub log_file: PathBuf,
}

impl Default for LinkTestSettings {
    fn default() -> Self {
        Self {
            startup_iterations: 16,
            min_accuracy: DEFAULT_MIN_ACCURACY,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct VariablesConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("uart-debug").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.protocol.reply_timeout_ms, 200);
        assert_eq!(config.protocol.legacy_attempts, 1);
        assert_eq!(config.breakpoints.capacity, 8);
        assert_eq!(config.link_test.log_file, PathBuf::from("test.log"));
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[serial]\nport = \"/dev/ttyACM3\"\n\n[breakpoints]\ncapacity = 4").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyACM3");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.breakpoints.capacity, 4);
        assert_eq!(config.protocol.reply_timeout_ms, 200);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[link_test]\nmin_accuracy = 1.5").unwrap();
        let err = Config::load(Some(&file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, DebugError::InvalidConfig(_)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[serial\nport = 1").unwrap();
        let err = Config::load(Some(&file.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("Invalid TOML syntax"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = Config::default();
        config.variables.path = Some(PathBuf::from("/tmp/vars"));
        let text = config.to_toml().unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.variables.path, config.variables.path);
        assert_eq!(back.serial.port, config.serial.port);
    }

    #[test]
    fn test_merge_args_overrides_only_given() {
        let mut config = Config::default();
        config.serial.baud_rate = 9600;
        let args = parse(&["/dev/ttyS1", "--reply-timeout", "500", "--log-level", "debug"]);
        config.merge_args(&args);

        assert_eq!(config.serial.port, "/dev/ttyS1");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.protocol.reply_timeout_ms, 500);
        assert_eq!(config.engine_config().reply_timeout, Duration::from_millis(500));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_subcommands_parse() {
        let args = parse(&["/dev/ttyUSB1", "test", "100", "--log", "--seed", "3"]);
        assert_eq!(args.device.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(
            args.command,
            Some(Command::Test {
                iterations: 100,
                log: true,
                seed: Some(3)
            })
        );

        let args = parse(&["/dev/ttyUSB1", "program", "fw.bin", "--fast"]);
        assert_eq!(
            args.command,
            Some(Command::Program {
                file: PathBuf::from("fw.bin"),
                fast: true
            })
        );

        let args = parse(&["/dev/ttyUSB1", "exec", "mww", "0x100", "-1"]);
        assert_eq!(
            args.command,
            Some(Command::Exec {
                line: vec!["mww".into(), "0x100".into(), "-1".into()]
            })
        );
    }

    #[test]
    fn test_link_test_config_log_opt_in() {
        let config = Config::default();
        assert_eq!(config.link_test_config(false, None).log_file, None);
        assert_eq!(
            config.link_test_config(true, Some(9)).log_file,
            Some(PathBuf::from("test.log"))
        );
    }
}
