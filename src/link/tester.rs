//! Connection quality test
//!
//! Sends `None` frames with random argument words and counts how many echoes
//! come back wrong. Uses the same framing as real commands so a passing test
//! says something about the link the debugger will use.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::LinkTestError;
use crate::protocol::ProtocolEngine;
use crate::transport::{Transport, Word, WORD_BYTES};
use crate::utils::{format_word, kilobytes};

/// Echo comparisons per iteration (opcode, address, data)
const COMPARISONS_PER_ITERATION: usize = 3;

/// Reply words following the data echo (value, status)
const TRAILING_REPLY_WORDS: usize = 2;

/// Words on the wire per iteration in both directions (3 sent, 3 echoed, 1 reply)
const WIRE_WORDS_PER_ITERATION: usize = 7;

/// Default accuracy below which the link is considered unusable
pub const DEFAULT_MIN_ACCURACY: f64 = 0.95;

/// Default name of the per-exchange log
pub const DEFAULT_LOG_FILE: &str = "test.log";

#[derive(Debug, Clone)]
pub struct LinkTestConfig {
    pub min_accuracy: f64,
    /// Per-exchange log destination; `None` disables logging
    pub log_file: Option<PathBuf>,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for LinkTestConfig {
    fn default() -> Self {
        Self {
            min_accuracy: DEFAULT_MIN_ACCURACY,
            log_file: None,
            seed: None,
        }
    }
}

/// Outcome of a connection test
#[derive(Debug, Clone, PartialEq)]
pub struct LinkReport {
    pub iterations: usize,
    pub misses: usize,
    pub elapsed: Duration,
    /// Log file actually written, if any
    pub log_file: Option<PathBuf>,
}

impl LinkReport {
    pub fn comparisons(&self) -> usize {
        self.iterations * COMPARISONS_PER_ITERATION
    }

    /// Fraction of echoes that matched exactly
    pub fn accuracy(&self) -> f64 {
        let total = self.comparisons();
        if total == 0 {
            return 0.0;
        }
        (total - self.misses) as f64 / total as f64
    }

    /// Bytes moved over the link in both directions
    pub fn actual_bytes(&self) -> usize {
        self.iterations * WIRE_WORDS_PER_ITERATION * WORD_BYTES
    }

    /// Payload bytes a real command would have carried
    pub fn useful_bytes(&self) -> usize {
        self.iterations * WORD_BYTES
    }

    pub fn actual_rate(&self) -> Option<f64> {
        self.rate(self.actual_bytes())
    }

    pub fn useful_rate(&self) -> Option<f64> {
        self.rate(self.useful_bytes())
    }

    fn rate(&self, bytes: usize) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| kilobytes(bytes) / secs)
    }
}

impl fmt::Display for LinkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs_f64();
        let rate = |rate: Option<f64>| match rate {
            Some(rate) => format!("{:.2} kB/s", rate),
            None => "n/a".to_string(),
        };
        writeln!(
            f,
            "  Actual: {:.2} kB in {:.2}s ({})",
            kilobytes(self.actual_bytes()),
            secs,
            rate(self.actual_rate())
        )?;
        writeln!(
            f,
            "Apparent: {:.2} kB in {:.2}s ({})",
            kilobytes(self.useful_bytes()),
            secs,
            rate(self.useful_rate())
        )?;
        write!(
            f,
            "Accuracy: {:.2} ({} of {} echoes wrong)",
            self.accuracy(),
            self.misses,
            self.comparisons()
        )
    }
}

/// Appends one record per exchange; silently off when the file can't be opened
struct ExchangeLog {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl ExchangeLog {
    fn open(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::disabled();
        };
        match File::create(path) {
            Ok(file) => {
                let mut log = Self {
                    writer: Some(BufWriter::new(file)),
                    path: Some(path.to_path_buf()),
                };
                log.line(format_args!(
                    "# connection test started {}",
                    chrono::Local::now().to_rfc3339()
                ));
                log
            }
            Err(e) => {
                warn!("Could not open {} for writing, logging disabled: {}", path.display(), e);
                Self::disabled()
            }
        }
    }

    fn disabled() -> Self {
        Self {
            writer: None,
            path: None,
        }
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writeln!(writer, "{}", args) {
                warn!("Connection test log write failed, logging disabled: {}", e);
                self.writer = None;
            }
        }
    }

    fn exchange(&mut self, sent: Word, received: Word) {
        self.line(format_args!(
            "sent: {}, received: {}",
            format_word(sent),
            format_word(received)
        ));
    }

    fn finish(mut self) -> Option<PathBuf> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!("Connection test log flush failed: {}", e);
            }
        }
        self.path
    }
}

/// Runs connection tests against a target
#[derive(Debug, Clone, Default)]
pub struct LinkTester {
    config: LinkTestConfig,
}

impl LinkTester {
    pub fn new(config: LinkTestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LinkTestConfig {
        &self.config
    }

    /// Run `iterations` echo rounds. Accuracy below the threshold is reported
    /// as `AccuracyTooLow` carrying the full report.
    pub fn run<T: Transport>(
        &self,
        engine: &mut ProtocolEngine<T>,
        iterations: usize,
    ) -> Result<LinkReport, LinkTestError> {
        if iterations == 0 {
            return Err(LinkTestError::NoIterations);
        }

        info!(
            "Testing connection with {} commands ({:.2} kB)",
            iterations,
            kilobytes(iterations * WIRE_WORDS_PER_ITERATION * WORD_BYTES)
        );

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut log = ExchangeLog::open(self.config.log_file.as_deref());
        let mut misses = 0;
        let start = Instant::now();

        for i in 0..iterations {
            log.line(format_args!("[{}]", i + 1));

            let words: [Word; COMPARISONS_PER_ITERATION] = [0, rng.gen(), rng.gen()];
            for sent in words {
                let received = engine.exchange(sent)?;
                if received != sent {
                    misses += 1;
                    debug!(
                        "Iteration {}: sent {}, received {}",
                        i + 1,
                        format_word(sent),
                        format_word(received)
                    );
                }
                log.exchange(sent, received);
            }

            engine.drain(TRAILING_REPLY_WORDS)?;
            log.line(format_args!(""));
        }

        let report = LinkReport {
            iterations,
            misses,
            elapsed: start.elapsed(),
            log_file: log.finish(),
        };

        info!(
            "Connection test finished: accuracy {:.4} ({} misses)",
            report.accuracy(),
            report.misses
        );

        if report.accuracy() < self.config.min_accuracy {
            warn!(
                "Connection test failed due to low transmission accuracy ({:.2})",
                report.accuracy()
            );
            return Err(LinkTestError::AccuracyTooLow {
                report,
                threshold: self.config.min_accuracy,
            });
        }

        Ok(report)
    }
}
