//! Loading program images into target memory
//!
//! Two ways to get an image across. Fast mode switches the target's serial
//! driver into programmer mode with a sentinel word and streams the image
//! without any handshake; only the operator can tell when it has finished.
//! Acknowledged mode writes word by word through the normal command path, so
//! every word is echo-checked and status-checked.

use std::fmt;
use std::io;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::image::BinaryImage;
use crate::debugger::Session;
use crate::error::ProgramError;
use crate::protocol::PROGRAM_MODE_SENTINEL;
use crate::transport::{Transport, Word, WORD_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramMode {
    /// Sentinel then raw stream, no replies
    Fast,
    /// One acknowledged memory write per word
    Acknowledged,
}

impl fmt::Display for ProgramMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramMode::Fast => write!(f, "fast"),
            ProgramMode::Acknowledged => write!(f, "acknowledged"),
        }
    }
}

/// Programming operation result
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramResult {
    pub mode: ProgramMode,
    pub words_programmed: usize,
    pub bytes_programmed: usize,
    pub programming_time_ms: u64,
}

/// Batch programmer for [`Session`]s
pub struct Programmer;

impl Programmer {
    /// Transfer `image` to address 0.
    ///
    /// Acknowledged writes stop at the first failure; words already written
    /// stay written.
    pub fn program<T: Transport>(
        session: &mut Session<T>,
        image: &BinaryImage,
        mode: ProgramMode,
    ) -> Result<ProgramResult, ProgramError> {
        let start_time = Instant::now();
        let total = image.word_count();
        info!("Programming {} words ({} mode)", total, mode);

        match mode {
            ProgramMode::Fast => {
                session
                    .engine_mut()
                    .send_raw(PROGRAM_MODE_SENTINEL)
                    .map_err(ProgramError::Sequence)?;

                for (index, word) in image.words().enumerate() {
                    report_progress(index, total);
                    session
                        .engine_mut()
                        .send_raw(word)
                        .map_err(|source| ProgramError::Stream { index, source })?;
                }
            }
            ProgramMode::Acknowledged => {
                for (index, word) in image.words().enumerate() {
                    report_progress(index, total);
                    let address = (index * WORD_BYTES) as Word;
                    session.mem_write_word(address, word).map_err(|source| {
                        ProgramError::WordWrite {
                            index,
                            address,
                            source,
                        }
                    })?;
                }
            }
        }

        let result = ProgramResult {
            mode,
            words_programmed: total,
            bytes_programmed: total * WORD_BYTES,
            programming_time_ms: start_time.elapsed().as_millis() as u64,
        };
        info!(
            "Programmed {} bytes in {}ms",
            result.bytes_programmed, result.programming_time_ms
        );
        Ok(result)
    }

    /// Full programming sequence: pause, program, wait for the operator
    /// (fast mode only), then reset so the target runs the new image.
    pub fn flash<T, F>(
        session: &mut Session<T>,
        image: &BinaryImage,
        mode: ProgramMode,
        confirm: F,
    ) -> Result<ProgramResult, ProgramError>
    where
        T: Transport,
        F: FnOnce() -> io::Result<()>,
    {
        session.pause().map_err(ProgramError::Sequence)?;

        let result = Self::program(session, image, mode)?;

        if mode == ProgramMode::Fast {
            // The target gives no completion signal in programmer mode
            confirm().map_err(ProgramError::Confirmation)?;
        }

        session.reset().map_err(|e| {
            warn!("Reset after programming failed: {}", e);
            ProgramError::Sequence(e)
        })?;
        Ok(result)
    }
}

fn report_progress(index: usize, total: usize) {
    let step = (total / 10).max(1);
    if index % step == 0 {
        debug!("Progress: {:.1}%", index as f64 * 100.0 / total as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::protocol::{EngineConfig, ErrorCode, Opcode};
    use crate::transport::SimulatedTarget;
    use std::cell::Cell;

    fn session_with(target: SimulatedTarget) -> Session<SimulatedTarget> {
        Session::new(target, EngineConfig::default())
    }

    fn image_of(words: &[Word]) -> BinaryImage {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        BinaryImage::from_bytes(bytes)
    }

    #[test]
    fn test_acknowledged_writes_each_word() {
        let mut session = session_with(SimulatedTarget::new());
        let words = [0x11, 0x2222, 0x333333];

        let result = Programmer::program(&mut session, &image_of(&words), ProgramMode::Acknowledged).unwrap();
        assert_eq!(result.words_programmed, 3);
        assert_eq!(result.bytes_programmed, 3 * WORD_BYTES);

        let target = session.engine().transport();
        for (i, word) in words.iter().enumerate() {
            assert_eq!(target.memory_word((i * WORD_BYTES) as Word), *word);
        }
        let writes = target
            .executed()
            .iter()
            .filter(|frame| frame.opcode == Opcode::MemWriteWord)
            .count();
        assert_eq!(writes, 3);
    }

    #[test]
    fn test_acknowledged_stops_at_first_failure() {
        // Pause and write are 3 echoes each; echo 17 is the data of word 2
        let mut target = SimulatedTarget::new();
        target.set_corruption(|index, word| if index == 17 { word ^ 1 } else { word });
        let mut session = session_with(target);

        let err = Programmer::program(&mut session, &image_of(&[1, 2, 3, 4]), ProgramMode::Acknowledged)
            .unwrap_err();
        match err {
            ProgramError::WordWrite { index, address, source } => {
                assert_eq!(index, 2);
                assert_eq!(address, (2 * WORD_BYTES) as Word);
                assert!(matches!(source, ProtocolError::EchoMismatch { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let target = session.engine().transport();
        assert_eq!(target.memory_word(0), 1);
        assert_eq!(target.memory_word(WORD_BYTES as Word), 2);
        assert_eq!(target.memory_word((3 * WORD_BYTES) as Word), 0);
    }

    #[test]
    fn test_acknowledged_reports_target_error() {
        let mut target = SimulatedTarget::new();
        target.fail_opcode(Opcode::MemWriteWord, ErrorCode::McuError);
        let mut session = session_with(target);

        let err = Programmer::program(&mut session, &image_of(&[7]), ProgramMode::Acknowledged).unwrap_err();
        assert!(matches!(err, ProgramError::WordWrite { index: 0, .. }));
    }

    #[test]
    fn test_fast_streams_after_sentinel() {
        let mut session = session_with(SimulatedTarget::new());
        let words = [0xA, 0xB, 0xC];

        Programmer::program(&mut session, &image_of(&words), ProgramMode::Fast).unwrap();

        let target = session.engine().transport();
        assert_eq!(target.sent_words(), &[PROGRAM_MODE_SENTINEL, 0xA, 0xB, 0xC]);
        assert!(target.is_programming());
        assert_eq!(target.memory_word(2 * WORD_BYTES as Word), 0xC);
    }

    #[test]
    fn test_flash_fast_confirms_then_resets() {
        let mut target = SimulatedTarget::new();
        target.set_pc(0x40);
        target.set_program_limit(Some(2));
        let mut session = session_with(target);
        let confirmed = Cell::new(0);

        Programmer::flash(&mut session, &image_of(&[5, 6]), ProgramMode::Fast, || {
            confirmed.set(confirmed.get() + 1);
            Ok(())
        })
        .unwrap();

        assert_eq!(confirmed.get(), 1);
        assert!(!session.is_paused());
        let target = session.engine().transport();
        assert!(!target.is_programming());
        assert!(!target.is_paused());
        assert_eq!(target.pc(), 0);
        assert_eq!(target.memory_word(0), 5);
    }

    #[test]
    fn test_flash_acknowledged_skips_confirmation() {
        let mut session = session_with(SimulatedTarget::new());

        Programmer::flash(&mut session, &image_of(&[9]), ProgramMode::Acknowledged, || {
            panic!("confirmation requested in acknowledged mode")
        })
        .unwrap();

        assert_eq!(session.engine().transport().memory_word(0), 9);
    }

    #[test]
    fn test_flash_confirmation_failure() {
        let mut target = SimulatedTarget::new();
        target.set_program_limit(Some(1));
        let mut session = session_with(target);

        let err = Programmer::flash(&mut session, &image_of(&[1]), ProgramMode::Fast, || {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"))
        })
        .unwrap_err();
        assert!(matches!(err, ProgramError::Confirmation(_)));
    }

    #[test]
    fn test_flash_requires_pause() {
        let mut target = SimulatedTarget::new();
        target.set_muted(true);
        let mut session = session_with(target);

        let err = Programmer::flash(&mut session, &image_of(&[1]), ProgramMode::Acknowledged, || Ok(()))
            .unwrap_err();
        assert!(matches!(err, ProgramError::Sequence(ProtocolError::Timeout { .. })));
    }
}
