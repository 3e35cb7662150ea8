//! Integration tests for the UART debug controller

use std::io::{Cursor, Write};

use uart_debug::{
    error::{BreakpointError, LinkTestError, ProgramError, ProtocolError},
    flash::{BinaryImage, ProgramMode, Programmer},
    link::{LinkTestConfig, LinkTester},
    shell::Shell,
    symbols::{Resolver, VariableMap},
    Config, DebugError, EngineConfig, ErrorCode, Opcode, Session, SimulatedTarget, TargetState, Word,
    WORD_BYTES,
};

fn session() -> Session<SimulatedTarget> {
    Session::new(SimulatedTarget::new(), EngineConfig::default())
}

#[test]
fn test_config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    // Test TOML serialization
    let toml_str = config.to_toml().unwrap();
    assert!(!toml_str.is_empty());
    for section in ["[serial]", "[protocol]", "[breakpoints]", "[link_test]", "[logging]"] {
        assert!(toml_str.contains(section), "missing {}", section);
    }
}

#[test]
fn test_config_file_drives_session() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[protocol]\nreply_timeout_ms = 50\n\n[breakpoints]\ncapacity = 2").unwrap();
    let config = Config::load(Some(&file.path().to_path_buf())).unwrap();

    let mut session = Session::new(SimulatedTarget::new(), config.engine_config())
        .with_breakpoint_capacity(config.breakpoints.capacity);
    assert_eq!(session.engine().config().reply_timeout.as_millis(), 50);

    session.add_breakpoint(0x10).unwrap();
    session.add_breakpoint(0x20).unwrap();
    assert!(matches!(session.add_breakpoint(0x30), Err(BreakpointError::Full(2))));
}

#[test]
fn test_error_types() {
    let error = DebugError::InvalidConfig("test".to_string());
    assert!(error.to_string().contains("Invalid configuration"));
    assert_eq!(error.code(), ErrorCode::ClientError);

    let error: DebugError = ProtocolError::Mcu { status: 2 }.into();
    assert!(error.to_string().contains("MCU reported an error"));
    assert_eq!(error.code(), ErrorCode::McuError);

    let error: DebugError = ProtocolError::TargetTimeout.into();
    assert_eq!(error.code(), ErrorCode::Timeout);
}

#[test]
fn test_pause_scenario() {
    let mut target = SimulatedTarget::new();
    target.set_pc(0x0000_0200);
    let mut session = Session::new(target, EngineConfig::default());
    assert_eq!(session.state(), TargetState::Running);

    let pc = session.pause().unwrap();

    assert_eq!(pc, 0x200);
    assert_eq!(session.state(), TargetState::Paused);
    let target = session.engine().transport();
    assert_eq!(target.sent_words()[0], Opcode::Pause.code());
    assert_eq!(target.sent_words().len(), 3);
    assert!(target.is_paused());
}

#[test]
fn test_mem_write_word_scenario() {
    let mut session = session();

    session.mem_write_word(0x1000, 0xDEADBEEF).unwrap();

    let target = session.engine().transport();
    assert_eq!(
        target.sent_words(),
        &[Opcode::Pause.code(), 0, 0, Opcode::MemWriteWord.code(), 0x1000, 0xDEADBEEF]
    );
    assert_eq!(target.memory_word(0x1000), 0xDEADBEEF);
}

#[test]
fn test_mem_write_word_rejects_bad_status() {
    let mut target = SimulatedTarget::new();
    target.fail_opcode(Opcode::MemWriteWord, ErrorCode::Timeout);
    let mut session = Session::new(target, EngineConfig::default());

    let err = session.mem_write_word(0x1000, 1).unwrap_err();
    assert!(matches!(err, ProtocolError::TargetTimeout));
    assert_eq!(err.code(), ErrorCode::Timeout);
}

#[test]
fn test_breakpoints_mirror_target() {
    let mut session = session();

    let slots: Vec<usize> = [0x100, 0x200, 0x300]
        .into_iter()
        .map(|address| session.add_breakpoint(address).unwrap())
        .collect();
    assert_eq!(slots, vec![0, 1, 2]);

    assert_eq!(session.remove_breakpoint(1).unwrap(), 0x200);
    assert_eq!(session.add_breakpoint(0x400).unwrap(), 1);

    let target = session.engine().transport();
    assert_eq!(&target.breakpoints()[..3], &[Some(0x100), Some(0x400), Some(0x300)]);
    assert_eq!(session.breakpoints(), vec![(0, 0x100), (1, 0x400), (2, 0x300)]);

    assert_eq!(session.clear_breakpoints().unwrap(), 3);
    assert!(session.breakpoints().is_empty());
    assert!(session.engine().transport().breakpoints().iter().all(Option::is_none));
}

#[test]
fn test_link_test_over_lossy_link() {
    let mut target = SimulatedTarget::new();
    // Every tenth echo is damaged
    target.set_corruption(|index, word| if index % 10 == 9 { !word } else { word });
    let mut session = Session::new(target, EngineConfig::default());

    let tester = LinkTester::new(LinkTestConfig {
        seed: Some(11),
        ..LinkTestConfig::default()
    });
    match tester.run(session.engine_mut(), 100) {
        Err(LinkTestError::AccuracyTooLow { report, .. }) => {
            assert_eq!(report.misses, 30);
            assert!((report.accuracy() - 0.9).abs() < 1e-9);
        }
        other => panic!("expected AccuracyTooLow, got {:?}", other),
    }

    // The link test leaves the protocol in sync
    session.engine_mut().transport_mut().clear_corruption();
    session.mem_write_word(0x40, 5).unwrap();
    assert_eq!(session.mem_read_word(0x40).unwrap(), 5);
}

#[test]
fn test_program_image_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firmware.bin");
    let bytes: Vec<u8> = (0u8..10).collect();
    std::fs::write(&path, &bytes).unwrap();

    let image = BinaryImage::open(&path).unwrap();
    assert_eq!(image.word_count(), 10usize.div_ceil(WORD_BYTES));

    let mut session = session();
    let result = Programmer::flash(&mut session, &image, ProgramMode::Acknowledged, || Ok(())).unwrap();
    assert_eq!(result.words_programmed, image.word_count());

    let target = session.engine().transport();
    for (address, byte) in bytes.iter().enumerate() {
        assert_eq!(target.memory_byte(address as Word), *byte);
    }
    assert_eq!(target.memory_byte(bytes.len() as Word), 0);
    assert!(!target.is_paused());
}

#[test]
fn test_program_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = BinaryImage::open(dir.path().join("nope.bin")).map_err(ProgramError::Image).unwrap_err();
    assert!(err.to_string().contains("Could not read program image"));
}

#[test]
fn test_shell_session_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let vars_path = dir.path().join("variables");
    std::fs::write(&vars_path, "# test symbols\nentry 0x80\nscratch 0x1000\n").unwrap();
    let variables = VariableMap::load(&vars_path).unwrap();

    let mut target = SimulatedTarget::new();
    target.queue_console("boot ok");
    let session = Session::new(target, EngineConfig::default()).with_resolver(Resolver::new(variables));
    let mut shell = Shell::new(session, LinkTestConfig::default());

    let script = "b entry\nmww scratch 0x55\nrw sp scratch\nbl\nrr sp\nr\nquit\n";
    let mut out = Vec::new();
    shell.run(Cursor::new(script), &mut out).unwrap();

    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("TARGET: boot ok"));
    assert!(out.contains("Add breakpoint 0"));
    assert!(out.contains("x2 (sp) <- 4096"));
    assert!(out.contains("Resumed"));
    assert!(!out.contains("Error"));

    let session = shell.into_session();
    assert_eq!(session.state(), TargetState::Running);
    let target = session.engine().transport();
    assert_eq!(target.register(2), 0x1000);
    assert_eq!(target.memory_word(0x1000), 0x55);
    assert_eq!(target.breakpoints()[0], Some(0x80));
}
