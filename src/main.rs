//! UART Debug Controller - Main Entry Point

use anyhow::{bail, Context};
use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use uart_debug::{
    config::{Args, Command, LoggingConfig},
    error::LinkTestError,
    flash::{BinaryImage, ProgramMode, Programmer},
    link::LinkTester,
    shell::Shell,
    symbols::{Resolver, VariableMap},
    Config, SerialTransport, Session,
};

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Handle special flags first
    if args.generate_config {
        let config = Config::default();
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    // Load configuration
    let mut config = Config::load(args.config.as_ref()).context("Failed to load configuration")?;

    // Merge command line arguments into configuration
    config.merge_args(&args);

    init_logging(&config.logging)?;

    info!("Starting UART debug controller v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command line args: {:?}", args);

    if args.validate_config {
        config.validate()?;
        println!("Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    // Validate final configuration
    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        e
    })?;

    let transport = SerialTransport::open(
        &config.serial.port,
        config.serial.baud_rate,
        config.serial.inter_byte_timeout(),
    )
    .context("Could not open serial port")?;

    let variables = load_variables(&config)?;
    let mut session = Session::new(transport, config.engine_config())
        .with_breakpoint_capacity(config.breakpoints.capacity)
        .with_resolver(Resolver::new(variables));

    match args.command.clone() {
        Some(Command::Test {
            iterations,
            log,
            seed,
        }) => {
            let tester = LinkTester::new(config.link_test_config(log, seed));
            run_link_test(&tester, &mut session, iterations)?;
        }
        Some(Command::Program { file, fast }) => {
            let image = BinaryImage::open(&file)
                .with_context(|| format!("Could not program with {}", file.display()))?;
            let mode = if fast { ProgramMode::Fast } else { ProgramMode::Acknowledged };
            let result = Programmer::flash(&mut session, &image, mode, wait_for_enter)?;
            println!(
                "Programmed {} bytes in {}ms",
                result.bytes_programmed, result.programming_time_ms
            );
        }
        Some(Command::Exec { line }) => {
            let mut shell = Shell::new(session, config.link_test_config(true, None));
            let stdout = io::stdout();
            shell.execute_line(&line.join(" "), &mut io::stdin().lock(), &mut stdout.lock())?;
        }
        None => {
            let iterations = config.link_test.startup_iterations;
            if iterations > 0 {
                let tester = LinkTester::new(config.link_test_config(false, None));
                run_link_test(&tester, &mut session, iterations)
                    .context("Could not open a stable connection")?;
                println!("\nA stable connection has been established. Launching debugger...");
            }

            print_variables(session.resolver().variables());
            println!("Connected to {}. Type 'help' for commands.", config.serial.port);

            let mut shell = Shell::new(session, config.link_test_config(true, None));
            shell.run(io::stdin().lock(), io::stdout())?;
        }
    }

    info!("UART debug controller stopped");
    Ok(())
}

/// Initialize logging system
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    // Configure output destination
    if let Some(log_file) = &logging.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("Could not open log file {}", log_file.display()))?;

        subscriber.with_writer(file).init();

        println!("Logging to file: {}", log_file.display());
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    debug!("Logging initialized with level: {}", logging.level);
    Ok(())
}

/// A missing default variables file is normal; an explicitly configured one
/// must exist.
fn load_variables(config: &Config) -> anyhow::Result<VariableMap> {
    let Some(path) = config.variables_path() else {
        return Ok(VariableMap::new());
    };
    if !path.exists() && config.variables.path.is_none() {
        debug!("No variables file at {}", path.display());
        return Ok(VariableMap::new());
    }
    let variables = VariableMap::load(&path)
        .with_context(|| format!("Failed to load variables from {}", path.display()))?;
    info!("Loaded {} variables from {}", variables.len(), path.display());
    Ok(variables)
}

fn print_variables(variables: &VariableMap) {
    if variables.is_empty() {
        return;
    }
    println!("\nUsing variables:");
    for (name, value) in variables.iter() {
        println!("  {} = {} ({})", name, uart_debug::utils::format_word(value), value);
    }
}

fn run_link_test(
    tester: &LinkTester,
    session: &mut Session<SerialTransport>,
    iterations: usize,
) -> anyhow::Result<()> {
    match tester.run(session.engine_mut(), iterations) {
        Ok(report) => {
            println!("{}", report);
            if let Some(path) = &report.log_file {
                println!("\nSee details in {}", path.display());
            }
            Ok(())
        }
        Err(LinkTestError::AccuracyTooLow { report, threshold }) => {
            println!("{}", report);
            warn!("Link accuracy {:.2} below {:.2}", report.accuracy(), threshold);
            bail!(
                "Connection test failed due to low transmission accuracy ({:.2})",
                report.accuracy()
            )
        }
        Err(e) => Err(e.into()),
    }
}

/// Operator confirmation after fast programming
fn wait_for_enter() -> io::Result<()> {
    print!("Programming complete! Press enter to continue... ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from([
            "uart-debug",
            "/dev/ttyUSB0",
            "--log-level",
            "debug",
            "--breakpoint-slots",
            "4",
        ]);

        assert_eq!(args.device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.breakpoint_slots, Some(4));
        assert!(args.command.is_none());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.link_test.startup_iterations, 16);
        assert_eq!(config.protocol.reply_timeout_ms, 200);
    }

    #[test]
    fn test_explicit_variables_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.variables.path = Some(dir.path().join("missing"));
        assert!(load_variables(&config).is_err());

        let path = dir.path().join("vars");
        std::fs::write(&path, "main 0x100\n").unwrap();
        config.variables.path = Some(path);
        assert_eq!(load_variables(&config).unwrap().get("main"), Some(0x100));
    }
}
