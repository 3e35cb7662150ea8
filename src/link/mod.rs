//! Link diagnostics

pub mod tester;

pub use tester::{LinkReport, LinkTestConfig, LinkTester, DEFAULT_LOG_FILE, DEFAULT_MIN_ACCURACY};
