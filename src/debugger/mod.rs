//! Target control: session façade and breakpoint bookkeeping

pub mod breakpoints;
pub mod session;

pub use breakpoints::{BreakpointTable, DEFAULT_CAPACITY};
pub use session::{Session, TargetState};
