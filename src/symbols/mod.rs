//! Symbolic address and register resolution

pub mod resolver;
pub mod variables;

pub use resolver::{parse_number, register_index, register_name, Resolver, REGISTER_COUNT};
pub use variables::VariableMap;
