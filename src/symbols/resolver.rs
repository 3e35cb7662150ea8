//! Turns command tokens into words: numbers, variables and register names.

use super::variables::VariableMap;
use crate::error::ResolveError;
use crate::transport::Word;

/// Size of the register file
pub const REGISTER_COUNT: usize = 32;

/// RISC-V ABI register names, indexed by register number.
static REGISTER_ALIASES: [&str; REGISTER_COUNT] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", //
    "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5", //
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", //
    "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

/// Parse `0x`/`0X` hex or plain decimal. A leading `-` gives the two's
/// complement word. Returns `None` for anything else.
pub fn parse_number(token: &str) -> Option<Word> {
    let token = token.trim();
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        return Word::from_str_radix(hex, 16).ok();
    }
    if let Some(magnitude) = token.strip_prefix('-') {
        return magnitude.parse::<Word>().ok().map(Word::wrapping_neg);
    }
    token.parse::<Word>().ok()
}

/// Index of an ABI register name, case-insensitive
pub fn register_index(alias: &str) -> Option<usize> {
    REGISTER_ALIASES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(alias))
}

/// ABI name of a register index
pub fn register_name(index: usize) -> Option<&'static str> {
    REGISTER_ALIASES.get(index).copied()
}

/// Resolves tokens against the session's variables
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    variables: VariableMap,
}

impl Resolver {
    pub fn new(variables: VariableMap) -> Self {
        Self { variables }
    }

    pub fn variables(&self) -> &VariableMap {
        &self.variables
    }

    /// Numeric literal first, then variable lookup. Never guesses.
    pub fn resolve_number_or_variable(&self, token: &str) -> Result<Word, ResolveError> {
        parse_number(token)
            .or_else(|| self.variables.get(token))
            .ok_or_else(|| ResolveError::NotFound(token.to_string()))
    }

    /// `xN`, then ABI alias, then number or variable. Fixed architectural
    /// names cannot be shadowed by user variables.
    pub fn resolve_register_token(&self, token: &str) -> Result<Word, ResolveError> {
        if let Some(digits) = token.strip_prefix('x').or_else(|| token.strip_prefix('X')) {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return digits
                    .parse::<Word>()
                    .map_err(|_| ResolveError::InvalidNumber(token.to_string()));
            }
        }

        if let Some(index) = register_index(token) {
            return Ok(index as Word);
        }

        self.resolve_number_or_variable(token)
    }
}
