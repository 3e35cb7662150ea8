//! Hardware breakpoint slots mirrored host-side
//!
//! The table never runs ahead of the target: a slot is occupied only after the
//! target acknowledged the add, and freed only after it acknowledged the
//! remove. The wire step is passed in as a `commit` closure.

use crate::error::{BreakpointError, ProtocolError};
use crate::transport::Word;

/// Default number of hardware breakpoint slots
pub const DEFAULT_CAPACITY: usize = 8;

/// Fixed-capacity slot array; the slot index is the user-facing handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointTable {
    slots: Box<[Option<Word>]>,
}

impl BreakpointTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address held by `slot`, if occupied
    pub fn get(&self, slot: usize) -> Option<Word> {
        self.slots.get(slot).copied().flatten()
    }

    /// Claim the first free slot for `address`. `commit(slot, address)` runs
    /// the wire add; the slot is only taken if it succeeds. A full table fails
    /// without calling `commit`.
    pub fn add<F>(&mut self, address: Word, commit: F) -> Result<usize, BreakpointError>
    where
        F: FnOnce(usize, Word) -> Result<(), ProtocolError>,
    {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(BreakpointError::Full(self.capacity()))?;

        commit(slot, address)?;
        self.slots[slot] = Some(address);
        Ok(slot)
    }

    /// Free `slot`. Out-of-range or empty slots fail without calling `commit`.
    pub fn remove<F>(&mut self, slot: usize, commit: F) -> Result<Word, BreakpointError>
    where
        F: FnOnce(usize, Word) -> Result<(), ProtocolError>,
    {
        let address = self.get(slot).ok_or(BreakpointError::NotFound(slot))?;
        commit(slot, address)?;
        self.slots[slot] = None;
        Ok(address)
    }

    /// Occupied slots in index order
    pub fn list(&self) -> Vec<(usize, Word)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, address)| address.map(|address| (slot, address)))
            .collect()
    }

    /// Remove every occupied slot in index order. Stops at the first failure;
    /// slots not yet reached stay occupied and visible through `list`.
    pub fn clear<F>(&mut self, mut commit: F) -> Result<usize, BreakpointError>
    where
        F: FnMut(usize, Word) -> Result<(), ProtocolError>,
    {
        let mut removed = 0;
        for (slot, address) in self.list() {
            commit(slot, address)?;
            self.slots[slot] = None;
            removed += 1;
        }
        Ok(removed)
    }
}

impl Default for BreakpointTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
