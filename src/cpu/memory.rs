//! TRN memory.
//!
//! Memory is an ordered, zero-based, growable sequence of 20-bit words.
//! The assembler and the image codec grow it as they write; the CPU works
//! on a fixed copy and treats anything past the end as out of bounds.

use crate::isa::word::WORD_MASK;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A TRN memory image.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    cells: Vec<u32>,
}

impl Memory {
    /// Create an empty memory.
    pub fn new() -> Self {
        Self { cells: Vec::new() }
    }

    /// Wrap an existing list of words.
    pub fn from_words(cells: Vec<u32>) -> Self {
        Self { cells }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All cells in address order.
    pub fn words(&self) -> &[u32] {
        &self.cells
    }

    /// Read a cell, if it exists.
    #[inline]
    pub fn get(&self, addr: usize) -> Option<u32> {
        self.cells.get(addr).copied()
    }

    /// Read a cell, failing when the address is past the end.
    pub fn read(&self, addr: usize) -> Result<u32, MemoryError> {
        self.get(addr).ok_or(MemoryError::OutOfBounds {
            address: addr,
            len: self.cells.len(),
        })
    }

    /// Overwrite an existing cell, failing when the address is past the end.
    pub fn write(&mut self, addr: usize, value: u32) -> Result<(), MemoryError> {
        let len = self.cells.len();
        let cell = self
            .cells
            .get_mut(addr)
            .ok_or(MemoryError::OutOfBounds { address: addr, len })?;
        *cell = value & WORD_MASK;
        Ok(())
    }

    /// Write a cell, growing memory (zero-filled) to reach it.
    pub fn store(&mut self, addr: usize, value: u32) {
        self.ensure_len(addr + 1);
        self.cells[addr] = value;
    }

    /// Grow memory with zeros until it holds at least `len` cells.
    pub fn ensure_len(&mut self, len: usize) {
        if self.cells.len() < len {
            self.cells.resize(len, 0);
        }
    }
}

impl From<Vec<u32>> for Memory {
    fn from(cells: Vec<u32>) -> Self {
        Self::from_words(cells)
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|cell| **cell != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &self.cells.len())
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("memory access out of bounds: address {address} (memory has {len} cells)")]
    OutOfBounds { address: usize, len: usize },
}
