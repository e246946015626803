//! Symbol table and deferred label references.

use std::collections::HashMap;

/// Label name to address mapping, filled in pass 1.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, u32>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a label. Returns the existing address if it was already defined.
    pub fn define(&mut self, name: &str, address: u32) -> Result<(), u32> {
        match self.symbols.get(name) {
            Some(existing) => Err(*existing),
            None => {
                self.symbols.insert(name.to_string(), address);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// All symbols sorted by address.
    pub fn sorted(&self) -> Vec<(&str, u32)> {
        let mut entries: Vec<(&str, u32)> = self
            .symbols
            .iter()
            .map(|(name, addr)| (name.as_str(), *addr))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)));
        entries
    }
}

/// An operand that names labels, patched in pass 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredLabel {
    pub labels: Vec<String>,
    pub partial: i64,
    /// Memory cell to patch.
    pub patch_address: usize,
    /// Source line the reference came from.
    pub line: usize,
}

impl DeferredLabel {
    /// Sum the partial value and every label address.
    ///
    /// Fails with the first undefined label.
    pub fn resolve(&self, symbols: &SymbolTable) -> Result<i64, String> {
        self.labels.iter().try_fold(self.partial, |sum, label| {
            symbols
                .get(label)
                .map(|addr| sum.wrapping_add(addr as i64))
                .ok_or_else(|| label.clone())
        })
    }
}
