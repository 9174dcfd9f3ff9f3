//! Symbol identifiers and metadata.
//!
//! Symbols are the atomic units of the knowledge store. Every concept and
//! predicate is identified by a [`SymbolId`] and described by [`SymbolMeta`].

use std::num::NonZeroU64;

use crate::error::{StoreError, StoreResult};

/// Unique, niche-optimized identifier for a symbol.
///
/// Uses `NonZeroU64` so that `Option<SymbolId>` is the same size as `SymbolId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SymbolId(NonZeroU64);

impl SymbolId {
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(SymbolId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sym:{}", self.0)
    }
}

/// Classification of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// A concept node (entity, class, value).
    Concept,
    /// A predicate linking two concepts.
    Predicate,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Concept => write!(f, "Concept"),
            SymbolKind::Predicate => write!(f, "Predicate"),
        }
    }
}

/// Metadata describing a symbol.
#[derive(Debug, Clone)]
pub struct SymbolMeta {
    pub id: SymbolId,
    pub kind: SymbolKind,
    /// Human-readable label, unique case-insensitively.
    pub label: String,
    /// Server cycle during which the symbol was created.
    pub created_cycle: i64,
}

/// Monotonic symbol ID allocator. IDs start at 1 and are never reused.
#[derive(Debug)]
pub struct SymbolAllocator {
    next: u64,
}

impl SymbolAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> StoreResult<SymbolId> {
        let id = SymbolId::new(self.next).ok_or(StoreError::Exhausted)?;
        self.next = self.next.checked_add(1).unwrap_or(0);
        Ok(id)
    }
}

impl Default for SymbolAllocator {
    fn default() -> Self {
        Self::new()
    }
}
