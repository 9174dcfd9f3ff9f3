//! The shared knowledge store.
//!
//! A single [`KnowledgeStore`] is owned by the server and handed to agents and
//! requests through it. It is only ever touched on the server thread, so it
//! needs no interior locking: producers on other threads package their
//! mutations as requests.

pub mod symbol;

use std::collections::HashMap;

use crate::error::{StoreError, StoreResult};

pub use symbol::{SymbolAllocator, SymbolId, SymbolKind, SymbolMeta};

/// A (subject, predicate, object) statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub subject: SymbolId,
    pub predicate: SymbolId,
    pub object: SymbolId,
    /// Confidence in [0.0, 1.0].
    pub confidence: f32,
}

impl Triple {
    /// Create a triple with full confidence.
    pub fn new(subject: SymbolId, predicate: SymbolId, object: SymbolId) -> Self {
        Self {
            subject,
            predicate,
            object,
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// In-memory symbols and triples.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    symbols: HashMap<SymbolId, SymbolMeta>,
    /// Normalized (lowercase) label → id.
    labels: HashMap<String, SymbolId>,
    triples: Vec<Triple>,
    allocator: SymbolAllocator,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new symbol. Errors if the label is already taken.
    pub fn create_symbol(
        &mut self,
        kind: SymbolKind,
        label: impl Into<String>,
        created_cycle: i64,
    ) -> StoreResult<SymbolMeta> {
        let label = label.into();
        let normalized = label.to_lowercase();
        if let Some(existing) = self.labels.get(&normalized) {
            return Err(StoreError::DuplicateLabel {
                label,
                existing_id: existing.get(),
            });
        }

        let id = self.allocator.next_id()?;
        let meta = SymbolMeta {
            id,
            kind,
            label,
            created_cycle,
        };
        self.labels.insert(normalized, id);
        self.symbols.insert(id, meta.clone());
        Ok(meta)
    }

    /// Look up a symbol by label, creating it if absent.
    pub fn ensure_symbol(
        &mut self,
        kind: SymbolKind,
        label: &str,
        created_cycle: i64,
    ) -> StoreResult<SymbolId> {
        match self.lookup(label) {
            Some(id) => Ok(id),
            None => Ok(self.create_symbol(kind, label, created_cycle)?.id),
        }
    }

    /// Look up a symbol ID by label (case-insensitive).
    pub fn lookup(&self, label: &str) -> Option<SymbolId> {
        self.labels.get(&label.to_lowercase()).copied()
    }

    pub fn get(&self, id: SymbolId) -> Option<&SymbolMeta> {
        self.symbols.get(&id)
    }

    /// Add a triple. All three symbols must exist; exact duplicates are ignored.
    pub fn add_triple(&mut self, triple: Triple) -> StoreResult<bool> {
        for id in [triple.subject, triple.predicate, triple.object] {
            if !self.symbols.contains_key(&id) {
                return Err(StoreError::SymbolNotFound { symbol_id: id.get() });
            }
        }
        let duplicate = self.triples.iter().any(|t| {
            t.subject == triple.subject
                && t.predicate == triple.predicate
                && t.object == triple.object
        });
        if duplicate {
            return Ok(false);
        }
        self.triples.push(triple);
        Ok(true)
    }

    /// Triples whose subject is `id`.
    pub fn triples_from(&self, id: SymbolId) -> Vec<&Triple> {
        self.triples.iter().filter(|t| t.subject == id).collect()
    }

    /// Triples whose object is `id`.
    pub fn triples_to(&self, id: SymbolId) -> Vec<&Triple> {
        self.triples.iter().filter(|t| t.object == id).collect()
    }

    /// Remove a symbol and every triple mentioning it.
    pub fn remove_symbol(&mut self, id: SymbolId) -> StoreResult<SymbolMeta> {
        let meta = self
            .symbols
            .remove(&id)
            .ok_or(StoreError::SymbolNotFound { symbol_id: id.get() })?;
        self.labels.remove(&meta.label.to_lowercase());
        self.triples
            .retain(|t| t.subject != id && t.predicate != id && t.object != id);
        Ok(meta)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn triple_count(&self) -> usize {
        self.triples.len()
    }
}
