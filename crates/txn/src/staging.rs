//! The attempt's staged-mutation log
//!
//! One attempt holds at most one staged mutation per (collection, key): a
//! second write to the same key supersedes the first instead of duplicating
//! it, and the folded kind keeps the commit-time promotion correct. The log
//! preserves first-write order, which is the order mutations are promoted in
//! at commit.

use atrium_core::{Cas, Collection, Content, DocRef};
use atrium_store::StagedKind;

/// One pending write recorded by an attempt
#[derive(Debug, Clone)]
pub struct StagedMutation {
    /// Collection holding the document
    pub collection: Collection,
    /// Document key
    pub key: String,
    /// Folded mutation kind
    pub kind: StagedKind,
    /// Post-commit content (absent for Remove)
    pub content: Option<Content>,
    /// CAS token of the staged record, as of the latest staging write
    pub staged_cas: Cas,
}

impl StagedMutation {
    /// Reference for the atomic record's staged-document list
    pub fn doc_ref(&self) -> DocRef {
        DocRef::new(self.collection.path(), &self.key)
    }
}

/// Fold a new mutation kind onto whatever the attempt already staged
///
/// Returns the kind the superseding mutation carries, or None when the pair
/// cancels out (a staged insert followed by a remove: the document never
/// existed, so nothing remains staged).
pub fn fold_kind(prior: Option<StagedKind>, requested: StagedKind) -> Option<StagedKind> {
    match (prior, requested) {
        (None, kind) => Some(kind),
        (Some(StagedKind::Insert), StagedKind::Replace) => Some(StagedKind::Insert),
        (Some(StagedKind::Insert), StagedKind::Remove) => None,
        (Some(StagedKind::Remove), StagedKind::Insert) => Some(StagedKind::Replace),
        (Some(_), kind) => Some(kind),
    }
}

/// Ordered log of an attempt's staged mutations, one entry per key
#[derive(Debug, Default)]
pub struct StagedSet {
    entries: Vec<StagedMutation>,
}

impl StagedSet {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, collection: &Collection, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|m| m.key == key && m.collection == *collection)
    }

    /// The attempt's pending mutation for a key, if any
    pub fn get(&self, collection: &Collection, key: &str) -> Option<&StagedMutation> {
        self.position(collection, key).map(|i| &self.entries[i])
    }

    /// Record a mutation, superseding any earlier entry for the same key
    pub fn upsert(&mut self, mutation: StagedMutation) {
        match self.position(&mutation.collection, &mutation.key) {
            Some(i) => self.entries[i] = mutation,
            None => self.entries.push(mutation),
        }
    }

    /// Drop the entry for a key (insert-then-remove cancellation)
    pub fn remove(&mut self, collection: &Collection, key: &str) {
        if let Some(i) = self.position(collection, key) {
            self.entries.remove(i);
        }
    }

    /// Iterate in first-write order
    pub fn iter(&self) -> impl Iterator<Item = &StagedMutation> {
        self.entries.iter()
    }

    /// True when nothing is staged (a read-only attempt)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of staged mutations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// References for the atomic record
    pub fn doc_refs(&self) -> Vec<DocRef> {
        self.entries.iter().map(|m| m.doc_ref()).collect()
    }
}
