//! In-memory document store
//!
//! Reference `DocumentStore` implementation backed by DashMap. Per-key
//! atomicity comes from the entry API (exclusive access to one record for
//! the duration of a read-modify-write); CAS tokens come from a single
//! monotonic allocator, so no two record states ever share a token.

use crate::adapter::DocumentStore;
use crate::record::{DocumentRecord, StagedKind, StagedMeta};
use atrium_core::{Cas, Collection, Content, StoreError, StoreResult, TransactionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// (collection path, document key)
type RecordKey = (String, String);

/// DashMap-backed document store with CAS semantics
///
/// Every record write, committed or staging, bumps the record's CAS token.
/// Readers of the committed view never observe staged metadata.
pub struct MemoryStore {
    /// All records, keyed by (collection path, key)
    records: DashMap<RecordKey, DocumentRecord>,
    /// Monotonic CAS allocator; tokens start at 1 (0 is the absent token)
    next_cas: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_cas: AtomicU64::new(1),
        }
    }

    fn allocate_cas(&self) -> Cas {
        Cas::new(self.next_cas.fetch_add(1, Ordering::SeqCst))
    }

    fn record_key(collection: &Collection, key: &str) -> RecordKey {
        (collection.path(), key.to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, collection: &Collection, key: &str) -> StoreResult<(Content, Cas)> {
        match self.records.get(&Self::record_key(collection, key)) {
            Some(record) => match record.committed() {
                Some((content, cas)) => Ok((content.clone(), cas)),
                None => Err(StoreError::DocumentNotFound),
            },
            None => Err(StoreError::DocumentNotFound),
        }
    }

    fn insert(&self, collection: &Collection, key: &str, content: Content) -> StoreResult<Cas> {
        match self.records.entry(Self::record_key(collection, key)) {
            Entry::Occupied(_) => Err(StoreError::DocumentExists),
            Entry::Vacant(vacant) => {
                let cas = self.allocate_cas();
                vacant.insert(DocumentRecord {
                    body: Some(content),
                    cas,
                    staged: None,
                });
                Ok(cas)
            }
        }
    }

    fn replace(
        &self,
        collection: &Collection,
        key: &str,
        content: Content,
        expected: Cas,
    ) -> StoreResult<Cas> {
        match self.records.entry(Self::record_key(collection, key)) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.body.is_none() {
                    return Err(StoreError::DocumentNotFound);
                }
                if record.cas != expected {
                    return Err(StoreError::CasMismatch {
                        expected,
                        actual: record.cas,
                    });
                }
                let cas = self.allocate_cas();
                record.body = Some(content);
                record.cas = cas;
                Ok(cas)
            }
            Entry::Vacant(_) => Err(StoreError::DocumentNotFound),
        }
    }

    fn remove(&self, collection: &Collection, key: &str, expected: Cas) -> StoreResult<()> {
        match self.records.entry(Self::record_key(collection, key)) {
            Entry::Occupied(occupied) => {
                let record = occupied.get();
                if record.body.is_none() {
                    return Err(StoreError::DocumentNotFound);
                }
                if record.cas != expected {
                    return Err(StoreError::CasMismatch {
                        expected,
                        actual: record.cas,
                    });
                }
                occupied.remove();
                Ok(())
            }
            Entry::Vacant(_) => Err(StoreError::DocumentNotFound),
        }
    }

    fn upsert(&self, collection: &Collection, key: &str, content: Content) -> StoreResult<Cas> {
        let cas = self.allocate_cas();
        match self.records.entry(Self::record_key(collection, key)) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                record.body = Some(content);
                record.cas = cas;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(DocumentRecord {
                    body: Some(content),
                    cas,
                    staged: None,
                });
            }
        }
        Ok(cas)
    }

    fn scan(&self, collection: &Collection) -> StoreResult<Vec<(String, Content, Cas)>> {
        let path = collection.path();
        let mut rows: Vec<(String, Content, Cas)> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == path)
            .filter_map(|entry| {
                entry
                    .value()
                    .committed()
                    .map(|(content, cas)| (entry.key().1.clone(), content.clone(), cas))
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    fn load(&self, collection: &Collection, key: &str) -> StoreResult<Option<DocumentRecord>> {
        Ok(self
            .records
            .get(&Self::record_key(collection, key))
            .map(|record| record.clone()))
    }

    fn stage(
        &self,
        collection: &Collection,
        key: &str,
        expected: Cas,
        meta: StagedMeta,
    ) -> StoreResult<Cas> {
        let entry = self.records.entry(Self::record_key(collection, key));
        if expected.is_zero() {
            // Create-tombstone path: the key must be vacant
            return match entry {
                Entry::Occupied(_) => Err(StoreError::DocumentExists),
                Entry::Vacant(vacant) => {
                    let cas = self.allocate_cas();
                    trace!(target: "atrium::store", collection = %collection, key, txn = %meta.txn, "staged insert tombstone");
                    vacant.insert(DocumentRecord {
                        body: None,
                        cas,
                        staged: Some(meta),
                    });
                    Ok(cas)
                }
            };
        }
        match entry {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.cas != expected {
                    return Err(StoreError::CasMismatch {
                        expected,
                        actual: record.cas,
                    });
                }
                let cas = self.allocate_cas();
                trace!(target: "atrium::store", collection = %collection, key, txn = %meta.txn, kind = ?meta.kind, "staged mutation");
                record.staged = Some(meta);
                record.cas = cas;
                Ok(cas)
            }
            Entry::Vacant(_) => Err(StoreError::DocumentNotFound),
        }
    }

    fn commit_staged(
        &self,
        collection: &Collection,
        key: &str,
        txn: TransactionId,
    ) -> StoreResult<()> {
        match self.records.entry(Self::record_key(collection, key)) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                let meta = match record.staged.take() {
                    Some(meta) if meta.txn == txn => meta,
                    other => {
                        // Not ours (or already promoted): replay no-op
                        record.staged = other;
                        return Ok(());
                    }
                };
                match meta.kind {
                    StagedKind::Insert | StagedKind::Replace => {
                        record.body = meta.content;
                        record.cas = self.allocate_cas();
                    }
                    StagedKind::Remove => {
                        occupied.remove();
                    }
                }
                Ok(())
            }
            Entry::Vacant(_) => Ok(()),
        }
    }

    fn unstage(&self, collection: &Collection, key: &str, txn: TransactionId) -> StoreResult<()> {
        match self.records.entry(Self::record_key(collection, key)) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                match &record.staged {
                    Some(meta) if meta.txn == txn => {}
                    _ => return Ok(()),
                }
                if record.body.is_none() {
                    // Staged-insert tombstone: the record never existed
                    occupied.remove();
                } else {
                    record.staged = None;
                    record.cas = self.allocate_cas();
                }
                Ok(())
            }
            Entry::Vacant(_) => Ok(()),
        }
    }
}
