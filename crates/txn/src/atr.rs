//! The atomic transaction record (ATR)
//!
//! The ATR is the crash-recovery source of truth for one transaction's fate.
//! It is itself a document, held in a reserved system collection and mutated
//! only through CAS-guarded store writes; the store's compare-and-swap is
//! what makes the fate flip atomic.
//!
//! ## Protocol
//!
//! ```text
//! 1. create()          - Pending record, written at first staged mutation
//! 2. sync_staged()     - staged-document list kept current as writes stage
//! 3. flip(Committed)   - Phase 1: the point of no return
//!    or flip(Aborted)
//! 4. <promote/discard staged documents>  - Phase 2: idempotent replay
//! 5. finalize()        - Completed, then the record is deleted
//! ```
//!
//! A crash between 3 and 5 leaves the fate durably recorded; Phase 2 merely
//! replays it, so partial completion is safe to resume.

use atrium_core::{Cas, Collection, DocRef, StoreError, StoreResult, TransactionId};
use atrium_store::DocumentStore;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Reserved collection holding atomic records
pub static ATR_COLLECTION: Lazy<Collection> =
    Lazy::new(|| Collection::new("_system", "_txn", "atr"));

/// Fate of the enclosing transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtrState {
    /// Attempt in progress, fate undecided
    Pending,
    /// Commit decided; staged documents are being promoted
    Committed,
    /// Rollback decided; staged documents are being discarded
    Aborted,
    /// Phase 2 finished; the record is about to be deleted
    Completed,
}

/// Serialized body of the ATR document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrEntry {
    /// Transaction fate
    pub state: AtrState,
    /// Attempt number that owns the staged documents
    pub attempt: u32,
    /// Documents with staged metadata belonging to this transaction
    pub staged: Vec<DocRef>,
}

/// Live handle to one transaction's ATR document
#[derive(Debug)]
pub struct AtomicRecord {
    txn: TransactionId,
    cas: Cas,
    entry: AtrEntry,
}

impl AtomicRecord {
    /// Create the Pending record; called lazily at the first staged mutation
    ///
    /// The record is keyed by the transaction id, so a record already present
    /// can only be a leftover from an earlier attempt of this transaction
    /// whose cleanup lost a race. Such a record is adopted and reset rather
    /// than treated as a collision.
    pub fn create<S: DocumentStore + ?Sized>(
        store: &S,
        txn: TransactionId,
        attempt: u32,
    ) -> StoreResult<Self> {
        let entry = AtrEntry {
            state: AtrState::Pending,
            attempt,
            staged: Vec::new(),
        };
        let key = txn.to_string();
        match store.insert(&ATR_COLLECTION, &key, to_content(&entry)?) {
            Ok(cas) => Ok(Self { txn, cas, entry }),
            Err(StoreError::DocumentExists) => {
                let (_, cas) = store.get(&ATR_COLLECTION, &key)?;
                let mut record = Self { txn, cas, entry };
                record.write(store)?;
                Ok(record)
            }
            Err(err) => Err(err),
        }
    }

    /// Current fate
    pub fn state(&self) -> AtrState {
        self.entry.state
    }

    /// Replace the staged-document list
    pub fn sync_staged<S: DocumentStore + ?Sized>(
        &mut self,
        store: &S,
        staged: Vec<DocRef>,
    ) -> StoreResult<()> {
        self.entry.staged = staged;
        self.write(store)
    }

    /// Phase 1: atomically record the transaction's fate
    ///
    /// Flipping to `Committed` or `Aborted` is the point of no return; after
    /// a successful flip the outcome is decided no matter what happens to
    /// the staged documents.
    pub fn flip<S: DocumentStore + ?Sized>(
        &mut self,
        store: &S,
        state: AtrState,
    ) -> StoreResult<()> {
        self.entry.state = state;
        self.write(store)
    }

    /// Phase 2 epilogue: mark Completed and delete the record
    pub fn finalize<S: DocumentStore + ?Sized>(mut self, store: &S) -> StoreResult<()> {
        self.entry.state = AtrState::Completed;
        self.write(store)?;
        store.remove(&ATR_COLLECTION, &self.txn.to_string(), self.cas)
    }

    /// Remove the record even when this handle's CAS is no longer current
    ///
    /// Used by rollback when the fate flip itself lost a CAS race: the
    /// record must not outlive the attempt, or the next attempt would find
    /// it occupied. Rereads the current token and retries the removal.
    pub fn discard<S: DocumentStore + ?Sized>(self, store: &S) -> StoreResult<()> {
        let key = self.txn.to_string();
        loop {
            let cas = match store.get(&ATR_COLLECTION, &key) {
                Ok((_, cas)) => cas,
                Err(StoreError::DocumentNotFound) => return Ok(()),
                Err(err) => return Err(err),
            };
            match store.remove(&ATR_COLLECTION, &key, cas) {
                Ok(()) | Err(StoreError::DocumentNotFound) => return Ok(()),
                Err(StoreError::CasMismatch { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn write<S: DocumentStore + ?Sized>(&mut self, store: &S) -> StoreResult<()> {
        self.cas = store.replace(
            &ATR_COLLECTION,
            &self.txn.to_string(),
            to_content(&self.entry)?,
            self.cas,
        )?;
        Ok(())
    }
}

fn to_content(entry: &AtrEntry) -> StoreResult<atrium_core::Content> {
    serde_json::to_value(entry).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_store::MemoryStore;

    #[test]
    fn test_lifecycle_pending_committed_completed() {
        let store = MemoryStore::new();
        let txn = TransactionId::new();
        let mut atr = AtomicRecord::create(&store, txn, 1).unwrap();
        assert_eq!(atr.state(), AtrState::Pending);

        atr.sync_staged(&store, vec![DocRef::new("b.s.c", "k")])
            .unwrap();
        let (body, _) = store.get(&ATR_COLLECTION, &txn.to_string()).unwrap();
        assert_eq!(body["state"], "Pending");
        assert_eq!(body["staged"][0]["key"], "k");

        atr.flip(&store, AtrState::Committed).unwrap();
        let (body, _) = store.get(&ATR_COLLECTION, &txn.to_string()).unwrap();
        assert_eq!(body["state"], "Committed");

        atr.finalize(&store).unwrap();
        assert!(store.get(&ATR_COLLECTION, &txn.to_string()).is_err());
    }

    #[test]
    fn test_create_adopts_leftover_record() {
        let store = MemoryStore::new();
        let txn = TransactionId::new();
        let mut orphan = AtomicRecord::create(&store, txn, 1).unwrap();
        orphan
            .sync_staged(&store, vec![DocRef::new("b.s.c", "k")])
            .unwrap();

        // A later attempt of the same transaction resets the record instead
        // of colliding with it
        let adopted = AtomicRecord::create(&store, txn, 2).unwrap();
        assert_eq!(adopted.state(), AtrState::Pending);
        let (body, _) = store.get(&ATR_COLLECTION, &txn.to_string()).unwrap();
        assert_eq!(body["attempt"], 2);
        assert_eq!(body["staged"], serde_json::json!([]));
        adopted.finalize(&store).unwrap();
    }

    #[test]
    fn test_discard_survives_stale_cas() {
        let store = MemoryStore::new();
        let txn = TransactionId::new();
        let atr = AtomicRecord::create(&store, txn, 1).unwrap();

        // An external writer bumps the record's token behind our back
        let (body, cas) = store.get(&ATR_COLLECTION, &txn.to_string()).unwrap();
        store
            .replace(&ATR_COLLECTION, &txn.to_string(), body, cas)
            .unwrap();

        atr.discard(&store).unwrap();
        assert!(store.get(&ATR_COLLECTION, &txn.to_string()).is_err());
    }

    #[test]
    fn test_aborted_flip_recorded() {
        let store = MemoryStore::new();
        let txn = TransactionId::new();
        let mut atr = AtomicRecord::create(&store, txn, 1).unwrap();
        atr.flip(&store, AtrState::Aborted).unwrap();
        let (body, _) = store.get(&ATR_COLLECTION, &txn.to_string()).unwrap();
        assert_eq!(body["state"], "Aborted");
        atr.finalize(&store).unwrap();
    }
}
