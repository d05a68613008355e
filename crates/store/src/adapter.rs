//! Document store abstraction
//!
//! This trait is the seam between the transaction engine and the backing
//! store. It has two faces:
//!
//! - the **committed view** (`get`/`insert`/`replace`/`remove`/`upsert`/
//!   `scan`/`query`): what any non-transactional client sees. Staged
//!   metadata is invisible here.
//! - the **staging channel** (`load`/`stage`/`commit_staged`/`unstage`):
//!   the transaction engine's lower-level contract for embedding pending
//!   writes in records. Every write is CAS-guarded; the store's
//!   compare-and-swap is the only cross-transaction coordination; there is
//!   no lock to take.
//!
//! All operations are single-document and individually atomic at the store
//! level. Cross-document atomicity is the coordinator's job, not the store's.

use crate::query;
use crate::record::{DocumentRecord, StagedMeta};
use atrium_core::{Cas, Collection, Content, StoreResult, TransactionId};

/// Storage abstraction for the document store
///
/// Thread safety: all methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait DocumentStore: Send + Sync {
    /// Get the committed content and CAS token for a key
    ///
    /// # Errors
    /// `DocumentNotFound` if the key is absent from the committed view
    /// (staged-insert tombstones count as absent).
    fn get(&self, collection: &Collection, key: &str) -> StoreResult<(Content, Cas)>;

    /// Create a document
    ///
    /// # Errors
    /// `DocumentExists` if any record occupies the key: a committed
    /// document or another transaction's staged placeholder.
    fn insert(&self, collection: &Collection, key: &str, content: Content) -> StoreResult<Cas>;

    /// Replace a document's committed content, conditioned on `expected`
    ///
    /// # Errors
    /// `DocumentNotFound` if absent; `CasMismatch` if the record's current
    /// token differs from `expected`.
    fn replace(
        &self,
        collection: &Collection,
        key: &str,
        content: Content,
        expected: Cas,
    ) -> StoreResult<Cas>;

    /// Remove a document, conditioned on `expected`
    ///
    /// # Errors
    /// `DocumentNotFound` if absent; `CasMismatch` on a stale token.
    fn remove(&self, collection: &Collection, key: &str, expected: Cas) -> StoreResult<()>;

    /// Create or unconditionally overwrite a document
    fn upsert(&self, collection: &Collection, key: &str, content: Content) -> StoreResult<Cas>;

    /// Committed view of a whole collection, key-ordered
    fn scan(&self, collection: &Collection) -> StoreResult<Vec<(String, Content, Cas)>>;

    /// Execute a query statement against the committed view
    ///
    /// # Errors
    /// `ParsingFailure` if the statement does not parse;
    /// `ExecutionFailure` for parameter or collection faults.
    fn query(&self, statement: &str, params: &[Content]) -> StoreResult<Vec<Content>> {
        let stmt = query::parse(statement)?;
        query::execute(self, &stmt, params)
    }

    /// Load the full record for a key, staged metadata included
    fn load(&self, collection: &Collection, key: &str) -> StoreResult<Option<DocumentRecord>>;

    /// Embed staged metadata in a record, CAS-guarded
    ///
    /// `expected == Cas::ZERO` means "the key must be vacant": a tombstone
    /// record is created to hold the staged insert. Otherwise the record's
    /// current token must equal `expected`.
    ///
    /// Returns the record's new token.
    ///
    /// # Errors
    /// `DocumentExists` when `expected` is zero and the key is occupied;
    /// `DocumentNotFound`/`CasMismatch` otherwise.
    fn stage(
        &self,
        collection: &Collection,
        key: &str,
        expected: Cas,
        meta: StagedMeta,
    ) -> StoreResult<Cas>;

    /// Promote `txn`'s staged metadata to committed state
    ///
    /// Insert/Replace become the committed body; Remove deletes the record.
    /// Idempotent: a record without `txn`'s staged metadata is left alone,
    /// so commit replay after a partial failure is safe.
    fn commit_staged(&self, collection: &Collection, key: &str, txn: TransactionId)
        -> StoreResult<()>;

    /// Discard `txn`'s staged metadata
    ///
    /// Staged-insert tombstones are deleted outright; other records keep
    /// their committed body. Idempotent, like `commit_staged`.
    fn unstage(&self, collection: &Collection, key: &str, txn: TransactionId) -> StoreResult<()>;
}
