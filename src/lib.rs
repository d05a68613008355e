//! Atrium - optimistic multi-document ACID transactions over a CAS document store
//!
//! Atrium layers serializable-intent transactions on top of any document
//! store exposing compare-and-swap writes. Writes are staged durably but
//! invisibly alongside the live documents, a CAS-guarded atomic record
//! decides each transaction's fate, and conflicting attempts retry with
//! backoff until the configured timeout.
//!
//! # Quick Start
//!
//! ```
//! use atrium::{Collection, MemoryStore, Transactions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), atrium::TransactionFailed> {
//! let store = Arc::new(MemoryStore::new());
//! let transactions = Transactions::new(Arc::clone(&store));
//! let coll = Collection::new("main", "inventory", "items");
//!
//! transactions.run(|attempt| {
//!     attempt.insert(&coll, "item::1", json!({ "qty": 5 }))?;
//!     let handle = attempt.get(&coll, "item::1")?;
//!     attempt.replace(&handle, json!({ "qty": 4 }))?;
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! Three layers, each its own crate:
//!
//! - [`atrium_core`]: shared types (ids, CAS tokens, collections) and the
//!   error taxonomy.
//! - [`atrium_store`]: the [`DocumentStore`] adapter trait, the query
//!   language, and the in-memory reference store.
//! - [`atrium_txn`]: the attempt executor and the retrying coordinator.

// Re-export the public API from the member crates
pub use atrium_core::{
    AttemptError, Cas, Collection, Content, DocRef, DocumentHandle, ErrorContext, FailureCause,
    KeyValueErrorContext, OperationError, QueryErrorContext, StoreError, TransactionFailed,
    TransactionId,
};
pub use atrium_store::{DocumentStore, MemoryStore, StagedKind};
pub use atrium_txn::{
    AttemptContext, QueryOptions, QueryResult, TransactionConfig, TransactionResult, Transactions,
};
