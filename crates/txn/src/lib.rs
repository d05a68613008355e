//! Optimistic multi-document transactions over a CAS document store
//!
//! The engine runs a caller-supplied lambda against an [`AttemptContext`],
//! staging every write durably in the store but invisible to readers
//! outside the transaction. Commit flips a CAS-guarded atomic record and
//! then promotes the staged writes; any conflict with a concurrent writer
//! rolls the attempt back and replays the lambda until the configured
//! timeout expires.
//!
//! ```no_run
//! use atrium_core::Collection;
//! use atrium_store::MemoryStore;
//! use atrium_txn::Transactions;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), atrium_core::TransactionFailed> {
//! let store = Arc::new(MemoryStore::new());
//! let transactions = Transactions::new(Arc::clone(&store));
//! let coll = Collection::new("main", "inventory", "items");
//!
//! let result = transactions.run(|attempt| {
//!     attempt.insert(&coll, "item::1", json!({ "qty": 5 }))?;
//!     let handle = attempt.get(&coll, "item::1")?;
//!     attempt.replace(&handle, json!({ "qty": 4 }))?;
//!     Ok(())
//! })?;
//! assert_eq!(result.attempts, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod atr;
pub mod attempt;
pub mod config;
pub mod coordinator;
pub mod staging;

pub use atr::{AtomicRecord, AtrEntry, AtrState, ATR_COLLECTION};
pub use attempt::{AttemptContext, QueryOptions, QueryResult};
pub use config::TransactionConfig;
pub use coordinator::{TransactionResult, Transactions};
pub use staging::{fold_kind, StagedMutation, StagedSet};
