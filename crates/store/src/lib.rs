//! Document store layer for Atrium
//!
//! This crate provides:
//! - DocumentStore: the adapter trait the transaction engine runs against
//!   (committed-view operations plus the CAS-guarded staging channel)
//! - MemoryStore: the DashMap-backed reference implementation
//! - query: the statement parser and committed-view executor shared by the
//!   non-transactional and transactional query paths

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod memory;
pub mod query;
pub mod record;

pub use adapter::DocumentStore;
pub use memory::MemoryStore;
pub use query::{MetaPredicate, Order, Projection, Statement};
pub use record::{DocumentRecord, StagedKind, StagedMeta};
