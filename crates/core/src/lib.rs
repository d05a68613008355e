//! Core types and errors for Atrium
//!
//! This crate defines the foundational types used throughout the system:
//! - TransactionId, Collection, Cas, DocRef, DocumentHandle: identity types
//! - Content: document content (JSON end to end)
//! - The three-tier error taxonomy: StoreError → OperationError /
//!   AttemptError → TransactionFailed, with key-value and query contexts

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

// Re-export commonly used types at the crate root
pub use error::{
    AttemptError, ErrorContext, FailureCause, KeyValueErrorContext, OpResult, OperationError,
    QueryErrorContext, StoreError, StoreResult, TransactionFailed,
};
pub use types::{Cas, Collection, Content, DocRef, DocumentHandle, TransactionId};
