//! Core types for the transaction engine
//!
//! This module defines the foundational types:
//! - TransactionId: Unique identifier for one logical transaction
//! - Collection: Fully-qualified collection (bucket/scope/name)
//! - Cas: Opaque compare-and-swap token allocated by the store
//! - DocRef: (collection, key) reference recorded in the atomic record
//! - DocumentHandle: Result of get/insert/replace, input to replace/remove

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Document content. Documents are JSON values end to end.
pub type Content = serde_json::Value;

/// Unique identifier for one logical transaction
///
/// A TransactionId is a wrapper around a UUID v4. It tags staged metadata and
/// names the transaction's atomic record, so every staged write in the store
/// can be traced back to its owning transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Create a new random TransactionId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a TransactionId from a string representation
    ///
    /// Accepts standard UUID format (with or without hyphens).
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque compare-and-swap token
///
/// Every record write in the store (including staging writes) is assigned a
/// fresh token from a monotonic allocator. `Cas::ZERO` never names a live
/// record; it is the "record must not exist" precondition for staged inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cas(u64);

impl Cas {
    /// The absent-record token
    pub const ZERO: Cas = Cas(0);

    /// Wrap a raw token value
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw token value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// True for the absent-record token
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Fully-qualified collection: bucket → scope → name
///
/// Query statements may reference a collection by its dotted path
/// (`bucket.scope.name`) or by its bare name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collection {
    bucket: String,
    scope: String,
    name: String,
}

impl Collection {
    /// Create a collection reference
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Bucket component
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Scope component
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted path: `bucket.scope.name`
    pub fn path(&self) -> String {
        format!("{}.{}.{}", self.bucket, self.scope, self.name)
    }

    /// Resolve a collection from a query-statement reference
    ///
    /// Accepts the dotted path form (`bucket.scope.name`) or a bare name,
    /// which lands in the default bucket and scope.
    pub fn from_path(path: &str) -> Option<Self> {
        let parts: Vec<&str> = path.split('.').collect();
        match parts.as_slice() {
            [bucket, scope, name] => Some(Self::new(*bucket, *scope, *name)),
            [name] => Some(Self::new("default", "_default", *name)),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.bucket, self.scope, self.name)
    }
}

/// Reference to one document, as recorded in the atomic record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocRef {
    /// Dotted collection path
    pub collection: String,
    /// Document key
    pub key: String,
}

impl DocRef {
    /// Create a document reference
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }
}

/// Handle to a document as observed by one attempt
///
/// Returned by `get`/`insert`/`replace`; required input to subsequent
/// `replace`/`remove` calls. The `cas` is the token last observed by this
/// attempt (possibly a staged token); passing a stale handle to a mutation
/// is detected as a conflict.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    /// Collection holding the document
    pub collection: Collection,
    /// Document key
    pub key: String,
    /// Token observed when the handle was produced
    pub cas: Cas,
    /// Content observed when the handle was produced
    pub content: Content,
}

impl DocumentHandle {
    /// Create a handle
    pub fn new(collection: Collection, key: impl Into<String>, cas: Cas, content: Content) -> Self {
        Self {
            collection,
            key: key.into(),
            cas,
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_roundtrip() {
        let id = TransactionId::new();
        let parsed = TransactionId::from_string(&id.to_string());
        assert_eq!(parsed, Some(id));
    }

    #[test]
    fn test_transaction_id_rejects_garbage() {
        assert_eq!(TransactionId::from_string("not-a-uuid"), None);
    }

    #[test]
    fn test_cas_zero_is_absent() {
        assert!(Cas::ZERO.is_zero());
        assert!(!Cas::new(1).is_zero());
    }

    #[test]
    fn test_collection_path() {
        let coll = Collection::new("default", "_default", "things");
        assert_eq!(coll.path(), "default._default.things");
        assert_eq!(coll.to_string(), "default._default.things");
    }

    #[test]
    fn test_collection_from_path() {
        let coll = Collection::from_path("b.s.c").unwrap();
        assert_eq!(coll, Collection::new("b", "s", "c"));

        let bare = Collection::from_path("things").unwrap();
        assert_eq!(bare, Collection::new("default", "_default", "things"));

        assert_eq!(Collection::from_path("a.b"), None);
        assert_eq!(Collection::from_path("a.b.c.d"), None);
    }

    #[test]
    fn test_doc_ref_from_collection() {
        let coll = Collection::new("b", "s", "c");
        let doc_ref = DocRef::new(coll.path(), "k1");
        assert_eq!(doc_ref.collection, "b.s.c");
        assert_eq!(doc_ref.key, "k1");
    }
}
