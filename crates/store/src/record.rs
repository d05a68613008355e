//! Document records: committed body plus optional staged metadata
//!
//! A record is what the store actually holds for one key. The committed body
//! is what non-transactional readers see; staged metadata is a pending write
//! embedded alongside it, tagged with the owning transaction, invisible to
//! committed-view readers and a conflict signal to other transactions.

use atrium_core::{Cas, Content, TransactionId};
use serde::{Deserialize, Serialize};

/// Kind of a staged mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagedKind {
    /// Document is created by this transaction
    Insert,
    /// Document content is replaced by this transaction
    Replace,
    /// Document is removed by this transaction
    Remove,
}

/// Pending write embedded in a record
///
/// `content` is the post-commit body for Insert/Replace and absent for
/// Remove. The `(txn, attempt)` pair identifies the writer; a reader that is
/// not that writer treats the record as contended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedMeta {
    /// Owning transaction
    pub txn: TransactionId,
    /// Attempt number within the owning transaction
    pub attempt: u32,
    /// Mutation kind
    pub kind: StagedKind,
    /// Post-commit content (absent for Remove)
    pub content: Option<Content>,
}

/// Full record held by the store for one (collection, key)
///
/// `body == None` with staged metadata present is a tombstone created for a
/// staged insert: the key is occupied for conflict purposes but absent from
/// the committed view.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    /// Committed content; None for staged-insert tombstones
    pub body: Option<Content>,
    /// Current CAS token; bumped on every write, staging writes included
    pub cas: Cas,
    /// Pending write, if a transaction has staged one
    pub staged: Option<StagedMeta>,
}

impl DocumentRecord {
    /// The committed view of this record: content and token, if the document
    /// exists outside any transaction
    pub fn committed(&self) -> Option<(&Content, Cas)> {
        self.body.as_ref().map(|body| (body, self.cas))
    }

    /// True if a transaction other than `txn` has staged a write here
    pub fn staged_by_other(&self, txn: TransactionId) -> bool {
        matches!(&self.staged, Some(meta) if meta.txn != txn)
    }
}
