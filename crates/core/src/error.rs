//! Error taxonomy for the transaction engine
//!
//! Three tiers, matching how failures are observed:
//!
//! 1. **Store level**: [`StoreError`], raw adapter conditions (not-found,
//!    exists, CAS mismatch, parsing failure). Never reaches the caller
//!    directly; the attempt executor classifies these.
//! 2. **Operation level**: [`OperationError`], raised synchronously from an
//!    `attempt.*` call. The lambda may catch these and continue. Conflict
//!    failures ([`OperationError::OperationFailed`]) additionally poison the
//!    attempt: even when caught, the attempt cannot commit.
//! 3. **Transaction level**: [`TransactionFailed`], the single failure type
//!    returned by `run`, wrapping whatever escaped the lambda (or the last
//!    conflict once the retry deadline elapses) as its `cause`.
//!
//! [`AttemptError`] is the escalation channel between tiers 2 and 3: the
//! lambda returns `Result<(), AttemptError>`, and anything in the error
//! variant (a propagated operation error or a user application error)
//! becomes the attempt's terminal cause.
//!
//! We use `thiserror` for automatic `Display` and `Error` implementations.

use crate::types::Cas;
use thiserror::Error;

/// Result alias for adapter operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result alias for operations on an attempt context
pub type OpResult<T> = std::result::Result<T, OperationError>;

/// Raw store-level conditions reported by the document store adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The document does not exist
    #[error("document not found")]
    DocumentNotFound,

    /// The document (or a staged placeholder for it) already exists
    #[error("document exists")]
    DocumentExists,

    /// CAS precondition failed
    #[error("CAS mismatch: expected {expected}, actual {actual}")]
    CasMismatch {
        /// Token the caller conditioned the write on
        expected: Cas,
        /// Token currently held by the record
        actual: Cas,
    },

    /// The query statement could not be parsed
    #[error("parsing failure: {reason}")]
    ParsingFailure {
        /// What the parser objected to
        reason: String,
    },

    /// The query statement parsed but could not be executed
    #[error("query execution failure: {reason}")]
    ExecutionFailure {
        /// What the executor objected to
        reason: String,
    },

    /// Serialization/deserialization of an engine-owned document failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Key-value context attached to document operation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueErrorContext {
    /// Dotted collection path
    pub collection: String,
    /// Document key
    pub key: String,
    /// Token involved in the failing operation, when one was
    pub cas: Option<Cas>,
}

impl KeyValueErrorContext {
    /// Context without a CAS token
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            cas: None,
        }
    }

    /// Context with the token the operation was conditioned on
    pub fn with_cas(collection: impl Into<String>, key: impl Into<String>, cas: Cas) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            cas: Some(cas),
        }
    }
}

/// Query context attached to query operation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryErrorContext {
    /// The offending statement, verbatim
    pub statement: String,
}

impl QueryErrorContext {
    /// Context for a statement
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
        }
    }
}

/// Context carried by operation and transaction errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorContext {
    /// Document operation context
    KeyValue(KeyValueErrorContext),
    /// Query operation context
    Query(QueryErrorContext),
}

/// Internal cause of an operation failure
///
/// Conflict kinds are distinguished internally (the retry policy depends on
/// them) but surface with an intentionally opaque message: callers observe
/// `"unknown"` for any conflict, never the specific kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The caller's handle carried a stale CAS token
    CasMismatch,
    /// Another transaction holds staged metadata on the document
    WriteWriteConflict,
    /// The atomic record write raced another actor during commit
    ///
    /// Carries the store's complaint for diagnostics; any commit failure
    /// before the fate flip lands here and is retried.
    CommitRace(String),
    /// The query executor failed after a successful parse
    QueryExecution(String),
    /// The adapter failed in a way the engine has no better name for
    Store(String),
}

impl FailureCause {
    /// True for causes that represent a race with another writer
    ///
    /// Conflicts are retried transparently by the coordinator; everything
    /// else aborts the transaction.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            FailureCause::CasMismatch
                | FailureCause::WriteWriteConflict
                | FailureCause::CommitRace(_)
        )
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Opaque on purpose: the conflict kind is an internal detail
            FailureCause::CasMismatch
            | FailureCause::WriteWriteConflict
            | FailureCause::CommitRace(_) => write!(f, "unknown"),
            FailureCause::QueryExecution(reason) => {
                write!(f, "query execution failure: {reason}")
            }
            FailureCause::Store(reason) => write!(f, "store failure: {reason}"),
        }
    }
}

/// Operation-local error raised from an `attempt.*` call
///
/// The lambda may catch these. An uncaught `DocumentNotFound`,
/// `DocumentExists` or `ParsingFailure` escaping the lambda is classified as
/// application-fatal (rolled back, never retried); an `OperationFailed` with
/// a conflict cause is retryable.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    /// The document does not exist (live or staged by this attempt)
    #[error("document not found")]
    DocumentNotFound {
        /// Where the lookup failed
        context: KeyValueErrorContext,
    },

    /// The document already exists
    #[error("document exists")]
    DocumentExists {
        /// Where the insert collided
        context: KeyValueErrorContext,
    },

    /// The query statement could not be parsed
    #[error("parsing failure")]
    ParsingFailure {
        /// The offending statement
        context: QueryErrorContext,
    },

    /// The operation failed against the transaction's staged state
    ///
    /// This is the conflict class: CAS mismatch on a handle, collision with
    /// another transaction's staged write, or a query execution fault. The
    /// message is the cause's (opaque for conflicts).
    #[error("{cause}")]
    OperationFailed {
        /// Distinguished internal cause
        cause: FailureCause,
        /// Where the operation failed, when known
        context: Option<ErrorContext>,
    },
}

impl OperationError {
    /// Conflict-class failure with a key-value context
    pub fn conflict(cause: FailureCause, context: KeyValueErrorContext) -> Self {
        OperationError::OperationFailed {
            cause,
            context: Some(ErrorContext::KeyValue(context)),
        }
    }

    /// True if this error represents a race with another writer
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            OperationError::OperationFailed { cause, .. } if cause.is_conflict()
        )
    }

    /// The context attached to this error, if any
    pub fn context(&self) -> Option<ErrorContext> {
        match self {
            OperationError::DocumentNotFound { context }
            | OperationError::DocumentExists { context } => {
                Some(ErrorContext::KeyValue(context.clone()))
            }
            OperationError::ParsingFailure { context } => {
                Some(ErrorContext::Query(context.clone()))
            }
            OperationError::OperationFailed { context, .. } => context.clone(),
        }
    }
}

/// Whatever escaped the lambda body: the attempt's terminal cause
///
/// `?` on an `attempt.*` call produces the `Operation` variant; user code
/// fails the attempt explicitly with the `Application` variant (any
/// `anyhow::Error` converts into it).
#[derive(Debug, Error)]
pub enum AttemptError {
    /// An operation error propagated out of the lambda
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// An error raised by user code inside the lambda
    #[error(transparent)]
    Application(#[from] anyhow::Error),
}

impl AttemptError {
    /// True if the coordinator should retry the transaction
    ///
    /// Only conflict-class operation failures are retryable; application
    /// errors and uncaught not-found/exists/parsing failures roll back
    /// immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Operation(op) => op.is_conflict(),
            AttemptError::Application(_) => false,
        }
    }

    /// The context attached to the underlying error, if any
    pub fn context(&self) -> Option<ErrorContext> {
        match self {
            AttemptError::Operation(op) => op.context(),
            AttemptError::Application(_) => None,
        }
    }
}

/// The transaction's overall failure, returned by `run`
///
/// Always wraps the true cause, regardless of how many attempts were made.
#[derive(Debug, Error)]
#[error("transaction failed: {cause}")]
pub struct TransactionFailed {
    /// The error that decided the transaction's fate
    pub cause: AttemptError,
    /// Context from the causing operation, when one was attached
    pub context: Option<ErrorContext>,
}

impl TransactionFailed {
    /// Wrap an attempt's terminal cause
    pub fn new(cause: AttemptError) -> Self {
        let context = cause.context();
        Self { cause, context }
    }
}
