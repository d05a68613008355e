//! Transaction coordinator
//!
//! Orchestrates the attempts of one logical transaction:
//!
//! ```text
//! NotStarted -> Attempting -> { Committing -> Committed,
//!                               RollingBack -> RolledBack,
//!                               Attempting (retry) }
//!            -> { Success, Failed }
//! ```
//!
//! One attempt runs the lambda to completion; no two attempts of the same
//! transaction ever run concurrently. Across transactions, attempts run
//! fully concurrently; the store's CAS is the only coordination.
//!
//! ## Commit sequence
//!
//! ```text
//! 1. lambda returns Ok, attempt not poisoned
//! 2. flip ATR to Committed      - Phase 1, the point of no return
//! 3. promote staged mutations   - Phase 2, idempotent replay
//! 4. finalize ATR               - Completed, then deleted
//! ```
//!
//! A failure before step 2 is retryable; from step 2 on the transaction
//! reports committed and Phase 2 merely replays the recorded fate.
//!
//! ## Retry semantics
//!
//! Retries replay the lambda from the top with no memory of the previous
//! attempt. Side effects captured by the closure (counters, logs) therefore
//! accumulate across attempts. At-least-once execution is inherent to
//! optimistic retry and is deliberately not hidden. There is no maximum
//! attempt count; the configured timeout is the only bound, checked between
//! attempts.

use crate::atr::AtrState;
use crate::attempt::AttemptContext;
use crate::config::TransactionConfig;
use atrium_core::{
    AttemptError, FailureCause, OperationError, TransactionFailed, TransactionId,
};
use atrium_store::DocumentStore;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// First retry delay; doubles per retry up to [`MAX_BACKOFF`]
const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
/// Retry delay ceiling
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of a committed transaction
#[derive(Debug, Clone)]
pub struct TransactionResult {
    /// The transaction's id
    pub transaction_id: TransactionId,
    /// How many attempts ran, the committed one included
    pub attempts: u32,
}

/// Entry point for running transactions against one store
///
/// # Memory Ordering
///
/// The metric counters use Relaxed ordering: they are observational only
/// and synchronize nothing.
pub struct Transactions<S: DocumentStore> {
    store: Arc<S>,
    config: TransactionConfig,
    /// Total transactions started - uses Relaxed ordering
    total_started: AtomicU64,
    /// Total transactions committed - uses Relaxed ordering
    total_committed: AtomicU64,
    /// Total transactions rolled back or expired - uses Relaxed ordering
    total_failed: AtomicU64,
}

impl<S: DocumentStore> Transactions<S> {
    /// Create a coordinator with the default configuration
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, TransactionConfig::default())
    }

    /// Create a coordinator with an explicit default configuration
    pub fn with_config(store: Arc<S>, config: TransactionConfig) -> Self {
        Self {
            store,
            config,
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    /// Total transactions started
    pub fn total_started(&self) -> u64 {
        self.total_started.load(Ordering::Relaxed)
    }

    /// Total transactions committed
    pub fn total_committed(&self) -> u64 {
        self.total_committed.load(Ordering::Relaxed)
    }

    /// Total transactions that failed (rolled back or expired)
    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    /// Run a transaction with the coordinator's default configuration
    ///
    /// The lambda is re-executed in full on every retry; see the module
    /// docs for the at-least-once consequences.
    pub fn run<F>(&self, lambda: F) -> Result<TransactionResult, TransactionFailed>
    where
        F: FnMut(&mut AttemptContext<S>) -> Result<(), AttemptError>,
    {
        let config = self.config.clone();
        self.run_with(&config, lambda)
    }

    /// Run a transaction with per-run configuration
    pub fn run_with<F>(
        &self,
        config: &TransactionConfig,
        mut lambda: F,
    ) -> Result<TransactionResult, TransactionFailed>
    where
        F: FnMut(&mut AttemptContext<S>) -> Result<(), AttemptError>,
    {
        let txn = TransactionId::new();
        let deadline = Instant::now() + config.timeout;
        let mut attempts = 0u32;
        let mut backoff = INITIAL_BACKOFF;
        self.total_started.fetch_add(1, Ordering::Relaxed);

        loop {
            attempts += 1;
            debug!(target: "atrium::txn", txn = %txn, attempt = attempts, "attempt started");
            let mut ctx = AttemptContext::new(Arc::clone(&self.store), txn, attempts);

            let failure = match lambda(&mut ctx) {
                Ok(()) => match ctx.take_poison() {
                    // A caught conflict still fails the attempt
                    Some(poison) => AttemptError::Operation(poison),
                    None => match self.commit(&mut ctx) {
                        Ok(()) => {
                            self.total_committed.fetch_add(1, Ordering::Relaxed);
                            info!(
                                target: "atrium::txn",
                                txn = %txn,
                                attempts,
                                "transaction committed"
                            );
                            return Ok(TransactionResult {
                                transaction_id: txn,
                                attempts,
                            });
                        }
                        Err(failure) => failure,
                    },
                },
                Err(failure) => failure,
            };

            let retryable = failure.is_retryable();
            self.rollback(&mut ctx);

            if retryable && Instant::now() < deadline {
                debug!(
                    target: "atrium::txn",
                    txn = %txn,
                    attempt = attempts,
                    cause = %failure,
                    "retrying after conflict"
                );
                self.sleep_before_retry(&mut backoff, deadline);
                continue;
            }

            self.total_failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "atrium::txn",
                txn = %txn,
                attempts,
                retryable,
                cause = %failure,
                "transaction failed"
            );
            return Err(TransactionFailed::new(failure));
        }
    }

    /// Drive the commit protocol for a successful attempt
    ///
    /// Errors returned here happened before the ATR flip and are retryable
    /// conditions; after the flip the transaction is committed no matter
    /// what, and Phase 2 failures are logged for replay rather than
    /// surfaced.
    fn commit(&self, ctx: &mut AttemptContext<S>) -> Result<(), AttemptError> {
        let txn = ctx.transaction_id();
        if ctx.staged().is_empty() {
            // Read-only attempt: nothing durable to decide
            if let Some(atr) = ctx.take_atr() {
                if let Err(err) = atr.finalize(&*self.store) {
                    warn!(target: "atrium::txn", txn = %txn, %err, "atomic record cleanup failed");
                }
            }
            return Ok(());
        }

        // Phase 1: the point of no return. The record stays attached to the
        // context until the flip succeeds, so a failed flip leaves it for
        // the rollback path to abort or discard.
        let flip = match ctx.atr_mut() {
            Some(atr) => atr.flip(&*self.store, AtrState::Committed),
            None => {
                return Err(AttemptError::Operation(OperationError::OperationFailed {
                    cause: FailureCause::Store("atomic record missing at commit".into()),
                    context: None,
                }))
            }
        };
        if let Err(err) = flip {
            // Any failure before the flip is a retryable condition
            return Err(AttemptError::Operation(OperationError::OperationFailed {
                cause: match err {
                    atrium_core::StoreError::CasMismatch { .. } => FailureCause::CasMismatch,
                    other => FailureCause::CommitRace(other.to_string()),
                },
                context: None,
            }));
        }
        debug!(target: "atrium::txn", txn = %txn, "atomic record flipped to committed");
        let atr = match ctx.take_atr() {
            Some(atr) => atr,
            // Unreachable: the flip above went through this record
            None => return Ok(()),
        };

        // Phase 2: idempotent promotion of every staged mutation
        for mutation in ctx.staged().iter() {
            if let Err(err) = self
                .store
                .commit_staged(&mutation.collection, &mutation.key, txn)
            {
                error!(
                    target: "atrium::txn",
                    txn = %txn,
                    collection = %mutation.collection,
                    key = %mutation.key,
                    %err,
                    "staged promotion failed; fate is recorded, replay required"
                );
            }
        }
        if let Err(err) = atr.finalize(&*self.store) {
            warn!(target: "atrium::txn", txn = %txn, %err, "atomic record cleanup failed");
        }
        Ok(())
    }

    /// Discard an attempt's staged state and record the rollback
    fn rollback(&self, ctx: &mut AttemptContext<S>) {
        let txn = ctx.transaction_id();
        for mutation in ctx.staged().iter() {
            if let Err(err) = self
                .store
                .unstage(&mutation.collection, &mutation.key, txn)
            {
                warn!(
                    target: "atrium::txn",
                    txn = %txn,
                    collection = %mutation.collection,
                    key = %mutation.key,
                    %err,
                    "unstage failed during rollback"
                );
            }
        }
        if let Some(mut atr) = ctx.take_atr() {
            if let Err(err) = atr.flip(&*self.store, AtrState::Aborted) {
                // Stale token on the record itself; remove it anyway so the
                // next attempt does not find the key occupied
                warn!(target: "atrium::txn", txn = %txn, %err, "atomic record abort flip failed");
                if let Err(err) = atr.discard(&*self.store) {
                    warn!(target: "atrium::txn", txn = %txn, %err, "atomic record discard failed");
                }
            } else if let Err(err) = atr.finalize(&*self.store) {
                warn!(target: "atrium::txn", txn = %txn, %err, "atomic record cleanup failed");
            }
        }
        debug!(target: "atrium::txn", txn = %txn, "attempt rolled back");
    }

    /// Capped exponential backoff with jitter, clamped to the deadline
    fn sleep_before_retry(&self, backoff: &mut Duration, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let jittered = rand::thread_rng().gen_range(Duration::ZERO..=*backoff);
        std::thread::sleep(jittered.min(remaining));
        *backoff = (*backoff * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::{Cas, Collection, DocumentHandle};
    use atrium_store::MemoryStore;
    use serde_json::json;

    fn setup() -> (Arc<MemoryStore>, Transactions<MemoryStore>, Collection) {
        let store = Arc::new(MemoryStore::new());
        let transactions = Transactions::new(Arc::clone(&store));
        (store, transactions, Collection::new("main", "inventory", "items"))
    }

    #[test]
    fn test_commit_promotes_staged_writes() {
        let (store, transactions, coll) = setup();
        let result = transactions
            .run(|attempt| {
                attempt.insert(&coll, "k", json!({ "qty": 5 }))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(result.attempts, 1);
        let (body, _) = store.get(&coll, "k").unwrap();
        assert_eq!(body, json!({ "qty": 5 }));
        assert_eq!(transactions.total_committed(), 1);
    }

    #[test]
    fn test_read_only_transaction_commits_immediately() {
        let (store, transactions, coll) = setup();
        store.upsert(&coll, "k", json!({})).unwrap();
        let result = transactions
            .run(|attempt| {
                attempt.get(&coll, "k")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(result.attempts, 1);
    }

    #[test]
    fn test_application_error_rolls_back_without_retry() {
        let (store, transactions, coll) = setup();
        let err = transactions
            .run(|attempt| {
                attempt.insert(&coll, "k", json!({}))?;
                Err(anyhow::anyhow!("lambda gave up").into())
            })
            .unwrap_err();
        assert_eq!(err.cause.to_string(), "lambda gave up");
        // Nothing leaked into the committed view, staging included
        assert_eq!(store.load(&coll, "k").unwrap(), None);
        assert_eq!(transactions.total_failed(), 1);
    }

    #[test]
    fn test_caught_conflict_still_retries_until_timeout() {
        let (store, transactions, coll) = setup();
        store.upsert(&coll, "k", json!({ "v": 1 })).unwrap();
        let config = TransactionConfig::new().timeout(Duration::from_millis(100));

        let started = Instant::now();
        let mut attempts_seen = 0u32;
        let err = transactions
            .run_with(&config, |attempt| {
                attempts_seen = attempt.attempt_number();
                let handle = attempt.get(&coll, "k")?;
                let stale = DocumentHandle::new(
                    handle.collection.clone(),
                    &handle.key,
                    Cas::new(handle.cas.value() + 100),
                    handle.content.clone(),
                );
                // Swallow the conflict: the attempt is poisoned anyway
                let _ = attempt.replace(&stale, json!({ "v": 2 }));
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err.cause.to_string(), "unknown");
        assert!(attempts_seen > 1);
        assert!(started.elapsed() >= Duration::from_millis(100));
        let (body, _) = store.get(&coll, "k").unwrap();
        assert_eq!(body, json!({ "v": 1 }));
    }

    #[test]
    fn test_conflict_with_other_transaction_retries_to_success() {
        let (store, transactions, coll) = setup();
        store.upsert(&coll, "k", json!({ "v": 1 })).unwrap();

        // Another transaction holds staged metadata on the key; release it
        // shortly after this transaction starts spinning.
        let other = TransactionId::new();
        let record = store.load(&coll, "k").unwrap().unwrap();
        store
            .stage(
                &coll,
                "k",
                record.cas,
                atrium_store::StagedMeta {
                    txn: other,
                    attempt: 1,
                    kind: atrium_store::StagedKind::Replace,
                    content: Some(json!({ "v": 99 })),
                },
            )
            .unwrap();
        let release_store = Arc::clone(&store);
        let release_coll = coll.clone();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            release_store.unstage(&release_coll, "k", other).unwrap();
        });

        let config = TransactionConfig::new().timeout(Duration::from_secs(2));
        let result = transactions
            .run_with(&config, |attempt| {
                let handle = attempt.get(&coll, "k")?;
                attempt.replace(&handle, json!({ "v": 2 }))?;
                Ok(())
            })
            .unwrap();
        releaser.join().unwrap();

        assert!(result.attempts > 1);
        let (body, _) = store.get(&coll, "k").unwrap();
        assert_eq!(body, json!({ "v": 2 }));
    }

    #[test]
    fn test_commit_flip_race_is_retried() {
        let (store, transactions, coll) = setup();
        let config = TransactionConfig::new().timeout(Duration::from_secs(2));

        // An external writer bumps the ATR document's token during attempt 1,
        // so the Committed flip loses its CAS race. The transaction must
        // retry and commit, not fail, and the first attempt's record must not
        // survive to collide with the second.
        let result = transactions
            .run_with(&config, |attempt| {
                attempt.insert(&coll, "k", json!({ "v": 1 }))?;
                if attempt.attempt_number() == 1 {
                    let key = attempt.transaction_id().to_string();
                    let (body, cas) = store.get(&crate::atr::ATR_COLLECTION, &key).unwrap();
                    store
                        .replace(&crate::atr::ATR_COLLECTION, &key, body, cas)
                        .unwrap();
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(result.attempts, 2);
        let (body, _) = store.get(&coll, "k").unwrap();
        assert_eq!(body, json!({ "v": 1 }));
        let atr_key = result.transaction_id.to_string();
        assert_eq!(
            store.load(&crate::atr::ATR_COLLECTION, &atr_key).unwrap(),
            None
        );
    }

    #[test]
    fn test_atomic_record_removed_after_commit() {
        let (store, transactions, coll) = setup();
        let result = transactions
            .run(|attempt| {
                attempt.insert(&coll, "k", json!({}))?;
                Ok(())
            })
            .unwrap();
        let atr_key = result.transaction_id.to_string();
        assert_eq!(
            store.load(&crate::atr::ATR_COLLECTION, &atr_key).unwrap(),
            None
        );
    }
}
