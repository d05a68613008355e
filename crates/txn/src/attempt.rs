//! Attempt executor: the lambda's view of one transaction attempt
//!
//! An [`AttemptContext`] is handed to the user lambda once per attempt. It
//! records every write the lambda performs as a staged mutation (check the
//! staged set first, then the store: read-your-own-writes), eagerly embeds
//! staged metadata in the store so concurrent transactions observe a
//! conflict, and classifies every operation's outcome into the two-tier
//! error taxonomy.
//!
//! The executor never catches what the lambda propagates; it only decides
//! each operation's own result. One exception to "the lambda may recover":
//! a conflict-class failure poisons the attempt. Even if the lambda catches
//! the error and returns success, the coordinator will not commit a
//! poisoned attempt; it retries, because the attempt raced another writer.

use crate::atr::AtomicRecord;
use crate::staging::{fold_kind, StagedMutation, StagedSet};
use atrium_core::{
    Cas, Collection, Content, DocumentHandle, ErrorContext, FailureCause, KeyValueErrorContext,
    OpResult, OperationError, QueryErrorContext, StoreError, TransactionId,
};
use atrium_store::query::{self, MetaPredicate, Projection, Statement};
use atrium_store::{DocumentStore, StagedKind, StagedMeta};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Options for a transactional query
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Positional parameters, `$1`-based in the statement text
    pub parameters: Vec<Content>,
}

impl QueryOptions {
    /// No parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Set positional parameters
    pub fn parameters(mut self, parameters: Vec<Content>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Rows produced by a transactional query
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// One JSON row per matching document
    pub rows: Vec<Content>,
}

/// One execution of the user lambda under a transaction
pub struct AttemptContext<S: DocumentStore> {
    store: Arc<S>,
    txn: TransactionId,
    attempt_number: u32,
    staged: StagedSet,
    atr: Option<AtomicRecord>,
    poison: Option<OperationError>,
}

impl<S: DocumentStore> AttemptContext<S> {
    pub(crate) fn new(store: Arc<S>, txn: TransactionId, attempt_number: u32) -> Self {
        Self {
            store,
            txn,
            attempt_number,
            staged: StagedSet::new(),
            atr: None,
            poison: None,
        }
    }

    /// The enclosing transaction's id
    pub fn transaction_id(&self) -> TransactionId {
        self.txn
    }

    /// This attempt's number, 1-based; grows across retries
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    /// Get a document, read-your-own-writes
    ///
    /// A key this attempt staged reflects the staged state: staged content
    /// and staged CAS for insert/replace, `DocumentNotFound` for remove.
    /// Otherwise the committed view is returned; other transactions' staged
    /// metadata is never visible here.
    pub fn get(&mut self, collection: &Collection, key: &str) -> OpResult<DocumentHandle> {
        let ctx = KeyValueErrorContext::new(collection.path(), key);
        if let Some(mutation) = self.staged.get(collection, key) {
            return match mutation.kind {
                StagedKind::Remove => Err(OperationError::DocumentNotFound { context: ctx }),
                StagedKind::Insert | StagedKind::Replace => Ok(DocumentHandle::new(
                    collection.clone(),
                    key,
                    mutation.staged_cas,
                    mutation.content.clone().unwrap_or(Content::Null),
                )),
            };
        }
        match self.load(collection, key, &ctx)? {
            Some(record) => match record.committed() {
                Some((content, cas)) => Ok(DocumentHandle::new(
                    collection.clone(),
                    key,
                    cas,
                    content.clone(),
                )),
                None => Err(OperationError::DocumentNotFound { context: ctx }),
            },
            None => Err(OperationError::DocumentNotFound { context: ctx }),
        }
    }

    /// Stage an insert
    ///
    /// Fails with `DocumentExists` if the key is committed-present or
    /// already staged by this attempt; a collision with another
    /// transaction's staged write is a conflict instead (retryable).
    pub fn insert(
        &mut self,
        collection: &Collection,
        key: &str,
        content: Content,
    ) -> OpResult<DocumentHandle> {
        self.ensure_atr()?;
        let ctx = KeyValueErrorContext::new(collection.path(), key);

        if let Some((kind, staged_cas)) = self
            .staged
            .get(collection, key)
            .map(|m| (m.kind, m.staged_cas))
        {
            return match kind {
                StagedKind::Insert | StagedKind::Replace => {
                    Err(self.fail(OperationError::DocumentExists { context: ctx }))
                }
                // Remove then insert within the attempt: the document still
                // exists committed, so the pair folds to a replace
                StagedKind::Remove => self.write_staged(
                    collection,
                    key,
                    StagedKind::Replace,
                    staged_cas,
                    Some(content),
                    ctx,
                ),
            };
        }

        match self.load(collection, key, &ctx)? {
            Some(record) if record.body.is_some() => {
                Err(self.fail(OperationError::DocumentExists { context: ctx }))
            }
            Some(_) => {
                // Occupied by another transaction's staged placeholder
                Err(self.fail(OperationError::conflict(FailureCause::WriteWriteConflict, ctx)))
            }
            None => {
                let meta = self.meta(StagedKind::Insert, Some(content.clone()));
                match self.store.stage(collection, key, Cas::ZERO, meta) {
                    Ok(cas) => {
                        self.staged.upsert(StagedMutation {
                            collection: collection.clone(),
                            key: key.to_string(),
                            kind: StagedKind::Insert,
                            content: Some(content.clone()),
                            staged_cas: cas,
                        });
                        self.sync_atr(&ctx)?;
                        Ok(DocumentHandle::new(collection.clone(), key, cas, content))
                    }
                    Err(StoreError::DocumentExists) => {
                        // Lost a race for the key; reload to classify
                        match self.load(collection, key, &ctx)? {
                            Some(record) if record.body.is_some() => {
                                Err(self.fail(OperationError::DocumentExists { context: ctx }))
                            }
                            _ => Err(self.fail(OperationError::conflict(
                                FailureCause::WriteWriteConflict,
                                ctx,
                            ))),
                        }
                    }
                    Err(err) => Err(self.fail(kv_op_error(err, ctx))),
                }
            }
        }
    }

    /// Stage a replace, conditioned on the handle's CAS
    pub fn replace(&mut self, handle: &DocumentHandle, content: Content) -> OpResult<DocumentHandle> {
        self.ensure_atr()?;
        let collection = handle.collection.clone();
        let key = handle.key.clone();
        let ctx = KeyValueErrorContext::with_cas(collection.path(), &key, handle.cas);

        let (expected, prior) = self.current_state(&collection, &key, &ctx)?;
        if handle.cas != expected {
            return Err(self.fail(OperationError::conflict(FailureCause::CasMismatch, ctx)));
        }
        // A replace over this attempt's staged insert stays an insert
        let kind = fold_kind(prior, StagedKind::Replace).unwrap_or(StagedKind::Replace);
        self.write_staged(&collection, &key, kind, expected, Some(content), ctx)
    }

    /// Stage a remove, conditioned on the handle's CAS
    pub fn remove(&mut self, handle: &DocumentHandle) -> OpResult<()> {
        self.ensure_atr()?;
        let collection = handle.collection.clone();
        let key = handle.key.clone();
        let ctx = KeyValueErrorContext::with_cas(collection.path(), &key, handle.cas);

        let (expected, prior) = self.current_state(&collection, &key, &ctx)?;
        if handle.cas != expected {
            return Err(self.fail(OperationError::conflict(FailureCause::CasMismatch, ctx)));
        }
        match fold_kind(prior, StagedKind::Remove) {
            None => {
                // Insert then remove: nothing to stage anymore
                self.store
                    .unstage(&collection, &key, self.txn)
                    .map_err(|err| kv_op_error(err, ctx.clone()))?;
                self.staged.remove(&collection, &key);
                self.sync_atr(&ctx)?;
                Ok(())
            }
            Some(kind) => self
                .write_staged(&collection, &key, kind, expected, None, ctx)
                .map(|_| ()),
        }
    }

    /// Execute a query with this transaction's staging context attached
    ///
    /// SELECT resolves through the read-your-own-writes merge; INSERT,
    /// UPDATE and DELETE become staged mutations under the same conflict
    /// rules as the document operations, so both paths share one staged
    /// state.
    pub fn query(&mut self, statement: &str, options: QueryOptions) -> OpResult<QueryResult> {
        let stmt = query::parse(statement)
            .map_err(|err| self.fail(query_op_error(err, statement)))?;
        let params = options.parameters;
        match stmt {
            Statement::Select {
                projection,
                collection,
                predicate,
                order,
            } => self.select(statement, &projection, &collection, predicate.as_ref(), order, &params),
            Statement::Insert {
                collection,
                key_param,
                value_param,
            } => {
                let coll = self.resolve(statement, &collection)?;
                let key = match self.query_param(statement, &params, key_param)? {
                    Content::String(key) => key.clone(),
                    other => {
                        let reason = format!("INSERT key must be a string parameter, got {other}");
                        return Err(self.fail(query_op_error(
                            StoreError::ExecutionFailure { reason },
                            statement,
                        )));
                    }
                };
                let value = self.query_param(statement, &params, value_param)?.clone();
                self.insert(&coll, &key, value)?;
                Ok(QueryResult { rows: Vec::new() })
            }
            Statement::Update {
                collection,
                assignments,
                predicate,
            } => {
                let coll = self.resolve(statement, &collection)?;
                for key in self.query_keys(statement, &predicate, &params)? {
                    let mut handle = match self.get(&coll, &key) {
                        Ok(handle) => handle,
                        Err(OperationError::DocumentNotFound { .. }) => continue,
                        Err(err) => return Err(err),
                    };
                    query::apply_assignments(&mut handle.content, &assignments)
                        .map_err(|err| self.fail(query_op_error(err, statement)))?;
                    let content = handle.content.clone();
                    self.replace(&handle, content)?;
                }
                Ok(QueryResult { rows: Vec::new() })
            }
            Statement::Delete {
                collection,
                predicate,
            } => {
                let coll = self.resolve(statement, &collection)?;
                for key in self.query_keys(statement, &predicate, &params)? {
                    let handle = match self.get(&coll, &key) {
                        Ok(handle) => handle,
                        Err(OperationError::DocumentNotFound { .. }) => continue,
                        Err(err) => return Err(err),
                    };
                    self.remove(&handle)?;
                }
                Ok(QueryResult { rows: Vec::new() })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Coordinator-facing internals
    // -----------------------------------------------------------------------

    pub(crate) fn take_poison(&mut self) -> Option<OperationError> {
        self.poison.take()
    }

    pub(crate) fn staged(&self) -> &StagedSet {
        &self.staged
    }

    pub(crate) fn atr_mut(&mut self) -> Option<&mut AtomicRecord> {
        self.atr.as_mut()
    }

    pub(crate) fn take_atr(&mut self) -> Option<AtomicRecord> {
        self.atr.take()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Record a conflict so the coordinator refuses to commit this attempt,
    /// even when the lambda swallows the error
    fn fail(&mut self, err: OperationError) -> OperationError {
        if err.is_conflict() && self.poison.is_none() {
            debug!(
                target: "atrium::txn",
                txn = %self.txn,
                attempt = self.attempt_number,
                "attempt poisoned by conflict"
            );
            self.poison = Some(err.clone());
        }
        err
    }

    fn meta(&self, kind: StagedKind, content: Option<Content>) -> StagedMeta {
        StagedMeta {
            txn: self.txn,
            attempt: self.attempt_number,
            kind,
            content,
        }
    }

    fn load(
        &mut self,
        collection: &Collection,
        key: &str,
        ctx: &KeyValueErrorContext,
    ) -> OpResult<Option<atrium_store::DocumentRecord>> {
        self.store
            .load(collection, key)
            .map_err(|err| kv_op_error(err, ctx.clone()))
    }

    /// The CAS a mutation on this key must be conditioned on, and the kind
    /// this attempt already staged for it (if any)
    fn current_state(
        &mut self,
        collection: &Collection,
        key: &str,
        ctx: &KeyValueErrorContext,
    ) -> OpResult<(Cas, Option<StagedKind>)> {
        if let Some(mutation) = self.staged.get(collection, key) {
            if mutation.kind == StagedKind::Remove {
                return Err(OperationError::DocumentNotFound {
                    context: ctx.clone(),
                });
            }
            return Ok((mutation.staged_cas, Some(mutation.kind)));
        }
        match self.load(collection, key, ctx)? {
            Some(record) if record.staged_by_other(self.txn) => Err(self.fail(
                OperationError::conflict(FailureCause::WriteWriteConflict, ctx.clone()),
            )),
            Some(record) if record.body.is_some() => Ok((record.cas, None)),
            _ => Err(OperationError::DocumentNotFound {
                context: ctx.clone(),
            }),
        }
    }

    /// Stage a mutation (CAS-guarded), record it in the staged set, and keep
    /// the atomic record's document list current
    fn write_staged(
        &mut self,
        collection: &Collection,
        key: &str,
        kind: StagedKind,
        expected: Cas,
        content: Option<Content>,
        ctx: KeyValueErrorContext,
    ) -> OpResult<DocumentHandle> {
        let meta = self.meta(kind, content.clone());
        let cas = match self.store.stage(collection, key, expected, meta) {
            Ok(cas) => cas,
            Err(StoreError::CasMismatch { .. }) => {
                return Err(self.fail(OperationError::conflict(FailureCause::CasMismatch, ctx)))
            }
            Err(err) => return Err(self.fail(kv_op_error(err, ctx))),
        };
        self.staged.upsert(StagedMutation {
            collection: collection.clone(),
            key: key.to_string(),
            kind,
            content: content.clone(),
            staged_cas: cas,
        });
        self.sync_atr(&ctx)?;
        Ok(DocumentHandle::new(
            collection.clone(),
            key,
            cas,
            content.unwrap_or(Content::Null),
        ))
    }

    fn ensure_atr(&mut self) -> OpResult<()> {
        if self.atr.is_none() {
            let atr = match AtomicRecord::create(&*self.store, self.txn, self.attempt_number) {
                Ok(atr) => atr,
                Err(err) => {
                    let op = OperationError::OperationFailed {
                        cause: match err {
                            StoreError::CasMismatch { .. } => FailureCause::CasMismatch,
                            other => FailureCause::Store(other.to_string()),
                        },
                        context: None,
                    };
                    return Err(self.fail(op));
                }
            };
            debug!(
                target: "atrium::txn",
                txn = %self.txn,
                attempt = self.attempt_number,
                "atomic record created"
            );
            self.atr = Some(atr);
        }
        Ok(())
    }

    fn sync_atr(&mut self, ctx: &KeyValueErrorContext) -> OpResult<()> {
        let refs = self.staged.doc_refs();
        if let Some(atr) = self.atr.as_mut() {
            atr.sync_staged(&*self.store, refs).map_err(|err| {
                OperationError::OperationFailed {
                    cause: FailureCause::Store(err.to_string()),
                    context: Some(ErrorContext::KeyValue(ctx.clone())),
                }
            })?;
        }
        Ok(())
    }

    // ---- query helpers ----

    fn resolve(&mut self, statement: &str, reference: &str) -> OpResult<Collection> {
        query::resolve_collection(reference)
            .map_err(|err| self.fail(query_op_error(err, statement)))
    }

    fn query_keys(
        &mut self,
        statement: &str,
        predicate: &MetaPredicate,
        params: &[Content],
    ) -> OpResult<Vec<String>> {
        query::predicate_keys(predicate, params)
            .map_err(|err| self.fail(query_op_error(err, statement)))
    }

    fn query_param<'a>(
        &mut self,
        statement: &str,
        params: &'a [Content],
        index: usize,
    ) -> OpResult<&'a Content> {
        match query::param(params, index) {
            Ok(value) => Ok(value),
            Err(err) => Err(self.fail(query_op_error(err, statement))),
        }
    }

    fn select(
        &mut self,
        statement: &str,
        projection: &Projection,
        collection: &str,
        predicate: Option<&MetaPredicate>,
        order: Option<query::Order>,
        params: &[Content],
    ) -> OpResult<QueryResult> {
        let coll = self.resolve(statement, collection)?;
        let mut rows: Vec<(String, Content)> = match predicate {
            Some(predicate) => {
                let mut rows = Vec::new();
                for key in self.query_keys(statement, predicate, params)? {
                    match self.get(&coll, &key) {
                        Ok(handle) => rows.push((key, handle.content)),
                        Err(OperationError::DocumentNotFound { .. }) => {}
                        Err(err) => return Err(err),
                    }
                }
                rows
            }
            None => {
                // Committed scan with this attempt's staged writes overlaid
                let scanned = match self.store.scan(&coll) {
                    Ok(rows) => rows,
                    Err(err) => return Err(self.fail(query_op_error(err, statement))),
                };
                let mut merged: BTreeMap<String, Content> = scanned
                    .into_iter()
                    .map(|(key, content, _)| (key, content))
                    .collect();
                for mutation in self.staged.iter().filter(|m| m.collection == coll) {
                    match mutation.kind {
                        StagedKind::Remove => {
                            merged.remove(&mutation.key);
                        }
                        StagedKind::Insert | StagedKind::Replace => {
                            merged.insert(
                                mutation.key.clone(),
                                mutation.content.clone().unwrap_or(Content::Null),
                            );
                        }
                    }
                }
                merged.into_iter().collect()
            }
        };
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        if matches!(order, Some(query::Order::Desc)) {
            rows.reverse();
        }
        Ok(QueryResult {
            rows: rows
                .iter()
                .map(|(_, content)| query::project(projection, content))
                .collect(),
        })
    }
}

fn kv_op_error(err: StoreError, ctx: KeyValueErrorContext) -> OperationError {
    match err {
        StoreError::DocumentNotFound => OperationError::DocumentNotFound { context: ctx },
        StoreError::DocumentExists => OperationError::DocumentExists { context: ctx },
        StoreError::CasMismatch { .. } => {
            OperationError::conflict(FailureCause::CasMismatch, ctx)
        }
        other => OperationError::OperationFailed {
            cause: FailureCause::Store(other.to_string()),
            context: Some(ErrorContext::KeyValue(ctx)),
        },
    }
}

fn query_op_error(err: StoreError, statement: &str) -> OperationError {
    match err {
        StoreError::ParsingFailure { .. } => OperationError::ParsingFailure {
            context: QueryErrorContext::new(statement),
        },
        other => OperationError::OperationFailed {
            cause: FailureCause::QueryExecution(other.to_string()),
            context: Some(ErrorContext::Query(QueryErrorContext::new(statement))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_store::MemoryStore;
    use serde_json::json;

    fn context(store: &Arc<MemoryStore>) -> AttemptContext<MemoryStore> {
        AttemptContext::new(Arc::clone(store), TransactionId::new(), 1)
    }

    fn coll() -> Collection {
        Collection::new("main", "inventory", "items")
    }

    #[test]
    fn test_get_reads_committed_view() {
        let store = Arc::new(MemoryStore::new());
        store.upsert(&coll(), "k", json!({ "qty": 5 })).unwrap();
        let mut attempt = context(&store);
        let handle = attempt.get(&coll(), "k").unwrap();
        assert_eq!(handle.content, json!({ "qty": 5 }));
        assert!(!handle.cas.is_zero());
    }

    #[test]
    fn test_staged_insert_is_ryow_but_invisible_outside() {
        let store = Arc::new(MemoryStore::new());
        let mut attempt = context(&store);
        attempt.insert(&coll(), "k", json!({ "qty": 1 })).unwrap();

        // Visible to the staging attempt
        let handle = attempt.get(&coll(), "k").unwrap();
        assert_eq!(handle.content, json!({ "qty": 1 }));
        // Invisible to the committed view
        assert_eq!(
            store.get(&coll(), "k").err(),
            Some(StoreError::DocumentNotFound)
        );
    }

    #[test]
    fn test_staged_remove_reads_as_not_found() {
        let store = Arc::new(MemoryStore::new());
        store.upsert(&coll(), "k", json!({})).unwrap();
        let mut attempt = context(&store);
        let handle = attempt.get(&coll(), "k").unwrap();
        attempt.remove(&handle).unwrap();

        assert!(matches!(
            attempt.get(&coll(), "k"),
            Err(OperationError::DocumentNotFound { .. })
        ));
        // The committed view still has it until commit
        assert!(store.get(&coll(), "k").is_ok());
    }

    #[test]
    fn test_insert_over_committed_document_is_exists_not_conflict() {
        let store = Arc::new(MemoryStore::new());
        store.upsert(&coll(), "k", json!({})).unwrap();
        let mut attempt = context(&store);
        assert!(matches!(
            attempt.insert(&coll(), "k", json!({})),
            Err(OperationError::DocumentExists { .. })
        ));
        // Exists is application-fatal, not a race: no poison
        assert!(attempt.take_poison().is_none());
    }

    #[test]
    fn test_stale_cas_replace_poisons_the_attempt() {
        let store = Arc::new(MemoryStore::new());
        store.upsert(&coll(), "k", json!({ "v": 1 })).unwrap();
        let mut attempt = context(&store);
        let handle = attempt.get(&coll(), "k").unwrap();

        let stale = DocumentHandle::new(
            handle.collection.clone(),
            &handle.key,
            Cas::new(handle.cas.value() + 100),
            handle.content.clone(),
        );
        let err = attempt.replace(&stale, json!({ "v": 2 })).unwrap_err();
        assert_eq!(err.to_string(), "unknown");
        assert!(err.is_conflict());
        assert!(attempt.take_poison().is_some());
    }

    #[test]
    fn test_insert_collides_with_other_transactions_staging() {
        let store = Arc::new(MemoryStore::new());
        let mut first = context(&store);
        first.insert(&coll(), "k", json!({})).unwrap();

        let mut second = context(&store);
        let err = second.insert(&coll(), "k", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "unknown");
        assert!(err.is_conflict());
    }

    #[test]
    fn test_replace_after_insert_folds_to_insert() {
        let store = Arc::new(MemoryStore::new());
        let mut attempt = context(&store);
        let handle = attempt.insert(&coll(), "k", json!({ "v": 1 })).unwrap();
        attempt.replace(&handle, json!({ "v": 2 })).unwrap();

        let mutation = attempt.staged().get(&coll(), "k").unwrap();
        assert_eq!(mutation.kind, StagedKind::Insert);
        assert_eq!(mutation.content, Some(json!({ "v": 2 })));
    }

    #[test]
    fn test_insert_then_remove_cancels_staging() {
        let store = Arc::new(MemoryStore::new());
        let mut attempt = context(&store);
        let handle = attempt.insert(&coll(), "k", json!({})).unwrap();
        attempt.remove(&handle).unwrap();

        assert!(attempt.staged().is_empty());
        // The tombstone is gone from the store too
        assert_eq!(store.load(&coll(), "k").unwrap(), None);
    }

    #[test]
    fn test_select_merges_staged_writes_over_committed_scan() {
        let store = Arc::new(MemoryStore::new());
        store.upsert(&coll(), "a", json!({ "v": "old" })).unwrap();
        store.upsert(&coll(), "b", json!({ "v": "b" })).unwrap();

        let mut attempt = context(&store);
        let handle = attempt.get(&coll(), "a").unwrap();
        attempt.replace(&handle, json!({ "v": "new" })).unwrap();
        attempt.insert(&coll(), "c", json!({ "v": "c" })).unwrap();

        let result = attempt
            .query(
                "SELECT * FROM main.inventory.items ORDER BY META().id ASC",
                QueryOptions::new(),
            )
            .unwrap();
        assert_eq!(
            result.rows,
            vec![
                json!({ "v": "new" }),
                json!({ "v": "b" }),
                json!({ "v": "c" })
            ]
        );
    }

    #[test]
    fn test_query_parse_failure_is_operation_local() {
        let store = Arc::new(MemoryStore::new());
        let mut attempt = context(&store);
        let err = attempt
            .query("definitely not a statement", QueryOptions::new())
            .unwrap_err();
        assert!(matches!(err, OperationError::ParsingFailure { .. }));
        // Parsing failures are not conflicts; no poison
        assert!(attempt.take_poison().is_none());
    }

    #[test]
    fn test_query_update_routes_through_staging() {
        let store = Arc::new(MemoryStore::new());
        store.upsert(&coll(), "k", json!({ "qty": 1 })).unwrap();
        let mut attempt = context(&store);
        attempt
            .query(
                "UPDATE main.inventory.items SET qty=9 WHERE META().id = $1",
                QueryOptions::new().parameters(vec![json!("k")]),
            )
            .unwrap();

        let handle = attempt.get(&coll(), "k").unwrap();
        assert_eq!(handle.content, json!({ "qty": 9 }));
        // Still invisible outside the attempt
        let (committed, _) = store.get(&coll(), "k").unwrap();
        assert_eq!(committed, json!({ "qty": 1 }));
    }
}
