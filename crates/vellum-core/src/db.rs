//! The database facade: namespace registry, cross-namespace query
//! dispatch (joins, merges), transactions and the background
//! maintenance routine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};
use vellum_error::{Result, VellumError};
use vellum_index::IndexDef;
use vellum_query::{Query, QueryType};
use vellum_storage::Storage;
use vellum_types::{Cx, Value};

use crate::config::NamespaceConfig;
use crate::namespace::{ItemMode, Namespace, NsContext};
use crate::results::QueryResults;
use crate::selector::JoinData;
use crate::transaction::{Transaction, TxStep};

const BG_TICK: Duration = Duration::from_millis(100);

type NsHandle = Arc<RwLock<Namespace>>;

struct DbInner {
    namespaces: RwLock<HashMap<String, NsHandle>>,
    config: NamespaceConfig,
    stop: AtomicBool,
}

/// The in-process database.
pub struct Db {
    inner: Arc<DbInner>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

impl Db {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(NamespaceConfig::default())
    }

    #[must_use]
    pub fn with_config(config: NamespaceConfig) -> Self {
        let inner = Arc::new(DbInner {
            namespaces: RwLock::new(HashMap::new()),
            config,
            stop: AtomicBool::new(false),
        });
        let background = {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("vellum-background".to_owned())
                .spawn(move || background_loop(&inner))
                .ok()
        };
        Self {
            inner,
            background: Mutex::new(background),
        }
    }

    fn ns(&self, name: &str) -> Result<NsHandle> {
        self.inner
            .namespaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| VellumError::NamespaceNotFound {
                name: name.to_owned(),
            })
    }

    /// Create or open an in-memory namespace.
    pub fn open_namespace(&self, name: &str) -> Result<()> {
        let mut namespaces = self.inner.namespaces.write();
        if namespaces.contains_key(name) {
            return Ok(());
        }
        let ns = Namespace::new(name, self.inner.config.clone());
        namespaces.insert(name.to_owned(), Arc::new(RwLock::new(ns)));
        info!(namespace = name, "namespace opened");
        Ok(())
    }

    /// Create or open a namespace bound to a storage backend; existing
    /// state is reconstructed from it.
    pub fn open_namespace_with_storage(
        &self,
        name: &str,
        backend: Arc<dyn Storage>,
    ) -> Result<()> {
        let mut namespaces = self.inner.namespaces.write();
        if namespaces.contains_key(name) {
            return Ok(());
        }
        let mut ns = Namespace::new(name, self.inner.config.clone());
        ns.attach_storage(backend)?;
        namespaces.insert(name.to_owned(), Arc::new(RwLock::new(ns)));
        Ok(())
    }

    /// Flush and detach a namespace.
    pub fn close_namespace(&self, name: &str) -> Result<()> {
        let handle = self
            .inner
            .namespaces
            .write()
            .remove(name)
            .ok_or_else(|| VellumError::NamespaceNotFound {
                name: name.to_owned(),
            })?;
        let mut ns = handle.write();
        ns.flush_storage()?;
        ns.invalidated = true;
        Ok(())
    }

    /// Drop a namespace and its contents.
    pub fn drop_namespace(&self, name: &str) -> Result<()> {
        let handle = self
            .inner
            .namespaces
            .write()
            .remove(name)
            .ok_or_else(|| VellumError::NamespaceNotFound {
                name: name.to_owned(),
            })?;
        let mut ns = handle.write();
        ns.truncate(&NsContext::default())?;
        ns.invalidated = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Schema & indexes
    // ------------------------------------------------------------------

    pub fn add_index(&self, ns: &str, def: IndexDef) -> Result<()> {
        self.ns(ns)?.write().add_index(def, None)
    }

    pub fn add_fulltext_index(
        &self,
        ns: &str,
        def: IndexDef,
        config_json: Option<&str>,
    ) -> Result<()> {
        self.ns(ns)?.write().add_index(def, config_json)
    }

    pub fn update_index(&self, ns: &str, def: IndexDef) -> Result<()> {
        self.ns(ns)?.write().update_index(def, None)
    }

    pub fn drop_index(&self, ns: &str, name: &str) -> Result<()> {
        self.ns(ns)?.write().drop_index(name)
    }

    pub fn set_schema(&self, ns: &str, schema: &str) -> Result<()> {
        self.ns(ns)?.write().set_schema(schema)
    }

    pub fn get_schema(&self, ns: &str) -> Result<Option<String>> {
        Ok(self.ns(ns)?.read().get_schema().map(str::to_owned))
    }

    pub fn put_meta(&self, ns: &str, key: &str, value: &str) -> Result<()> {
        self.ns(ns)?.write().put_meta(key, value)
    }

    pub fn get_meta(&self, ns: &str, key: &str) -> Result<Option<String>> {
        Ok(self.ns(ns)?.read().get_meta(key))
    }

    pub fn enum_meta(&self, ns: &str) -> Result<Vec<String>> {
        Ok(self.ns(ns)?.read().enum_meta())
    }

    // ------------------------------------------------------------------
    // Item operations
    // ------------------------------------------------------------------

    /// Returns true when a row was touched (Insert on an existing PK and
    /// Update on a missing one are no-ops).
    pub fn insert(&self, ns: &str, json: &str) -> Result<bool> {
        self.modify(ns, json, ItemMode::Insert, &[])
    }

    pub fn update(&self, ns: &str, json: &str) -> Result<bool> {
        self.modify(ns, json, ItemMode::Update, &[])
    }

    pub fn upsert(&self, ns: &str, json: &str) -> Result<bool> {
        self.modify(ns, json, ItemMode::Upsert, &[])
    }

    pub fn delete(&self, ns: &str, json: &str) -> Result<bool> {
        self.modify(ns, json, ItemMode::Delete, &[])
    }

    /// Modify with server-assigned fields (`"id=serial()"`, `"ts=now()"`).
    pub fn modify(
        &self,
        ns: &str,
        json: &str,
        mode: ItemMode,
        precepts: &[&str],
    ) -> Result<bool> {
        let handle = self.ns(ns)?;
        let mut guard = handle.write();
        let mut item = guard.new_item(json)?;
        if !precepts.is_empty() {
            item.set_precepts(precepts.iter().map(|p| (*p).to_owned()).collect());
        }
        let row = guard.modify_item(&mut item, mode, &NsContext::default())?;
        Ok(row.is_some())
    }

    pub fn truncate(&self, ns: &str) -> Result<()> {
        self.ns(ns)?.write().truncate(&NsContext::default())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Parse and execute one SQL statement.
    pub fn execute_sql(&self, sql: &str) -> Result<QueryResults> {
        self.execute_sql_cx(sql, &Cx::background())
    }

    pub fn execute_sql_cx(&self, sql: &str, cx: &Cx) -> Result<QueryResults> {
        let query = vellum_query::parse_sql(sql)?;
        self.execute_query_cx(&query, cx)
    }

    /// Execute a query from its JSON DSL form.
    pub fn execute_dsl(&self, dsl: &serde_json::Value) -> Result<QueryResults> {
        let query = vellum_query::from_dsl(dsl)?;
        self.execute_query_cx(&query, &Cx::background())
    }

    pub fn execute_query(&self, query: &Query) -> Result<QueryResults> {
        self.execute_query_cx(query, &Cx::background())
    }

    pub fn execute_query_cx(&self, query: &Query, cx: &Cx) -> Result<QueryResults> {
        match query.query_type {
            QueryType::Select => self.do_select(query, cx),
            QueryType::Update => {
                let handle = self.ns(&query.namespace)?;
                let mut ns = handle.write();
                ns.commit_fulltext();
                ns.update_query(query, cx)
            }
            QueryType::Delete => {
                let handle = self.ns(&query.namespace)?;
                let mut ns = handle.write();
                ns.commit_fulltext();
                ns.delete_query(query, cx)
            }
            QueryType::Truncate => {
                self.ns(&query.namespace)?
                    .write()
                    .truncate(&NsContext::default())?;
                Ok(QueryResults::default())
            }
        }
    }

    fn do_select(&self, query: &Query, cx: &Cx) -> Result<QueryResults> {
        // Pre-select every joined namespace before touching the left one.
        let mut joins = Vec::with_capacity(query.join_queries.len());
        for (idx, join) in query.join_queries.iter().enumerate() {
            joins.push(self.select_for_join(idx, join, cx)?);
        }

        let handle = self.ns(&query.namespace)?;
        let mut results = loop {
            // A dirty full-text index needs the write lock once to
            // publish; plain selects share the read lock. A writer
            // dirtying the index between the check and the select shows
            // up as StateInvalidated and the select retries.
            if handle.read().has_dirty_fulltext() {
                let mut ns = handle.write();
                ns.commit_fulltext();
                break ns.select(query, &joins, cx)?;
            }
            let ns = handle.read();
            if ns.invalidated {
                return Err(VellumError::NamespaceInvalidated {
                    name: query.namespace.clone(),
                });
            }
            match ns.select(query, &joins, cx) {
                Err(err) if err.kind() == vellum_error::ErrorKind::StateInvalidated => {
                    continue;
                }
                other => break other?,
            }
        };

        for merge in &query.merge_queries {
            let sub = self.do_select(merge, cx)?;
            results.merged_rows.extend(sub.to_json()?);
        }
        Ok(results)
    }

    fn select_for_join(
        &self,
        join_idx: usize,
        join: &vellum_query::JoinedQuery,
        cx: &Cx,
    ) -> Result<JoinData> {
        let handle = self.ns(&join.query.namespace)?;
        if handle.read().has_dirty_fulltext() {
            handle.write().commit_fulltext();
        }
        let ns = handle.read();
        let sub = ns.select(&join.query, &[], cx)?;
        let mut right_rows = Vec::with_capacity(sub.rows.len());
        let mut right_on_values = Vec::with_capacity(sub.rows.len());
        for (i, row) in sub.rows.iter().enumerate() {
            right_rows.push(sub.row_json(i)?);
            let mut per_on = Vec::with_capacity(join.on.len());
            for on in &join.on {
                let access =
                    crate::selector::resolve_access(&ns, &on.right_field, false)?;
                per_on.push(access.values(&ns, &row.payload)?);
            }
            right_on_values.push(per_on);
        }
        Ok(JoinData {
            join_idx,
            join_type: join.join_type,
            namespace: join.query.namespace.clone(),
            on: join.on.clone(),
            right_rows,
            right_on_values,
        })
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    #[must_use]
    pub fn new_transaction(&self, ns: &str) -> Transaction {
        Transaction::new(ns)
    }

    /// Commit a transaction: in place for small ones, through a namespace
    /// copy-and-swap for large ones. Cancellation aborts the copy without
    /// touching the live namespace.
    pub fn commit_transaction(&self, tx: Transaction, cx: &Cx) -> Result<()> {
        let handle = self.ns(&tx.namespace)?;
        let mut ns = handle.write();
        let steps = tx.steps.len();
        let cfg = &ns.config;
        let capacity = ns.items_count().max(1);
        let copy_mode = steps >= cfg.tx_size_to_always_copy
            || (steps >= cfg.start_copy_policy_tx_size
                && capacity <= cfg.copy_policy_multiplier.saturating_mul(steps));
        if copy_mode {
            // Storage writes freeze while the clone replays; the swap
            // under the exclusive lock makes the old generation
            // unobservable by later selects.
            let _storage_lock = match ns.storage() {
                Some(storage) => Some(storage.full_lock()?),
                None => None,
            };
            let mut clone = ns.clone_for_tx();
            clone.wal_mut().add(crate::wal::WalRecord::InitTransaction);
            if let Err(err) = apply_steps(&mut clone, &tx, cx) {
                // The clone is discarded; the live namespace is intact.
                warn!(namespace = %tx.namespace, error = %err, "copy-mode commit aborted");
                return Err(err);
            }
            clone.wal_mut().add(crate::wal::WalRecord::CommitTransaction);
            clone.commit_fulltext();
            *ns = clone;
            ns.flush_storage()?;
        } else {
            ns.wal_mut().add(crate::wal::WalRecord::InitTransaction);
            apply_steps(&mut ns, &tx, cx)?;
            ns.wal_mut().add(crate::wal::WalRecord::CommitTransaction);
        }
        Ok(())
    }

    /// Run one maintenance pass now (the background routine does this
    /// periodically).
    pub fn maintenance(&self) -> Result<()> {
        let handles: Vec<NsHandle> = self.inner.namespaces.read().values().cloned().collect();
        let cx = Cx::background();
        for handle in handles {
            let mut ns = handle.write();
            ns.commit_fulltext();
            if ns.needs_optimization() {
                ns.optimize_indexes(&cx)?;
            }
            ns.scan_ttl(&cx)?;
            ns.drain_strings();
        }
        Ok(())
    }

    /// Current value of the namespace data hash (XOR of live row hashes).
    pub fn data_hash(&self, ns: &str) -> Result<u64> {
        Ok(self.ns(ns)?.read().data_hash())
    }

    pub fn items_count(&self, ns: &str) -> Result<usize> {
        Ok(self.ns(ns)?.read().items_count())
    }
}

fn apply_steps(ns: &mut Namespace, tx: &Transaction, cx: &Cx) -> Result<()> {
    let ctx = NsContext {
        cx: cx.clone(),
        in_transaction: true,
        ..NsContext::default()
    };
    for step in &tx.steps {
        cx.checkpoint()?;
        match step {
            TxStep::Item { json, mode } => {
                let mut item = ns.new_item(json)?;
                ns.modify_item(&mut item, *mode, &ctx)?;
            }
            TxStep::Query(query) => match query.query_type {
                QueryType::Update => {
                    ns.commit_fulltext();
                    ns.update_query(query, cx)?;
                }
                QueryType::Delete => {
                    ns.commit_fulltext();
                    ns.delete_query(query, cx)?;
                }
                QueryType::Truncate => ns.truncate(&ctx)?,
                QueryType::Select => {
                    return Err(VellumError::Params(
                        "select steps are not allowed in a transaction".to_owned(),
                    ));
                }
            },
        }
    }
    Ok(())
}

fn background_loop(inner: &DbInner) {
    let cx = Cx::background();
    let mut ticks: u64 = 0;
    while !inner.stop.load(Ordering::SeqCst) {
        std::thread::sleep(BG_TICK);
        ticks += 1;
        let handles: Vec<NsHandle> = inner.namespaces.read().values().cloned().collect();
        for handle in handles {
            // Never stall foreground work; skip busy namespaces.
            let Some(mut ns) = handle.try_write() else {
                continue;
            };
            if ns.needs_optimization() {
                ns.commit_fulltext();
                if let Err(err) = ns.optimize_indexes(&cx) {
                    if !err.is_cancel() {
                        warn!(namespace = %ns.name, error = %err, "index optimization failed");
                    }
                }
            }
            // TTL expiry and string retirement are cheaper; once a second.
            if ticks % 10 == 0 {
                if let Err(err) = ns.scan_ttl(&cx) {
                    warn!(namespace = %ns.name, error = %err, "ttl scan failed");
                }
                ns.drain_strings();
            }
        }
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.background.lock().take() {
            let _ = handle.join();
        }
        let handles: Vec<NsHandle> = self.inner.namespaces.read().values().cloned().collect();
        for handle in handles {
            let ns = handle.read();
            if let Err(err) = ns.flush_storage() {
                warn!(namespace = %ns.name, error = %err, "flush on close failed");
            }
        }
    }
}

/// Convenience: build a `WHERE pk = value` delete for one key.
#[must_use]
pub fn delete_by_pk_query(ns: &str, pk_field: &str, value: Value) -> Query {
    let mut q = Query::new(ns).where_cond(pk_field, vellum_types::CondType::Eq, vec![value]);
    q.query_type = QueryType::Delete;
    q
}
