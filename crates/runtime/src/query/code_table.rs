//! Process-wide cache of small lookup ("code") tables.
//!
//! A code table maps the values of one key column to the values of one return column.
//! Loads are single-flight per [`CacheKey`]: the first requester to probe a cold key
//! becomes the primary driver and every later requester joins the key's
//! [`WaitingSet`] until the load completes or fails. The number of resident plus
//! loading tables is bounded; admission is decided in [`CodeTableCache::probe`] only.
//!
//! All state lives in one mutex-guarded struct. Every operation is a handful of map
//! mutations, so the lock is never held across I/O.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use datafusion::arrow::datatypes::DataType;
use datafusion::common::ScalarValue;
use ferry_common::config::CodeTableSettings;
use ferry_common::{Batch, NodeId, RequestId, SubRequestId};
use ferry_error::{ErrorCode, ErrorContext, FerryError, Result};
use parking_lot::Mutex;

/// Identifies one distinct lookup table instance. Identifiers are lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub table: String,
    pub return_column: String,
    pub key_column: String,
    pub database: String,
    pub database_version: String,
}

impl CacheKey {
    pub fn new(
        table: &str,
        return_column: &str,
        key_column: &str,
        database: &str,
        database_version: &str,
    ) -> Self {
        Self {
            table: table.to_lowercase(),
            return_column: return_column.to_lowercase(),
            key_column: key_column.to_lowercase(),
            database: database.to_lowercase(),
            database_version: database_version.to_lowercase(),
        }
    }

    fn context(&self) -> ErrorContext {
        ErrorContext::CodeTable {
            table: self.table.clone(),
            key_column: self.key_column.clone(),
            return_column: self.return_column.clone(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} -> {})@{}:{}",
            self.table, self.key_column, self.return_column, self.database, self.database_version
        )
    }
}

/// Outcome of [`CodeTableCache::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// The table is resident; call `get`.
    Exists,
    /// Another requester is loading it; the caller was added to the waiting set.
    Loading,
    /// The caller is now the primary driver of a new load.
    NotExist,
    /// Admitting another table would exceed capacity. Not retryable.
    Overload,
}

/// Requesters blocked on one in-flight load. Each id appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitingSet {
    primary: Option<RequestId>,
    others: Vec<RequestId>,
}

impl WaitingSet {
    fn with_primary(primary: RequestId) -> Self {
        Self {
            primary: Some(primary),
            others: Vec::new(),
        }
    }

    fn add(&mut self, requester: RequestId) {
        if self.primary != Some(requester) && !self.others.contains(&requester) {
            self.others.push(requester);
        }
    }

    fn remove(&mut self, requester: RequestId) {
        if self.primary == Some(requester) {
            self.primary = None;
        }
        self.others.retain(|r| *r != requester);
    }

    pub fn primary(&self) -> Option<RequestId> {
        self.primary
    }

    pub fn len(&self) -> usize {
        self.others.len() + usize::from(self.primary.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, requester: RequestId) -> bool {
        self.primary == Some(requester) || self.others.contains(&requester)
    }

    /// Primary first, then the others in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = RequestId> + '_ {
        self.primary.into_iter().chain(self.others.iter().copied())
    }
}

#[derive(Debug)]
struct FailureRecord {
    at: Instant,
    cause: FerryError,
}

/// A completed, immutable code table.
#[derive(Debug, Default)]
struct CodeTable {
    values: HashMap<ScalarValue, ScalarValue>,
    key_type: Option<DataType>,
}

impl CodeTable {
    fn lookup(&self, key_value: &ScalarValue) -> Option<ScalarValue> {
        if let Some(value) = self.values.get(key_value) {
            return Some(value.clone());
        }
        // Literal keys often arrive with a wider or narrower type than the column.
        let key_type = self.key_type.as_ref()?;
        if &key_value.data_type() == key_type {
            return None;
        }
        let cast = key_value.cast_to(key_type).ok()?;
        self.values.get(&cast).cloned()
    }
}

#[derive(Debug)]
struct Load {
    waiters: WaitingSet,
    table: CodeTable,
    rows: usize,
}

#[derive(Debug, Default)]
struct CacheInner {
    done: HashMap<CacheKey, Arc<CodeTable>>,
    loading: HashMap<CacheKey, Load>,
    loads: HashMap<SubRequestId, CacheKey>,
    failures: HashMap<String, FailureRecord>,
    /// Causes of failed loads not yet seen by the requesters that waited on them.
    undelivered: HashMap<CacheKey, HashMap<RequestId, FerryError>>,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeTableStats {
    pub resident: usize,
    pub loading: usize,
    pub failed: usize,
    /// Failures owed to waiters that have not probed again yet.
    pub undelivered: usize,
    pub capacity: usize,
}

#[derive(Debug)]
pub struct CodeTableCache {
    settings: CodeTableSettings,
    inner: Mutex<CacheInner>,
    next_load_id: AtomicI64,
}

impl CodeTableCache {
    pub fn new(settings: CodeTableSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(CacheInner::default()),
            next_load_id: AtomicI64::new(-1),
        }
    }

    pub fn settings(&self) -> &CodeTableSettings {
        &self.settings
    }

    /// Classifies `key` for `requester`, registering it as a waiter or as the primary
    /// driver of a new load.
    ///
    /// A requester that waited on a failed load of `key` receives that failure exactly
    /// once, whatever the retry window. Beyond that, a table whose last load failed
    /// within the retry window re-raises the failure.
    pub fn probe(&self, key: &CacheKey, requester: RequestId) -> Result<CacheState> {
        let mut inner = self.inner.lock();

        if let Some(owed) = inner.undelivered.get_mut(key) {
            if let Some(cause) = owed.remove(&requester) {
                if owed.is_empty() {
                    inner.undelivered.remove(key);
                }
                return Err(cause);
            }
        }

        if inner.done.contains_key(key) {
            return Ok(CacheState::Exists);
        }

        if let Some(load) = inner.loading.get_mut(key) {
            load.waiters.add(requester);
            tracing::trace!(target: "code_table", key = %key, requester = %requester, "Joined in-flight load");
            return Ok(CacheState::Loading);
        }

        if let Some(failure) = inner.failures.get(&key.table) {
            if failure.at.elapsed() < self.settings.retry_window() {
                tracing::debug!(target: "code_table", key = %key, "Re-raising recent load failure");
                return Err(failure.cause.clone());
            }
            inner.failures.remove(&key.table);
        }

        let in_use = inner.done.len() + inner.loading.len();
        if in_use >= self.settings.max_code_tables {
            tracing::debug!(
                target: "code_table",
                key = %key,
                in_use,
                limit = self.settings.max_code_tables,
                "Code table capacity reached"
            );
            return Ok(CacheState::Overload);
        }

        inner.loading.insert(
            key.clone(),
            Load {
                waiters: WaitingSet::with_primary(requester),
                table: CodeTable::default(),
                rows: 0,
            },
        );
        Ok(CacheState::NotExist)
    }

    /// Allocates the synthetic sub-request id for a load `requester` is primary for.
    pub fn begin_load(&self, key: &CacheKey, requester: RequestId) -> Result<SubRequestId> {
        let mut inner = self.inner.lock();
        match inner.loading.get(key) {
            Some(load) if load.waiters.primary() == Some(requester) => {}
            _ => {
                return Err(FerryError::new(
                    ErrorCode::InvalidStreamState,
                    format!("Request {} does not drive a load of {}", requester, key),
                )
                .with_context(key.context()))
            }
        }

        let id = SubRequestId::new(
            requester,
            NodeId::CodeTableLoad(self.next_load_id.fetch_sub(1, Ordering::SeqCst)),
        );
        inner.loads.insert(id, key.clone());
        tracing::debug!(target: "code_table", key = %key, load = %id, "Code table load started");
        Ok(id)
    }

    /// Merges delivered `(key value, return value)` pairs into the load's table. The
    /// last write wins for a repeated key value.
    ///
    /// Every delivered pair counts against `max_code_table_records`, duplicates
    /// included. Deliveries for unknown loads are ignored.
    pub fn append_rows<I>(&self, load: &SubRequestId, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = (ScalarValue, ScalarValue)>,
    {
        let mut inner = self.inner.lock();
        let Some(key) = inner.loads.get(load).cloned() else {
            tracing::trace!(target: "code_table", load = %load, "Ignoring rows for unknown load");
            return Ok(());
        };
        let Some(entry) = inner.loading.get_mut(&key) else {
            return Ok(());
        };

        let limit = self.settings.max_code_table_records;
        for (key_value, value) in rows {
            entry.rows += 1;
            if entry.rows > limit {
                return Err(FerryError::new(
                    ErrorCode::CodeTableTooLarge,
                    format!("Code table {} exceeds {} records", key, limit),
                )
                .with_context(key.context()));
            }
            if entry.table.key_type.is_none() && !key_value.is_null() {
                entry.table.key_type = Some(key_value.data_type());
            }
            entry.table.values.insert(key_value, value);
        }
        Ok(())
    }

    /// Looks up `key_value` in a resident table. `None` if the table has no such key.
    ///
    /// Fails with `CodeTableUnknown` if `key` is not resident, which includes a table
    /// invalidated after the caller saw it as existing.
    pub fn get(&self, key: &CacheKey, key_value: &ScalarValue) -> Result<Option<ScalarValue>> {
        let table = self.inner.lock().done.get(key).cloned();
        match table {
            Some(table) => Ok(table.lookup(key_value)),
            None => Err(FerryError::new(
                ErrorCode::CodeTableUnknown,
                format!("Code table {} is not loaded", key),
            )
            .with_context(key.context())),
        }
    }

    /// Makes the load's table resident and returns everyone to wake. A second call
    /// for the same load returns an empty set.
    pub fn complete_load(&self, load: &SubRequestId) -> WaitingSet {
        let mut inner = self.inner.lock();
        let Some(key) = inner.loads.remove(load) else {
            return WaitingSet::default();
        };
        let Some(entry) = inner.loading.remove(&key) else {
            return WaitingSet::default();
        };

        tracing::info!(
            target: "code_table",
            key = %key,
            rows = entry.rows,
            waiters = entry.waiters.len(),
            "Code table loaded"
        );
        inner.failures.remove(&key.table);
        inner.done.insert(key, Arc::new(entry.table));
        entry.waiters
    }

    /// Discards the partial table, remembers `cause` for throttling and returns
    /// everyone to wake.
    pub fn fail_load(&self, load: &SubRequestId, cause: FerryError) -> WaitingSet {
        let mut inner = self.inner.lock();
        let Some(key) = inner.loads.remove(load) else {
            return WaitingSet::default();
        };
        let Some(entry) = inner.loading.remove(&key) else {
            return WaitingSet::default();
        };

        tracing::warn!(
            target: "code_table",
            key = %key,
            error = %cause,
            waiters = entry.waiters.len(),
            "Code table load failed"
        );
        if !entry.waiters.is_empty() {
            let owed = inner.undelivered.entry(key.clone()).or_default();
            for requester in entry.waiters.iter() {
                owed.insert(requester, cause.clone());
            }
        }
        inner.failures.insert(
            key.table.clone(),
            FailureRecord {
                at: Instant::now(),
                cause,
            },
        );
        entry.waiters
    }

    /// Drops `requester` from every in-flight waiting set and discards failures still
    /// owed to it, e.g. once its request has ended. Loads it drives keep running.
    pub fn forget_requester(&self, requester: RequestId) {
        let mut inner = self.inner.lock();
        for load in inner.loading.values_mut() {
            load.waiters.remove(requester);
        }
        inner.undelivered.retain(|_, owed| {
            owed.remove(&requester);
            !owed.is_empty()
        });
    }

    /// Drops every resident table and failure record. In-flight loads continue and
    /// complete into the emptied cache.
    ///
    /// A caller that already saw `Exists` may still call `get` afterwards and receive
    /// `CodeTableUnknown`; snapshots are not linearizable.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.done.len();
        inner.done.clear();
        inner.failures.clear();
        tracing::info!(target: "code_table", dropped, "Invalidated code tables");
    }

    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.inner.lock().loading.contains_key(key)
    }

    pub fn stats(&self) -> CodeTableStats {
        let inner = self.inner.lock();
        CodeTableStats {
            resident: inner.done.len(),
            loading: inner.loading.len(),
            failed: inner.failures.len(),
            undelivered: inner.undelivered.values().map(HashMap::len).sum(),
            capacity: self.settings.max_code_tables,
        }
    }
}

/// Extracts `(key, return)` pairs from a load batch, whose first two columns are the
/// key column and the return column.
pub fn pairs_from_batch(batch: &Batch) -> Result<Vec<(ScalarValue, ScalarValue)>> {
    let data = batch.record_batch();
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    if data.num_columns() < 2 {
        return Err(FerryError::new(
            ErrorCode::SchemaViolation,
            format!(
                "Code table batch has {} columns, expected key and return columns",
                data.num_columns()
            ),
        ));
    }

    let keys = data.column(0);
    let values = data.column(1);
    (0..data.num_rows())
        .map(|row| {
            Ok((
                ScalarValue::try_from_array(keys.as_ref(), row)?,
                ScalarValue::try_from_array(values.as_ref(), row)?,
            ))
        })
        .collect()
}
