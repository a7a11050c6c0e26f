//! The database handle.
//!
//! A [`Database`] owns one engine handle behind one mutex. Every child
//! object (cursors, views, transactions) keeps a clone of the handle and
//! takes the lock for the duration of a single engine call.

use crate::cursor::Cursor;
use crate::options::DatabaseOptions;
use crate::slice::{KeyRange, SliceView};
use crate::state::DatabaseState;
use crate::transaction::Transaction;
use crate::value::Value;
use crate::view::{ItemsView, KeysView, ValuesView};
use lsmdb_compress::Compression;
use lsmdb_core::{Engine, EngineResult, Error, InfoKind, LogCallback, Result, SeekMode};
use lsmdb_storage::LsmEngine;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Owner of one savepoint level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TxSlot {
    pub(crate) id: u64,
    /// No work since the owner last committed or rolled back
    pub(crate) settled: bool,
}

/// Everything the handle mutex guards.
pub(crate) struct Inner {
    pub(crate) engine: Box<dyn Engine>,
    pub(crate) state: DatabaseState,
    /// Index `level - 1`; `Some` when a [`Transaction`] object owns that level
    pub(crate) tx_slots: Vec<Option<TxSlot>>,
    next_tx_id: u64,
}

impl Inner {
    pub(crate) fn tx_level(&self) -> u32 {
        self.engine.transaction_level()
    }

    /// Drop slots of levels the engine no longer has open.
    pub(crate) fn sync_levels(&mut self) {
        let level = self.tx_level() as usize;
        self.tx_slots.resize(level, None);
    }

    pub(crate) fn claim_level(&mut self, level: u32) -> u64 {
        self.sync_levels();
        let id = self.next_tx_id;
        self.next_tx_id += 1;
        if let Some(slot) = self.tx_slots.get_mut(level as usize - 1) {
            *slot = Some(TxSlot { id, settled: false });
        }
        id
    }

    pub(crate) fn owns_level(&self, level: u32, id: u64) -> bool {
        matches!(
            self.tx_slots.get(level as usize - 1),
            Some(Some(slot)) if slot.id == id
        )
    }

    pub(crate) fn set_settled(&mut self, level: u32, settled: bool) {
        if let Some(Some(slot)) = self.tx_slots.get_mut(level as usize - 1) {
            slot.settled = settled;
        }
    }

    /// Whether the owner of `level`, if any, has settled its work.
    pub(crate) fn level_settled(&self, level: u32) -> bool {
        !matches!(
            self.tx_slots.get(level as usize - 1),
            Some(Some(slot)) if !slot.settled
        )
    }

    /// Record that a write landed in the innermost open level.
    fn note_write(&mut self) {
        self.sync_levels();
        let level = self.tx_level();
        if level > 0 {
            self.set_settled(level, false);
        }
    }

    /// Whether a transaction above `level` still has unsettled work.
    pub(crate) fn nested_unsettled(&self, level: u32) -> bool {
        self.tx_slots
            .iter()
            .skip(level as usize)
            .any(|slot| matches!(slot, Some(s) if !s.settled))
    }

    fn shutdown(&mut self) -> Result<()> {
        let rolled_back = if self.tx_level() > 0 {
            self.engine.rollback(0)
        } else {
            Ok(())
        };
        let closed = self.engine.close();
        self.state = DatabaseState::Closed;
        self.tx_slots.clear();
        rolled_back?;
        closed?;
        Ok(())
    }
}

struct Shared {
    path: PathBuf,
    options: DatabaseOptions,
    inner: Mutex<Inner>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.state != DatabaseState::Opened {
            return;
        }
        match inner.shutdown() {
            Ok(()) => info!(path = %self.path.display(), "database closed on drop"),
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "failed to close database on drop"
            ),
        }
    }
}

/// Outcome of a point seek.
pub(crate) enum Presence {
    Missing,
    Present,
    Found(Vec<u8>),
}

pub(crate) fn locate(engine: &mut dyn Engine, key: &[u8], mode: SeekMode) -> EngineResult<Presence> {
    let csr = engine.csr_open()?;
    let result = (|| -> EngineResult<Presence> {
        engine.csr_seek(csr, key, mode)?;
        if !engine.csr_valid(csr) {
            return Ok(Presence::Missing);
        }
        if mode == SeekMode::GeFast {
            return Ok(Presence::Present);
        }
        engine.csr_value(csr).map(Presence::Found)
    })();
    let closed = engine.csr_close(csr);
    let found = result?;
    closed?;
    Ok(found)
}

/// What a [`Database::fetch`] asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Exact lookup
    Key(Value),
    /// Directional lookup
    Seek(Value, SeekMode),
    /// Lazy slice
    Range(KeyRange),
}

/// What a [`Database::fetch`] returns.
#[derive(Debug)]
pub enum Fetched {
    /// The stored value
    Value(Value),
    /// A key exists at or after the sought key (`SeekMode::GeFast`)
    Exists,
    /// Lazy slice over the requested range
    Slice(SliceView),
}

/// A write handed to [`Database::assign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Insert or overwrite
    Put(Value, Value),
    /// Delete an existing key; missing keys are an error
    Remove(Value),
    /// Delete every key in `[start, stop)`
    RemoveRange(KeyRange),
}

/// Engine statistics returned by [`Database::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Info {
    /// Pages read from table files
    pub nread: u64,
    /// Pages written to table files; `None` on read-only handles
    pub nwrite: Option<u64>,
    /// KB written since the last checkpoint; `None` on read-only handles
    pub checkpoint_size: Option<u64>,
    /// Tree sizes in KB; `None` on read-only handles
    pub tree_size: Option<TreeSize>,
}

/// Sizes of the flushed and live trees, in KB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeSize {
    pub old: u64,
    pub current: u64,
}

/// The main database handle.
///
/// Construction validates the options and configures the engine without
/// touching the disk; [`open`](Database::open) does the I/O. Cloning is
/// cheap and every clone drives the same engine. The engine closes when
/// the last clone (or child view, cursor or transaction) is dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use lsmdb::{Database, DatabaseOptions};
///
/// let db = Database::new("./my_store", DatabaseOptions::text())?;
/// db.open()?;
/// db.insert("user:1", "Alice")?;
/// assert_eq!(db.get("user:1")?, "Alice");
/// db.close()?;
/// # Ok::<(), lsmdb::Error>(())
/// ```
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Build a handle over the bundled LSM engine. Nothing is opened yet.
    pub fn new<P: AsRef<Path>>(path: P, options: DatabaseOptions) -> Result<Self> {
        Self::construct(
            path.as_ref().to_path_buf(),
            options,
            Box::new(LsmEngine::new()),
            None,
        )
    }

    /// Like [`new`](Database::new), with engine messages routed to `logger`.
    pub fn with_logger<P: AsRef<Path>>(
        path: P,
        options: DatabaseOptions,
        logger: LogCallback,
    ) -> Result<Self> {
        Self::construct(
            path.as_ref().to_path_buf(),
            options,
            Box::new(LsmEngine::new()),
            Some(logger),
        )
    }

    /// Build a handle over any [`Engine`] implementation.
    pub fn with_engine<P: AsRef<Path>>(
        path: P,
        options: DatabaseOptions,
        engine: Box<dyn Engine>,
    ) -> Result<Self> {
        Self::construct(path.as_ref().to_path_buf(), options, engine, None)
    }

    /// Construct and open in one step.
    ///
    /// ```rust,no_run
    /// use lsmdb::{Database, DatabaseOptions};
    ///
    /// let db = Database::connect("./data", DatabaseOptions::default())?;
    /// db.insert(b"key", b"value")?;
    /// # Ok::<(), lsmdb::Error>(())
    /// ```
    pub fn connect<P: AsRef<Path>>(path: P, options: DatabaseOptions) -> Result<Self> {
        let db = Self::new(path, options)?;
        db.open()?;
        Ok(db)
    }

    fn construct(
        path: PathBuf,
        options: DatabaseOptions,
        mut engine: Box<dyn Engine>,
        logger: Option<LogCallback>,
    ) -> Result<Self> {
        let compressor = options.validate()?;
        for option in options.engine_options() {
            engine.configure(option)?;
        }
        if let Some(compressor) = compressor {
            debug!(codec = compressor.name(), level = compressor.level(), "installing compressor");
            engine.set_compressor(compressor)?;
        }
        if let Some(logger) = logger {
            engine.set_logger(logger);
        }
        debug!(path = %path.display(), "database handle constructed");
        Ok(Self {
            shared: Arc::new(Shared {
                path,
                options,
                inner: Mutex::new(Inner {
                    engine,
                    state: DatabaseState::Initialized,
                    tx_slots: Vec::new(),
                    next_tx_id: 1,
                }),
            }),
        })
    }

    // Locking

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.shared.inner.lock().map_err(|_| Error::LockPoisoned)
    }

    pub(crate) fn lock_opened(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.lock()?;
        match inner.state {
            DatabaseState::Opened => Ok(inner),
            DatabaseState::Initialized => Err(Error::usage("database has not been opened")),
            DatabaseState::Closed => Err(Error::usage("database is closed")),
        }
    }

    pub(crate) fn lock_writable(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.lock_opened()?;
        if self.shared.options.readonly {
            return Err(Error::ReadOnly);
        }
        Ok(inner)
    }

    /// Fails unless the handle is open.
    pub(crate) fn ensure_opened(&self) -> Result<()> {
        self.lock_opened().map(drop)
    }

    // Codec

    pub(crate) fn encode(&self, value: Value) -> Result<Vec<u8>> {
        match (&value, self.shared.options.text_mode) {
            (Value::Bytes(_), true) => {
                return Err(Error::usage("text database expects text keys and values"))
            }
            (Value::Text(_), false) => {
                return Err(Error::usage("binary database expects byte keys and values"))
            }
            _ => {}
        }
        if value.len() > i32::MAX as usize {
            return Err(Error::usage(format!(
                "{} bytes exceeds the {} byte limit for keys and values",
                value.len(),
                i32::MAX
            )));
        }
        Ok(value.into_bytes())
    }

    pub(crate) fn decode(&self, raw: Vec<u8>) -> Result<Value> {
        if !self.shared.options.text_mode {
            return Ok(Value::Bytes(raw));
        }
        String::from_utf8(raw)
            .map(Value::Text)
            .map_err(|e| Error::Integrity(format!("stored data is not valid UTF-8: {}", e)))
    }

    // Lifecycle

    /// Open the store. A writable handle flushes and runs one merge pass
    /// before it reports open.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.state {
            DatabaseState::Initialized => {}
            DatabaseState::Opened => return Err(Error::usage("database is already open")),
            DatabaseState::Closed => return Err(Error::usage("database is closed")),
        }

        inner.engine.open(&self.shared.path)?;
        if !self.shared.options.readonly {
            let options = &self.shared.options;
            let warmed = match inner.engine.flush() {
                Ok(()) => inner.engine.work(options.automerge, options.page_size),
                Err(err) => Err(err),
            };
            if let Err(err) = warmed {
                if let Err(close_err) = inner.engine.close() {
                    warn!(error = %close_err, "failed to close engine after a failed open");
                }
                return Err(err.into());
            }
        }
        inner.state = DatabaseState::Opened;
        info!(
            path = %self.shared.path.display(),
            readonly = self.shared.options.readonly,
            compression = %self.shared.options.compression,
            "database opened"
        );
        Ok(())
    }

    /// Roll back any outstanding transaction and close the engine.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.state == DatabaseState::Closed {
            return Err(Error::usage("database is already closed"));
        }
        inner.shutdown()?;
        info!(path = %self.shared.path.display(), "database closed");
        Ok(())
    }

    /// Engine statistics. Write statistics are only collected when writable.
    pub fn info(&self) -> Result<Info> {
        let inner = self.lock_opened()?;
        let nread = inner.engine.info(InfoKind::NRead)?;
        if self.shared.options.readonly {
            return Ok(Info {
                nread,
                ..Info::default()
            });
        }
        Ok(Info {
            nread,
            nwrite: Some(inner.engine.info(InfoKind::NWrite)?),
            checkpoint_size: Some(inner.engine.info(InfoKind::CheckpointSize)?),
            tree_size: Some(TreeSize {
                old: inner.engine.info(InfoKind::TreeSizeOld)?,
                current: inner.engine.info(InfoKind::TreeSizeCurrent)?,
            }),
        })
    }

    /// Merge until there is nothing left to do, with the configured defaults.
    pub fn work(&self) -> Result<u32> {
        self.work_with(None, None, true)
    }

    /// Run merge passes. Each pass raises `nmerge` by one until it reaches
    /// `automerge`; with `complete` passes repeat while they write anything.
    /// Returns the KB written.
    pub fn work_with(&self, nmerge: Option<u32>, nkb: Option<u32>, complete: bool) -> Result<u32> {
        let mut inner = self.lock_writable()?;
        let automerge = self.shared.options.automerge;
        let mut nmerge = nmerge.unwrap_or(automerge);
        let nkb = nkb.unwrap_or(self.shared.options.page_size);

        let mut total = 0u32;
        loop {
            let written = inner.engine.work(nmerge, nkb)?;
            total = total.saturating_add(written);
            if nmerge < automerge {
                nmerge += 1;
            }
            if !complete || written == 0 {
                break;
            }
        }
        debug!(total, "work finished");
        Ok(total)
    }

    /// Write the in-memory tree to a table file.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock_writable()?;
        inner.engine.flush()?;
        Ok(())
    }

    /// Sync the store. Returns the bytes written since the previous checkpoint.
    pub fn checkpoint(&self) -> Result<u64> {
        let mut inner = self.lock_writable()?;
        Ok(inner.engine.checkpoint()?)
    }

    // Raw writes

    /// Insert or overwrite `key`.
    pub fn insert<K: Into<Value>, V: Into<Value>>(&self, key: K, value: V) -> Result<()> {
        let key = self.encode(key.into())?;
        let value = self.encode(value.into())?;
        let mut inner = self.lock_writable()?;
        inner.note_write();
        inner.engine.insert(&key, &value)?;
        Ok(())
    }

    /// Delete `key`. Deleting a missing key is not an error here; see
    /// [`remove`](Database::remove).
    pub fn delete<K: Into<Value>>(&self, key: K) -> Result<()> {
        let key = self.encode(key.into())?;
        let mut inner = self.lock_writable()?;
        inner.note_write();
        inner.engine.delete(&key)?;
        Ok(())
    }

    /// Delete every key in `[start, end)`.
    pub fn delete_range<K: Into<Value>, E: Into<Value>>(&self, start: K, end: E) -> Result<()> {
        let start = self.encode(start.into())?;
        let end = self.encode(end.into())?;
        let mut inner = self.lock_writable()?;
        inner.note_write();
        inner.engine.delete_range(&start, &end)?;
        Ok(())
    }

    // Handle-level transactions

    /// Open savepoint level `tx_level + 1`.
    pub fn begin(&self) -> Result<()> {
        let mut inner = self.lock_writable()?;
        let level = inner.tx_level() + 1;
        inner.engine.begin(level)?;
        inner.sync_levels();
        debug!(level, "savepoint opened");
        Ok(())
    }

    /// Commit the innermost level, leaving `tx_level - 1` open.
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.lock_writable()?;
        let level = inner.tx_level();
        if level == 0 {
            return Ok(());
        }
        inner.engine.commit(level - 1)?;
        inner.sync_levels();
        Ok(())
    }

    /// Undo and close the innermost level.
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.lock_writable()?;
        let level = inner.tx_level();
        if level == 0 {
            return Ok(());
        }
        inner.engine.rollback(level)?;
        inner.engine.commit(level - 1)?;
        inner.sync_levels();
        Ok(())
    }

    /// Start a nested [`Transaction`].
    pub fn transaction(&self) -> Result<Transaction> {
        Transaction::begin(self)
    }

    /// Alias of [`transaction`](Database::transaction).
    pub fn tx(&self) -> Result<Transaction> {
        self.transaction()
    }

    /// Run `f` inside a nested transaction: committed when `f` returns
    /// `Ok`, rolled back when it returns `Err`.
    ///
    /// ```rust,no_run
    /// use lsmdb::{Database, DatabaseOptions};
    ///
    /// let db = Database::connect("./data", DatabaseOptions::text())?;
    /// db.transaction_scope(|tx| {
    ///     db.insert("a", "1")?;
    ///     db.insert("b", "2")?;
    ///     Ok(tx.level())
    /// })?;
    /// # Ok::<(), lsmdb::Error>(())
    /// ```
    pub fn transaction_scope<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut tx = self.transaction()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.finish(true)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.finish(false) {
                    warn!(error = %rollback_err, "rollback after a failed transaction scope failed");
                }
                Err(err)
            }
        }
    }

    /// Run `f` against an open handle and close it afterwards. Opens first
    /// if needed; outstanding savepoints are committed when `f` succeeds and
    /// rolled back when it fails.
    pub fn session<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        if self.state() == DatabaseState::Initialized {
            self.open()?;
        }
        let result = f(self);
        let settled = self.settle(result.is_ok());
        let closed = match self.state() {
            DatabaseState::Opened => self.close(),
            _ => Ok(()),
        };
        let value = result?;
        settled?;
        closed?;
        Ok(value)
    }

    fn settle(&self, commit: bool) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.state != DatabaseState::Opened || inner.tx_level() == 0 {
            return Ok(());
        }
        if commit {
            inner.engine.commit(0)?;
        } else {
            inner.engine.rollback(0)?;
        }
        inner.sync_levels();
        Ok(())
    }

    // Mapping access

    fn lookup(&self, key: Value, mode: SeekMode) -> Result<(Vec<u8>, Presence)> {
        let key = self.encode(key)?;
        let mut inner = self.lock_opened()?;
        let found = locate(inner.engine.as_mut(), &key, mode)?;
        Ok((key, found))
    }

    /// Value stored under `key`.
    pub fn get<K: Into<Value>>(&self, key: K) -> Result<Value> {
        match self.lookup(key.into(), SeekMode::Eq)? {
            (_, Presence::Found(raw)) => self.decode(raw),
            (key, _) => Err(Error::KeyNotFound(key)),
        }
    }

    /// Directional lookup. `Le` and `Ge` return the value of the nearest
    /// key on that side; `GeFast` only reports that one exists (`None`).
    pub fn get_with<K: Into<Value>>(&self, key: K, mode: SeekMode) -> Result<Option<Value>> {
        match self.lookup(key.into(), mode)? {
            (key, Presence::Missing) => Err(Error::KeyNotFound(key)),
            (_, Presence::Present) => Ok(None),
            (_, Presence::Found(raw)) => self.decode(raw).map(Some),
        }
    }

    /// Whether any key at or after `key` exists. The value is not read.
    pub fn exists_from<K: Into<Value>>(&self, key: K) -> Result<bool> {
        match self.lookup(key.into(), SeekMode::GeFast)? {
            (_, Presence::Missing) => Ok(false),
            _ => Ok(true),
        }
    }

    /// Whether `key` is stored.
    pub fn contains<K: Into<Value>>(&self, key: K) -> Result<bool> {
        match self.lookup(key.into(), SeekMode::Eq)? {
            (_, Presence::Missing) => Ok(false),
            _ => Ok(true),
        }
    }

    /// `Some` inserts, `None` removes (the key must exist).
    pub fn set<K: Into<Value>, V: Into<Value>>(&self, key: K, value: Option<V>) -> Result<()> {
        match value {
            Some(value) => self.insert(key, value),
            None => self.remove(key),
        }
    }

    /// Delete `key`, failing with `KeyNotFound` if it is not stored.
    pub fn remove<K: Into<Value>>(&self, key: K) -> Result<()> {
        let key = self.encode(key.into())?;
        let mut inner = self.lock_writable()?;
        if let Presence::Missing = locate(inner.engine.as_mut(), &key, SeekMode::Eq)? {
            return Err(Error::KeyNotFound(key));
        }
        inner.note_write();
        inner.engine.delete(&key)?;
        Ok(())
    }

    /// Delete a bounded range. Both bounds are required and no step is allowed.
    pub fn remove_range(&self, range: KeyRange) -> Result<()> {
        if range.step.is_some() {
            return Err(Error::usage("a step is not allowed when deleting a range"));
        }
        match range.start.zip(range.stop) {
            Some((start, stop)) => self.delete_range(start, stop),
            None => Err(Error::usage("deleting a range needs both a start and a stop")),
        }
    }

    /// Lazy view over `range`.
    pub fn slice(&self, range: KeyRange) -> Result<SliceView> {
        SliceView::new(self.clone(), range)
    }

    /// Resolve a read request.
    pub fn fetch(&self, request: Request) -> Result<Fetched> {
        match request {
            Request::Key(key) => self.get(key).map(Fetched::Value),
            Request::Seek(key, mode) => Ok(match self.get_with(key, mode)? {
                Some(value) => Fetched::Value(value),
                None => Fetched::Exists,
            }),
            Request::Range(range) => self.slice(range).map(Fetched::Slice),
        }
    }

    /// Apply a write.
    pub fn assign(&self, assignment: Assignment) -> Result<()> {
        match assignment {
            Assignment::Put(key, value) => self.insert(key, value),
            Assignment::Remove(key) => self.remove(key),
            Assignment::RemoveRange(range) => self.remove_range(range),
        }
    }

    /// Write every entry under one lock hold. Entries are encoded up front;
    /// the first engine failure stops the batch and earlier writes stay.
    pub fn update<I, K, V>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        let encoded = entries
            .into_iter()
            .map(|(k, v)| Ok((self.encode(k.into())?, self.encode(v.into())?)))
            .collect::<Result<Vec<_>>>()?;
        let mut inner = self.lock_writable()?;
        inner.note_write();
        for (key, value) in &encoded {
            inner.engine.insert(key, value)?;
        }
        Ok(encoded.len())
    }

    /// Number of stored keys. Scans the whole store.
    pub fn len(&self) -> Result<usize> {
        let mut inner = self.lock_opened()?;
        let engine = inner.engine.as_mut();
        let csr = engine.csr_open()?;
        let counted = (|| -> EngineResult<usize> {
            let mut count = 0usize;
            engine.csr_first(csr)?;
            while engine.csr_valid(csr) {
                count += 1;
                engine.csr_next(csr)?;
            }
            Ok(count)
        })();
        let closed = engine.csr_close(csr);
        let count = counted?;
        closed?;
        Ok(count)
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> Result<bool> {
        let mut inner = self.lock_opened()?;
        let engine = inner.engine.as_mut();
        let csr = engine.csr_open()?;
        let first = engine.csr_first(csr).map(|_| engine.csr_valid(csr));
        let closed = engine.csr_close(csr);
        let has_first = first?;
        closed?;
        Ok(!has_first)
    }

    // Views and cursors

    /// Lazy view over all keys in order.
    pub fn keys(&self) -> Result<KeysView> {
        self.ensure_opened()?;
        Ok(KeysView::new(self.clone()))
    }

    /// Lazy view over all values in key order.
    pub fn values(&self) -> Result<ValuesView> {
        self.ensure_opened()?;
        Ok(ValuesView::new(self.clone()))
    }

    /// Lazy view over all `(key, value)` pairs in key order.
    pub fn items(&self) -> Result<ItemsView> {
        self.ensure_opened()?;
        Ok(ItemsView::new(self.clone()))
    }

    /// A keys view that has already opened its cursor.
    pub fn iter(&self) -> Result<KeysView> {
        let mut keys = self.keys()?;
        keys.start()?;
        Ok(keys)
    }

    /// Cursor positioned at the first key.
    pub fn cursor(&self, mode: SeekMode) -> Result<Cursor> {
        Cursor::open(self.clone(), mode)
    }

    // Introspection

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.shared.options
    }

    pub fn compression(&self) -> Compression {
        self.shared.options.compression
    }

    pub fn text_mode(&self) -> bool {
        self.shared.options.text_mode
    }

    pub fn is_readonly(&self) -> bool {
        self.shared.options.readonly
    }

    /// Lifecycle state. A poisoned lock reads as closed.
    pub fn state(&self) -> DatabaseState {
        self.lock()
            .map(|inner| inner.state)
            .unwrap_or(DatabaseState::Closed)
    }

    /// Number of open savepoint levels.
    pub fn tx_level(&self) -> u32 {
        self.lock().map(|inner| inner.tx_level()).unwrap_or(0)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.shared.path)
            .field("state", &self.state())
            .field("mode", &if self.text_mode() { "text" } else { "binary" })
            .field("compression", &self.compression())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FaultyEngine;
    use tempfile::TempDir;

    fn text_db(dir: &TempDir) -> Database {
        Database::new(dir.path().join("db"), DatabaseOptions::text()).expect("Failed to construct")
    }

    #[test]
    fn test_state_machine() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = text_db(&dir);
        assert_eq!(db.state(), DatabaseState::Initialized);
        assert!(matches!(db.close(), Ok(())));
        assert_eq!(db.state(), DatabaseState::Closed);
        assert!(matches!(db.open(), Err(Error::Usage(_))));
        assert!(matches!(db.close(), Err(Error::Usage(_))));
    }

    #[test]
    fn test_operations_need_open() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = text_db(&dir);
        assert!(matches!(db.get("a"), Err(Error::Usage(_))));
        assert!(matches!(db.insert("a", "b"), Err(Error::Usage(_))));
        db.open().expect("Failed to open");
        assert!(matches!(db.open(), Err(Error::Usage(_))));
    }

    #[test]
    fn test_representation_mismatch() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = text_db(&dir);
        db.open().expect("Failed to open");
        assert!(matches!(db.insert(b"k", "v"), Err(Error::Usage(_))));
        assert!(matches!(db.insert("k", b"v"), Err(Error::Usage(_))));
    }

    #[test]
    fn test_debug_names_mode() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = text_db(&dir);
        let shown = format!("{:?}", db);
        assert!(shown.contains("text"));
        assert!(shown.contains("Initialized"));
    }

    #[test]
    fn test_handle_level_savepoints() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = text_db(&dir);
        db.open().expect("Failed to open");

        db.begin().unwrap();
        db.insert("a", "1").unwrap();
        db.begin().unwrap();
        assert_eq!(db.tx_level(), 2);
        db.insert("b", "2").unwrap();
        db.rollback().unwrap();
        assert_eq!(db.tx_level(), 1);
        db.commit().unwrap();
        assert_eq!(db.tx_level(), 0);

        assert_eq!(db.get("a").unwrap(), "1");
        assert!(db.get("b").unwrap_err().is_not_found());
        db.commit().expect("commit at level 0 is a no-op");
    }

    #[test]
    fn test_update_stops_at_first_engine_failure() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let engine = FaultyEngine::new().refuse_key("c");
        let db = Database::with_engine(dir.path().join("db"), DatabaseOptions::text(), Box::new(engine))
            .expect("Failed to construct");
        db.open().expect("Failed to open");

        let err = db
            .update([("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")])
            .unwrap_err();
        assert_eq!(err.kind(), lsmdb_core::ErrorKind::ResourceExhausted);
        // Entries before the failing one stay written, later ones never run.
        assert_eq!(db.get("a").unwrap(), "1");
        assert_eq!(db.get("b").unwrap(), "2");
        assert!(!db.contains("c").unwrap());
        assert!(!db.contains("d").unwrap());

        // A transaction makes the same batch all-or-nothing.
        let failed: Result<usize> = db.transaction_scope(|_| db.update([("e", "5"), ("c", "3")]));
        assert!(failed.is_err());
        assert!(!db.contains("e").unwrap());
        assert_eq!(db.tx_level(), 0);
    }
}
