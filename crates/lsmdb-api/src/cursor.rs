//! Positionable, bidirectional cursors.

use crate::database::Database;
use crate::state::{CursorState, DatabaseState};
use crate::value::Value;
use lsmdb_core::{CursorId, Engine, EngineResult, Error, Result, SeekMode};
use std::cmp::Ordering;
use tracing::warn;

/// A movable position over the sorted key space.
///
/// A cursor owns one engine cursor until it is closed or dropped. Each call
/// takes the handle lock once, so cursors can be interleaved with writes on
/// the same handle; they see those writes.
///
/// ```rust,no_run
/// use lsmdb::{Database, DatabaseOptions, SeekMode};
///
/// let db = Database::connect("./data", DatabaseOptions::text())?;
/// let mut cursor = db.cursor(SeekMode::Ge)?;
/// if cursor.seek("user:", SeekMode::Ge)? {
///     for item in cursor.iter() {
///         let (key, value) = item?;
///         println!("{} = {}", key, value);
///     }
/// }
/// # Ok::<(), lsmdb::Error>(())
/// ```
pub struct Cursor {
    db: Database,
    csr: CursorId,
    state: CursorState,
    seek_mode: SeekMode,
}

impl Cursor {
    pub(crate) fn open(db: Database, seek_mode: SeekMode) -> Result<Self> {
        let csr = {
            let mut inner = db.lock_opened()?;
            let engine = inner.engine.as_mut();
            let csr = engine.csr_open()?;
            if let Err(err) = engine.csr_first(csr) {
                if let Err(close_err) = engine.csr_close(csr) {
                    warn!(error = %close_err, "failed to release cursor after a failed open");
                }
                return Err(err.into());
            }
            csr
        };
        Ok(Self {
            db,
            csr,
            state: CursorState::Opened,
            seek_mode,
        })
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Mode of the last seek (or the mode the cursor was opened with).
    pub fn seek_mode(&self) -> SeekMode {
        self.seek_mode
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            CursorState::Closed => Err(Error::usage("cursor is closed")),
            _ => Ok(()),
        }
    }

    fn ensure_movable(&self) -> Result<()> {
        match self.state {
            CursorState::Opened => Ok(()),
            CursorState::Iterating => Err(Error::usage("cursor is being iterated")),
            CursorState::Closed => Err(Error::usage("cursor is closed")),
        }
    }

    /// Run `op` on the engine cursor under the handle lock.
    fn with_engine<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Engine, CursorId) -> EngineResult<T>,
    {
        let mut inner = self.db.lock_opened()?;
        Ok(op(inner.engine.as_mut(), self.csr)?)
    }

    /// Move to the first key. Returns whether the cursor is valid.
    pub fn first(&mut self) -> Result<bool> {
        self.ensure_movable()?;
        self.with_engine(|engine, csr| {
            engine.csr_first(csr)?;
            Ok(engine.csr_valid(csr))
        })
    }

    /// Move to the last key. Returns whether the cursor is valid.
    pub fn last(&mut self) -> Result<bool> {
        self.ensure_movable()?;
        self.with_engine(|engine, csr| {
            engine.csr_last(csr)?;
            Ok(engine.csr_valid(csr))
        })
    }

    /// Position at `key` according to `mode`, which becomes the cursor's
    /// mode. Returns whether the cursor is valid.
    pub fn seek<K: Into<Value>>(&mut self, key: K, mode: SeekMode) -> Result<bool> {
        self.ensure_movable()?;
        let key = self.db.encode(key.into())?;
        self.seek_mode = mode;
        self.with_engine(|engine, csr| {
            engine.csr_seek(csr, &key, mode)?;
            Ok(engine.csr_valid(csr))
        })
    }

    fn step(&mut self, forward: bool) -> Result<bool> {
        self.ensure_movable()?;
        if self.seek_mode == SeekMode::Eq {
            return Ok(false);
        }
        self.with_engine(|engine, csr| {
            if !engine.csr_valid(csr) {
                return Ok(false);
            }
            if forward {
                engine.csr_next(csr)?;
            } else {
                engine.csr_prev(csr)?;
            }
            Ok(engine.csr_valid(csr))
        })
    }

    /// Step forward. A no-op returning `false` in `Eq` mode or when invalid.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<bool> {
        self.step(true)
    }

    /// Step backward. A no-op returning `false` in `Eq` mode or when invalid.
    pub fn previous(&mut self) -> Result<bool> {
        self.step(false)
    }

    /// Whether the cursor points at a key.
    pub fn is_valid(&self) -> Result<bool> {
        self.ensure_open()?;
        self.with_engine(|engine, csr| Ok(engine.csr_valid(csr)))
    }

    /// Current key, `None` when invalid.
    pub fn key(&self) -> Result<Option<Value>> {
        self.ensure_open()?;
        let raw = self.with_engine(|engine, csr| {
            if !engine.csr_valid(csr) {
                return Ok(None);
            }
            engine.csr_key(csr).map(Some)
        })?;
        raw.map(|raw| self.db.decode(raw)).transpose()
    }

    /// Current value, `None` when invalid.
    pub fn value(&self) -> Result<Option<Value>> {
        self.ensure_open()?;
        let raw = self.with_engine(|engine, csr| {
            if !engine.csr_valid(csr) {
                return Ok(None);
            }
            engine.csr_value(csr).map(Some)
        })?;
        raw.map(|raw| self.db.decode(raw)).transpose()
    }

    /// Current `(key, value)`, `None` when invalid.
    pub fn retrieve(&self) -> Result<Option<(Value, Value)>> {
        self.ensure_open()?;
        let raw = self.with_engine(read_entry)?;
        match raw {
            Some((key, value)) => Ok(Some((self.db.decode(key)?, self.db.decode(value)?))),
            None => Ok(None),
        }
    }

    /// Compare the current key with `key`. In `Ge` mode the result is
    /// reversed. Fails when the cursor is invalid.
    pub fn compare<K: Into<Value>>(&self, key: K) -> Result<Ordering> {
        self.ensure_open()?;
        let key = self.db.encode(key.into())?;
        let ordering = self.with_engine(|engine, csr| {
            if !engine.csr_valid(csr) {
                return Ok(None);
            }
            engine.csr_cmp(csr, &key).map(Some)
        })?;
        match ordering {
            Some(ordering) if self.seek_mode == SeekMode::Ge => Ok(ordering.reverse()),
            Some(ordering) => Ok(ordering),
            None => Err(Error::usage("cursor is not positioned on a key")),
        }
    }

    /// Release the engine cursor. Closing twice is a usage error.
    pub fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Err(Error::usage("cursor is already closed"));
        }
        self.state = CursorState::Closed;
        let mut inner = self.db.lock_opened()?;
        inner.engine.csr_close(self.csr)?;
        Ok(())
    }

    /// Iterate `(key, value)` pairs forward from the current position.
    /// The cursor rejects positioning calls until the iterator is dropped.
    pub fn iter(&mut self) -> CursorIter<'_> {
        let done = self.state != CursorState::Opened;
        if !done {
            self.state = CursorState::Iterating;
        }
        CursorIter { cursor: self, done }
    }
}

fn read_entry(engine: &mut dyn Engine, csr: CursorId) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>> {
    if !engine.csr_valid(csr) {
        return Ok(None);
    }
    Ok(Some((engine.csr_key(csr)?, engine.csr_value(csr)?)))
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state)
            .field("seek_mode", &self.seek_mode)
            .finish()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.state == CursorState::Closed {
            return;
        }
        let released = self.db.lock().and_then(|mut inner| {
            if inner.state != DatabaseState::Opened {
                return Ok(());
            }
            inner.engine.csr_close(self.csr).map_err(Error::from)
        });
        if let Err(err) = released {
            warn!(error = %err, "failed to release cursor on drop");
        }
    }
}

/// Borrowing iterator over a [`Cursor`].
pub struct CursorIter<'a> {
    cursor: &'a mut Cursor,
    done: bool,
}

impl Iterator for CursorIter<'_> {
    type Item = Result<(Value, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // An exact seek pins the cursor: yield its entry once.
        let exact = self.cursor.seek_mode == SeekMode::Eq;
        let pulled = self.cursor.with_engine(|engine, csr| {
            let entry = read_entry(engine, csr)?;
            if entry.is_some() && !exact {
                engine.csr_next(csr)?;
            }
            Ok(entry)
        });
        match pulled {
            Ok(Some((key, value))) => {
                self.done = exact;
                let decoded = self
                    .cursor
                    .db
                    .decode(key)
                    .and_then(|key| Ok((key, self.cursor.db.decode(value)?)));
                if decoded.is_err() {
                    self.done = true;
                }
                Some(decoded)
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl Drop for CursorIter<'_> {
    fn drop(&mut self) {
        if self.cursor.state == CursorState::Iterating {
            self.cursor.state = CursorState::Opened;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DatabaseOptions;
    use tempfile::TempDir;

    fn filled(dir: &TempDir) -> Database {
        let db = Database::connect(dir.path().join("db"), DatabaseOptions::text())
            .expect("Failed to open");
        for key in ["a", "b", "c", "d"] {
            db.insert(key, key.to_uppercase()).unwrap();
        }
        db
    }

    #[test]
    fn test_opens_on_first_key() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let cursor = db.cursor(SeekMode::Ge).unwrap();
        assert_eq!(cursor.key().unwrap().unwrap(), "a");
        assert_eq!(cursor.retrieve().unwrap().unwrap().1, "A");
    }

    #[test]
    fn test_walk_both_ways() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let mut cursor = db.cursor(SeekMode::Ge).unwrap();
        assert!(cursor.last().unwrap());
        assert!(cursor.previous().unwrap());
        assert_eq!(cursor.key().unwrap().unwrap(), "c");
        assert!(cursor.next().unwrap());
        assert!(!cursor.next().unwrap());
        assert!(cursor.key().unwrap().is_none());
        assert!(!cursor.next().unwrap());
    }

    #[test]
    fn test_eq_mode_does_not_step() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let mut cursor = db.cursor(SeekMode::Ge).unwrap();
        assert!(cursor.seek("b", SeekMode::Eq).unwrap());
        assert!(!cursor.next().unwrap());
        assert!(!cursor.previous().unwrap());
        assert_eq!(cursor.value().unwrap().unwrap(), "B");
        assert!(!cursor.seek("bb", SeekMode::Eq).unwrap());
    }

    #[test]
    fn test_compare_inverts_in_ge_mode() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let mut cursor = db.cursor(SeekMode::Le).unwrap();
        assert!(cursor.seek("b", SeekMode::Le).unwrap());
        assert_eq!(cursor.compare("c").unwrap(), Ordering::Less);
        assert!(cursor.seek("b", SeekMode::Ge).unwrap());
        assert_eq!(cursor.compare("c").unwrap(), Ordering::Greater);

        assert!(!cursor.seek("z", SeekMode::Ge).unwrap());
        assert!(matches!(cursor.compare("a"), Err(Error::Usage(_))));
    }

    #[test]
    fn test_compare_is_plain_outside_ge_mode() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let mut cursor = db.cursor(SeekMode::Eq).unwrap();
        for mode in [SeekMode::Eq, SeekMode::GeFast, SeekMode::Le] {
            assert!(cursor.seek("b", mode).unwrap());
            assert_eq!(cursor.compare("a").unwrap(), Ordering::Greater);
            assert_eq!(cursor.compare("b").unwrap(), Ordering::Equal);
            assert_eq!(cursor.compare("c").unwrap(), Ordering::Less);
        }
        assert!(cursor.seek("b", SeekMode::Ge).unwrap());
        assert_eq!(cursor.compare("a").unwrap(), Ordering::Less);
        assert_eq!(cursor.compare("b").unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_iterating_blocks_moves() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let mut cursor = db.cursor(SeekMode::Ge).unwrap();
        cursor.seek("c", SeekMode::Ge).unwrap();
        let rest: Vec<_> = cursor.iter().map(|r| r.unwrap().0).collect();
        assert_eq!(rest, vec![Value::from("c"), Value::from("d")]);
        assert_eq!(cursor.state(), CursorState::Opened);

        let mut iter = cursor.iter();
        assert!(iter.next().is_none());
        drop(iter);
        assert!(cursor.first().unwrap());
    }

    #[test]
    fn test_close_twice() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let mut cursor = db.cursor(SeekMode::Ge).unwrap();
        cursor.close().unwrap();
        assert!(matches!(cursor.close(), Err(Error::Usage(_))));
        assert!(matches!(cursor.first(), Err(Error::Usage(_))));
        assert!(matches!(cursor.key(), Err(Error::Usage(_))));
    }

    #[test]
    fn test_closed_handle_rejects_cursor() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let mut cursor = db.cursor(SeekMode::Ge).unwrap();
        db.close().unwrap();
        assert!(matches!(cursor.first(), Err(Error::Usage(_))));
    }
}
