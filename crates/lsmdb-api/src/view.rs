//! Lazy key, value and item views.
//!
//! Each view opens its own engine cursor on the first pull and walks the
//! store forward once. The handle lock is taken per pull, never held
//! between pulls, so the caller may write to the store while iterating.

use crate::database::Database;
use crate::state::{DatabaseState, ViewState};
use crate::value::Value;
use lsmdb_core::{CursorId, Engine, EngineResult, Error, Result};
use tracing::warn;

/// Which parts of an entry a pull reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Part {
    Key,
    Value,
    Both,
}

pub(crate) type RawEntry = (Option<Vec<u8>>, Option<Vec<u8>>);

pub(crate) fn read_parts(engine: &dyn Engine, csr: CursorId, part: Part) -> EngineResult<RawEntry> {
    let key = match part {
        Part::Key | Part::Both => Some(engine.csr_key(csr)?),
        Part::Value => None,
    };
    let value = match part {
        Part::Value | Part::Both => Some(engine.csr_value(csr)?),
        Part::Key => None,
    };
    Ok((key, value))
}

/// Release a view's engine cursor if the handle is still open.
pub(crate) fn release_cursor(db: &Database, csr: CursorId) {
    let released = db.lock().and_then(|mut inner| {
        if inner.state != DatabaseState::Opened {
            return Ok(());
        }
        inner.engine.csr_close(csr).map_err(Error::from)
    });
    if let Err(err) = released {
        warn!(error = %err, "failed to release view cursor");
    }
}

/// Forward single-pass scan shared by the three views.
pub(crate) struct Scan {
    db: Database,
    csr: Option<CursorId>,
    state: ViewState,
    /// Step failure held back so the entry read before it is not lost
    deferred: Option<Error>,
}

impl Scan {
    fn new(db: Database) -> Self {
        Self {
            db,
            csr: None,
            state: ViewState::Unstarted,
            deferred: None,
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.state != ViewState::Unstarted {
            return Ok(());
        }
        let mut inner = self.db.lock_opened()?;
        let engine = inner.engine.as_mut();
        let csr = engine.csr_open()?;
        self.csr = Some(csr);
        self.state = ViewState::Started;
        engine.csr_first(csr)?;
        Ok(())
    }

    fn finish(&mut self) {
        self.state = ViewState::Exhausted;
        if let Some(csr) = self.csr.take() {
            release_cursor(&self.db, csr);
        }
    }

    fn pull(&mut self, part: Part) -> Option<Result<RawEntry>> {
        if self.state == ViewState::Exhausted {
            return None;
        }
        if let Err(err) = self.start() {
            self.finish();
            return Some(Err(err));
        }
        if let Some(err) = self.deferred.take() {
            self.finish();
            return Some(Err(err));
        }
        let csr = self.csr?;
        let pulled = self.db.lock_opened().and_then(|mut inner| {
            let engine = inner.engine.as_mut();
            if !engine.csr_valid(csr) {
                return Ok(None);
            }
            let entry = read_parts(engine, csr, part)?;
            Ok(Some((entry, engine.csr_next(csr))))
        });
        let pulled = pulled.map(|found| {
            found.map(|(entry, stepped)| {
                if let Err(err) = stepped {
                    self.deferred = Some(err.into());
                }
                entry
            })
        });
        match pulled {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(err) => {
                self.finish();
                Some(Err(err))
            }
        }
    }

    fn decode(&mut self, raw: Option<Vec<u8>>) -> Result<Value> {
        let decoded = match raw {
            Some(raw) => self.db.decode(raw),
            None => Err(Error::Integrity("view read returned no data".into())),
        };
        if decoded.is_err() {
            self.finish();
        }
        decoded
    }
}

impl Drop for Scan {
    fn drop(&mut self) {
        if let Some(csr) = self.csr.take() {
            release_cursor(&self.db, csr);
        }
    }
}

macro_rules! view_common {
    ($view:ident) => {
        impl $view {
            pub(crate) fn new(db: Database) -> Self {
                Self {
                    scan: Scan::new(db),
                }
            }

            /// Open the cursor without pulling anything.
            pub fn start(&mut self) -> Result<()> {
                let started = self.scan.start();
                if started.is_err() {
                    self.scan.finish();
                }
                started
            }

            pub fn state(&self) -> ViewState {
                self.scan.state
            }
        }

        impl std::fmt::Debug for $view {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($view))
                    .field("state", &self.scan.state)
                    .finish()
            }
        }
    };
}

/// Keys in ascending order.
pub struct KeysView {
    scan: Scan,
}

/// Values in ascending key order.
pub struct ValuesView {
    scan: Scan,
}

/// `(key, value)` pairs in ascending key order.
pub struct ItemsView {
    scan: Scan,
}

view_common!(KeysView);
view_common!(ValuesView);
view_common!(ItemsView);

impl Iterator for KeysView {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(match self.scan.pull(Part::Key)? {
            Ok((key, _)) => self.scan.decode(key),
            Err(err) => Err(err),
        })
    }
}

impl Iterator for ValuesView {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(match self.scan.pull(Part::Value)? {
            Ok((_, value)) => self.scan.decode(value),
            Err(err) => Err(err),
        })
    }
}

impl Iterator for ItemsView {
    type Item = Result<(Value, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(match self.scan.pull(Part::Both)? {
            Ok((key, value)) => self
                .scan
                .decode(key)
                .and_then(|key| Ok((key, self.scan.decode(value)?))),
            Err(err) => Err(err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DatabaseOptions;
    use crate::testing::FaultyEngine;
    use tempfile::TempDir;

    fn filled(dir: &TempDir) -> Database {
        let db = Database::connect(dir.path().join("db"), DatabaseOptions::default())
            .expect("Failed to open");
        db.update([(b"b", b"2"), (b"a", b"1"), (b"c", b"3")]).unwrap();
        db
    }

    #[test]
    fn test_views_walk_in_key_order() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let keys: Vec<Value> = db.keys().unwrap().map(|k| k.unwrap()).collect();
        assert_eq!(keys, vec![Value::from(b"a"), Value::from(b"b"), Value::from(b"c")]);
        let values: Vec<Value> = db.values().unwrap().map(|v| v.unwrap()).collect();
        assert_eq!(values, vec![Value::from(b"1"), Value::from(b"2"), Value::from(b"3")]);
        let items = db.items().unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(items[2], (Value::from(b"c"), Value::from(b"3")));
    }

    #[test]
    fn test_exhausted_view_stays_exhausted() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let mut keys = db.keys().unwrap();
        assert_eq!(keys.state(), ViewState::Unstarted);
        assert_eq!(keys.by_ref().count(), 3);
        assert_eq!(keys.state(), ViewState::Exhausted);
        db.insert(b"d", b"4").unwrap();
        assert!(keys.next().is_none());
    }

    #[test]
    fn test_iter_is_started() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let iter = db.iter().unwrap();
        assert_eq!(iter.state(), ViewState::Started);
    }

    #[test]
    fn test_closed_handle_ends_view_with_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = filled(&dir);
        let mut keys = db.keys().unwrap();
        assert!(keys.next().unwrap().is_ok());
        db.close().unwrap();
        assert!(matches!(keys.next(), Some(Err(Error::Usage(_)))));
        assert!(keys.next().is_none());
    }

    #[test]
    fn test_step_failure_surfaces_after_current_entry() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let engine = FaultyEngine::new().fail_steps_after(1);
        let db = Database::with_engine(dir.path().join("db"), DatabaseOptions::text(), Box::new(engine))
            .expect("Failed to construct");
        db.open().expect("Failed to open");
        db.update([("a", "1"), ("b", "2"), ("c", "3")]).unwrap();

        let mut items = db.items().unwrap();
        assert_eq!(items.next().unwrap().unwrap(), (Value::from("a"), Value::from("1")));
        // The second step fails after "b" was read; "b" still comes out.
        assert_eq!(items.next().unwrap().unwrap(), (Value::from("b"), Value::from("2")));
        assert!(matches!(items.next(), Some(Err(Error::Io(_)))));
        assert!(items.next().is_none());
        assert_eq!(items.state(), ViewState::Exhausted);
    }
}
