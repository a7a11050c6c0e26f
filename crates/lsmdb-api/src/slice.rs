//! Bounded, strided slice views.

use crate::database::Database;
use crate::state::ViewState;
use crate::value::Value;
use crate::view::{read_parts, release_cursor, Part};
use lsmdb_core::{CursorId, Engine, EngineResult, Error, Result, SeekMode};
use std::cmp::Ordering;

/// Bounds and stride of a slice, `start:stop:step`.
///
/// Both bounds are inclusive. A negative step walks the store backward;
/// the bounds keep their ascending order and the walk runs from `stop`
/// down to `start`:
///
/// ```rust
/// use lsmdb::KeyRange;
///
/// // k99, k98, ..., k90
/// let range = KeyRange::between("k90", "k99").step(-1);
/// assert!(!range.is_forward());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyRange {
    pub start: Option<Value>,
    pub stop: Option<Value>,
    pub step: Option<i64>,
}

impl KeyRange {
    /// Everything.
    pub fn full() -> Self {
        Self::default()
    }

    /// `start..=stop`.
    pub fn between<S: Into<Value>, E: Into<Value>>(start: S, stop: E) -> Self {
        Self {
            start: Some(start.into()),
            stop: Some(stop.into()),
            step: None,
        }
    }

    /// From `start` to the end.
    pub fn starting_at<S: Into<Value>>(start: S) -> Self {
        Self {
            start: Some(start.into()),
            ..Self::default()
        }
    }

    /// From the beginning to `stop`.
    pub fn ending_at<E: Into<Value>>(stop: E) -> Self {
        Self {
            stop: Some(stop.into()),
            ..Self::default()
        }
    }

    pub fn step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn is_forward(&self) -> bool {
        self.step.unwrap_or(1) > 0
    }
}

/// Lazy sequence of `(key, value)` pairs over a [`KeyRange`].
///
/// The first pull seeks to the walk's starting key; every later pull moves
/// one key at a time and yields every `|step|`-th one. Not restartable.
pub struct SliceView {
    db: Database,
    csr: Option<CursorId>,
    state: ViewState,
    /// Where the walk begins, encoded
    from: Option<Vec<u8>>,
    /// Where the walk ends (inclusive), encoded
    until: Option<Vec<u8>>,
    step: u64,
    forward: bool,
    counter: u64,
}

impl SliceView {
    pub(crate) fn new(db: Database, range: KeyRange) -> Result<Self> {
        let step = range.step.unwrap_or(1);
        if step == 0 {
            return Err(Error::usage("slice step cannot be zero"));
        }
        let forward = step > 0;
        let start = range.start.map(|v| db.encode(v)).transpose()?;
        let stop = range.stop.map(|v| db.encode(v)).transpose()?;
        let (from, until) = if forward { (start, stop) } else { (stop, start) };
        db.ensure_opened()?;
        Ok(Self {
            db,
            csr: None,
            state: ViewState::Unstarted,
            from,
            until,
            step: step.unsigned_abs(),
            forward,
            counter: 0,
        })
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    /// Whether the walk goes in ascending key order.
    pub fn is_forward(&self) -> bool {
        self.forward
    }

    fn past_until(&self, engine: &dyn Engine, csr: CursorId) -> EngineResult<bool> {
        let until = match &self.until {
            Some(until) => until,
            None => return Ok(false),
        };
        let ordering = engine.csr_cmp(csr, until)?;
        Ok(match self.forward {
            true => ordering == Ordering::Greater,
            false => ordering == Ordering::Less,
        })
    }

    /// Position the fresh cursor and report whether it may be yielded.
    fn seek_start(&self, engine: &mut dyn Engine, csr: CursorId) -> EngineResult<bool> {
        match (&self.from, self.forward) {
            (Some(from), true) => engine.csr_seek(csr, from, SeekMode::Ge)?,
            (Some(from), false) => engine.csr_seek(csr, from, SeekMode::Le)?,
            (None, true) => engine.csr_first(csr)?,
            (None, false) => engine.csr_last(csr)?,
        }
        Ok(engine.csr_valid(csr) && !self.past_until(engine, csr)?)
    }

    /// Advance to the next position the stride selects.
    fn advance(&mut self, engine: &mut dyn Engine, csr: CursorId) -> EngineResult<bool> {
        while engine.csr_valid(csr) {
            if self.forward {
                engine.csr_next(csr)?;
            } else {
                engine.csr_prev(csr)?;
            }
            if !engine.csr_valid(csr) || self.past_until(engine, csr)? {
                break;
            }
            self.counter += 1;
            if self.counter % self.step == 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn finish(&mut self) {
        self.state = ViewState::Exhausted;
        if let Some(csr) = self.csr.take() {
            release_cursor(&self.db, csr);
        }
    }

    fn pull(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let db = self.db.clone();
        let mut inner = db.lock_opened()?;
        let engine = inner.engine.as_mut();

        let ready = match self.csr {
            None => {
                let csr = engine.csr_open()?;
                self.csr = Some(csr);
                self.state = ViewState::Started;
                self.seek_start(engine, csr)?
            }
            Some(csr) => self.advance(engine, csr)?,
        };
        if !ready {
            return Ok(None);
        }
        let csr = match self.csr {
            Some(csr) => csr,
            None => return Ok(None),
        };
        match read_parts(engine, csr, Part::Both)? {
            (Some(key), Some(value)) => Ok(Some((key, value))),
            _ => Ok(None),
        }
    }
}

impl Iterator for SliceView {
    type Item = Result<(Value, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == ViewState::Exhausted {
            return None;
        }
        let decoded = match self.pull() {
            Ok(Some((key, value))) => self
                .db
                .decode(key)
                .and_then(|key| Ok((key, self.db.decode(value)?))),
            Ok(None) => {
                self.finish();
                return None;
            }
            Err(err) => Err(err),
        };
        if decoded.is_err() {
            self.finish();
        }
        Some(decoded)
    }
}

impl std::fmt::Debug for SliceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceView")
            .field("state", &self.state)
            .field("step", &self.step)
            .field("forward", &self.forward)
            .field("counter", &self.counter)
            .finish()
    }
}

impl Drop for SliceView {
    fn drop(&mut self) {
        if let Some(csr) = self.csr.take() {
            release_cursor(&self.db, csr);
        }
    }
}
