//! Engine wrapper that injects failures into an otherwise working store.

use lsmdb_core::{
    Compressor, CursorId, Engine, EngineError, EngineOption, EngineResult, InfoKind, LogCallback,
    SeekMode, Status,
};
use lsmdb_storage::LsmEngine;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

pub(crate) struct FaultyEngine {
    inner: LsmEngine,
    refused_key: Option<Vec<u8>>,
    /// Successful `csr_next` calls left before they start failing
    steps_left: Option<usize>,
}

impl FaultyEngine {
    pub(crate) fn new() -> Self {
        Self {
            inner: LsmEngine::new(),
            refused_key: None,
            steps_left: None,
        }
    }

    /// Fail every insert of `key` as if the store were full.
    pub(crate) fn refuse_key(mut self, key: &str) -> Self {
        self.refused_key = Some(key.as_bytes().to_vec());
        self
    }

    /// Let `steps` cursor steps through, then fail each one with an I/O error.
    pub(crate) fn fail_steps_after(mut self, steps: usize) -> Self {
        self.steps_left = Some(steps);
        self
    }
}

impl Engine for FaultyEngine {
    fn configure(&mut self, option: EngineOption) -> EngineResult<()> {
        self.inner.configure(option)
    }

    fn set_compressor(&mut self, compressor: Arc<dyn Compressor>) -> EngineResult<()> {
        self.inner.set_compressor(compressor)
    }

    fn set_logger(&mut self, logger: LogCallback) {
        self.inner.set_logger(logger)
    }

    fn open(&mut self, path: &Path) -> EngineResult<()> {
        self.inner.open(path)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.inner.close()
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        if self.refused_key.as_deref() == Some(key) {
            return Err(EngineError::new(Status::Full, "no room for this key"));
        }
        self.inner.insert(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<()> {
        self.inner.delete(key)
    }

    fn delete_range(&mut self, start: &[u8], end: &[u8]) -> EngineResult<()> {
        self.inner.delete_range(start, end)
    }

    fn begin(&mut self, level: u32) -> EngineResult<()> {
        self.inner.begin(level)
    }

    fn commit(&mut self, level: u32) -> EngineResult<()> {
        self.inner.commit(level)
    }

    fn rollback(&mut self, level: u32) -> EngineResult<()> {
        self.inner.rollback(level)
    }

    fn transaction_level(&self) -> u32 {
        self.inner.transaction_level()
    }

    fn csr_open(&mut self) -> EngineResult<CursorId> {
        self.inner.csr_open()
    }

    fn csr_close(&mut self, csr: CursorId) -> EngineResult<()> {
        self.inner.csr_close(csr)
    }

    fn csr_seek(&mut self, csr: CursorId, key: &[u8], mode: SeekMode) -> EngineResult<()> {
        self.inner.csr_seek(csr, key, mode)
    }

    fn csr_first(&mut self, csr: CursorId) -> EngineResult<()> {
        self.inner.csr_first(csr)
    }

    fn csr_last(&mut self, csr: CursorId) -> EngineResult<()> {
        self.inner.csr_last(csr)
    }

    fn csr_next(&mut self, csr: CursorId) -> EngineResult<()> {
        match self.steps_left.as_mut() {
            Some(0) => return Err(EngineError::io("read failed")),
            Some(left) => *left -= 1,
            None => {}
        }
        self.inner.csr_next(csr)
    }

    fn csr_prev(&mut self, csr: CursorId) -> EngineResult<()> {
        self.inner.csr_prev(csr)
    }

    fn csr_valid(&self, csr: CursorId) -> bool {
        self.inner.csr_valid(csr)
    }

    fn csr_key(&self, csr: CursorId) -> EngineResult<Vec<u8>> {
        self.inner.csr_key(csr)
    }

    fn csr_value(&self, csr: CursorId) -> EngineResult<Vec<u8>> {
        self.inner.csr_value(csr)
    }

    fn csr_cmp(&self, csr: CursorId, key: &[u8]) -> EngineResult<Ordering> {
        self.inner.csr_cmp(csr, key)
    }

    fn work(&mut self, nmerge: u32, nkb: u32) -> EngineResult<u32> {
        self.inner.work(nmerge, nkb)
    }

    fn flush(&mut self) -> EngineResult<()> {
        self.inner.flush()
    }

    fn checkpoint(&mut self) -> EngineResult<u64> {
        self.inner.checkpoint()
    }

    fn info(&self, kind: InfoKind) -> EngineResult<u64> {
        self.inner.info(kind)
    }
}
