//! Nested transactions.
//!
//! A [`Transaction`] owns one savepoint level of its handle. Transactions
//! nest: starting one while another is active opens the next level, and
//! an outer level cannot be settled while a level above it is still active.

use crate::database::{Database, Inner};
use crate::state::{DatabaseState, TransactionState};
use lsmdb_core::{Error, Result};
use std::sync::MutexGuard;
use tracing::{debug, warn};

/// One savepoint level.
///
/// `commit` makes the work done so far part of the enclosing level (or
/// durable at the outermost level) and keeps the transaction open for more
/// work. `rollback` discards everything since the transaction began or
/// last committed, and also keeps it open. Dropping the transaction rolls
/// back whatever was not committed and gives the level back.
///
/// ```rust,no_run
/// use lsmdb::{Database, DatabaseOptions};
///
/// let db = Database::connect("./data", DatabaseOptions::text())?;
/// let mut outer = db.transaction()?;
/// db.insert("a", "1")?;
/// {
///     let mut inner = db.transaction()?;
///     db.insert("b", "2")?;
///     inner.commit()?;
/// }
/// outer.rollback()?; // discards both writes
/// # Ok::<(), lsmdb::Error>(())
/// ```
pub struct Transaction {
    db: Database,
    level: u32,
    id: u64,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn begin(db: &Database) -> Result<Self> {
        let mut inner = db.lock_writable()?;
        let level = inner.tx_level() + 1;
        inner.engine.begin(level)?;
        let id = inner.claim_level(level);
        debug!(level, "transaction started");
        Ok(Self {
            db: db.clone(),
            level,
            id,
            state: TransactionState::Active,
        })
    }

    /// Savepoint level this transaction owns (1 for the outermost).
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Lock the handle for a settle call on this transaction's level.
    fn lock_level(&self, action: &str) -> Result<MutexGuard<'_, Inner>> {
        if self.state == TransactionState::Closed {
            return Err(Error::usage("transaction is already closed"));
        }
        let mut inner = self.db.lock_writable()?;
        inner.sync_levels();
        if !inner.owns_level(self.level, self.id) {
            return Err(Error::usage(format!(
                "cannot {}: level {} was closed by an enclosing transaction",
                action, self.level
            )));
        }
        if inner.nested_unsettled(self.level) {
            return Err(Error::usage(format!(
                "cannot {} while a nested transaction is active",
                action
            )));
        }
        Ok(inner)
    }

    /// Fold the work done so far into the enclosing level. The transaction
    /// stays active and keeps its level for further work.
    pub fn commit(&mut self) -> Result<()> {
        let mut inner = self.lock_level("commit")?;
        inner.engine.commit(self.level - 1)?;
        inner.engine.begin(self.level)?;
        inner.sync_levels();
        inner.set_settled(self.level, true);
        debug!(level = self.level, "transaction committed");
        Ok(())
    }

    /// Discard the work done since the transaction began or last committed.
    /// The transaction stays active.
    pub fn rollback(&mut self) -> Result<()> {
        let mut inner = self.lock_level("roll back")?;
        inner.engine.rollback(self.level)?;
        inner.sync_levels();
        inner.set_settled(self.level, true);
        debug!(level = self.level, "transaction rolled back");
        Ok(())
    }

    /// Settle one last time and give the level back: the end of a
    /// transaction scope. If settling fails the level is kept, so that
    /// dropping the transaction rolls it back.
    pub(crate) fn finish(&mut self, commit: bool) -> Result<()> {
        if commit {
            self.commit()?;
        } else {
            self.rollback()?;
        }
        self.release()
    }

    /// Close the transaction, handing its (settled) level back to the
    /// enclosing one.
    fn release(&mut self) -> Result<()> {
        if self.state == TransactionState::Closed {
            return Ok(());
        }
        self.state = TransactionState::Closed;
        let mut inner = self.db.lock()?;
        inner.sync_levels();
        if inner.state != DatabaseState::Opened || !inner.owns_level(self.level, self.id) {
            return Ok(());
        }
        inner.engine.commit(self.level - 1)?;
        inner.sync_levels();
        Ok(())
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("level", &self.level)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Closed {
            return;
        }
        let rolled_back = self.db.lock().and_then(|mut inner| {
            inner.sync_levels();
            if inner.state != DatabaseState::Opened || !inner.owns_level(self.level, self.id) {
                return Ok(());
            }
            if inner.level_settled(self.level) {
                debug!(level = self.level, "transaction dropped");
            } else {
                warn!(level = self.level, "transaction dropped before settling, rolling back");
            }
            inner.engine.rollback(self.level)?;
            inner.set_settled(self.level, true);
            Ok(())
        });
        if let Err(err) = rolled_back {
            warn!(level = self.level, error = %err, "rollback of dropped transaction failed");
        }
        if let Err(err) = self.release() {
            warn!(level = self.level, error = %err, "failed to release transaction level");
        }
    }
}
