//! Lifecycle tags of the handle and its children.

use std::fmt;

/// Lifecycle of a [`Database`](crate::Database). Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseState {
    /// Constructed and configured, not opened yet
    Initialized,
    /// Open for reads (and writes unless read-only)
    Opened,
    /// Closed; every further call is a usage error
    Closed,
}

impl fmt::Display for DatabaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatabaseState::Initialized => "initialized",
            DatabaseState::Opened => "opened",
            DatabaseState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a [`Cursor`](crate::Cursor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorState {
    /// Usable
    Opened,
    /// Lent to an iterator; positioning calls are rejected
    Iterating,
    /// Released
    Closed,
}

/// Progress of an iterator or slice view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewState {
    /// No cursor yet
    Unstarted,
    /// Cursor open, yielding
    Started,
    /// Done; yields nothing more
    Exhausted,
}

/// Lifecycle of a [`Transaction`](crate::Transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Work can still be committed or rolled back
    Active,
    /// Ended by a scope exit or drop; the level is given back
    Closed,
}
