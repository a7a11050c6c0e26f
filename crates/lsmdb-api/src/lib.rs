//! # lsmdb
//!
//! An embedded, ordered key-value store with a mapping-style API: lazy
//! key/value/item views, strided slices in both directions, cursors,
//! nested transactions and optional lz4 or zstd block compression.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lsmdb::{Database, DatabaseOptions, KeyRange};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new("./my_store", DatabaseOptions::text())?;
//!     db.open()?;
//!
//!     db.insert("user:1", "Alice")?;
//!     db.insert("user:2", "Bob")?;
//!     db.insert("user:3", "Carol")?;
//!
//!     assert_eq!(db.get("user:2")?, "Bob");
//!     assert!(!db.contains("user:9")?);
//!
//!     // Every second user, newest first
//!     for item in db.slice(KeyRange::between("user:1", "user:3").step(-2))? {
//!         let (key, value) = item?;
//!         println!("{} = {}", key, value);
//!     }
//!
//!     db.remove("user:3")?;
//!     db.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! use lsmdb::{Database, DatabaseOptions};
//!
//! let db = Database::connect("./my_store", DatabaseOptions::text())?;
//! db.transaction_scope(|_tx| {
//!     db.insert("balance:alice", "90")?;
//!     db.insert("balance:bob", "110")?;
//!     Ok(())
//! })?;
//! # Ok::<(), lsmdb::Error>(())
//! ```
//!
//! ## Compression
//!
//! ```rust,no_run
//! use lsmdb::{Compression, Database, DatabaseOptions};
//!
//! let options = DatabaseOptions::default()
//!     .compression(Compression::Lz4)
//!     .compress_level(12);
//! let db = Database::connect("./packed", options)?;
//! # Ok::<(), lsmdb::Error>(())
//! ```
//!
//! A store remembers the codec it was created with; opening it with a
//! different one fails with an integrity error.
//!
//! ## Threads
//!
//! [`Database`] is `Clone + Send + Sync`. All clones share one engine behind
//! one mutex, taken for a single engine call at a time.

mod copy;
mod cursor;
mod database;
pub mod logging;
mod options;
mod slice;
mod state;
#[cfg(test)]
mod testing;
mod transaction;
mod value;
mod view;

pub use copy::{copy_database, CopyOptions, CopyReport};
pub use cursor::{Cursor, CursorIter};
pub use database::{Assignment, Database, Fetched, Info, Request, TreeSize};
pub use options::{
    safety_from_code, DatabaseOptions, BLOCK_SIZE_LIMIT_KB, MAX_AUTOFLUSH_KB, MIN_BLOCK_SIZE_KB,
};
pub use slice::{KeyRange, SliceView};
pub use state::{CursorState, DatabaseState, TransactionState, ViewState};
pub use transaction::Transaction;
pub use value::Value;
pub use view::{ItemsView, KeysView, ValuesView};

pub use lsmdb_compress::Compression;
pub use lsmdb_core::{
    Compressor, Engine, EngineError, EngineOption, EngineResult, Error, ErrorKind, LogCallback,
    Result, Safety, SeekMode, Status,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
