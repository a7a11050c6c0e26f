//! # lsmdb Core
//!
//! Core types shared by the lsmdb crates: the error taxonomy, the engine
//! boundary trait, the block compressor trait and the seek/safety enums.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! Users should depend on the main [`lsmdb`](https://crates.io/crates/lsmdb)
//! crate instead, which re-exports everything needed from here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compress;
pub mod engine;
pub mod error;
pub mod types;

pub use compress::{CompressionError, Compressor};
pub use engine::{
    CursorId, Engine, EngineError, EngineOption, EngineResult, InfoKind, LogCallback, Status,
};
pub use error::{Error, ErrorKind, Result};
pub use types::{Safety, SeekMode};
