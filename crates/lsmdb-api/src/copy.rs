//! Copying a store into another handle.
//!
//! The usual use is recompression: open the source as it is and the
//! destination with a different [`Compression`](crate::Compression), then
//! copy item by item.

use crate::database::Database;
use crate::value::Value;
use lsmdb_core::{Error, Result};
use tracing::{debug, info, warn};

/// Tuning for [`copy_database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Items written per destination transaction
    pub batch_size: usize,
    /// Re-read the destination afterwards and compare every item
    pub verify: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            verify: false,
        }
    }
}

/// Outcome of [`copy_database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyReport {
    /// Items written to the destination
    pub copied: u64,
    /// `true` when verification ran and every item matched
    pub verified: bool,
}

/// Convert a value read from one handle into the representation of another.
fn convert(value: Value, text: bool) -> Result<Value> {
    match (value, text) {
        (Value::Text(text), false) => Ok(Value::Bytes(text.into_bytes())),
        (Value::Bytes(bytes), true) => String::from_utf8(bytes)
            .map(Value::Text)
            .map_err(|_| Error::usage("binary data cannot be copied into a text database")),
        (value, _) => Ok(value),
    }
}

/// Copy every item of `source` into `dest`. Both handles must be open and
/// `dest` writable. Each batch is one transaction on `dest`.
///
/// ```rust,no_run
/// use lsmdb::{copy_database, Compression, CopyOptions, Database, DatabaseOptions};
///
/// let source = Database::connect("./plain", DatabaseOptions::default())?;
/// let dest = Database::connect(
///     "./packed",
///     DatabaseOptions::default().compression(Compression::Zstd),
/// )?;
/// let report = copy_database(&source, &dest, CopyOptions { verify: true, ..Default::default() })?;
/// assert!(report.verified);
/// # Ok::<(), lsmdb::Error>(())
/// ```
pub fn copy_database(source: &Database, dest: &Database, options: CopyOptions) -> Result<CopyReport> {
    if options.batch_size == 0 {
        return Err(Error::usage("batch_size must be positive"));
    }
    let text = dest.text_mode();
    let mut items = source.items()?;
    let mut copied = 0u64;

    loop {
        let mut batch = Vec::with_capacity(options.batch_size);
        for item in items.by_ref().take(options.batch_size) {
            let (key, value) = item?;
            batch.push((convert(key, text)?, convert(value, text)?));
        }
        if batch.is_empty() {
            break;
        }
        let written = dest.transaction_scope(|_| dest.update(batch))?;
        copied += written as u64;
        debug!(copied, "copy batch committed");
    }

    let verified = options.verify && verify(source, dest, text)?;
    info!(
        source = %source.path().display(),
        dest = %dest.path().display(),
        copied,
        verified,
        "database copied"
    );
    Ok(CopyReport { copied, verified })
}

fn verify(source: &Database, dest: &Database, text: bool) -> Result<bool> {
    for item in source.items()? {
        let (key, value) = item?;
        let key = convert(key, text)?;
        let expected = convert(value, text)?;
        match dest.get(key.clone()) {
            Ok(found) if found == expected => {}
            Ok(_) => {
                warn!(%key, "copied value differs");
                return Ok(false);
            }
            Err(err) if err.is_not_found() => {
                warn!(%key, "copied key is missing");
                return Ok(false);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}
