// Crash recovery
//
// Replays the log and keeps only what a reader of the store should see:
// - mutations written outside a group are kept as they are
// - mutations between BeginTx and CommitTx are kept only if the commit made
//   it to disk, and are emitted at the commit's position
// - a Checkpoint drops everything before it
// - a corrupt frame ends replay; what came before it stands

use crate::{WalReader, WalRecord};
use lsmdb_core::{EngineResult, Status};
use std::path::PathBuf;
use tracing::{info, warn};

/// Replays a log directory.
pub struct RecoveryManager {
    wal_dir: PathBuf,
}

/// Counters gathered during replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub segments: usize,
    pub total_records: usize,
    pub recovered_records: usize,
    pub transactions_started: usize,
    pub transactions_committed: usize,
    pub transactions_incomplete: usize,
    pub checkpoints: usize,
    pub torn_tails: usize,
    pub stopped_at_corruption: bool,
}

impl RecoveryManager {
    pub fn new(wal_dir: impl Into<PathBuf>) -> Self {
        Self {
            wal_dir: wal_dir.into(),
        }
    }

    /// Mutations to re-apply, in log order.
    pub fn recover(&self) -> EngineResult<Vec<WalRecord>> {
        self.recover_with_stats().map(|(records, _)| records)
    }

    pub fn recover_with_stats(&self) -> EngineResult<(Vec<WalRecord>, RecoveryStats)> {
        let mut reader = WalReader::new(&self.wal_dir)?;
        let mut stats = RecoveryStats {
            segments: reader.segment_count(),
            ..RecoveryStats::default()
        };

        let mut recovered: Vec<WalRecord> = Vec::new();
        let mut open_group: Option<(u64, Vec<WalRecord>)> = None;

        loop {
            let record = match reader.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(err) if err.status == Status::Corrupt => {
                    warn!(error = %err, "log replay stopped at a corrupt record");
                    stats.stopped_at_corruption = true;
                    break;
                }
                Err(err) => return Err(err),
            };
            stats.total_records += 1;

            match record {
                WalRecord::BeginTx { tx_id } => {
                    stats.transactions_started += 1;
                    if open_group.is_some() {
                        stats.transactions_incomplete += 1;
                    }
                    open_group = Some((tx_id, Vec::new()));
                }
                WalRecord::CommitTx { tx_id } => match open_group.take() {
                    Some((open_id, records)) if open_id == tx_id => {
                        stats.transactions_committed += 1;
                        recovered.extend(records);
                    }
                    other => {
                        warn!(tx_id, "commit marker without matching begin");
                        open_group = other;
                    }
                },
                WalRecord::Checkpoint { .. } => {
                    stats.checkpoints += 1;
                    recovered.clear();
                }
                mutation => match open_group.as_mut() {
                    Some((_, records)) => records.push(mutation),
                    None => recovered.push(mutation),
                },
            }
        }

        if open_group.is_some() {
            stats.transactions_incomplete += 1;
        }
        stats.torn_tails = reader.torn_tails();
        stats.recovered_records = recovered.len();

        if stats.total_records > 0 {
            info!(
                records = stats.recovered_records,
                committed = stats.transactions_committed,
                incomplete = stats.transactions_incomplete,
                "log replayed"
            );
        }

        Ok((recovered, stats))
    }
}
